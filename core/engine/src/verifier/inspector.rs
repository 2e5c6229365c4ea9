use std::path::Path;
use std::sync::Arc;

use ort::tensor::TensorElementDataType;
use ort::{Environment, GraphOptimizationLevel, SessionBuilder};
use tracing::debug;

use crate::error::{EngineError, EngineResult};
use crate::graph_family::{Dimension, ElementType, GraphInterface, TensorDescriptor};
use crate::onnx_utils::build_environment;

/// 外部推理能力：图文件 → 声明的输入输出接口（不执行图）
pub trait GraphInspector {
    fn load_interface(&self, path: &Path) -> EngineResult<GraphInterface>;
}

/// 用 ONNX Runtime 会话读取接口
pub struct OrtGraphInspector {
    env: Arc<Environment>,
}

impl OrtGraphInspector {
    pub fn new() -> EngineResult<Self> {
        Ok(Self {
            env: build_environment("graph_verifier")?,
        })
    }
}

fn to_shape(dimensions: &[Option<u32>]) -> Vec<Dimension> {
    dimensions
        .iter()
        .map(|d| match d {
            Some(size) => Dimension::Fixed(u64::from(*size)),
            None => Dimension::Dynamic,
        })
        .collect()
}

fn element_type_of(data_type: &TensorElementDataType) -> ElementType {
    match data_type {
        TensorElementDataType::Float32 => ElementType::Float32,
        TensorElementDataType::Float16 => ElementType::Float16,
        TensorElementDataType::Bfloat16 => ElementType::Bfloat16,
        TensorElementDataType::Float64 => ElementType::Float64,
        TensorElementDataType::Int64 => ElementType::Int64,
        TensorElementDataType::Int32 => ElementType::Int32,
        TensorElementDataType::Int16 => ElementType::Int16,
        TensorElementDataType::Int8 => ElementType::Int8,
        TensorElementDataType::Uint8 => ElementType::Uint8,
        TensorElementDataType::Uint16 => ElementType::Uint16,
        TensorElementDataType::Uint32 => ElementType::Uint32,
        TensorElementDataType::Uint64 => ElementType::Uint64,
        TensorElementDataType::String => ElementType::String,
        // 引擎版本新增的类型原样保留名字
        #[allow(unreachable_patterns)]
        other => ElementType::Other(format!("{other:?}")),
    }
}

impl GraphInspector for OrtGraphInspector {
    fn load_interface(&self, path: &Path) -> EngineResult<GraphInterface> {
        let unloadable = |message: String| EngineError::ArtifactUnloadable {
            path: path.to_path_buf(),
            message,
        };

        // 关掉图优化，只要声明的接口
        let session = SessionBuilder::new(&self.env)
            .map_err(|e| unloadable(format!("failed to create session builder: {e}")))?
            .with_optimization_level(GraphOptimizationLevel::Disable)
            .map_err(|e| unloadable(format!("failed to configure session: {e}")))?
            .with_model_from_file(path)
            .map_err(|e| unloadable(e.to_string()))?;

        let inputs = session
            .inputs
            .iter()
            .map(|input| {
                TensorDescriptor::new(
                    input.name.clone(),
                    to_shape(&input.dimensions),
                    element_type_of(&input.input_type),
                )
            })
            .collect::<Vec<_>>();
        let outputs = session
            .outputs
            .iter()
            .map(|output| {
                TensorDescriptor::new(
                    output.name.clone(),
                    to_shape(&output.dimensions),
                    element_type_of(&output.output_type),
                )
            })
            .collect::<Vec<_>>();

        debug!(
            path = %path.display(),
            inputs = inputs.len(),
            outputs = outputs.len(),
            "graph interface loaded"
        );

        Ok(GraphInterface { inputs, outputs })
    }
}
