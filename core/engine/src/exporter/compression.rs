use std::path::{Path, PathBuf};

use tracing::info;

use super::config::{CompressionMode, TargetArch};
use super::python::PythonRuntime;
use crate::error::{EngineError, EngineResult};
use crate::graph_family::GraphRole;

/// ONNX Runtime 动态量化：argv = [src, dst]
const DYNAMIC_INT8_SCRIPT: &str = r#"
import sys
from onnxruntime.quantization import quantize_dynamic, QuantType
quantize_dynamic(sys.argv[1], sys.argv[2], weight_type=QuantType.QUInt8)
"#;

/// Optimum ORTQuantizer 目标架构量化：argv = [model_dir, file_name, save_dir, arch]
const TARGET_ARCH_SCRIPT: &str = r#"
import sys
from optimum.onnxruntime import ORTQuantizer
from optimum.onnxruntime.configuration import AutoQuantizationConfig
model_dir, file_name, save_dir, arch = sys.argv[1:5]
qconfig = getattr(AutoQuantizationConfig, arch)(is_static=False, per_channel=False)
quantizer = ORTQuantizer.from_pretrained(model_dir, file_name=file_name)
quantizer.quantize(save_dir=save_dir, quantization_config=qconfig)
"#;

/// 外部压缩（量化）能力：图 → 更小的图，接口不变
pub trait GraphCompressor {
    fn check_available(&self, mode: CompressionMode) -> EngineResult<()>;

    /// 把 `source` 压缩后写进 `dest_dir`，返回产物路径
    ///
    /// 调用方负责把产物挪到最终文件名，这里不触碰 `source` 所在目录。
    fn compress(
        &self,
        role: GraphRole,
        source: &Path,
        dest_dir: &Path,
        mode: CompressionMode,
    ) -> EngineResult<PathBuf>;
}

/// 通过 Python 调用 ONNX Runtime / Optimum 量化
#[derive(Debug, Clone)]
pub struct OnnxRuntimeQuantizer {
    python: PythonRuntime,
    target_arch: TargetArch,
}

impl OnnxRuntimeQuantizer {
    pub fn new(python: PythonRuntime, target_arch: TargetArch) -> Self {
        Self { python, target_arch }
    }

    fn failure(role: GraphRole, message: impl Into<String>) -> EngineError {
        EngineError::CompressionFailure {
            role,
            message: message.into(),
        }
    }
}

impl GraphCompressor for OnnxRuntimeQuantizer {
    fn check_available(&self, mode: CompressionMode) -> EngineResult<()> {
        match mode {
            CompressionMode::None => Ok(()),
            CompressionMode::DynamicInt8 => self
                .python
                .check_module("onnxruntime.quantization", "pip install onnxruntime"),
            CompressionMode::TargetArchProfile => self
                .python
                .check_module("optimum.onnxruntime", "pip install optimum[onnxruntime]"),
        }
    }

    fn compress(
        &self,
        role: GraphRole,
        source: &Path,
        dest_dir: &Path,
        mode: CompressionMode,
    ) -> EngineResult<PathBuf> {
        let file_name = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| Self::failure(role, format!("invalid source path {}", source.display())))?;
        let (stem, extension) = file_name
            .rsplit_once('.')
            .ok_or_else(|| Self::failure(role, format!("source has no extension: {file_name}")))?;
        // 两种方式都输出 `<stem>_quantized.<ext>`
        let produced = dest_dir.join(format!("{stem}_quantized.{extension}"));

        info!(%role, %mode, source = %source.display(), "compressing graph");

        let output = match mode {
            CompressionMode::None => return Err(Self::failure(role, "compression mode is none")),
            CompressionMode::DynamicInt8 => self.python.run_script(
                DYNAMIC_INT8_SCRIPT,
                &[source.display().to_string(), produced.display().to_string()],
            ),
            CompressionMode::TargetArchProfile => {
                let model_dir = source
                    .parent()
                    .ok_or_else(|| Self::failure(role, "source has no parent directory"))?;
                self.python.run_script(
                    TARGET_ARCH_SCRIPT,
                    &[
                        model_dir.display().to_string(),
                        file_name.clone(),
                        dest_dir.display().to_string(),
                        self.target_arch.profile_name().to_string(),
                    ],
                )
            }
        }
        .map_err(|e| Self::failure(role, e.to_string()))?;

        if !output.success {
            return Err(Self::failure(role, output.failure_message()));
        }
        if !produced.is_file() {
            return Err(Self::failure(
                role,
                format!("quantizer finished but {} was not written", produced.display()),
            ));
        }

        Ok(produced)
    }
}
