use std::sync::Arc;

use ort::{Environment, LoggingLevel};

use crate::error::{EngineError, EngineResult};

/// 创建 ONNX Runtime 环境。
/// 同一次校验里所有图共用这一个环境，只读取接口，不做推理。
pub fn build_environment(name: &str) -> EngineResult<Arc<Environment>> {
    let env = Environment::builder()
        .with_name(name)
        .with_log_level(LoggingLevel::Warning)
        .build()
        .map_err(|e| EngineError::DependencyUnavailable {
            dependency: "ONNX Runtime".to_string(),
            hint: format!("failed to initialise the runtime ({e}); check that the onnxruntime shared library can be loaded"),
        })?;

    Ok(Arc::new(env))
}
