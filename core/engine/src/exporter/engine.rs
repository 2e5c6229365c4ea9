use std::path::Path;

use tracing::info;

use super::config::ExportConfig;
use super::python::PythonRuntime;
use crate::error::{EngineError, EngineResult};

/// Optimum 的 ONNX 导出入口模块
pub const OPTIMUM_EXPORT_MODULE: &str = "optimum.exporters.onnx";

const OPTIMUM_INSTALL_HINT: &str = "pip install optimum[exporters,onnxruntime] transformers torch";

/// 外部图导出能力：一次调用产出完整图族
pub trait ExportEngine {
    /// 预检，任何 I/O 之前调用
    fn check_available(&self) -> EngineResult<()>;

    /// 把 `model_id` 导出到 `output_dir`；三个角色必须来自同一次调用
    fn export_family(&self, model_id: &str, output_dir: &Path, config: &ExportConfig) -> EngineResult<()>;
}

/// 通过 Python 子进程调用 Optimum 导出
#[derive(Debug, Clone)]
pub struct OptimumExportEngine {
    python: PythonRuntime,
}

impl OptimumExportEngine {
    pub fn new(python: PythonRuntime) -> Self {
        Self { python }
    }

    /// 导出命令行参数（不含 `-m <module>`）
    pub fn build_args(model_id: &str, output_dir: &Path, config: &ExportConfig) -> Vec<String> {
        let mut args = vec![
            "--model".to_string(),
            model_id.to_string(),
            "--task".to_string(),
            config.task().to_string(),
            "--device".to_string(),
            config.device.as_str().to_string(),
        ];

        if let Some(level) = config.optimize {
            args.push("--optimize".to_string());
            args.push(level.as_str().to_string());
        }
        if let Some(batch) = config.fixed_batch {
            args.push("--batch_size".to_string());
            args.push(batch.to_string());
        }
        if let Some(seq_len) = config.fixed_sequence_length {
            args.push("--sequence_length".to_string());
            args.push(seq_len.to_string());
        }
        if config.fp16 {
            args.push("--fp16".to_string());
        }
        // 合并后的 decoder_model_merged 会取代首步 / with-past 两个独立的图
        if !config.post_process {
            args.push("--no-post-process".to_string());
        }

        args.push(output_dir.display().to_string());
        args
    }
}

impl ExportEngine for OptimumExportEngine {
    fn check_available(&self) -> EngineResult<()> {
        self.python.check_module(OPTIMUM_EXPORT_MODULE, OPTIMUM_INSTALL_HINT)
    }

    fn export_family(&self, model_id: &str, output_dir: &Path, config: &ExportConfig) -> EngineResult<()> {
        let args = Self::build_args(model_id, output_dir, config);
        info!(model_id, task = config.task(), "running optimum export");

        let output = self.python.run_module(OPTIMUM_EXPORT_MODULE, &args)?;
        if !output.success {
            return Err(EngineError::ExportEngineFailure {
                model_id: model_id.to_string(),
                message: output.failure_message(),
            });
        }

        Ok(())
    }
}
