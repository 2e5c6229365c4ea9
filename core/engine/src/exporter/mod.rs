//! 图族导出
//!
//! 一次导出调用产出 encoder / decoder / decoder_with_past 三个图，
//! 可选地再逐个量化。已有文件永远不会被覆盖。

pub mod compression;
pub mod config;
pub mod engine;
pub mod python;
pub mod summary;

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use tracing::{debug, info, warn};

pub use compression::{GraphCompressor, OnnxRuntimeQuantizer};
pub use config::{CompressionMode, Device, ExportConfig, OptimizationLevel, TargetArch};
pub use engine::{ExportEngine, OptimumExportEngine};
pub use python::{ProcessOutput, PythonRuntime};
pub use summary::{CompressionFailureRecord, ExportSummary};

use crate::error::{EngineError, EngineResult};
use crate::graph_family::{list_artifacts, GraphRole, TOKENIZER_FILE};

const EXPORT_STAGING_PREFIX: &str = ".graph-export-";
const COMPRESS_STAGING_PREFIX: &str = ".graph-compress-";

/// 图族导出器
pub struct GraphFamilyExporter<E, C> {
    engine: E,
    compressor: C,
}

impl GraphFamilyExporter<OptimumExportEngine, OnnxRuntimeQuantizer> {
    /// 基于 Python（Optimum + ONNX Runtime）的默认实现
    pub fn from_config(config: &ExportConfig) -> Self {
        let python = PythonRuntime::new(config.python.clone());
        Self::new(
            OptimumExportEngine::new(python.clone()),
            OnnxRuntimeQuantizer::new(python, config.target_arch),
        )
    }
}

impl<E: ExportEngine, C: GraphCompressor> GraphFamilyExporter<E, C> {
    pub fn new(engine: E, compressor: C) -> Self {
        Self { engine, compressor }
    }

    /// 导出 `model_id` 的图族到 `output_dir`
    ///
    /// 导出引擎不可用或导出调用失败时返回错误；单个图的压缩失败只记录在汇总里。
    /// 缺少必需角色不是错误，调用方根据 [`ExportSummary::is_complete`] 决定退出码。
    pub fn export(
        &self,
        model_id: &str,
        output_dir: &Path,
        config: &ExportConfig,
    ) -> EngineResult<ExportSummary> {
        let started = Instant::now();
        config.validate()?;
        self.engine.check_available()?;

        fs::create_dir_all(output_dir)
            .map_err(|e| EngineError::io(format!("creating output directory {}", output_dir.display()), e))?;

        let extension = config.extension.as_str();
        let required = GraphRole::required(config.enable_cache);
        let mut skipped_existing = Vec::new();

        let family_present = required
            .iter()
            .all(|role| output_dir.join(role.file_name(false, extension)).is_file());

        if family_present {
            info!(
                output_dir = %output_dir.display(),
                "all required graphs already present, skipping export call"
            );
        } else {
            let staging = tempfile::Builder::new()
                .prefix(EXPORT_STAGING_PREFIX)
                .tempdir_in(output_dir)
                .map_err(|e| EngineError::io("creating export staging directory", e))?;

            info!(model_id, task = config.task(), output_dir = %output_dir.display(), "exporting graph family");
            let call_started = Instant::now();
            // 失败时 staging 随 drop 删除，输出目录保持原样
            self.engine.export_family(model_id, staging.path(), config)?;
            info!(elapsed = ?call_started.elapsed(), "export call finished");

            skipped_existing = promote_staged_files(staging.path(), output_dir)?;
        }

        let compression_failures = if config.compress == CompressionMode::None {
            Vec::new()
        } else {
            self.compress_family(output_dir, config, &mut skipped_existing)
        };

        let produced = list_artifacts(output_dir, extension)?;
        let missing_required: BTreeSet<GraphRole> = required
            .into_iter()
            .filter(|role| !produced.iter().any(|a| a.role == *role))
            .collect();
        for role in &missing_required {
            warn!(%role, "required graph missing after export");
        }

        let tokenizer_present = output_dir.join(TOKENIZER_FILE).is_file();
        if !tokenizer_present {
            warn!("{TOKENIZER_FILE} not found next to the exported graphs");
        }

        Ok(ExportSummary {
            model_id: model_id.to_string(),
            output_dir: output_dir.to_path_buf(),
            enable_cache: config.enable_cache,
            compress: config.compress,
            produced,
            missing_required,
            skipped_existing,
            compression_failures,
            tokenizer_present,
            engine_invoked: !family_present,
            elapsed_secs: started.elapsed().as_secs_f64(),
        })
    }

    /// 逐个压缩已有的未压缩图；已存在压缩版的角色跳过
    fn compress_family(
        &self,
        output_dir: &Path,
        config: &ExportConfig,
        skipped_existing: &mut Vec<String>,
    ) -> Vec<CompressionFailureRecord> {
        let extension = config.extension.as_str();
        let mut pending: Vec<(GraphRole, PathBuf, PathBuf)> = Vec::new();

        for role in GraphRole::ALL {
            let source = output_dir.join(role.file_name(false, extension));
            if !source.is_file() {
                continue;
            }
            let dest_name = role.file_name(true, extension);
            let dest = output_dir.join(&dest_name);
            if dest.exists() {
                debug!(%role, file = %dest_name, "compressed graph already present");
                skipped_existing.push(dest_name);
                continue;
            }
            pending.push((role, source, dest));
        }

        if pending.is_empty() {
            return Vec::new();
        }

        if let Err(e) = self.compressor.check_available(config.compress) {
            warn!(error = %e, "compressor unavailable, keeping uncompressed graphs");
            return pending
                .into_iter()
                .map(|(role, _, _)| CompressionFailureRecord::from_error(role, &e))
                .collect();
        }

        let mut failures = Vec::new();
        for (role, source, dest) in pending {
            match self.compress_one(role, &source, &dest, output_dir, config.compress) {
                Ok(()) => info!(%role, file = %dest.display(), "graph compressed"),
                Err(e) => {
                    warn!(%role, error = %e, "compression failed, keeping uncompressed graph");
                    failures.push(CompressionFailureRecord::from_error(role, &e));
                }
            }
        }
        failures
    }

    fn compress_one(
        &self,
        role: GraphRole,
        source: &Path,
        dest: &Path,
        output_dir: &Path,
        mode: CompressionMode,
    ) -> EngineResult<()> {
        let failure = |message: String| EngineError::CompressionFailure { role, message };

        let staging = tempfile::Builder::new()
            .prefix(COMPRESS_STAGING_PREFIX)
            .tempdir_in(output_dir)
            .map_err(|e| failure(format!("creating staging directory: {e}")))?;

        let produced = self.compressor.compress(role, source, staging.path(), mode)?;
        if dest.exists() {
            return Ok(());
        }
        fs::rename(&produced, dest).map_err(|e| failure(format!("moving {} into place: {e}", produced.display())))
    }
}

/// 把 staging 目录里的文件挪进输出目录，目标已存在的跳过，返回跳过的文件名
fn promote_staged_files(staging: &Path, output_dir: &Path) -> EngineResult<Vec<String>> {
    let mut entries: Vec<PathBuf> = fs::read_dir(staging)
        .map_err(|e| EngineError::io(format!("reading staging directory {}", staging.display()), e))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_file())
        .collect();
    entries.sort();

    let mut skipped = Vec::new();
    for path in entries {
        let Some(name) = path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
            continue;
        };
        let target = output_dir.join(&name);
        if target.exists() {
            debug!(file = %name, "keeping existing file");
            skipped.push(name);
            continue;
        }
        fs::rename(&path, &target)
            .map_err(|e| EngineError::io(format!("moving {name} into {}", output_dir.display()), e))?;
        debug!(file = %name, "file written");
    }

    Ok(skipped)
}
