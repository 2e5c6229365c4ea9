use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::path::PathBuf;

use serde::Serialize;

use super::config::CompressionMode;
use crate::error::{to_pretty_json, EngineError, EngineResult};
use crate::graph_family::{GraphArtifact, GraphRole, TOKENIZER_FILE};

/// 单个图的压缩失败记录（不影响未压缩的图）
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompressionFailureRecord {
    pub role: GraphRole,
    pub message: String,
}

impl CompressionFailureRecord {
    pub fn from_error(role: GraphRole, error: &EngineError) -> Self {
        let message = match error {
            EngineError::CompressionFailure { message, .. } => message.clone(),
            other => other.to_string(),
        };
        Self { role, message }
    }
}

/// 一次导出的结果汇总
#[derive(Debug, Clone, Serialize)]
pub struct ExportSummary {
    pub model_id: String,
    pub output_dir: PathBuf,
    pub enable_cache: bool,
    pub compress: CompressionMode,
    /// 导出结束后目录中所有的图，按角色排序，未压缩在前
    pub produced: Vec<GraphArtifact>,
    pub missing_required: BTreeSet<GraphRole>,
    /// 因为目标文件已存在而没有写入的文件名
    pub skipped_existing: Vec<String>,
    pub compression_failures: Vec<CompressionFailureRecord>,
    pub tokenizer_present: bool,
    /// 所有必需的图都已存在时不会调用导出引擎
    pub engine_invoked: bool,
    pub elapsed_secs: f64,
}

impl ExportSummary {
    pub fn is_complete(&self) -> bool {
        self.missing_required.is_empty()
    }

    pub fn exit_code(&self) -> i32 {
        if self.is_complete() {
            0
        } else {
            1
        }
    }

    /// 推荐部署的文件：有压缩版用压缩版，否则用未压缩版
    pub fn recommended(&self, role: GraphRole) -> Option<&GraphArtifact> {
        self.produced
            .iter()
            .filter(|a| a.role == role)
            .max_by_key(|a| a.is_compressed)
    }

    pub fn to_json(&self) -> EngineResult<String> {
        to_pretty_json("export summary", self)
    }

    pub fn render_text(&self) -> String {
        let rule = "=".repeat(60);
        let mut out = String::new();

        let _ = writeln!(out, "{rule}");
        let _ = writeln!(out, "Graph family export: {}", self.model_id);
        let _ = writeln!(out, "{rule}");
        let _ = writeln!(out, "Output:      {}", self.output_dir.display());
        let _ = writeln!(
            out,
            "KV cache:    {}",
            if self.enable_cache { "enabled" } else { "disabled" }
        );
        let _ = writeln!(out, "Compression: {}", self.compress);
        let _ = writeln!(
            out,
            "Export call: {}",
            if self.engine_invoked {
                "invoked"
            } else {
                "skipped (all required graphs already present)"
            }
        );
        let _ = writeln!(out, "Elapsed:     {:.1}s", self.elapsed_secs);

        let _ = writeln!(out, "\nExported graph files:");
        if self.produced.is_empty() {
            let _ = writeln!(out, "  (none)");
        }
        for artifact in &self.produced {
            let marker = match self.recommended(artifact.role) {
                Some(best) if best.file_path == artifact.file_path => " ← use this",
                _ => "",
            };
            let _ = writeln!(
                out,
                "  • {:45} ({:7.1} MB){marker}",
                artifact.file_name(),
                artifact.size_mb()
            );
        }

        if !self.skipped_existing.is_empty() {
            let _ = writeln!(out, "\nLeft untouched (already present):");
            for name in &self.skipped_existing {
                let _ = writeln!(out, "  • {name}");
            }
        }

        if !self.compression_failures.is_empty() {
            let _ = writeln!(out, "\nCompression failures (uncompressed graphs remain usable):");
            for failure in &self.compression_failures {
                let first_line = failure.message.lines().next().unwrap_or_default();
                let _ = writeln!(out, "  ⚠ {}: {first_line}", failure.role);
            }
        }

        let _ = writeln!(out, "\nRequired graphs:");
        for role in GraphRole::required(self.enable_cache) {
            if self.missing_required.contains(&role) {
                let _ = writeln!(out, "  ✗ {role}: {}.* NOT FOUND", role.file_stem());
            } else {
                let _ = writeln!(out, "  ✓ {role}");
            }
        }
        let _ = writeln!(
            out,
            "  {} {TOKENIZER_FILE}",
            if self.tokenizer_present { "✓" } else { "✗" }
        );

        if self.is_complete() {
            let _ = writeln!(out, "\nFiles to ship to the device:");
            for role in GraphRole::required(self.enable_cache) {
                if let Some(artifact) = self.recommended(role) {
                    let _ = writeln!(out, "  • {}", artifact.file_name());
                }
            }
            if self.tokenizer_present {
                let _ = writeln!(out, "  • {TOKENIZER_FILE}");
            }
            let _ = writeln!(out, "\n✓ Export complete");
        } else {
            let missing: Vec<&str> = self.missing_required.iter().map(GraphRole::as_str).collect();
            let _ = writeln!(out, "\n✗ Export INCOMPLETE, missing: {}", missing.join(", "));
            if self.missing_required.contains(&GraphRole::DecoderWithCache) {
                let _ = writeln!(
                    out,
                    "  → decoder_with_cache is what makes KV-cache decoding work; re-export with the cache-enabled task"
                );
            }
        }

        out
    }
}
