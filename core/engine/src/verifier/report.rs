use std::collections::BTreeMap;
use std::fmt::{self, Write as _};
use std::path::PathBuf;
use std::str::FromStr;

use serde::Serialize;

use crate::error::{to_pretty_json, EngineError, EngineResult};
use crate::graph_family::{GraphArtifact, GraphInterface, GraphRole, RewriteRule, TensorDescriptor};

/// 每个图最多列出的输出个数，cache 图动辄上百个输出
const MAX_LISTED_OUTPUTS: usize = 10;

/// 报告输出格式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportFormat {
    Text,
    Json,
}

impl FromStr for ReportFormat {
    type Err = EngineError;

    fn from_str(s: &str) -> EngineResult<Self> {
        match s.to_lowercase().as_str() {
            "text" | "txt" => Ok(ReportFormat::Text),
            "json" => Ok(ReportFormat::Json),
            _ => Err(EngineError::config(
                "format",
                format!("unknown report format: {s} (expected text or json)"),
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscrepancyKind {
    ArtifactMissing,
    ArtifactUnloadable,
    CacheTensorsAbsent,
    /// cache 张量名不合语法，或两侧的槽位集合不一致
    CacheSlotMismatch,
    NameRewriteMismatch,
    /// 缺少首步 decoder，无法比较两侧槽位
    CardinalitySkipped,
}

/// 一条具体、可操作的问题描述
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Discrepancy {
    pub role: Option<GraphRole>,
    pub kind: DiscrepancyKind,
    pub message: String,
}

impl Discrepancy {
    pub fn new(role: Option<GraphRole>, kind: DiscrepancyKind, message: impl Into<String>) -> Self {
        Self {
            role,
            kind,
            message: message.into(),
        }
    }

    /// 把校验阶段的错误归类成问题条目
    pub fn from_error(role: Option<GraphRole>, error: &EngineError) -> Self {
        let kind = match error {
            EngineError::CacheTensorsAbsent { .. } => DiscrepancyKind::CacheTensorsAbsent,
            EngineError::NameRewriteMismatch { .. } => DiscrepancyKind::NameRewriteMismatch,
            _ => DiscrepancyKind::ArtifactUnloadable,
        };
        Self::new(role, kind, error.to_string())
    }
}

impl fmt::Display for Discrepancy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.role {
            Some(role) => write!(f, "[{role}] {}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

/// 单个图的检查记录
#[derive(Debug, Clone, Serialize)]
pub struct InspectedArtifact {
    pub role: GraphRole,
    pub file_name: String,
    pub is_compressed: bool,
    pub size_bytes: u64,
    pub interface: Option<GraphInterface>,
    pub load_error: Option<String>,
}

impl InspectedArtifact {
    pub fn loaded(artifact: &GraphArtifact, interface: GraphInterface) -> Self {
        Self {
            role: artifact.role,
            file_name: artifact.file_name(),
            is_compressed: artifact.is_compressed,
            size_bytes: artifact.size_bytes,
            interface: Some(interface),
            load_error: None,
        }
    }

    pub fn failed(artifact: &GraphArtifact, error: &EngineError) -> Self {
        Self {
            role: artifact.role,
            file_name: artifact.file_name(),
            is_compressed: artifact.is_compressed,
            size_bytes: artifact.size_bytes,
            interface: None,
            load_error: Some(error.to_string()),
        }
    }
}

/// 改名规则作用在代表性输出名上的结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RewriteExample {
    pub output_name: String,
    /// 规则不适用（首段不是 `present`）时为 None
    pub produced: Option<String>,
    /// 只在不匹配时给出
    pub nearest_expected: Option<String>,
    pub suggested_rule: Option<RewriteRule>,
}

/// 一次校验的完整结果，构造完成后只读
#[derive(Debug, Clone, Serialize)]
pub struct CompatibilityReport {
    pub artifact_dir: PathBuf,
    /// 找到并且能加载
    pub artifacts_found: BTreeMap<GraphRole, bool>,
    pub artifacts: Vec<InspectedArtifact>,
    pub cache_inputs_detected: bool,
    /// cache 名没有规范的前缀段，只是按 `past` / `present` 关键字认出来的
    pub cache_names_drifted: bool,
    pub cache_input_count: usize,
    pub cache_output_count: usize,
    /// `present` 输出取自哪个图
    pub cache_output_role: Option<GraphRole>,
    pub input_template: Option<String>,
    pub output_template: Option<String>,
    pub rewrite_rule_applied: String,
    pub rewrite_example: Option<RewriteExample>,
    pub rewrite_matches: bool,
    pub missing_or_mismatched: Vec<Discrepancy>,
}

impl CompatibilityReport {
    pub fn all_found(&self) -> bool {
        GraphRole::ALL
            .iter()
            .all(|role| self.artifacts_found.get(role).copied().unwrap_or(false))
    }

    pub fn is_compatible(&self) -> bool {
        self.all_found()
            && self.cache_inputs_detected
            && self.rewrite_matches
            && self.missing_or_mismatched.is_empty()
    }

    pub fn exit_code(&self) -> i32 {
        if self.is_compatible() {
            0
        } else {
            1
        }
    }

    pub fn has_kind(&self, kind: DiscrepancyKind) -> bool {
        self.missing_or_mismatched.iter().any(|d| d.kind == kind)
    }

    pub fn to_json(&self) -> EngineResult<String> {
        let mut value = serde_json::to_value(self)
            .map_err(|e| EngineError::serialization("compatibility report", e))?;
        if let Some(object) = value.as_object_mut() {
            object.insert("compatible".to_string(), serde_json::Value::Bool(self.is_compatible()));
        }
        to_pretty_json("compatibility report", &value)
    }

    pub fn render(&self, format: ReportFormat) -> EngineResult<String> {
        match format {
            ReportFormat::Text => Ok(self.render_text()),
            ReportFormat::Json => self.to_json(),
        }
    }

    pub fn render_text(&self) -> String {
        let rule = "=".repeat(60);
        let thin = "-".repeat(60);
        let mut out = String::new();

        let _ = writeln!(out, "{rule}");
        let _ = writeln!(out, "Graph family verification: {}", self.artifact_dir.display());
        let _ = writeln!(out, "{rule}");

        for role in GraphRole::ALL {
            match self.artifacts.iter().find(|a| a.role == role) {
                Some(artifact) => render_artifact(&mut out, artifact),
                None => {
                    let _ = writeln!(out, "\n[{role}] NOT FOUND");
                }
            }
        }

        let _ = writeln!(out, "\n{thin}");
        let _ = writeln!(out, "KV cache compatibility");
        let _ = writeln!(out, "{thin}");
        let _ = writeln!(
            out,
            "  Cache inputs  (decoder_with_cache): {:4}  {}",
            self.cache_input_count,
            self.input_template.as_deref().unwrap_or("-")
        );
        let output_role = self
            .cache_output_role
            .map(|r| r.as_str())
            .unwrap_or("none");
        let _ = writeln!(
            out,
            "  Cache outputs ({output_role}): {:4}  {}",
            self.cache_output_count,
            self.output_template.as_deref().unwrap_or("-")
        );
        if self.cache_names_drifted {
            let _ = writeln!(
                out,
                "  (no exact `past_key_values` / `present` token, cache names matched by keyword)"
            );
        }
        let _ = writeln!(out, "  Rewrite rule: {}", self.rewrite_rule_applied);

        match &self.rewrite_example {
            Some(example) => {
                let produced = example.produced.as_deref().unwrap_or("(rule does not apply)");
                let mark = if self.rewrite_matches { "✓" } else { "✗" };
                let _ = writeln!(out, "  {mark} {} → {produced}", example.output_name);
                if let Some(nearest) = &example.nearest_expected {
                    let _ = writeln!(out, "    nearest declared input: {nearest}");
                }
                if let Some(suggested) = &example.suggested_rule {
                    let _ = writeln!(out, "    suggested rule: {suggested}");
                }
            }
            None => {
                let _ = writeln!(out, "  rewrite check not performed");
            }
        }

        let _ = writeln!(out, "\n{rule}");
        let _ = writeln!(out, "Summary");
        let _ = writeln!(out, "{rule}");
        for role in GraphRole::ALL {
            let found = self.artifacts_found.get(&role).copied().unwrap_or(false);
            let _ = writeln!(out, "  {} {role}", if found { "✓" } else { "✗" });
        }
        let _ = writeln!(
            out,
            "  {} KV cache tensors detected",
            if self.cache_inputs_detected { "✓" } else { "✗" }
        );
        let _ = writeln!(
            out,
            "  {} cache output names map onto cache input names",
            if self.rewrite_matches { "✓" } else { "✗" }
        );

        if !self.missing_or_mismatched.is_empty() {
            let _ = writeln!(out, "\nProblems ({}):", self.missing_or_mismatched.len());
            for discrepancy in &self.missing_or_mismatched {
                let _ = writeln!(out, "  ✗ {discrepancy}");
            }
        }

        let hints = self.next_steps();
        if !hints.is_empty() {
            let _ = writeln!(out, "\nNext steps:");
            for hint in hints {
                let _ = writeln!(out, "  → {hint}");
            }
        }

        let _ = writeln!(
            out,
            "\nResult: {}",
            if self.is_compatible() {
                "COMPATIBLE, ready for KV-cache decoding"
            } else {
                "INCOMPATIBLE"
            }
        );
        out
    }

    fn next_steps(&self) -> Vec<String> {
        let mut hints = Vec::new();
        if self.has_kind(DiscrepancyKind::ArtifactMissing) {
            hints.push("run export_graphs to produce the missing graphs".to_string());
        }
        if self.has_kind(DiscrepancyKind::ArtifactUnloadable) {
            hints.push("re-export the graphs that failed to load; the files are corrupt or not valid graphs".to_string());
        }
        if !self.cache_inputs_detected {
            hints.push(
                "re-export with the cache-enabled task (text2text-generation-with-past)".to_string(),
            );
        }
        if let Some(rule) = self
            .rewrite_example
            .as_ref()
            .and_then(|e| e.suggested_rule.as_ref())
        {
            hints.push(format!("map cache output names to inputs with: {rule}"));
        } else if self.cache_names_drifted {
            hints.push(
                "cache tensor names changed shape; rename them to past_key_values.<layer>.<component>.<branch> \
                 or re-export with a matching exporter version"
                    .to_string(),
            );
        }
        if self.has_kind(DiscrepancyKind::CacheSlotMismatch) {
            hints.push("export decoder_first_step and decoder_with_cache in a single export call".to_string());
        }
        hints
    }
}

fn render_tensor(out: &mut String, tensor: &TensorDescriptor) {
    let _ = writeln!(
        out,
        "    • {}: {} {}",
        tensor.name,
        tensor.shape_string(),
        tensor.element_type
    );
}

fn render_artifact(out: &mut String, artifact: &InspectedArtifact) {
    let _ = writeln!(
        out,
        "\n[{}] {} ({}{:.1} MB)",
        artifact.role,
        artifact.file_name,
        if artifact.is_compressed { "compressed, " } else { "" },
        artifact.size_bytes as f64 / (1024.0 * 1024.0)
    );

    let Some(interface) = &artifact.interface else {
        let _ = writeln!(
            out,
            "  LOAD FAILED: {}",
            artifact.load_error.as_deref().unwrap_or("unknown error")
        );
        return;
    };

    let _ = writeln!(out, "  Inputs ({}):", interface.inputs.len());
    for tensor in &interface.inputs {
        render_tensor(out, tensor);
    }
    let _ = writeln!(out, "  Outputs ({}):", interface.outputs.len());
    for tensor in interface.outputs.iter().take(MAX_LISTED_OUTPUTS) {
        render_tensor(out, tensor);
    }
    if interface.outputs.len() > MAX_LISTED_OUTPUTS {
        let _ = writeln!(
            out,
            "    ... and {} more",
            interface.outputs.len() - MAX_LISTED_OUTPUTS
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph_family::{Dimension, ElementType};

    fn tensor(name: &str) -> TensorDescriptor {
        TensorDescriptor::new(name, vec![Dimension::Dynamic, Dimension::Fixed(16)], ElementType::Float32)
    }

    fn empty_report() -> CompatibilityReport {
        CompatibilityReport {
            artifact_dir: PathBuf::from("nllb-onnx"),
            artifacts_found: GraphRole::ALL.into_iter().map(|r| (r, true)).collect(),
            artifacts: vec![],
            cache_inputs_detected: true,
            cache_names_drifted: false,
            cache_input_count: 0,
            cache_output_count: 0,
            cache_output_role: Some(GraphRole::DecoderFirstStep),
            input_template: None,
            output_template: None,
            rewrite_rule_applied: RewriteRule::canonical().to_string(),
            rewrite_example: None,
            rewrite_matches: true,
            missing_or_mismatched: vec![],
        }
    }

    #[test]
    fn test_format_parsing() {
        assert_eq!("JSON".parse::<ReportFormat>().unwrap(), ReportFormat::Json);
        assert_eq!("text".parse::<ReportFormat>().unwrap(), ReportFormat::Text);
        assert!("yaml".parse::<ReportFormat>().is_err());
    }

    #[test]
    fn test_any_discrepancy_makes_report_incompatible() {
        let mut report = empty_report();
        assert!(report.is_compatible());
        assert_eq!(report.exit_code(), 0);

        report.missing_or_mismatched.push(Discrepancy::new(
            Some(GraphRole::DecoderWithCache),
            DiscrepancyKind::CacheSlotMismatch,
            "layer 5: not consumed",
        ));
        assert!(!report.is_compatible());
        assert_eq!(report.exit_code(), 1);
    }

    #[test]
    fn test_long_output_lists_are_truncated() {
        let mut report = empty_report();
        let artifact = GraphArtifact {
            role: GraphRole::DecoderFirstStep,
            file_path: PathBuf::from("nllb-onnx/decoder_model.onnx"),
            is_compressed: false,
            size_bytes: 1024,
        };
        let interface = GraphInterface {
            inputs: vec![tensor("input_ids")],
            outputs: (0..24).map(|i| tensor(&format!("present.{i}.decoder.key"))).collect(),
        };
        report.artifacts.push(InspectedArtifact::loaded(&artifact, interface));

        let text = report.render_text();
        assert!(text.contains("present.9.decoder.key"));
        assert!(!text.contains("present.10.decoder.key"));
        assert!(text.contains("... and 14 more"));
        assert!(text.contains("[encoder] NOT FOUND"));
    }

    #[test]
    fn test_missing_cache_hint_points_at_with_past_task() {
        let mut report = empty_report();
        report.cache_inputs_detected = false;
        report.rewrite_matches = false;

        let text = report.render_text();
        assert!(text.contains("text2text-generation-with-past"));
        assert!(text.contains("Result: INCOMPATIBLE"));
    }

    #[test]
    fn test_json_carries_compatibility_flag() {
        let mut report = empty_report();
        report.artifacts_found.insert(GraphRole::DecoderWithCache, false);

        let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
        assert_eq!(json["compatible"], false);
        assert_eq!(json["artifacts_found"]["decoder_with_cache"], false);
        assert_eq!(json["artifacts_found"]["encoder"], true);
    }
}
