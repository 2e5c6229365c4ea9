// tests/verify_cache_compat_test.rs
// 用假的推理引擎测试 CacheCompatibilityVerifier：只看文件名和声明的接口

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use graph_export_engine::graph_family::{Dimension, ElementType};
use graph_export_engine::*;

const COMPONENTS: [&str; 4] = ["decoder.key", "decoder.value", "encoder.key", "encoder.value"];

fn tensor(name: &str) -> TensorDescriptor {
    TensorDescriptor::new(
        name,
        vec![Dimension::Dynamic, Dimension::Fixed(16), Dimension::Dynamic, Dimension::Fixed(64)],
        ElementType::Float32,
    )
}

fn cache_names(prefix: &str, layers: std::ops::Range<usize>) -> Vec<String> {
    layers
        .flat_map(|i| COMPONENTS.map(|c| format!("{prefix}.{i}.{c}")))
        .collect()
}

fn interface(inputs: &[String], outputs: &[String]) -> GraphInterface {
    GraphInterface {
        inputs: inputs.iter().map(|n| tensor(n)).collect(),
        outputs: outputs.iter().map(|n| tensor(n)).collect(),
    }
}

fn encoder_interface() -> GraphInterface {
    interface(
        &["input_ids".into(), "attention_mask".into()],
        &["last_hidden_state".into()],
    )
}

fn first_step_interface(layers: std::ops::Range<usize>) -> GraphInterface {
    let mut outputs = vec!["logits".to_string()];
    outputs.extend(cache_names("present", layers));
    interface(
        &["input_ids".into(), "encoder_hidden_states".into(), "encoder_attention_mask".into()],
        &outputs,
    )
}

fn cache_step_interface(input_prefix: &str, layers: std::ops::Range<usize>) -> GraphInterface {
    let mut inputs = vec!["input_ids".to_string(), "encoder_attention_mask".to_string()];
    inputs.extend(cache_names(input_prefix, layers.clone()));
    let mut outputs = vec!["logits".to_string()];
    outputs.extend(layers.flat_map(|i| {
        ["decoder.key", "decoder.value"].map(|c| format!("present.{i}.{c}"))
    }));
    interface(&inputs, &outputs)
}

/// 按文件名返回预设接口；文件内容为 "corrupt" 时模拟加载失败
#[derive(Default)]
struct FakeInspector {
    interfaces: HashMap<String, GraphInterface>,
}

impl FakeInspector {
    fn with(mut self, file_name: &str, interface: GraphInterface) -> Self {
        self.interfaces.insert(file_name.to_string(), interface);
        self
    }
}

impl GraphInspector for FakeInspector {
    fn load_interface(&self, path: &Path) -> EngineResult<GraphInterface> {
        let unloadable = |message: &str| EngineError::ArtifactUnloadable {
            path: path.to_path_buf(),
            message: message.to_string(),
        };
        if fs::read_to_string(path).unwrap_or_default() == "corrupt" {
            return Err(unloadable("protobuf parsing failed"));
        }
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        self.interfaces
            .get(&name)
            .cloned()
            .ok_or_else(|| unloadable("unknown graph"))
    }
}

fn touch(dir: &Path, names: &[&str]) {
    for name in names {
        fs::write(dir.join(name), "graph").unwrap();
    }
}

fn healthy_inspector(layers: usize) -> FakeInspector {
    FakeInspector::default()
        .with("encoder_model.onnx", encoder_interface())
        .with("decoder_model.onnx", first_step_interface(0..layers))
        .with(
            "decoder_with_past_model.onnx",
            cache_step_interface("past_key_values", 0..layers),
        )
}

#[test]
fn test_healthy_family_is_compatible() {
    let tmp = tempfile::tempdir().unwrap();
    touch(
        tmp.path(),
        &["encoder_model.onnx", "decoder_model.onnx", "decoder_with_past_model.onnx", "tokenizer.json"],
    );

    let report = CacheCompatibilityVerifier::new(healthy_inspector(12)).verify(tmp.path());

    assert!(report.is_compatible(), "{}", report.render_text());
    assert_eq!(report.exit_code(), 0);
    assert!(report.cache_inputs_detected);
    assert!(report.rewrite_matches);
    assert_eq!(report.cache_input_count, 48);
    assert_eq!(report.cache_output_count, 48);
    assert_eq!(
        report.input_template.as_deref(),
        Some("past_key_values.{layer}.{component}.{branch}")
    );
    assert_eq!(report.rewrite_rule_applied, "replace prefix `present` with `past_key_values`");

    let example = report.rewrite_example.as_ref().unwrap();
    assert_eq!(example.output_name, "present.0.decoder.key");
    assert_eq!(example.produced.as_deref(), Some("past_key_values.0.decoder.key"));
    assert!(example.nearest_expected.is_none());
}

#[test]
fn test_compressed_graph_is_preferred_and_uncompressed_is_fallback() {
    let tmp = tempfile::tempdir().unwrap();
    touch(
        tmp.path(),
        &[
            "encoder_model.onnx",
            "encoder_model_quantized.onnx",
            "decoder_model.onnx",
            "decoder_with_past_model.onnx",
        ],
    );
    let inspector = healthy_inspector(2).with("encoder_model_quantized.onnx", encoder_interface());

    let report = CacheCompatibilityVerifier::new(inspector).verify(tmp.path());

    assert!(report.is_compatible());
    let names: Vec<(&str, bool)> = report
        .artifacts
        .iter()
        .map(|a| (a.file_name.as_str(), a.is_compressed))
        .collect();
    assert_eq!(
        names,
        vec![
            ("encoder_model_quantized.onnx", true),
            ("decoder_model.onnx", false),
            ("decoder_with_past_model.onnx", false),
        ]
    );
}

#[test]
fn test_only_encoder_and_first_step_present() {
    let tmp = tempfile::tempdir().unwrap();
    touch(tmp.path(), &["encoder_model.onnx", "decoder_model.onnx"]);
    // 没启用 with-past 导出的首步 decoder 没有 present 输出
    let inspector = FakeInspector::default()
        .with("encoder_model.onnx", encoder_interface())
        .with("decoder_model.onnx", first_step_interface(0..0));

    let report = CacheCompatibilityVerifier::new(inspector).verify(tmp.path());

    assert!(!report.cache_inputs_detected);
    assert!(!report.rewrite_matches);
    assert_eq!(report.exit_code(), 1);
    assert_eq!(report.artifacts_found[&GraphRole::DecoderWithCache], false);
    assert!(report
        .missing_or_mismatched
        .iter()
        .any(|d| d.message.contains("decoder_with_cache artifact not found")));

    // 按角色顺序：首步 decoder 的问题排在 cache decoder 之前
    let roles: Vec<Option<GraphRole>> = report.missing_or_mismatched.iter().map(|d| d.role).collect();
    assert_eq!(
        roles,
        vec![Some(GraphRole::DecoderFirstStep), Some(GraphRole::DecoderWithCache)]
    );
}

#[test]
fn test_empty_directory_reports_every_role_missing() {
    let tmp = tempfile::tempdir().unwrap();

    let report = CacheCompatibilityVerifier::new(FakeInspector::default()).verify(tmp.path());

    assert_eq!(report.missing_or_mismatched.len(), 3);
    assert!(report
        .missing_or_mismatched
        .iter()
        .all(|d| d.kind == DiscrepancyKind::ArtifactMissing));
    assert!(report.rewrite_example.is_none());
    assert_eq!(report.exit_code(), 1);
}

#[test]
fn test_extra_layer_in_first_step_is_named() {
    let tmp = tempfile::tempdir().unwrap();
    touch(
        tmp.path(),
        &["encoder_model.onnx", "decoder_model.onnx", "decoder_with_past_model.onnx"],
    );
    let inspector = FakeInspector::default()
        .with("encoder_model.onnx", encoder_interface())
        .with("decoder_model.onnx", first_step_interface(0..6))
        .with(
            "decoder_with_past_model.onnx",
            cache_step_interface("past_key_values", 0..5),
        );

    let report = CacheCompatibilityVerifier::new(inspector).verify(tmp.path());

    assert!(report.rewrite_matches);
    assert!(!report.is_compatible());
    let slot_problems: Vec<&Discrepancy> = report
        .missing_or_mismatched
        .iter()
        .filter(|d| d.kind == DiscrepancyKind::CacheSlotMismatch)
        .collect();
    assert_eq!(slot_problems.len(), 1);
    assert!(slot_problems[0].message.contains("layer 5"));
    assert!(!slot_problems[0].message.contains("layer 4"));
}

#[test]
fn test_corrupt_encoder_does_not_stop_cache_check() {
    let tmp = tempfile::tempdir().unwrap();
    touch(tmp.path(), &["decoder_model.onnx", "decoder_with_past_model.onnx"]);
    fs::write(tmp.path().join("encoder_model.onnx"), "corrupt").unwrap();

    let report = CacheCompatibilityVerifier::new(healthy_inspector(4)).verify(tmp.path());

    assert_eq!(report.artifacts_found[&GraphRole::Encoder], false);
    assert_eq!(report.artifacts_found[&GraphRole::DecoderFirstStep], true);
    assert_eq!(report.artifacts_found[&GraphRole::DecoderWithCache], true);
    assert!(report.cache_inputs_detected);
    assert!(report.rewrite_matches);

    assert_eq!(report.missing_or_mismatched.len(), 1);
    let problem = &report.missing_or_mismatched[0];
    assert_eq!(problem.role, Some(GraphRole::Encoder));
    assert_eq!(problem.kind, DiscrepancyKind::ArtifactUnloadable);
    assert!(problem.message.contains("protobuf parsing failed"));

    let text = report.render_text();
    assert!(text.contains("LOAD FAILED"));
    assert_eq!(report.exit_code(), 1);
}

#[test]
fn test_prefix_drift_reports_both_names_and_a_rule() {
    let tmp = tempfile::tempdir().unwrap();
    touch(
        tmp.path(),
        &["encoder_model.onnx", "decoder_model.onnx", "decoder_with_past_model.onnx"],
    );
    let inspector = FakeInspector::default()
        .with("encoder_model.onnx", encoder_interface())
        .with("decoder_model.onnx", first_step_interface(0..3))
        .with(
            "decoder_with_past_model.onnx",
            cache_step_interface("decoder.past_key_values", 0..3),
        );

    let report = CacheCompatibilityVerifier::new(inspector).verify(tmp.path());

    assert!(report.cache_inputs_detected);
    assert!(!report.rewrite_matches);
    assert_eq!(report.exit_code(), 1);
    assert_eq!(
        report.input_template.as_deref(),
        Some("decoder.past_key_values.{layer}.{component}.{branch}")
    );

    let example = report.rewrite_example.as_ref().unwrap();
    assert_eq!(example.produced.as_deref(), Some("past_key_values.0.decoder.key"));
    assert_eq!(
        example.nearest_expected.as_deref(),
        Some("decoder.past_key_values.0.decoder.key")
    );
    assert_eq!(
        example.suggested_rule,
        Some(RewriteRule::new("present", "decoder.past_key_values"))
    );

    // 槽位本身一致，只有名字前缀漂移
    assert!(!report.has_kind(DiscrepancyKind::CacheSlotMismatch));
    let mismatch = report
        .missing_or_mismatched
        .iter()
        .find(|d| d.kind == DiscrepancyKind::NameRewriteMismatch)
        .unwrap();
    assert!(mismatch.message.contains("past_key_values.0.decoder.key"));
    assert!(mismatch.message.contains("decoder.past_key_values.0.decoder.key"));
}

#[test]
fn test_shortened_past_prefix_is_found_by_keyword() {
    let tmp = tempfile::tempdir().unwrap();
    touch(
        tmp.path(),
        &["encoder_model.onnx", "decoder_model.onnx", "decoder_with_past_model.onnx"],
    );
    let inspector = FakeInspector::default()
        .with("encoder_model.onnx", encoder_interface())
        .with("decoder_model.onnx", first_step_interface(0..4))
        .with("decoder_with_past_model.onnx", cache_step_interface("past", 0..4));

    let report = CacheCompatibilityVerifier::new(inspector).verify(tmp.path());

    // 前缀变了，但 cache 张量还在：走改名检查，而不是报"没有 cache"
    assert!(!report.has_kind(DiscrepancyKind::CacheTensorsAbsent));
    assert!(report.cache_inputs_detected);
    assert!(report.cache_names_drifted);
    assert_eq!(report.cache_input_count, 16);
    assert_eq!(report.input_template.as_deref(), Some("past.{layer}.{component}.{branch}"));

    assert!(!report.rewrite_matches);
    assert!(report.has_kind(DiscrepancyKind::NameRewriteMismatch));
    let example = report.rewrite_example.as_ref().unwrap();
    assert_eq!(example.nearest_expected.as_deref(), Some("past.0.decoder.key"));
    assert_eq!(example.suggested_rule, Some(RewriteRule::new("present", "past")));

    assert!(!report.has_kind(DiscrepancyKind::CacheSlotMismatch));
    assert_eq!(report.exit_code(), 1);
    assert!(report
        .render_text()
        .contains("map cache output names to inputs with: replace prefix `present` with `past`"));
}

#[test]
fn test_underscore_separated_cache_inputs_are_reported_as_rename() {
    let tmp = tempfile::tempdir().unwrap();
    touch(
        tmp.path(),
        &["encoder_model.onnx", "decoder_model.onnx", "decoder_with_past_model.onnx"],
    );
    let mut inputs = vec!["input_ids".to_string(), "encoder_attention_mask".to_string()];
    inputs.extend(cache_names("past_key_values", 0..2).iter().map(|n| n.replace('.', "_")));
    let inspector = FakeInspector::default()
        .with("encoder_model.onnx", encoder_interface())
        .with("decoder_model.onnx", first_step_interface(0..2))
        .with("decoder_with_past_model.onnx", interface(&inputs, &["logits".into()]));

    let report = CacheCompatibilityVerifier::new(inspector).verify(tmp.path());

    assert!(!report.has_kind(DiscrepancyKind::CacheTensorsAbsent));
    assert!(report.cache_inputs_detected);
    assert!(report.cache_names_drifted);
    assert_eq!(
        report.input_template.as_deref(),
        Some("past_key_values_{layer}_{component}_{branch}")
    );

    let example = report.rewrite_example.as_ref().unwrap();
    assert_eq!(example.produced.as_deref(), Some("past_key_values.0.decoder.key"));
    assert_eq!(
        example.nearest_expected.as_deref(),
        Some("past_key_values_0_decoder_key")
    );
    // 换前缀修不好分隔符，不给规则
    assert!(example.suggested_rule.is_none());

    let mismatch = report
        .missing_or_mismatched
        .iter()
        .find(|d| d.kind == DiscrepancyKind::NameRewriteMismatch)
        .unwrap();
    assert!(mismatch.message.contains("past_key_values_0_decoder_key"));
    // 槽位两侧一致
    assert!(!report.has_kind(DiscrepancyKind::CacheSlotMismatch));

    let text = report.render_text();
    assert!(text.contains("matched by keyword"));
    assert!(text.contains("past_key_values.<layer>.<component>.<branch>"));
}

#[test]
fn test_cache_graph_without_cache_inputs() {
    let tmp = tempfile::tempdir().unwrap();
    touch(
        tmp.path(),
        &["encoder_model.onnx", "decoder_model.onnx", "decoder_with_past_model.onnx"],
    );
    let inspector = FakeInspector::default()
        .with("encoder_model.onnx", encoder_interface())
        .with("decoder_model.onnx", first_step_interface(0..2))
        .with("decoder_with_past_model.onnx", first_step_interface(0..0));

    let report = CacheCompatibilityVerifier::new(inspector).verify(tmp.path());

    assert!(!report.cache_inputs_detected);
    assert!(report.rewrite_example.is_none());
    assert!(report.has_kind(DiscrepancyKind::CacheTensorsAbsent));
    assert!(report.render_text().contains("text2text-generation-with-past"));
}

#[test]
fn test_missing_first_step_falls_back_to_cache_graph_outputs() {
    let tmp = tempfile::tempdir().unwrap();
    touch(tmp.path(), &["encoder_model.onnx", "decoder_with_past_model.onnx"]);

    let report = CacheCompatibilityVerifier::new(healthy_inspector(3)).verify(tmp.path());

    assert_eq!(report.cache_output_role, Some(GraphRole::DecoderWithCache));
    assert!(report.cache_inputs_detected);
    assert!(report.rewrite_matches);
    assert!(report.has_kind(DiscrepancyKind::CardinalitySkipped));
    assert_eq!(report.exit_code(), 1);
}

#[test]
fn test_custom_extension() {
    let tmp = tempfile::tempdir().unwrap();
    touch(tmp.path(), &["encoder_model.ort"]);
    let inspector = FakeInspector::default().with("encoder_model.ort", encoder_interface());

    let report = CacheCompatibilityVerifier::new(inspector)
        .with_extension("ort")
        .unwrap()
        .verify(tmp.path());

    assert_eq!(report.artifacts_found[&GraphRole::Encoder], true);
    assert!(report
        .missing_or_mismatched
        .iter()
        .any(|d| d.message.contains("decoder_with_past_model.ort")));
}

#[test]
fn test_dotted_extension_is_rejected_up_front() {
    let result = CacheCompatibilityVerifier::new(FakeInspector::default()).with_extension(".onnx");
    match result {
        Err(EngineError::ConfigValue { field, .. }) => assert_eq!(field, "extension"),
        Err(e) => panic!("unexpected error: {e}"),
        Ok(_) => panic!("dotted extension accepted"),
    }
}

#[test]
fn test_json_report_is_machine_readable() {
    let tmp = tempfile::tempdir().unwrap();
    touch(tmp.path(), &["encoder_model.onnx", "decoder_model.onnx"]);
    let inspector = FakeInspector::default()
        .with("encoder_model.onnx", encoder_interface())
        .with("decoder_model.onnx", first_step_interface(0..0));

    let report = CacheCompatibilityVerifier::new(inspector).verify(tmp.path());
    let json: serde_json::Value =
        serde_json::from_str(&report.render(ReportFormat::Json).unwrap()).unwrap();

    assert_eq!(json["compatible"], false);
    assert_eq!(json["cache_inputs_detected"], false);
    assert_eq!(json["artifacts_found"]["decoder_with_cache"], false);
    assert_eq!(json["missing_or_mismatched"][1]["kind"], "artifact_missing");
}
