//! KV cache 兼容性校验
//!
//! 只读取三个图声明的接口，检查首步 decoder 的 `present.*` 输出
//! 在改名规则下能否一一对上 cache decoder 的 `past_key_values.*` 输入。
//! 不执行图，也不比较数值。

pub mod inspector;
pub mod report;

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use tracing::{debug, info, warn};

pub use inspector::{GraphInspector, OrtGraphInspector};
pub use report::{
    CompatibilityReport, Discrepancy, DiscrepancyKind, InspectedArtifact, ReportFormat,
    RewriteExample,
};

use crate::error::{EngineError, EngineResult};
use crate::graph_family::cache_pattern::{
    has_prefix_token, infer_template, infer_template_loose, locate_slot, locate_slot_loose,
    mentions_prefix, nearest_name,
};
use crate::graph_family::{
    validate_extension, CacheSlot, GraphArtifact, GraphInterface, GraphRole, RewriteRule, RolePrefix,
    DEFAULT_EXTENSION,
};

/// cache 兼容性校验器
pub struct CacheCompatibilityVerifier<I> {
    inspector: I,
    extension: String,
    rule: RewriteRule,
}

impl<I: GraphInspector> CacheCompatibilityVerifier<I> {
    pub fn new(inspector: I) -> Self {
        Self {
            inspector,
            extension: DEFAULT_EXTENSION.to_string(),
            rule: RewriteRule::canonical(),
        }
    }

    /// 换用其他扩展名；规则与导出配置相同
    pub fn with_extension(mut self, extension: impl Into<String>) -> EngineResult<Self> {
        let extension = extension.into();
        validate_extension(&extension)?;
        self.extension = extension;
        Ok(self)
    }

    /// 校验一个图族目录
    ///
    /// 单个图缺失或无法加载只会记成问题条目，其余图照常检查；这里不会返回错误。
    pub fn verify(&self, artifact_dir: &Path) -> CompatibilityReport {
        info!(dir = %artifact_dir.display(), "verifying graph family");

        let mut discrepancies = Vec::new();
        let mut artifacts_found = BTreeMap::new();
        let mut artifacts = Vec::new();
        let mut interfaces: BTreeMap<GraphRole, GraphInterface> = BTreeMap::new();

        // 1. 定位 + 2. 读取接口
        for role in GraphRole::ALL {
            let Some(artifact) = GraphArtifact::resolve(artifact_dir, role, &self.extension) else {
                warn!(%role, "graph not found");
                artifacts_found.insert(role, false);
                discrepancies.push(Discrepancy::new(
                    Some(role),
                    DiscrepancyKind::ArtifactMissing,
                    format!(
                        "{role} artifact not found (looked for {} and {})",
                        role.file_name(true, &self.extension),
                        role.file_name(false, &self.extension)
                    ),
                ));
                continue;
            };

            match self.inspector.load_interface(&artifact.file_path) {
                Ok(interface) => {
                    debug!(
                        %role,
                        file = %artifact.file_name(),
                        inputs = interface.inputs.len(),
                        outputs = interface.outputs.len(),
                        "graph loaded"
                    );
                    artifacts_found.insert(role, true);
                    artifacts.push(InspectedArtifact::loaded(&artifact, interface.clone()));
                    interfaces.insert(role, interface);
                }
                Err(e) => {
                    warn!(%role, error = %e, "graph could not be loaded");
                    artifacts_found.insert(role, false);
                    artifacts.push(InspectedArtifact::failed(&artifact, &e));
                    discrepancies.push(Discrepancy::from_error(Some(role), &e));
                }
            }
        }

        let cache_graph = interfaces.get(&GraphRole::DecoderWithCache);
        let first_step = interfaces.get(&GraphRole::DecoderFirstStep);

        // 3. 挑出两侧的 cache 张量；严格前缀段找不到时按关键字宽松挑选
        let cache_inputs = cache_graph
            .map(|g| CacheSelection::select(g.input_names(), RolePrefix::PastKeyValues))
            .unwrap_or_default();
        let (cache_output_role, cache_outputs) = match (first_step, cache_graph) {
            (Some(g), _) => (
                Some(GraphRole::DecoderFirstStep),
                CacheSelection::select(g.output_names(), RolePrefix::Present),
            ),
            (None, Some(g)) => (
                Some(GraphRole::DecoderWithCache),
                CacheSelection::select(g.output_names(), RolePrefix::Present),
            ),
            (None, None) => (None, CacheSelection::default()),
        };

        if cache_graph.is_some() && cache_inputs.names.is_empty() {
            discrepancies.push(Discrepancy::from_error(
                Some(GraphRole::DecoderWithCache),
                &EngineError::CacheTensorsAbsent {
                    role: GraphRole::DecoderWithCache,
                    prefix: RolePrefix::PastKeyValues.to_string(),
                },
            ));
        }
        if let (Some(role), true) = (cache_output_role, cache_outputs.names.is_empty()) {
            discrepancies.push(Discrepancy::from_error(
                Some(role),
                &EngineError::CacheTensorsAbsent {
                    role,
                    prefix: RolePrefix::Present.to_string(),
                },
            ));
        }

        let cache_inputs_detected = !cache_inputs.names.is_empty() && !cache_outputs.names.is_empty();
        let cache_names_drifted = cache_inputs.drifted || cache_outputs.drifted;
        let input_template = cache_inputs.template(RolePrefix::PastKeyValues);
        let output_template = cache_outputs.template(RolePrefix::Present);

        let mut rewrite_example = None;
        let mut rewrite_matches = false;

        if cache_inputs_detected {
            if let (Some(cache_graph), Some(representative)) = (cache_graph, cache_outputs.names.first()) {
                // 4. 改名规则检查，必须逐字节相等
                let declared_inputs = cache_graph.input_names();
                let produced = self.rule.apply(representative);
                rewrite_matches = produced
                    .as_deref()
                    .map_or(false, |name| declared_inputs.contains(name));

                let mut example = RewriteExample {
                    output_name: representative.to_string(),
                    produced: produced.clone(),
                    nearest_expected: None,
                    suggested_rule: None,
                };

                if !rewrite_matches {
                    let candidate = produced.as_deref().unwrap_or(representative);
                    let nearest = nearest_name(candidate, cache_inputs.names.iter().copied());
                    example.nearest_expected = nearest.map(str::to_string);
                    example.suggested_rule = nearest.and_then(|n| RewriteRule::suggest(representative, n));

                    let error = EngineError::NameRewriteMismatch {
                        produced: candidate.to_string(),
                        expected: nearest.unwrap_or("(none)").to_string(),
                    };
                    warn!(error = %error, "rewrite rule does not map outputs onto inputs");
                    discrepancies.push(Discrepancy::from_error(Some(GraphRole::DecoderWithCache), &error));
                }

                rewrite_example = Some(example);
            }

            match cache_output_role {
                Some(GraphRole::DecoderFirstStep) => {
                    discrepancies.extend(compare_slots(&cache_outputs, &cache_inputs));
                }
                _ => discrepancies.push(Discrepancy::new(
                    Some(GraphRole::DecoderFirstStep),
                    DiscrepancyKind::CardinalitySkipped,
                    "layer cardinality check skipped: decoder_first_step is unavailable, \
                     rewrite check used decoder_with_cache outputs",
                )),
            }
        }

        // 5. 按角色顺序稳定排序，与角色无关的条目放最后
        discrepancies.sort_by_key(|d| (d.role.is_none(), d.role));

        let report = CompatibilityReport {
            artifact_dir: artifact_dir.to_path_buf(),
            artifacts_found,
            artifacts,
            cache_inputs_detected,
            cache_names_drifted,
            cache_input_count: cache_inputs.names.len(),
            cache_output_count: cache_outputs.names.len(),
            cache_output_role,
            input_template,
            output_template,
            rewrite_rule_applied: self.rule.to_string(),
            rewrite_example,
            rewrite_matches,
            missing_or_mismatched: discrepancies,
        };

        info!(
            compatible = report.is_compatible(),
            problems = report.missing_or_mismatched.len(),
            "verification finished"
        );
        report
    }
}

/// 一侧挑出来的 cache 张量名
#[derive(Debug, Default)]
struct CacheSelection<'a> {
    names: BTreeSet<&'a str>,
    /// 没有一个名字带严格的前缀段，靠关键字挑出
    drifted: bool,
}

impl<'a> CacheSelection<'a> {
    fn select(names: BTreeSet<&'a str>, prefix: RolePrefix) -> Self {
        let strict: BTreeSet<&str> = names
            .iter()
            .copied()
            .filter(|name| has_prefix_token(name, prefix))
            .collect();
        if !strict.is_empty() {
            return Self {
                names: strict,
                drifted: false,
            };
        }

        let loose: BTreeSet<&str> = names
            .into_iter()
            .filter(|name| mentions_prefix(name, prefix))
            .collect();
        if !loose.is_empty() {
            warn!(
                %prefix,
                count = loose.len(),
                "no tensor carries the exact prefix token, matching cache names by keyword"
            );
        }
        Self {
            drifted: !loose.is_empty(),
            names: loose,
        }
    }

    fn slot(&self, name: &str, prefix: RolePrefix) -> Option<CacheSlot> {
        if self.drifted {
            locate_slot_loose(name)
        } else {
            locate_slot(name, prefix)
        }
    }

    fn template(&self, prefix: RolePrefix) -> Option<String> {
        let first = self.names.first()?;
        if self.drifted {
            infer_template_loose(first)
        } else {
            infer_template(first, prefix)
        }
    }
}

/// 比较两侧的槽位集合，每个对不上的层一条问题
fn compare_slots(outputs: &CacheSelection<'_>, inputs: &CacheSelection<'_>) -> Vec<Discrepancy> {
    let mut discrepancies = Vec::new();

    let mut collect = |selection: &CacheSelection<'_>, prefix: RolePrefix, role: GraphRole| {
        let mut slots = BTreeSet::new();
        for name in &selection.names {
            match selection.slot(name, prefix) {
                Some(slot) => {
                    slots.insert(slot);
                }
                None => discrepancies.push(Discrepancy::new(
                    Some(role),
                    DiscrepancyKind::CacheSlotMismatch,
                    format!("`{name}` does not follow {prefix}.<layer>.<decoder|encoder>.<key|value>"),
                )),
            }
        }
        slots
    };
    let produced = collect(outputs, RolePrefix::Present, GraphRole::DecoderFirstStep);
    let consumed = collect(inputs, RolePrefix::PastKeyValues, GraphRole::DecoderWithCache);

    for (layer, slots) in group_by_layer(produced.difference(&consumed)) {
        discrepancies.push(Discrepancy::new(
            Some(GraphRole::DecoderFirstStep),
            DiscrepancyKind::CacheSlotMismatch,
            format!(
                "layer {layer}: decoder_first_step outputs present.{layer}.{{{slots}}} \
                 but decoder_with_cache declares no matching past_key_values inputs"
            ),
        ));
    }
    for (layer, slots) in group_by_layer(consumed.difference(&produced)) {
        discrepancies.push(Discrepancy::new(
            Some(GraphRole::DecoderWithCache),
            DiscrepancyKind::CacheSlotMismatch,
            format!(
                "layer {layer}: decoder_with_cache expects past_key_values.{layer}.{{{slots}}} \
                 but decoder_first_step produces no matching present outputs"
            ),
        ));
    }

    discrepancies
}

/// 按层号分组，值为 `decoder.key, decoder.value` 这样的列表
fn group_by_layer<'a>(slots: impl Iterator<Item = &'a CacheSlot>) -> BTreeMap<usize, String> {
    let mut grouped: BTreeMap<usize, Vec<String>> = BTreeMap::new();
    for slot in slots {
        grouped
            .entry(slot.layer_index)
            .or_default()
            .push(format!("{}.{}", slot.component.as_str(), slot.branch.as_str()));
    }
    grouped
        .into_iter()
        .map(|(layer, parts)| (layer, parts.join(", ")))
        .collect()
}
