//! KV cache 张量命名约定
//!
//! 语法：`role_prefix "." layer_index "." component "." branch`
//!
//! - role_prefix：`past_key_values`（decoder_with_past 的输入）或 `present`（decoder 的输出）
//! - layer_index：十进制层号
//! - component：`decoder`（自注意力）或 `encoder`（交叉注意力）
//! - branch：`key` 或 `value`
//!
//! 首步 decoder 输出 `present.3.encoder.value`，下一步要作为
//! `past_key_values.3.encoder.value` 喂回 decoder_with_past，名字必须逐字节一致。

use std::fmt;

use serde::Serialize;

/// 名字中各段之间的分隔符
pub const SEPARATOR: char = '.';

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RolePrefix {
    /// 本步消费的 cache
    PastKeyValues,
    /// 下一步要消费的 cache
    Present,
}

impl RolePrefix {
    pub fn as_str(&self) -> &'static str {
        match self {
            RolePrefix::PastKeyValues => "past_key_values",
            RolePrefix::Present => "present",
        }
    }

    /// 宽松识别用的关键字，导出器改过前缀或分隔符时退到它
    pub fn keyword(&self) -> &'static str {
        match self {
            RolePrefix::PastKeyValues => "past",
            RolePrefix::Present => "present",
        }
    }

    fn from_token(token: &str) -> Option<Self> {
        match token {
            "past_key_values" => Some(RolePrefix::PastKeyValues),
            "present" => Some(RolePrefix::Present),
            _ => None,
        }
    }
}

impl fmt::Display for RolePrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheComponent {
    Decoder,
    Encoder,
}

impl CacheComponent {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheComponent::Decoder => "decoder",
            CacheComponent::Encoder => "encoder",
        }
    }

    fn from_token(token: &str) -> Option<Self> {
        match token {
            "decoder" => Some(CacheComponent::Decoder),
            "encoder" => Some(CacheComponent::Encoder),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheBranch {
    Key,
    Value,
}

impl CacheBranch {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheBranch::Key => "key",
            CacheBranch::Value => "value",
        }
    }

    fn from_token(token: &str) -> Option<Self> {
        match token {
            "key" => Some(CacheBranch::Key),
            "value" => Some(CacheBranch::Value),
            _ => None,
        }
    }
}

/// 一个 cache 槽位：(层号, component, branch)，与前缀无关
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct CacheSlot {
    pub layer_index: usize,
    pub component: CacheComponent,
    pub branch: CacheBranch,
}

impl CacheSlot {
    /// 解析前缀之后的三段；段数不对或任一段非法都返回 None
    fn from_tokens(tokens: &[&str]) -> Option<Self> {
        match tokens {
            [layer, component, branch] => {
                if layer.is_empty() || !layer.bytes().all(|b| b.is_ascii_digit()) {
                    return None;
                }
                Some(Self {
                    layer_index: layer.parse().ok()?,
                    component: CacheComponent::from_token(component)?,
                    branch: CacheBranch::from_token(branch)?,
                })
            }
            _ => None,
        }
    }
}

impl fmt::Display for CacheSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{SEPARATOR}{}{SEPARATOR}{}",
            self.layer_index,
            self.component.as_str(),
            self.branch.as_str()
        )
    }
}

/// 一个符合约定的 cache 张量名
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct CacheSlotPattern {
    pub role_prefix: RolePrefix,
    pub slot: CacheSlot,
}

impl CacheSlotPattern {
    pub fn new(role_prefix: RolePrefix, slot: CacheSlot) -> Self {
        Self { role_prefix, slot }
    }

    /// 严格按语法解析，前缀必须是第一段
    pub fn parse(name: &str) -> Option<Self> {
        let tokens: Vec<&str> = name.split(SEPARATOR).collect();
        let (head, rest) = tokens.split_first()?;
        Some(Self {
            role_prefix: RolePrefix::from_token(head)?,
            slot: CacheSlot::from_tokens(rest)?,
        })
    }

    /// 该槽位的规范名字
    pub fn name(&self) -> String {
        format!("{}{SEPARATOR}{}", self.role_prefix, self.slot)
    }

    /// 规范模板，如 `present.{layer}.{component}.{branch}`
    pub fn template(role_prefix: RolePrefix) -> String {
        format!("{role_prefix}{SEPARATOR}{{layer}}{SEPARATOR}{{component}}{SEPARATOR}{{branch}}")
    }
}

/// 名字按分隔符切分后是否含有该前缀段
pub fn has_prefix_token(name: &str, prefix: RolePrefix) -> bool {
    name.split(SEPARATOR).any(|token| token == prefix.as_str())
}

/// 从名字中定位槽位：找到前缀段，读取其后恰好三段
///
/// 前缀之前多出来的段（导出器版本间的前缀漂移）不影响槽位识别。
pub fn locate_slot(name: &str, prefix: RolePrefix) -> Option<CacheSlot> {
    let tokens: Vec<&str> = name.split(SEPARATOR).collect();
    let position = tokens.iter().position(|t| *t == prefix.as_str())?;
    CacheSlot::from_tokens(&tokens[position + 1..])
}

/// 从一个实际名字推断模板；前缀之前的段原样保留
///
/// `decoder.past_key_values.0.encoder.key` → `decoder.past_key_values.{layer}.{component}.{branch}`
pub fn infer_template(name: &str, prefix: RolePrefix) -> Option<String> {
    locate_slot(name, prefix)?;
    let tokens: Vec<&str> = name.split(SEPARATOR).collect();
    let position = tokens.iter().position(|t| *t == prefix.as_str())?;

    let mut parts: Vec<String> = tokens[..position].iter().map(|t| t.to_string()).collect();
    parts.push(CacheSlotPattern::template(prefix));
    let separator = SEPARATOR.to_string();
    Some(parts.join(separator.as_str()))
}

/// 小写后含有前缀关键字即可，不要求分隔符
///
/// 用在严格的前缀段一个都找不到时：`past.0.decoder.key`、`past_key_values_0_decoder_key`。
pub fn mentions_prefix(name: &str, prefix: RolePrefix) -> bool {
    name.to_lowercase().contains(prefix.keyword())
}

/// 按任意非字母数字字符切出的段，带字节区间
fn loose_spans(name: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut start = None;
    for (i, c) in name.char_indices() {
        if c.is_ascii_alphanumeric() {
            start.get_or_insert(i);
        } else if let Some(s) = start.take() {
            spans.push((s, i));
        }
    }
    if let Some(s) = start {
        spans.push((s, name.len()));
    }
    spans
}

fn loose_tokens(name: &str) -> Vec<&str> {
    loose_spans(name).into_iter().map(|(s, e)| &name[s..e]).collect()
}

/// 不看前缀和分隔符，取最后三段解析槽位
pub fn locate_slot_loose(name: &str) -> Option<CacheSlot> {
    let tokens = loose_tokens(name);
    let start = tokens.len().checked_sub(3)?;
    CacheSlot::from_tokens(&tokens[start..])
}

/// 宽松版模板：最后三段换成占位符，其余字符（包括原来的分隔符）原样保留
///
/// `past_key_values_0_decoder_key` → `past_key_values_{layer}_{component}_{branch}`
pub fn infer_template_loose(name: &str) -> Option<String> {
    locate_slot_loose(name)?;
    let spans = loose_spans(name);
    let &[.., layer, component, branch] = spans.as_slice() else {
        return None;
    };
    Some(format!(
        "{}{{layer}}{}{{component}}{}{{branch}}{}",
        &name[..layer.0],
        &name[layer.1..component.0],
        &name[component.1..branch.0],
        &name[branch.1..]
    ))
}

/// output → input 的改名规则：把第一个分隔符之前的首段替换掉，其余段原样复制
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RewriteRule {
    pub from: String,
    pub to: String,
}

impl RewriteRule {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }

    /// `present` → `past_key_values`
    pub fn canonical() -> Self {
        Self::new(RolePrefix::Present.as_str(), RolePrefix::PastKeyValues.as_str())
    }

    /// 首段不等于 `from`（或名字里没有分隔符）时规则不适用，返回 None
    pub fn apply(&self, name: &str) -> Option<String> {
        let (head, rest) = name.split_once(SEPARATOR)?;
        (head == self.from).then(|| format!("{}{SEPARATOR}{rest}", self.to))
    }

    /// 根据一对实际名字推出替换规则
    ///
    /// 去掉两边相同的末尾段后，输出名只剩首段时，用它替换输入名剩下的全部前导段
    /// （`present` → `decoder.past_key_values`）；否则只比较首段。
    /// 推出的规则必须能把 `output_name` 改写成 `input_name`，否则不给建议。
    pub fn suggest(output_name: &str, input_name: &str) -> Option<Self> {
        Self::candidate(output_name, input_name)
            .filter(|rule| rule.apply(output_name).as_deref() == Some(input_name))
    }

    fn candidate(output_name: &str, input_name: &str) -> Option<Self> {
        let out_tokens: Vec<&str> = output_name.split(SEPARATOR).collect();
        let in_tokens: Vec<&str> = input_name.split(SEPARATOR).collect();
        let shared = out_tokens
            .iter()
            .rev()
            .zip(in_tokens.iter().rev())
            .take_while(|(a, b)| a == b)
            .count();

        let out_lead = &out_tokens[..out_tokens.len() - shared];
        let in_lead = &in_tokens[..in_tokens.len() - shared];
        if let ([out_head], [_, ..]) = (out_lead, in_lead) {
            let separator = SEPARATOR.to_string();
            return Some(Self::new(*out_head, in_lead.join(separator.as_str())));
        }

        let out_head = out_tokens.first()?;
        let in_head = in_tokens.first()?;
        (out_head != in_head).then(|| Self::new(*out_head, *in_head))
    }
}

impl fmt::Display for RewriteRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "replace prefix `{}` with `{}`", self.from, self.to)
    }
}

/// 在候选输入里找与 `candidate` 末尾相同段数最多的名字，并列时取字典序最小
///
/// 段按任意非字母数字字符切分，分隔符不同的名字也能比较。
pub fn nearest_name<'a, I>(candidate: &str, names: I) -> Option<&'a str>
where
    I: IntoIterator<Item = &'a str>,
{
    let wanted = loose_tokens(candidate);
    let mut best: Option<(usize, &'a str)> = None;

    for name in names {
        let score = loose_tokens(name)
            .into_iter()
            .rev()
            .zip(wanted.iter().rev())
            .take_while(|(a, b)| a == *b)
            .count();

        best = match best {
            Some((best_score, best_name))
                if best_score > score || (best_score == score && best_name <= name) =>
            {
                Some((best_score, best_name))
            }
            _ => Some((score, name)),
        };
    }

    best.map(|(_, name)| name)
}
