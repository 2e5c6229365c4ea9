use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

/// 图文件默认扩展名
pub const DEFAULT_EXTENSION: &str = "onnx";

/// 压缩后文件名的后缀（`<stem>_quantized.<ext>`）
pub const COMPRESSED_SUFFIX: &str = "_quantized";

/// 与图族一起分发的 tokenizer 文件，只透传，不解析
pub const TOKENIZER_FILE: &str = "tokenizer.json";

/// 扩展名不能为空，也不能带点（`onnx` 而不是 `.onnx`）
pub fn validate_extension(extension: &str) -> EngineResult<()> {
    if extension.trim().is_empty() || extension.contains('.') {
        return Err(EngineError::config(
            "extension",
            format!("invalid artifact extension: {extension:?} (expected e.g. \"onnx\")"),
        ));
    }
    Ok(())
}

/// 图族中的三个角色
/// 对应文件名：encoder_model / decoder_model / decoder_with_past_model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GraphRole {
    Encoder,
    DecoderFirstStep,
    DecoderWithCache,
}

impl GraphRole {
    /// 固定的发现顺序，报告也按这个顺序输出
    pub const ALL: [GraphRole; 3] = [
        GraphRole::Encoder,
        GraphRole::DecoderFirstStep,
        GraphRole::DecoderWithCache,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            GraphRole::Encoder => "encoder",
            GraphRole::DecoderFirstStep => "decoder_first_step",
            GraphRole::DecoderWithCache => "decoder_with_cache",
        }
    }

    /// 导出引擎写出的文件名主干
    pub fn file_stem(&self) -> &'static str {
        match self {
            GraphRole::Encoder => "encoder_model",
            GraphRole::DecoderFirstStep => "decoder_model",
            GraphRole::DecoderWithCache => "decoder_with_past_model",
        }
    }

    /// 完整文件名，如 `decoder_with_past_model_quantized.onnx`
    pub fn file_name(&self, compressed: bool, extension: &str) -> String {
        if compressed {
            format!("{}{}.{}", self.file_stem(), COMPRESSED_SUFFIX, extension)
        } else {
            format!("{}.{}", self.file_stem(), extension)
        }
    }

    /// 从文件名反查角色，返回 (角色, 是否压缩)
    pub fn from_file_name(name: &str, extension: &str) -> Option<(GraphRole, bool)> {
        GraphRole::ALL.into_iter().find_map(|role| {
            if name == role.file_name(true, extension) {
                Some((role, true))
            } else if name == role.file_name(false, extension) {
                Some((role, false))
            } else {
                None
            }
        })
    }

    /// 启用 KV cache 时三个角色都必须存在，否则只要求 encoder 和首步 decoder
    pub fn required(enable_cache: bool) -> Vec<GraphRole> {
        if enable_cache {
            GraphRole::ALL.to_vec()
        } else {
            vec![GraphRole::Encoder, GraphRole::DecoderFirstStep]
        }
    }
}

impl FromStr for GraphRole {
    type Err = EngineError;

    fn from_str(s: &str) -> EngineResult<Self> {
        match s.to_lowercase().as_str() {
            "encoder" => Ok(GraphRole::Encoder),
            "decoder" | "decoder_first_step" => Ok(GraphRole::DecoderFirstStep),
            "decoder_with_past" | "decoder_with_cache" => Ok(GraphRole::DecoderWithCache),
            _ => Err(EngineError::config(
                "role",
                format!("unknown graph role: {s} (expected encoder, decoder_first_step or decoder_with_cache)"),
            )),
        }
    }
}

impl fmt::Display for GraphRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
