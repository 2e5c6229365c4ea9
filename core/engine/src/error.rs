//! 导出 / 校验流程的错误分类
//!
//! 每个变体都带上足够的上下文，让构建人员不看源码也知道下一步该做什么。

use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

use crate::graph_family::GraphRole;

#[derive(Debug, Error)]
pub enum EngineError {
    /// 外部导出 / 推理能力不可用（预检阶段，致命）
    #[error("dependency unavailable: {dependency}\n  → {hint}")]
    DependencyUnavailable { dependency: String, hint: String },

    /// 导出调用本身失败，整个图族不可信（致命）
    #[error("graph export failed for {model_id}: {message}\n  → no artifact was moved into place; fix the cause and re-run the export")]
    ExportEngineFailure { model_id: String, message: String },

    /// 单个图的量化失败（可恢复，保留未压缩的图）
    #[error("compression failed for {role}: {message}\n  → the uncompressed {role} artifact is still usable")]
    CompressionFailure { role: GraphRole, message: String },

    /// 图文件损坏或不是合法的图（校验时可恢复）
    #[error("failed to load {}: {message}", path.display())]
    ArtifactUnloadable { path: PathBuf, message: String },

    /// 没有 KV cache 张量，通常是导出时没有启用 with-past 任务
    #[error("{role} declares no `{prefix}.*` cache tensors\n  → re-export with the cache-enabled task (text2text-generation-with-past)")]
    CacheTensorsAbsent { role: GraphRole, prefix: String },

    /// 改名规则产生的名字在 cache 图的输入里找不到
    #[error("name rewrite mismatch: rule produced `{produced}` but the nearest declared input is `{expected}`")]
    NameRewriteMismatch { produced: String, expected: String },

    #[error("invalid configuration value for '{field}': {message}")]
    ConfigValue { field: String, message: String },

    /// 报告 / 摘要无法序列化成 JSON
    #[error("failed to serialize {what} as JSON: {source}")]
    Serialization {
        what: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("IO error: {context}\n  Cause: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl EngineError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    pub fn config(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConfigValue {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn serialization(what: impl Into<String>, source: serde_json::Error) -> Self {
        Self::Serialization {
            what: what.into(),
            source,
        }
    }

    /// 结构化输出用的错误码
    pub fn code(&self) -> &'static str {
        match self {
            Self::DependencyUnavailable { .. } => "E001",
            Self::ExportEngineFailure { .. } => "E002",
            Self::CompressionFailure { .. } => "E003",
            Self::ArtifactUnloadable { .. } => "E010",
            Self::CacheTensorsAbsent { .. } => "E011",
            Self::NameRewriteMismatch { .. } => "E012",
            Self::ConfigValue { .. } => "E020",
            Self::Io { .. } => "E030",
            Self::Serialization { .. } => "E031",
        }
    }

    /// 致命错误会中止整次调用；其余错误只记录在单个图上，兄弟图照常处理
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::DependencyUnavailable { .. }
                | Self::ExportEngineFailure { .. }
                | Self::ConfigValue { .. }
                | Self::Io { .. }
                | Self::Serialization { .. }
        )
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

/// 带缩进的 JSON，失败时记下是哪份输出
pub fn to_pretty_json<T: Serialize + ?Sized>(what: &str, value: &T) -> EngineResult<String> {
    serde_json::to_string_pretty(value).map_err(|e| EngineError::serialization(what, e))
}
