//! 图族数据模型
//!
//! encoder / decoder（首步）/ decoder_with_past 三个图的角色、文件命名、
//! 张量接口描述，以及 KV cache 张量的命名语法。

pub mod artifact;
pub mod cache_pattern;
pub mod role;
pub mod tensor;

pub use artifact::{list_artifacts, GraphArtifact};
pub use cache_pattern::{
    CacheBranch, CacheComponent, CacheSlot, CacheSlotPattern, RewriteRule, RolePrefix,
};
pub use role::{validate_extension, GraphRole, COMPRESSED_SUFFIX, DEFAULT_EXTENSION, TOKENIZER_FILE};
pub use tensor::{Dimension, ElementType, GraphInterface, TensorDescriptor};
