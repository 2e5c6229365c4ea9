use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::warn;

use super::role::GraphRole;
use crate::error::{EngineError, EngineResult};

/// 一个已导出的计算图文件
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GraphArtifact {
    pub role: GraphRole,
    pub file_path: PathBuf,
    pub is_compressed: bool,
    pub size_bytes: u64,
}

impl GraphArtifact {
    /// 读取文件大小并构造 artifact
    pub fn from_path(role: GraphRole, file_path: PathBuf, is_compressed: bool) -> EngineResult<Self> {
        let metadata = fs::metadata(&file_path)
            .map_err(|e| EngineError::io(format!("reading metadata of {}", file_path.display()), e))?;

        Ok(Self {
            role,
            file_path,
            is_compressed,
            size_bytes: metadata.len(),
        })
    }

    /// 在目录中定位某个角色的图：先找压缩版，再回退到未压缩版
    ///
    /// 两者都不存在时返回 `None`，调用方把该角色记为缺失。
    /// 路径存在却读不了（不是普通文件、权限、符号链接循环）时记一条 warn 再回退。
    pub fn resolve(dir: &Path, role: GraphRole, extension: &str) -> Option<Self> {
        [true, false].into_iter().find_map(|compressed| {
            let path = dir.join(role.file_name(compressed, extension));
            match fs::metadata(&path) {
                Ok(metadata) if metadata.is_file() => Some(Self {
                    role,
                    file_path: path,
                    is_compressed: compressed,
                    size_bytes: metadata.len(),
                }),
                Ok(_) => {
                    warn!(%role, path = %path.display(), "not a regular file, skipping");
                    None
                }
                Err(e) if e.kind() == ErrorKind::NotFound => None,
                Err(e) => {
                    warn!(%role, path = %path.display(), error = %e, "cannot read graph file metadata, skipping");
                    None
                }
            }
        })
    }

    pub fn file_name(&self) -> String {
        self.file_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    pub fn size_mb(&self) -> f64 {
        self.size_bytes as f64 / (1024.0 * 1024.0)
    }
}

/// 列出目录中所有符合命名约定的图（压缩与未压缩都算），按角色排序，未压缩在前
pub fn list_artifacts(dir: &Path, extension: &str) -> EngineResult<Vec<GraphArtifact>> {
    let mut artifacts = Vec::new();

    for role in GraphRole::ALL {
        for compressed in [false, true] {
            let path = dir.join(role.file_name(compressed, extension));
            if path.is_file() {
                artifacts.push(GraphArtifact::from_path(role, path, compressed)?);
            }
        }
    }

    Ok(artifacts)
}
