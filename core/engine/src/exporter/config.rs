//! 导出配置
//!
//! 可以从 TOML 文件加载（`export_config.toml`），命令行参数再覆盖其中的字段。

use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};
use crate::graph_family::{validate_extension, DEFAULT_EXTENSION};

/// 导出后的压缩策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompressionMode {
    None,
    /// 动态量化，权重为 uint8
    DynamicInt8,
    /// 针对目标架构（默认 arm64）的量化配置
    TargetArchProfile,
}

impl FromStr for CompressionMode {
    type Err = EngineError;

    fn from_str(s: &str) -> EngineResult<Self> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "none" | "off" => Ok(CompressionMode::None),
            "dynamic_int8" | "int8" | "dynamic" => Ok(CompressionMode::DynamicInt8),
            "target_arch_profile" | "target_arch" | "arm64" | "profile" => {
                Ok(CompressionMode::TargetArchProfile)
            }
            _ => Err(EngineError::config(
                "compress",
                format!("unknown compression mode: {s} (expected none, dynamic_int8 or target_arch_profile)"),
            )),
        }
    }
}

impl fmt::Display for CompressionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CompressionMode::None => "none",
            CompressionMode::DynamicInt8 => "dynamic_int8",
            CompressionMode::TargetArchProfile => "target_arch_profile",
        })
    }
}

/// `target_arch_profile` 使用的指令集
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetArch {
    Arm64,
    Avx2,
    Avx512,
    Avx512Vnni,
}

impl TargetArch {
    /// 量化配置工厂方法名
    pub fn profile_name(&self) -> &'static str {
        match self {
            TargetArch::Arm64 => "arm64",
            TargetArch::Avx2 => "avx2",
            TargetArch::Avx512 => "avx512",
            TargetArch::Avx512Vnni => "avx512_vnni",
        }
    }
}

impl FromStr for TargetArch {
    type Err = EngineError;

    fn from_str(s: &str) -> EngineResult<Self> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "arm64" | "aarch64" => Ok(TargetArch::Arm64),
            "avx2" => Ok(TargetArch::Avx2),
            "avx512" => Ok(TargetArch::Avx512),
            "avx512_vnni" => Ok(TargetArch::Avx512Vnni),
            _ => Err(EngineError::config(
                "target_arch",
                format!("unknown target architecture: {s} (expected arm64, avx2, avx512 or avx512_vnni)"),
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Device {
    Cpu,
}

impl Device {
    pub fn as_str(&self) -> &'static str {
        match self {
            Device::Cpu => "cpu",
        }
    }
}

/// 导出时的图优化等级
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OptimizationLevel {
    O1,
    O2,
    O3,
    O4,
}

impl OptimizationLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            OptimizationLevel::O1 => "O1",
            OptimizationLevel::O2 => "O2",
            OptimizationLevel::O3 => "O3",
            OptimizationLevel::O4 => "O4",
        }
    }
}

impl FromStr for OptimizationLevel {
    type Err = EngineError;

    fn from_str(s: &str) -> EngineResult<Self> {
        match s.to_uppercase().as_str() {
            "O1" | "1" => Ok(OptimizationLevel::O1),
            "O2" | "2" => Ok(OptimizationLevel::O2),
            "O3" | "3" => Ok(OptimizationLevel::O3),
            "O4" | "4" => Ok(OptimizationLevel::O4),
            _ => Err(EngineError::config(
                "optimize",
                format!("unknown optimization level: {s} (expected O1..O4)"),
            )),
        }
    }
}

/// 导出配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    /// 是否导出带 KV cache 的任务变体（生成 decoder_with_past）
    pub enable_cache: bool,
    pub compress: CompressionMode,
    pub device: Device,
    /// 固定 batch 大小（形状特化）
    pub fixed_batch: Option<u32>,
    /// 固定序列长度（形状特化）
    pub fixed_sequence_length: Option<u32>,
    pub optimize: Option<OptimizationLevel>,
    pub fp16: bool,
    pub target_arch: TargetArch,
    /// Python 解释器命令
    pub python: String,
    /// 图文件扩展名
    pub extension: String,
    /// 为 false 时禁止导出器把两个 decoder 合并成一个文件
    pub post_process: bool,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            enable_cache: true,
            compress: CompressionMode::None,
            device: Device::Cpu,
            fixed_batch: None,
            fixed_sequence_length: None,
            optimize: None,
            fp16: false,
            target_arch: TargetArch::Arm64,
            python: "python3".to_string(),
            extension: DEFAULT_EXTENSION.to_string(),
            post_process: false,
        }
    }
}

impl ExportConfig {
    /// 从 TOML 文件加载，缺省字段取默认值
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> EngineResult<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|e| EngineError::io(format!("reading config file {}", path.display()), e))?;

        let config: ExportConfig = toml::from_str(&content)
            .map_err(|e| EngineError::config(path.display().to_string(), e.to_string()))?;

        Ok(config)
    }

    /// 导出引擎的任务名
    pub fn task(&self) -> &'static str {
        if self.enable_cache {
            "text2text-generation-with-past"
        } else {
            "text2text-generation"
        }
    }

    pub fn validate(&self) -> EngineResult<()> {
        if self.fixed_batch == Some(0) {
            return Err(EngineError::config("fixed_batch", "must be greater than 0"));
        }
        if self.fixed_sequence_length == Some(0) {
            return Err(EngineError::config(
                "fixed_sequence_length",
                "must be greater than 0",
            ));
        }
        if self.fp16 && self.device == Device::Cpu {
            return Err(EngineError::config(
                "fp16",
                "half-precision export requires an accelerator device; the cpu device exports float32",
            ));
        }
        validate_extension(&self.extension)?;
        if self.python.trim().is_empty() {
            return Err(EngineError::config("python", "interpreter command is empty"));
        }
        Ok(())
    }
}
