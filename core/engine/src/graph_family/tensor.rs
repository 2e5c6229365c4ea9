use std::collections::BTreeSet;
use std::fmt;

use serde::Serialize;

/// 张量的一个维度，导出时未固定的维度为动态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Dimension {
    Fixed(u64),
    Dynamic,
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dimension::Fixed(n) => write!(f, "{n}"),
            Dimension::Dynamic => f.write_str("?"),
        }
    }
}

/// 张量元素类型
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementType {
    Float32,
    Float16,
    Bfloat16,
    Float64,
    Int64,
    Int32,
    Int16,
    Int8,
    Uint8,
    Uint16,
    Uint32,
    Uint64,
    Bool,
    String,
    Other(std::string::String),
}

impl ElementType {
    /// 按推理引擎给出的类型名解析（大小写、下划线不敏感）
    pub fn from_engine_name(name: &str) -> Self {
        let normalized: std::string::String = name
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .map(|c| c.to_ascii_lowercase())
            .collect();

        match normalized.as_str() {
            "float32" | "float" | "f32" => ElementType::Float32,
            "float16" | "f16" => ElementType::Float16,
            "bfloat16" | "bf16" => ElementType::Bfloat16,
            "float64" | "double" | "f64" => ElementType::Float64,
            "int64" | "i64" => ElementType::Int64,
            "int32" | "i32" => ElementType::Int32,
            "int16" | "i16" => ElementType::Int16,
            "int8" | "i8" => ElementType::Int8,
            "uint8" | "u8" => ElementType::Uint8,
            "uint16" | "u16" => ElementType::Uint16,
            "uint32" | "u32" => ElementType::Uint32,
            "uint64" | "u64" => ElementType::Uint64,
            "bool" => ElementType::Bool,
            "string" => ElementType::String,
            _ => ElementType::Other(name.to_string()),
        }
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ElementType::Float32 => "float32",
            ElementType::Float16 => "float16",
            ElementType::Bfloat16 => "bfloat16",
            ElementType::Float64 => "float64",
            ElementType::Int64 => "int64",
            ElementType::Int32 => "int32",
            ElementType::Int16 => "int16",
            ElementType::Int8 => "int8",
            ElementType::Uint8 => "uint8",
            ElementType::Uint16 => "uint16",
            ElementType::Uint32 => "uint32",
            ElementType::Uint64 => "uint64",
            ElementType::Bool => "bool",
            ElementType::String => "string",
            ElementType::Other(other) => other.as_str(),
        };
        f.write_str(name)
    }
}

/// 图的一个输入或输出槽位
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TensorDescriptor {
    pub name: String,
    pub shape: Vec<Dimension>,
    pub element_type: ElementType,
}

impl TensorDescriptor {
    pub fn new(name: impl Into<String>, shape: Vec<Dimension>, element_type: ElementType) -> Self {
        Self {
            name: name.into(),
            shape,
            element_type,
        }
    }

    /// 形如 `[?, 16, ?, 64]`
    pub fn shape_string(&self) -> String {
        let dims: Vec<String> = self.shape.iter().map(ToString::to_string).collect();
        format!("[{}]", dims.join(", "))
    }
}

/// 一个图声明的全部输入输出
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GraphInterface {
    pub inputs: Vec<TensorDescriptor>,
    pub outputs: Vec<TensorDescriptor>,
}

impl GraphInterface {
    pub fn input_names(&self) -> BTreeSet<&str> {
        self.inputs.iter().map(|t| t.name.as_str()).collect()
    }

    pub fn output_names(&self) -> BTreeSet<&str> {
        self.outputs.iter().map(|t| t.name.as_str()).collect()
    }
}
