pub mod error;
pub mod exporter;
pub mod graph_family;
pub mod logging;
pub mod onnx_utils;
pub mod verifier;

pub use error::{EngineError, EngineResult};
pub use exporter::{
    CompressionMode, ExportConfig, ExportEngine, ExportSummary, GraphCompressor,
    GraphFamilyExporter, OnnxRuntimeQuantizer, OptimumExportEngine, PythonRuntime, TargetArch,
};
pub use graph_family::{
    GraphArtifact, GraphInterface, GraphRole, RewriteRule, TensorDescriptor, DEFAULT_EXTENSION,
};
pub use verifier::{
    CacheCompatibilityVerifier, CompatibilityReport, Discrepancy, DiscrepancyKind,
    GraphInspector, OrtGraphInspector, ReportFormat,
};
