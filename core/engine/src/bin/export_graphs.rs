// src/bin/export_graphs.rs
//
// 导出 encoder / decoder / decoder_with_past 图族：
//   cargo run --bin export_graphs -- --model facebook/nllb-200-distilled-600M --output nllb-onnx --compress arm64

use std::path::PathBuf;

use clap::Parser;
use tracing::error;

use graph_export_engine::exporter::OptimizationLevel;
use graph_export_engine::logging::init_tracing;
use graph_export_engine::{
    CompressionMode, ExportConfig, GraphFamilyExporter, ReportFormat, TargetArch,
};

const DEFAULT_MODEL: &str = "facebook/nllb-200-distilled-600M";
const DEFAULT_OUTPUT: &str = "nllb-onnx";

#[derive(Parser, Debug)]
#[command(name = "export_graphs", version, about = "Export a seq2seq model as an ONNX graph family with KV cache")]
struct Args {
    /// 模型 ID 或本地目录
    #[arg(long, default_value = DEFAULT_MODEL)]
    model: String,

    #[arg(short, long, default_value = DEFAULT_OUTPUT)]
    output: PathBuf,

    /// TOML 配置文件，命令行参数优先
    #[arg(long)]
    config: Option<PathBuf>,

    /// 不导出 decoder_with_past
    #[arg(long)]
    no_cache: bool,

    /// none | dynamic_int8 | target_arch_profile
    #[arg(long)]
    compress: Option<CompressionMode>,

    #[arg(long)]
    target_arch: Option<TargetArch>,

    #[arg(long)]
    optimize: Option<OptimizationLevel>,

    #[arg(long)]
    fixed_batch: Option<u32>,

    #[arg(long)]
    fixed_sequence_length: Option<u32>,

    /// Python 解释器
    #[arg(long)]
    python: Option<String>,

    /// text | json
    #[arg(long, default_value = "text")]
    format: ReportFormat,

    #[arg(short, long)]
    verbose: bool,
}

fn main() {
    let code = match real_main() {
        Ok(code) => code,
        Err(e) => {
            eprintln!("export_graphs error: {e:#}");
            1
        }
    };
    std::process::exit(code);
}

fn build_config(args: &Args) -> anyhow::Result<ExportConfig> {
    let mut config = match &args.config {
        Some(path) => ExportConfig::load_from_file(path)?,
        None => ExportConfig::default(),
    };

    if args.no_cache {
        config.enable_cache = false;
    }
    if let Some(mode) = args.compress {
        config.compress = mode;
    }
    if let Some(arch) = args.target_arch {
        config.target_arch = arch;
    }
    if let Some(level) = args.optimize {
        config.optimize = Some(level);
    }
    if let Some(batch) = args.fixed_batch {
        config.fixed_batch = Some(batch);
    }
    if let Some(seq_len) = args.fixed_sequence_length {
        config.fixed_sequence_length = Some(seq_len);
    }
    if let Some(python) = &args.python {
        config.python = python.clone();
    }

    Ok(config)
}

fn real_main() -> anyhow::Result<i32> {
    let args = Args::parse();
    init_tracing(args.verbose);

    let config = build_config(&args)?;
    let exporter = GraphFamilyExporter::from_config(&config);

    let summary = match exporter.export(&args.model, &args.output, &config) {
        Ok(summary) => summary,
        Err(e) => {
            error!(code = e.code(), "export aborted");
            eprintln!("error[{}]: {e}", e.code());
            return Ok(1);
        }
    };

    match args.format {
        ReportFormat::Text => print!("{}", summary.render_text()),
        ReportFormat::Json => println!("{}", summary.to_json()?),
    }

    Ok(summary.exit_code())
}
