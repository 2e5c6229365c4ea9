// src/bin/verify_graphs.rs
//
// 检查导出的图族能否做 KV cache 增量解码：
//   cargo run --bin verify_graphs -- nllb-onnx

use std::path::PathBuf;

use clap::Parser;

use graph_export_engine::logging::init_tracing;
use graph_export_engine::{
    CacheCompatibilityVerifier, OrtGraphInspector, ReportFormat, DEFAULT_EXTENSION,
};

#[derive(Parser, Debug)]
#[command(name = "verify_graphs", version, about = "Check KV cache name compatibility of an exported ONNX graph family")]
struct Args {
    /// 图族所在目录
    artifact_dir: PathBuf,

    #[arg(long, default_value = DEFAULT_EXTENSION)]
    extension: String,

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
            eprintln!("verify_graphs error: {e:#}");
            1
        }
    };
    std::process::exit(code);
}

fn real_main() -> anyhow::Result<i32> {
    let args = Args::parse();
    init_tracing(args.verbose);

    if !args.artifact_dir.is_dir() {
        anyhow::bail!("artifact directory not found: {}", args.artifact_dir.display());
    }

    let inspector = OrtGraphInspector::new()?;
    let verifier = CacheCompatibilityVerifier::new(inspector).with_extension(args.extension)?;
    let report = verifier.verify(&args.artifact_dir);

    let rendered = report.render(args.format)?;
    if rendered.ends_with('\n') {
        print!("{rendered}");
    } else {
        println!("{rendered}");
    }

    Ok(report.exit_code())
}
