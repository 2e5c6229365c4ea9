use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// 初始化日志，写到 stderr，stdout 只留给报告本身
///
/// 设置了 `RUST_LOG` 时以它为准；否则默认 info，`verbose` 时 debug。
pub fn init_tracing(verbose: bool) {
    let default_level = if verbose {
        "graph_export_engine=debug,export_graphs=debug,verify_graphs=debug"
    } else {
        "info"
    };

    // 重复初始化（比如测试里）直接忽略
    let _ = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default_level.into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();
}
