use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Init logging
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap();
    fmt().with_env_filter(filter).init();

    let config = tabletalk::config::Config::from_env();

    // Startup banner at info level so something always prints at default verbosity
    let rust_log = std::env::var("RUST_LOG").unwrap_or_else(|_| "<unset>".to_string());
    info!(
        target: "tabletalk",
        "tabletalk starting: RUST_LOG='{}', http_port={}, db_path={:?}, llm_configured={}",
        rust_log,
        config.http_port,
        config.db_path,
        config.llm.is_some()
    );

    tabletalk::server::run(config).await
}
