use clap::Parser;
use linebot_server::{App, Config};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cfg = Config::parse();

    let app = match App::build(cfg).await {
        Ok(app) => app,
        Err(err) => {
            tracing::error!(error = %err, "startup failed");
            std::process::exit(1);
        }
    };

    if let Err(err) = app.run().await {
        tracing::error!(error = %err, "server exited with error");
        std::process::exit(1);
    }
}
