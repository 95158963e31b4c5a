use llama_relay::{config::Settings, server};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let settings = Settings::from_env();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(settings.log_level.clone()));
    tracing_subscriber::fmt().json().with_env_filter(filter).init();

    if let Err(err) = server::serve(settings).await {
        tracing::error!(error = %err, "server exited");
        std::process::exit(1);
    }
}
