use docqa_server::{Settings, run_server};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::from_env()?;
    docqa_telemetry::init_from_env("docqa")?;
    tracing::debug!(?settings, "settings loaded");

    run_server(settings).await
}
