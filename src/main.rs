use anyhow::Context;
use lectern_kernel::settings::Settings;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::load().with_context(|| "failed to load lectern settings")?;
    lectern_telemetry::init(&settings.telemetry);

    tracing::info!(
        env = ?settings.environment,
        db = %settings.database.url,
        "lectern-app bootstrap starting"
    );

    lectern_app::serve(settings).await
}
