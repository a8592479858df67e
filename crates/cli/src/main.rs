use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use lectern_kernel::settings::Settings;

/// Lectern library lending tracker
#[derive(Debug, Parser)]
#[command(name = "lectern", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the HTTP server until interrupted
    Serve,
    /// Apply pending schema migrations and exit
    Migrate,
    /// Bulk-insert books from a JSON array file
    Import {
        /// Path to a JSON file holding an array of new books
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let settings = Settings::load().with_context(|| "failed to load lectern settings")?;
    lectern_telemetry::init(&settings.telemetry);

    match cli.command {
        Command::Serve => {
            tracing::info!(env = ?settings.environment, "starting lectern server");
            lectern_app::serve(settings).await
        }
        Command::Migrate => {
            let applied = lectern_app::migrate(&settings).await?;
            tracing::info!(applied, "migrations complete");
            Ok(())
        }
        Command::Import { path } => {
            let imported = lectern_app::import_books(&settings, &path).await?;
            tracing::info!(imported, path = %path.display(), "import complete");
            Ok(())
        }
    }
}
