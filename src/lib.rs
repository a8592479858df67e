//! Lectern application library
//!
//! Wires the books module into the kernel and exposes the entry points used
//! by the `lectern-app` and `lectern` binaries.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use lectern_kernel::settings::Settings;
use lectern_kernel::{Database, InitCtx, ModuleRegistry, SystemClock};

pub mod modules;

pub use modules::books;

/// Registry with every application module registered
pub fn registry() -> ModuleRegistry {
    let mut registry = ModuleRegistry::new();
    modules::register_all(&mut registry);
    registry
}

/// Connect to the configured store
pub async fn connect(settings: &Settings) -> anyhow::Result<Database> {
    Database::connect(&settings.database.url, settings.database.max_connections)
        .await
        .with_context(|| format!("failed to connect to {}", settings.database.url))
}

/// Apply every pending module migration and return how many ran
pub async fn apply_migrations(db: &Database, registry: &ModuleRegistry) -> anyhow::Result<usize> {
    let applied = db
        .migrate(&registry.collect_migrations())
        .await
        .context("failed to apply migrations")?;
    tracing::info!(applied, "database schema up to date");
    Ok(applied)
}

/// Connect to the configured store and bring its schema up to date
pub async fn open_database(settings: &Settings, registry: &ModuleRegistry) -> anyhow::Result<Database> {
    let db = connect(settings).await?;
    apply_migrations(&db, registry).await?;
    Ok(db)
}

/// Apply pending migrations and exit
pub async fn migrate(settings: &Settings) -> anyhow::Result<usize> {
    let db = connect(settings).await?;
    let applied = apply_migrations(&db, &registry()).await;
    db.close().await;
    applied
}

/// Bulk-insert books from a JSON array of new-book objects
pub async fn import_books(settings: &Settings, path: &Path) -> anyhow::Result<usize> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    let new_books: Vec<books::models::NewBook> = serde_json::from_reader(std::io::BufReader::new(file))
        .with_context(|| format!("failed to parse {}", path.display()))?;

    let registry = registry();
    let db = open_database(settings, &registry).await?;
    let imported = books::catalog::import(&db, &new_books)
        .await
        .with_context(|| format!("failed to import books from {}", path.display()))?;
    db.close().await;
    Ok(imported)
}

/// Run the full application lifecycle until shutdown
pub async fn serve(settings: Settings) -> anyhow::Result<()> {
    let registry = registry();
    let db = open_database(&settings, &registry).await?;
    let ctx = InitCtx {
        settings: &settings,
        db: &db,
        clock: Arc::new(SystemClock),
    };

    registry.init_modules(&ctx).await?;
    registry.start_modules(&ctx).await?;

    let served = lectern_http::start_server(&registry, &ctx).await;

    registry.stop_modules().await?;
    db.close().await;
    served
}
