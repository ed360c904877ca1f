use std::sync::Arc;

use clap::Parser;
use gatekeeper::{demo, settings, web};
use miette::{IntoDiagnostic, Result};
use migration::MigratorTrait;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(
    name = "gatekeeper",
    version,
    about = "Authorization-aware GraphQL API over projects and tasks"
)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Skip inserting sample data into an empty database
    #[arg(long)]
    no_seed: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // logging
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(env_filter).init();

    let cli = Cli::parse();

    // load settings
    let settings = settings::Settings::load(&cli.config)?;
    tracing::info!(?settings, "Loaded configuration");

    // init storage (database)
    let db = sea_orm::Database::connect(&settings.database.url)
        .await
        .into_diagnostic()?;
    migration::Migrator::up(&db, None).await.into_diagnostic()?;

    if !cli.no_seed {
        demo::seed(&db).await?;
    }

    let engine = Arc::new(demo::engine(db.clone(), &settings));
    let schema = demo::schema(engine, db).into_diagnostic()?;

    web::serve(&settings, schema).await
}
