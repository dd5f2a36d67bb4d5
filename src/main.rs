//! intentsql CLI
//!
//! - `intentsql serve` (default) - answer prompts over HTTP
//! - `intentsql embed-templates` - compute missing template embeddings
//! - `intentsql add-template <NAME> <INTENT> <SQL>` - insert or replace a template

use clap::{Parser, Subcommand};
use intentsql::application::QueryService;
use intentsql::domain::error::Result;
use intentsql::infrastructure::config::Settings;
use intentsql::infrastructure::db::seed::{backfill_embeddings, ensure_templates_table, upsert_template};
use intentsql::infrastructure::db::SqlStore;
use intentsql::infrastructure::embedding::build_embedder;
use intentsql::interfaces::http::{start_server, HttpState};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "intentsql")]
#[command(about = "Match natural-language prompts to SQL templates and stream the rows")]
#[command(version)]
struct Cli {
    /// Path to config file (default: intentsql.toml or $INTENTSQL_CONFIG)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP service
    Serve,

    /// Embed every template whose embedding is missing
    EmbedTemplates,

    /// Insert a template, or replace the one with the same name
    AddTemplate {
        name: String,
        intent: String,
        sql: String,
    },
}

#[actix_web::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .try_init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.as_ref().map(|p| p.to_string_lossy().into_owned());
    let settings = Settings::load(config_path.as_deref())?;

    let store = SqlStore::connect(&settings.database, (&settings.streaming).into()).await?;
    ensure_templates_table(&store).await?;

    let result = match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(settings, store.clone()).await,
        Commands::EmbedTemplates => {
            let embedder = build_embedder(&settings.embedding)?;
            let updated = backfill_embeddings(&store, embedder.as_ref()).await?;
            println!("Embedded {} template(s)", updated);
            Ok(())
        }
        Commands::AddTemplate { name, intent, sql } => {
            upsert_template(&store, &name, &intent, &sql).await?;
            println!("Saved template '{}'; run embed-templates to index it", name);
            Ok(())
        }
    };

    store.close().await;
    result
}

async fn serve(settings: Settings, store: SqlStore) -> Result<()> {
    let store = Arc::new(store);
    let embedder = build_embedder(&settings.embedding)?;
    let service = QueryService::load(
        embedder,
        store.as_ref(),
        store.clone(),
        settings.matching.to_match_settings(),
    )
    .await?;

    info!(
        "Catalog ready: {} templates, embedder {}",
        service.template_count().await,
        service.embedder_description()
    );

    let state = HttpState {
        service: Arc::new(service),
        templates: store,
        include_meta: settings.streaming.include_meta,
    };
    start_server(state, &settings.server.host, settings.server.port)?.await?;
    Ok(())
}
