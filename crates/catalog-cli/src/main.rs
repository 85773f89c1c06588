use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use catalog_adapters::{ChatCompletionsProvider, TextExtractor, ThrottledProvider};
use catalog_core::VehicleId;
use catalog_storage::{CatalogStore, PgCatalogStore};
use catalog_sync::{
    backfill_history, calculate_appreciation, catalog_stats, discover, write_reports, ClassifierRules,
    HistorySynthesizer, ImportPipeline, PipelineConfig, PipelineOptions, SourceKind, SourceRegistry,
    SynthesisConfig,
};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "catalog-cli")]
#[command(about = "Classic vehicle catalog import pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Import every enabled source in sources.yaml.
    Import,
    /// Run only the research queries in sources.yaml.
    Discover,
    Migrate,
    Stats,
    /// Synthesize price history for priced vehicles that have none.
    BackfillHistory {
        #[arg(long)]
        months: Option<u32>,
    },
    /// Appreciation of one vehicle over the last `months`.
    Appreciation {
        id: VehicleId,
        #[arg(long, default_value_t = 12)]
        months: u32,
    },
    /// Print the mentions found in a text file without touching the catalog.
    Extract {
        path: PathBuf,
        #[arg(long)]
        label: Option<String>,
    },
}

async fn connect(config: &PipelineConfig) -> Result<Arc<PgCatalogStore>> {
    let store = PgCatalogStore::connect(&config.database_url)
        .await
        .context("connecting to catalog database")?;
    store.migrate().await.context("running catalog migrations")?;
    Ok(Arc::new(store))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,catalog_sync=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = PipelineConfig::from_env();
    tracing::debug!(workspace = %config.workspace_root.display(), "configuration loaded");

    match cli.command.unwrap_or(Commands::Import) {
        Commands::Import => {
            let store = connect(&config).await?;
            let report = catalog_sync::run_import(&config, store.clone()).await?;
            let s = &report.summary;
            println!(
                "import complete: run_id={} processed={} inserted={} updated={} skipped={} errors={} reports={}",
                s.run_id,
                s.processed,
                s.inserted,
                s.updated,
                s.skipped,
                s.errors,
                report.reports_dir.display()
            );
            if let Some(reason) = &s.aborted {
                eprintln!("import aborted early: {reason}");
            }
            store.close().await;
        }
        Commands::Discover => {
            let registry = SourceRegistry::load(&config.workspace_root)?;
            let queries: Vec<_> = registry
                .enabled()
                .filter_map(|s| match &s.kind {
                    SourceKind::ResearchQueries { queries } => Some(queries.clone()),
                    _ => None,
                })
                .flatten()
                .collect();
            if queries.is_empty() {
                bail!("no enabled research_queries sources in sources.yaml");
            }
            let provider = ThrottledProvider::new(
                ChatCompletionsProvider::new(config.research_client_config())
                    .context("CATALOG_RESEARCH_API_KEY is required for discover")?,
                config.research_delay,
            );
            let inputs = discover(&provider, &queries).await;

            let store = connect(&config).await?;
            let mut pipeline = ImportPipeline::new(
                store.clone(),
                PipelineOptions {
                    extractor: config.extractor.clone(),
                    rules: ClassifierRules::from_workspace_root(&config.workspace_root)?,
                    seed: config.history_seed,
                    stock_retries: Some(config.stock_retries),
                    history_months: config.history_months,
                    archive_dir: Some(config.archive_dir.clone()),
                    reference_time: None,
                },
            );
            let summary = pipeline.run(inputs).await;
            let reports_dir = write_reports(&config.workspace_root, &summary).await?;
            println!(
                "discover complete: queries={} inserted={} updated={} errors={} reports={}",
                queries.len(),
                summary.inserted,
                summary.updated,
                summary.errors,
                reports_dir.display()
            );
            store.close().await;
        }
        Commands::Migrate => {
            let store = connect(&config).await?;
            println!("migrations applied to {}", config.database_url);
            store.close().await;
        }
        Commands::Stats => {
            let store = connect(&config).await?;
            let stats = catalog_stats(store.as_ref()).await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
            store.close().await;
        }
        Commands::BackfillHistory { months } => {
            let store = connect(&config).await?;
            let mut synth = HistorySynthesizer::new(SynthesisConfig::default(), config.history_seed);
            let dyn_store: Arc<dyn CatalogStore> = store.clone();
            let summary = backfill_history(dyn_store, &mut synth, months.or(config.history_months), Utc::now()).await?;
            println!(
                "backfill complete: examined={} backfilled={} points={} without_price={}",
                summary.examined, summary.backfilled, summary.points_written, summary.skipped_without_price
            );
            store.close().await;
        }
        Commands::Appreciation { id, months } => {
            let store = connect(&config).await?;
            let history = store.history(id).await?;
            match calculate_appreciation(&history, months, Utc::now()) {
                Some(summary) => println!("{}", serde_json::to_string_pretty(&summary)?),
                None => println!("vehicle {id}: not enough price history in the last {months} months"),
            }
            store.close().await;
        }
        Commands::Extract { path, label } => {
            let text = std::fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?;
            let label = label.unwrap_or_else(|| path.display().to_string());
            let mentions = TextExtractor::new(config.extractor.clone()).extract(&text, &label);
            for m in &mentions {
                println!(
                    "{} {} {} ${} [{} {:.2}]",
                    m.year, m.make, m.model, m.price, m.pattern, m.confidence
                );
            }
            println!("{} mentions", mentions.len());
        }
    }

    Ok(())
}
