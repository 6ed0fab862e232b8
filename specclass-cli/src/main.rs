use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use specclass_core::config::{Config, StorageMode};
use specclass_core::pipeline::{
    find_input_file, read_csv_items, ColumnSelector, CsvReport, Pipeline, RunSummary,
};
use specclass_core::rag::{DirectorySource, VectorIndex};
use std::path::PathBuf;
use tracing::warn;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "specclass")]
#[command(about = "Classify items against a specification corpus with retrieval-augmented prompts", long_about = None)]
#[command(version)]
struct Cli {
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    #[arg(short, long, help = "Log at debug level (overridden by RUST_LOG)")]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Ingest the corpus and classify every input item")]
    Run(RunArgs),

    #[command(about = "Reset the collection, ingest the corpus and verify storage")]
    Ingest {
        #[arg(long, help = "Append to the collection instead of resetting it first")]
        no_reset: bool,
    },

    #[command(about = "Show the number of documents in the collection")]
    Count,

    #[command(about = "Delete everything in the collection")]
    Reset,

    #[command(about = "Show current configuration")]
    Show,
}

#[derive(Args)]
struct RunArgs {
    #[arg(short, long, help = "Input CSV (default: the single .csv in paths.input_dir)")]
    input: Option<PathBuf>,

    #[arg(long, default_value = "1", help = "Input column, by header name or 1-based index")]
    column: ColumnSelector,

    #[arg(long, help = "Reset the collection before ingesting")]
    reset: bool,

    #[arg(long, help = "Description of the specification book")]
    spec_description: Option<String>,

    #[arg(long, help = "Description of the items being classified")]
    item_description: Option<String>,

    #[arg(long, help = "Specification that wins near-tied classifications")]
    weighted_spec: Option<String>,

    #[arg(long, help = "Directory for the output report (default: paths.output_dir)")]
    output_dir: Option<PathBuf>,

    #[arg(long, help = "Hide progress bars")]
    no_progress: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if !cli.config.exists() {
        warn!(path = %cli.config.display(), "Config file not found, using defaults");
    }
    let config = Config::load_or_default(&cli.config)
        .with_context(|| format!("Failed to load config from {}", cli.config.display()))?;

    match cli.command {
        Commands::Run(args) => run(config, args).await,
        Commands::Ingest { no_reset } => ingest(&config, !no_reset).await,
        Commands::Count => count(&config).await,
        Commands::Reset => reset(&config).await,
        Commands::Show => show_config(&config),
    }
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

async fn run(mut config: Config, args: RunArgs) -> Result<()> {
    if let Some(description) = args.spec_description {
        config.run.spec_book_description = description;
    }
    if let Some(description) = args.item_description {
        config.run.item_description = description;
    }
    if args.weighted_spec.is_some() {
        config.run.weighted_spec = args.weighted_spec;
    }
    if args.no_progress {
        config.pipeline.show_progress = false;
    }
    if config.run.spec_book_description.trim().is_empty() {
        bail!("A specification book description is required (run.spec_book_description or --spec-description)");
    }
    if config.run.item_description.trim().is_empty() {
        bail!("An item description is required (run.item_description or --item-description)");
    }

    let input_path = match args.input {
        Some(path) => path,
        None => find_input_file(&config.paths.input_dir).context("Failed to locate input file")?,
    };
    let input = read_csv_items(&input_path, &args.column)
        .with_context(|| format!("Failed to read {}", input_path.display()))?;
    println!(
        "{} {} items from column {}",
        "→".blue(),
        input.items.len(),
        input.column.cyan()
    );

    let output_dir = args
        .output_dir
        .unwrap_or_else(|| PathBuf::from(&config.paths.output_dir));
    let report = CsvReport::for_input(&output_dir, &input.path);

    let pipeline = Pipeline::from_config(&config)
        .await
        .context("Failed to initialize pipeline")?;
    let source = DirectorySource::from_config(&config.ingest);

    let summary = pipeline
        .run(&source, &input.items, &report, args.reset)
        .await
        .context("Pipeline run failed")?;

    print_summary(&summary);
    println!("{} Output saved to {}", "✓".green().bold(), report.path().display());
    Ok(())
}

async fn ingest(config: &Config, reset: bool) -> Result<()> {
    let pipeline = Pipeline::from_config(config)
        .await
        .context("Failed to initialize pipeline")?;

    if reset {
        pipeline.reset().await.context("Failed to reset collection")?;
    }
    let source = DirectorySource::from_config(&config.ingest);
    let ingested = pipeline.ingest(&source).await.context("Ingestion failed")?;
    let documents = pipeline.verify().await.context("Storage verification failed")?;
    pipeline.clear_caches();

    println!(
        "{} Ingested {} chunks ({} batches skipped, {} files failed); {} documents stored",
        "✓".green().bold(),
        ingested.chunks_ingested,
        ingested.batches_skipped,
        ingested.source_failures,
        documents
    );
    Ok(())
}

async fn count(config: &Config) -> Result<()> {
    let index = open_index(config).await?;
    let collection = index.active_collection().await?;
    let total = index.count(&collection).await?;

    println!("{}: {}", collection.bold(), total.to_string().cyan());
    Ok(())
}

async fn reset(config: &Config) -> Result<()> {
    let index = open_index(config).await?;
    let collection = index.active_collection().await?;
    index.reset(&collection).await?;

    println!("{} Collection {} reset", "✓".green().bold(), collection.cyan());
    Ok(())
}

async fn open_index(config: &Config) -> Result<VectorIndex> {
    VectorIndex::from_config(config)
        .await
        .context("Failed to open vector index")
}

fn print_summary(summary: &RunSummary) {
    println!();
    println!("{}", "Run Summary:".bold().green());
    println!("  Chunks ingested:  {}", summary.ingest.chunks_ingested);
    println!("  Batches skipped:  {}", summary.ingest.batches_skipped);
    println!("  Source failures:  {}", summary.ingest.source_failures);
    println!("  Documents stored: {}", summary.documents);
    println!("  Items classified: {}", summary.items_classified.to_string().cyan());
    if summary.items_errored > 0 {
        println!("  Items errored:    {}", summary.items_errored.to_string().red());
    } else {
        println!("  Items errored:    0");
    }
}

fn show_config(config: &Config) -> Result<()> {
    let llm = config.llm.selected();

    println!("{}", "Current Configuration:".bold().green());
    println!();
    println!("{}", "LLM:".bold());
    println!("  Backend:        {}", format!("{:?}", config.llm.backend).cyan());
    println!("  Model:          {}", llm.model.cyan());
    println!("  Base URL:       {}", llm.base_url);
    println!("  Temperature:    {}", llm.temperature);
    println!("  Retries:        {} ({} ms apart)", llm.max_retries, llm.retry_delay_ms);
    println!("  API key:        {}", if llm.api_key.is_some() { "set" } else { "not set" });
    println!();
    println!("{}", "Embedding:".bold());
    println!("  Backend:        {:?}", config.embedding.backend);
    println!("  Model:          {}", config.embedding.model.cyan());
    println!("  Dimension:      {}", config.embedding.dimension);
    println!("  Batch Size:     {}", config.embedding.batch_size);
    println!();
    println!("{}", "Storage:".bold());
    match &config.storage.storage_mode {
        StorageMode::Embedded { path } => println!("  Vector DB:      {}", path),
        StorageMode::Memory => println!("  Vector DB:      {}", "in-memory".yellow()),
    }
    println!("  Collection:     {}", config.storage.collection_name.cyan());
    println!("  Top K:          {}", config.storage.top_k);
    println!();
    println!("{}", "Paths:".bold());
    println!("  Specifications: {}", config.ingest.specifications_dir);
    println!("  Input:          {}", config.paths.input_dir);
    println!("  Output:         {}", config.paths.output_dir);
    println!();
    println!("{}", "Full configuration (YAML):".bold());
    let yaml = serde_yaml::to_string(config).context("Failed to serialize config")?;
    print!("{yaml}");

    Ok(())
}
