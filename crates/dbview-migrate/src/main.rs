//! dbview Migration CLI
//!
//! Loads parsed SIARD dumps into an index store and reads back their
//! conversion reports.
//! Pedantic lints relaxed for CLI ergonomics.

// CLI tool - relax pedantic lints for ergonomics
#![allow(clippy::pedantic)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use dbview_core::{IndexStore, MemoryIndexStore, ViewerConfig};
use dbview_migrate::{
    read_report, DumpSource, JobKey, JobRegistry, JobStatus, MigrationRequest, Orchestrator,
    SiardSource, SourceFactory, TypeMapper,
};

#[derive(Parser)]
#[command(name = "dbview-migrate")]
#[command(version)]
#[command(about = "Load SIARD archives into a searchable index", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long, value_name = "FILE", env = "DBVIEW_CONFIG")]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Batch size override
    #[arg(long)]
    batch_size: Option<usize>,
}

#[derive(Subcommand)]
enum Commands {
    /// Migrate a dump into the index
    Run {
        /// Dump file, relative to the upload directory or absolute
        #[arg(short, long, value_name = "FILE")]
        source: PathBuf,

        /// Database UUID (random when omitted)
        #[arg(long)]
        database_uuid: Option<String>,

        /// Migrate a single table
        #[arg(long)]
        table_uuid: Option<String>,

        /// Store the structure only
        #[arg(long)]
        metadata_only: bool,

        /// Export committed collections to this directory
        #[arg(short, long, value_name = "DIR")]
        output: Option<PathBuf>,
    },

    /// Show the structure and field layout of a dump
    Inspect {
        /// Dump file, relative to the upload directory or absolute
        #[arg(short, long, value_name = "FILE")]
        source: PathBuf,
    },

    /// Print the conversion report of a database
    Report {
        /// Database UUID
        database_uuid: String,
    },

    /// Validate the configuration
    Validate,

    /// Generate a configuration file with default values
    Init {
        /// Output file path
        #[arg(short, long, default_value = "dbview.toml")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => ViewerConfig::load_from_path(path)?,
        None => ViewerConfig::load()?,
    };
    if let Some(batch_size) = cli.batch_size {
        config.index.batch_size = batch_size;
    }
    init_tracing(&config, cli.verbose)?;

    match cli.command {
        Commands::Run {
            source,
            database_uuid,
            table_uuid,
            metadata_only,
            output,
        } => {
            let options = RunOptions {
                source,
                database_uuid,
                table_uuid,
                metadata_only,
                output,
            };
            run_migration(config, options).await?;
        }
        Commands::Inspect { source } => {
            inspect_source(&config, &source).await?;
        }
        Commands::Report { database_uuid } => {
            print!("{}", read_report(&config, &database_uuid)?);
        }
        Commands::Validate => {
            validate_config(&config)?;
        }
        Commands::Init { output } => {
            generate_config(&output)?;
        }
    }

    Ok(())
}

fn init_tracing(config: &ViewerConfig, verbose: bool) -> anyhow::Result<()> {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level))
    };
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    let result = if config.logging.format.eq_ignore_ascii_case("json") {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    result.map_err(|e| anyhow::anyhow!(e))
}

struct RunOptions {
    source: PathBuf,
    database_uuid: Option<String>,
    table_uuid: Option<String>,
    metadata_only: bool,
    output: Option<PathBuf>,
}

async fn run_migration(config: ViewerConfig, options: RunOptions) -> anyhow::Result<()> {
    let store = Arc::new(MemoryIndexStore::new());
    let index: Arc<dyn IndexStore> = store.clone();
    let orchestrator = Arc::new(Orchestrator::new(config, index)?);

    if options.metadata_only {
        let database = orchestrator
            .load_metadata_from_local(&options.source, options.database_uuid)
            .await?;
        println!("\nMetadata loaded");
        println!("   Database: {}", database.uuid());
        println!("   Name:     {}", database.metadata().name);
        println!("   Tables:   {}", database.metadata().table_count());
        println!("   Status:   {}", database.status());
        export(&store, options.output.as_deref())?;
        return Ok(());
    }

    let path = orchestrator.config().resolve_upload(&options.source)?;
    info!("Loading dump from {:?}", path);

    let mut request = options
        .database_uuid
        .map_or_else(MigrationRequest::random, MigrationRequest::new);
    if let Some(table) = options.table_uuid {
        request = request.with_table(table);
    }
    let database_uuid = request.database_uuid.clone();
    let key = JobKey::from(&request);

    let factory: SourceFactory =
        Arc::new(move || Box::new(DumpSource::from_path(path.clone())) as Box<dyn SiardSource>);
    let registry = JobRegistry::new(Arc::clone(&orchestrator));
    let interrupted = registry.reconcile().await?;
    if !interrupted.is_empty() {
        info!("Marked {} interrupted migrations as failed", interrupted.len());
    }
    registry.start(request, factory)?;

    let poll = Duration::from_secs(orchestrator.config().jobs.poll_interval_secs.max(1));
    let mut ticker = tokio::time::interval(poll);
    let progress = create_progress_bar();

    let wait = registry.wait(&key);
    tokio::pin!(wait);
    let job = loop {
        tokio::select! {
            job = &mut wait => break job?,
            _ = ticker.tick() => update_progress(&progress, &orchestrator, &database_uuid),
            _ = tokio::signal::ctrl_c() => {
                warn!("Interrupted, stopping migration");
                if let Err(e) = registry.stop(&key) {
                    warn!(error = %e, "Could not stop migration");
                }
            }
        }
    };
    update_progress(&progress, &orchestrator, &database_uuid);
    progress.finish_and_clear();

    let database = orchestrator.manager().get_database(&database_uuid).await?;
    let report = orchestrator.config().report_path(&database_uuid);

    match job.status {
        JobStatus::Completed => {
            println!("\nMigration complete");
            if let Some(database) = &database {
                let counters = database.counters();
                println!("   Database: {}", database.uuid());
                println!("   Status:   {}", database.status());
                println!(
                    "   Tables:   {}/{}",
                    counters.ingested_tables, counters.total_tables
                );
                println!("   Rows:     {}/{}", counters.ingested_rows, counters.total_rows);
            }
            println!("   Report:   {:?}", report);
            export(&store, options.output.as_deref())?;
            Ok(())
        }
        JobStatus::Cancelled => {
            println!("\nMigration cancelled");
            println!("   Report:   {:?}", report);
            Ok(())
        }
        JobStatus::Failed | JobStatus::Running => {
            let reason = job.error.unwrap_or_else(|| "unknown error".to_string());
            anyhow::bail!("Migration of {database_uuid} failed: {reason} (report: {report:?})")
        }
    }
}

fn export(store: &MemoryIndexStore, output: Option<&Path>) -> anyhow::Result<()> {
    if let Some(dir) = output {
        let count = store.export_to_dir(dir)?;
        println!("   Exported {} collections to {:?}", count, dir);
    }
    Ok(())
}

fn update_progress(progress: &ProgressBar, orchestrator: &Orchestrator, database_uuid: &str) {
    let Some(snapshot) = orchestrator.tracker().snapshot(database_uuid) else {
        return;
    };
    let counters = snapshot.counters;
    progress.set_length(counters.total_rows);
    progress.set_position(counters.ingested_rows);
    progress.set_message(format!(
        "{} {}.{}",
        snapshot.status, snapshot.current_schema, snapshot.current_table
    ));
}

fn create_progress_bar() -> ProgressBar {
    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::default_bar()
            .template(
                "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} rows {msg}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
    );
    pb
}

async fn inspect_source(config: &ViewerConfig, source: &Path) -> anyhow::Result<()> {
    let path = config.resolve_upload(source)?;
    let mut source = DumpSource::from_path(&path);
    let structure = source.open().await?;
    source.close().await?;
    structure.validate()?;

    let mapper = TypeMapper::new(&config.index);
    println!("\nDatabase: {}", structure.name);
    if let Some(description) = &structure.description {
        println!("   {}", description);
    }
    println!("   Tables: {}", structure.table_count());
    println!("   Rows:   {}", structure.total_rows());

    for (schema, table) in structure.tables() {
        println!("\n{}.{} ({} rows)", schema.name, table.name, table.rows);
        let mapping = mapper.map_table(table);
        for assignment in &mapping.assignments {
            let unsupported = if assignment.source_type.is_unknown() {
                " [unsupported]"
            } else {
                ""
            };
            println!(
                "   - {} {} -> {} ({:?}, {:?}){}",
                assignment.column_name,
                table.columns[assignment.column_index].type_name,
                assignment.field_name,
                assignment.field_type,
                assignment.storage.kind(),
                unsupported
            );
        }
    }

    Ok(())
}

fn validate_config(config: &ViewerConfig) -> anyhow::Result<()> {
    config.validate()?;

    println!("Configuration is valid");
    println!("   Upload dir:  {:?}", config.paths.upload_dir);
    println!("   LOB dir:     {:?}", config.paths.lob_dir);
    println!("   Report dir:  {:?}", config.paths.report_dir);
    println!("   Batch size:  {}", config.index.batch_size);
    println!("   Field names: {:?}", config.index.field_naming);

    Ok(())
}

fn generate_config(output: &Path) -> anyhow::Result<()> {
    let content = ViewerConfig::default().to_toml()?;
    std::fs::write(output, content)?;
    println!("Generated configuration: {:?}", output);
    println!("   Edit the file and run: dbview-migrate --config {:?} run --source <FILE>", output);
    Ok(())
}
