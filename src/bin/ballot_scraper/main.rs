//! ballot-scraper - collect, reconcile and query California ballot measures

use anyhow::Result;
use ballot_measures::config::Config;
use ballot_measures::db::{self, Db, MeasureFilter};
use ballot_measures::ingestion::export::{self, ExportFormat};
use ballot_measures::ingestion::fetch::{self, ICPSR_FILENAMES, NCSL_FILENAMES};
use ballot_measures::ingestion::pipeline;
use ballot_measures::ingestion::reconcile;
use ballot_measures::ingestion::{Level, Source};
use ballot_measures::init_tracing;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(
    name = "ballot-scraper",
    version,
    about = "California Government Ballot Measures Scraper"
)]
struct Cli {
    #[arg(short, long, global = true, help = "Verbose output")]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Scrape ballot measures from the selected government level
    Scrape {
        #[arg(long, value_enum, default_value_t = LevelArg::State)]
        level: LevelArg,
        #[arg(short, long, default_value = "data/output.json")]
        output: PathBuf,
        #[arg(long, help = "Also write the scraped measures to the database")]
        store: bool,
    },
    /// Show configuration, database and data file status
    Status,
    /// Run the ingestion pipeline for the given sources (all when omitted)
    Ingest {
        #[arg(value_enum)]
        sources: Vec<SourceArg>,
    },
    /// Collapse cross-source duplicates into master records
    Reconcile,
    /// Report duplicate records
    Duplicates,
    /// Show database statistics
    Stats,
    /// Search stored measures by text
    Search {
        query: String,
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
    /// Export active measures
    Export {
        #[arg(long, value_enum, default_value_t = FormatArg::Json)]
        format: FormatArg,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Copy the database to a backup file
    Backup {
        #[arg(long)]
        path: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LevelArg {
    State,
    County,
    City,
    All,
}

impl From<LevelArg> for Level {
    fn from(arg: LevelArg) -> Self {
        match arg {
            LevelArg::State => Level::State,
            LevelArg::County => Level::County,
            LevelArg::City => Level::City,
            LevelArg::All => Level::All,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum SourceArg {
    CaSos,
    UcLawSf,
    Ncsl,
    Icpsr,
    Ceda,
}

impl From<SourceArg> for Source {
    fn from(arg: SourceArg) -> Self {
        match arg {
            SourceArg::CaSos => Source::CaSos,
            SourceArg::UcLawSf => Source::UcLawSf,
            SourceArg::Ncsl => Source::Ncsl,
            SourceArg::Icpsr => Source::Icpsr,
            SourceArg::Ceda => Source::Ceda,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum FormatArg {
    Json,
    Csv,
}

impl From<FormatArg> for ExportFormat {
    fn from(arg: FormatArg) -> Self {
        match arg {
            FormatArg::Json => ExportFormat::Json,
            FormatArg::Csv => ExportFormat::Csv,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("❌ Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::from_env()?;
    if cli.verbose {
        println!("🗳️  CA Government Ballot Measures Scraper");
    }

    match cli.command {
        Commands::Scrape {
            level,
            output,
            store,
        } => scrape(&config, level.into(), output, store).await,
        Commands::Status => status(&config).await,
        Commands::Ingest { sources } => {
            let sources: Vec<Source> = if sources.is_empty() {
                Source::ALL.to_vec()
            } else {
                sources.into_iter().map(Source::from).collect()
            };
            ingest(&config, &sources).await
        }
        Commands::Reconcile => {
            let db = open_db(&config).await?;
            let stats = reconcile::reconcile_cross_source(&db).await?;
            println!("✅ Reconcile complete: {}", stats);
            Ok(())
        }
        Commands::Duplicates => duplicates(&config).await,
        Commands::Stats => stats(&config).await,
        Commands::Search { query, limit } => search(&config, query, limit).await,
        Commands::Export { format, output } => {
            let db = open_db(&config).await?;
            let format = ExportFormat::from(format);
            let path = output.unwrap_or_else(|| export::default_export_path(&config, format));
            let measures = db::active_measures(&db).await?;
            export::write_export(&path, format, &measures)?;
            println!("✅ Exported {} measures to {}", measures.len(), path.display());
            Ok(())
        }
        Commands::Backup { path } => {
            let db = open_db(&config).await?;
            let path = path.unwrap_or_else(|| db::default_backup_path(&config.data_dir.join("backups")));
            let written = db::backup(&db, &path).await?;
            println!("✅ Database backed up to {}", written.display());
            Ok(())
        }
    }
}

async fn open_db(config: &Config) -> Result<Db> {
    config.ensure_dirs()?;
    db::open(&config.database_url).await
}

async fn scrape(config: &Config, level: Level, output: PathBuf, store: bool) -> Result<()> {
    println!("🚀 Starting scrape: {} level", level);
    println!("📁 Output: {}", output.display());

    let results = pipeline::scrape_level(config, level).await?;
    export::save_scrape_results(&output, &results)?;
    config.ensure_dirs()?;
    export::save_raw_snapshot(config, &results)?;

    println!("✅ Scraping completed! Results saved to {}", output.display());
    println!("📊 Found {} items", results.item_count());

    if store {
        let db = open_db(config).await?;
        let stats = pipeline::store_scrape(&db, &results).await?;
        println!("💾 Stored measures: {}", stats);
    }
    Ok(())
}

fn mark(ok: bool) -> &'static str {
    if ok {
        "✅"
    } else {
        "❌"
    }
}

async fn status(config: &Config) -> Result<()> {
    println!("📊 CA Ballot Measures Status");
    println!("{}", "=".repeat(40));

    println!("{} Data directory ({})", mark(config.data_dir.is_dir()), config.data_dir.display());

    match open_db(config).await {
        Ok(db) => {
            let active = db::count_active(&db).await?;
            println!("{} Database ({} active measures)", mark(true), active);
            let runs = db::recent_runs(&db, 5).await?;
            if runs.is_empty() {
                println!("   Last run: never");
            }
            for run in &runs {
                println!(
                    "   Run {}: {} {} at {} ({} new, {} updated)",
                    run.id,
                    run.run_type,
                    run.status,
                    run.started_at.format("%Y-%m-%d %H:%M:%S"),
                    run.new_measures,
                    run.updated_measures
                );
            }
        }
        Err(e) => println!("{} Database: {:#}", mark(false), e),
    }

    let ncsl = fetch::find_historical_file(config, "NCSL", &NCSL_FILENAMES);
    println!("{} NCSL file", mark(ncsl.is_ok()));
    let icpsr = fetch::find_historical_file(config, "ICPSR", &ICPSR_FILENAMES);
    println!("{} ICPSR file", mark(icpsr.is_ok()));
    let ceda = fetch::fetch_ceda_files(config)?;
    println!("{} CEDA files ({})", mark(!ceda.is_empty()), ceda.len());

    Ok(())
}

async fn ingest(config: &Config, sources: &[Source]) -> Result<()> {
    let db = open_db(config).await?;
    let results = pipeline::run_sources(config, &db, sources).await;

    let mut failed = 0;
    for (source, result) in &results {
        match result {
            Ok(stats) => println!("✅ {}: {}", source, stats),
            Err(e) => {
                failed += 1;
                println!("❌ {}: {:#}", source, e);
            }
        }
    }

    if failed == results.len() && failed > 0 {
        return Err(anyhow::anyhow!("All {} sources failed", failed));
    }
    Ok(())
}

async fn duplicates(config: &Config) -> Result<()> {
    let db = open_db(config).await?;
    let report = reconcile::duplicate_report(&db).await?;

    println!("🔍 Duplicate report");
    println!("Total duplicates: {}", report.total_duplicates);
    for (kind, count) in &report.by_type {
        println!("  {}: {}", kind, count);
    }
    println!("By source:");
    for (source, count) in &report.by_source {
        println!("  {}: {}", source, count);
    }
    println!("Unresolved cross-source groups: {}", report.cross_source_groups);

    let content = reconcile::find_content_duplicates(&db).await?;
    if !content.is_empty() {
        println!("Shared content hashes:");
        for group in content.iter().take(10) {
            println!("  {} ({}): {} records", group.content_hash, group.year, group.count);
        }
    }
    Ok(())
}

async fn stats(config: &Config) -> Result<()> {
    let db = open_db(config).await?;
    let stats = db::statistics(&db).await?;

    println!("📊 Database statistics");
    println!("Total measures: {}", stats.total_measures);
    println!("With summaries: {}", stats.with_summaries);
    println!("With vote data: {}", stats.with_votes);
    println!(
        "Passed / failed / unknown: {} / {} / {}",
        stats.passed, stats.failed, stats.unknown
    );
    match (stats.year_min, stats.year_max) {
        (Some(min), Some(max)) => println!("Years: {}-{}", min, max),
        _ => println!("Years: none"),
    }
    println!("Counties: {}", stats.counties);
    println!("Topics: {}", stats.topics);
    println!(
        "Duplicates: {} of {} records",
        stats.duplicates, stats.total_records
    );
    for (source, count) in &stats.sources {
        println!("  {}: {}", source, count);
    }
    Ok(())
}

async fn search(config: &Config, query: String, limit: i64) -> Result<()> {
    let db = open_db(config).await?;
    let filter = MeasureFilter {
        limit: Some(limit),
        ..MeasureFilter::text(query.clone())
    };
    let results = db::search(&db, &filter).await?;

    println!("🔎 {} results for \"{}\"", results.len(), query);
    for measure in &results {
        let outcome = measure.pass_fail().unwrap_or("-");
        println!(
            "  [{}] {} {} ({}) {}",
            measure.id.unwrap_or_default(),
            measure.year,
            measure.title.as_deref().unwrap_or("(untitled)"),
            measure.data_source,
            outcome
        );
    }
    Ok(())
}
