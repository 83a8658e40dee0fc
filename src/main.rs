use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use s3du::analyzer::UsageAnalyzer;
use s3du::config::Config;
use s3du::display::{ConsoleReporter, JsonArrayReporter, JsonLinesReporter};
use s3du::inventory::{FileErrorPolicy, InventorySource, LoadedManifest};
use s3du::logging::init_logging;
use s3du::rollup::RollupDepth;
use s3du::sink::ReportSink;
use s3du::source::{ListingSource, LocalDirLister, RecordSource};
use s3du::ScanResult;
use std::fs::File;
use std::io::{self, BufWriter, IsTerminal};
use std::path::PathBuf;
use std::process;
use tracing::warn;

const EXIT_FAILED: i32 = 1;
const EXIT_CONFIG: i32 = 2;

#[derive(Parser)]
#[command(name = "s3du")]
#[command(about = "Disk usage for object-storage key spaces, rolled up by prefix")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan a bucket listing or a bulk export and report usage per prefix
    Scan(ScanArgs),
    /// Show the effective configuration
    Config {
        /// Write it to this file instead of printing it
        #[arg(long)]
        write: Option<PathBuf>,
    },
}

#[derive(Args)]
struct ScanArgs {
    /// Local directory to list as if it were a bucket
    #[arg(long, conflicts_with = "inventory", required_unless_present = "inventory")]
    bucket_dir: Option<PathBuf>,
    /// Bulk-export manifest, or a directory holding dated manifests
    #[arg(long)]
    inventory: Option<PathBuf>,
    /// Directory that export file keys are relative to
    #[arg(long, requires = "inventory")]
    data_root: Option<PathBuf>,
    /// Only scan keys under this prefix
    #[arg(long)]
    prefix: Option<String>,
    /// Path segments to group by (a number, or "all")
    #[arg(long, short = 'd')]
    depth: Option<RollupDepth>,
    /// Path delimiter
    #[arg(long)]
    delimiter: Option<String>,
    /// Keys listed per prefix before the rest are summarised
    #[arg(long)]
    limit: Option<usize>,
    /// Records requested per page
    #[arg(long)]
    page_size: Option<usize>,
    /// Human-readable sizes and counts
    #[arg(long, short = 'H')]
    human: bool,
    /// One JSON object per report on stdout
    #[arg(long)]
    json: bool,
    /// Also write every report to this file as a JSON array
    #[arg(long, short = 'o')]
    output: Option<PathBuf>,
    /// Display timezone as a fixed offset (+HH:MM)
    #[arg(long)]
    timezone: Option<String>,
    /// What to do with an unreadable export data file
    #[arg(long)]
    on_file_error: Option<FileErrorPolicy>,
}

impl ScanArgs {
    fn apply(&self, config: &mut Config) {
        if let Some(prefix) = &self.prefix {
            config.scan.prefix = prefix.clone();
        }
        if let Some(depth) = self.depth {
            config.scan.depth = depth;
        }
        if let Some(delimiter) = &self.delimiter {
            config.scan.delimiter = delimiter.clone();
        }
        if let Some(limit) = self.limit {
            config.scan.display_limit = limit;
        }
        if let Some(page_size) = self.page_size {
            config.scan.page_size = page_size;
        }
        if self.human {
            config.output.human_readable = true;
        }
        if let Some(timezone) = &self.timezone {
            config.output.timezone = timezone.clone();
        }
        if let Some(policy) = self.on_file_error {
            config.export.on_file_error = policy;
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let code = match cli.command {
        Commands::Scan(args) => run_scan(args).await,
        Commands::Config { write } => match show_config(write) {
            Ok(()) => 0,
            Err(e) => {
                eprintln!("Error: {e:#}");
                EXIT_CONFIG
            }
        },
    };

    process::exit(code);
}

async fn run_scan(args: ScanArgs) -> i32 {
    let mut config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e:#}");
            return EXIT_CONFIG;
        }
    };
    args.apply(&mut config);
    if let Err(e) = config.validate() {
        eprintln!("Error: {e}");
        return EXIT_CONFIG;
    }

    // Held until the scan is over so buffered log lines reach the file.
    let _guard = init_logging(&config);

    let color = !args.json && io::stdout().is_terminal();
    let display = match config.display_options(color) {
        Ok(display) => display,
        Err(e) => {
            eprintln!("Error: {e}");
            return EXIT_CONFIG;
        }
    };

    let primary: Box<dyn ReportSink> = if args.json {
        Box::new(JsonLinesReporter::new(io::stdout()))
    } else {
        Box::new(ConsoleReporter::new(io::stdout(), display))
    };
    let archive = match &args.output {
        Some(path) => match File::create(path) {
            Ok(file) => Some(JsonArrayReporter::new(
                BufWriter::new(file),
                config.output.json_pretty,
            )),
            Err(e) => {
                eprintln!("Error: cannot create {}: {e}", path.display());
                return EXIT_CONFIG;
            }
        },
        None => None,
    };

    let source = match open_source(&args, &config).await {
        Ok(source) => source,
        Err(e) => {
            report_failure(&format!("{e:#}"), "source", args.json);
            return EXIT_FAILED;
        }
    };

    let analyzer = UsageAnalyzer::new(config.engine_config());
    let (outcome, mut sink) = match analyzer.run(source, (primary, archive)).await {
        Ok(result) => result,
        Err(e) => {
            eprintln!("Error: {e}");
            return EXIT_CONFIG;
        }
    };

    let mut code = 0;
    if let Err(e) = sink.finish() {
        eprintln!("Error: failed to write reports: {e}");
        code = EXIT_FAILED;
    }

    if !outcome.skipped_files.is_empty() {
        warn!(count = outcome.skipped_files.len(), "Data files were skipped");
        eprintln!("Skipped {} unreadable data file(s):", outcome.skipped_files.len());
        for file in &outcome.skipped_files {
            eprintln!("  {file}");
        }
    }

    if let Some(e) = &outcome.error {
        report_failure(&e.to_string(), e.kind(), args.json);
        code = EXIT_FAILED;
    }
    code
}

async fn open_source(args: &ScanArgs, config: &Config) -> Result<Box<dyn RecordSource>> {
    let prefix = config.scan.prefix.clone();
    let page_size = config.scan.page_size;

    if let Some(dir) = args.bucket_dir.clone() {
        let lister = tokio::task::spawn_blocking(move || LocalDirLister::open(dir))
            .await
            .context("Indexing task failed")??;
        let source = ListingSource::new(lister, prefix, page_size).with_retry(config.retry_policy());
        return Ok(Box::new(source));
    }

    let path = args
        .inventory
        .clone()
        .context("Either --bucket-dir or --inventory is required")?;
    let data_root = args.data_root.clone();
    let policy = config.export.on_file_error;

    let source = tokio::task::spawn_blocking(move || -> ScanResult<InventorySource> {
        let mut loaded = LoadedManifest::load(&path)?;
        if let Some(root) = data_root {
            loaded = loaded.with_data_root(root);
        }
        InventorySource::open(&loaded, &prefix, page_size, policy)
    })
    .await
    .context("Manifest task failed")??;

    Ok(Box::new(source))
}

fn report_failure(message: &str, kind: &str, json: bool) {
    if json {
        println!("{}", serde_json::json!({ "error": message, "kind": kind }));
    } else {
        eprintln!("Error: {message}");
    }
}

fn show_config(write: Option<PathBuf>) -> Result<()> {
    let config = Config::load()?;
    config.validate()?;

    match write {
        Some(path) => save_config(&config, &path),
        None => {
            println!("{}", render_config(&config)?);
            Ok(())
        }
    }
}

#[cfg(feature = "toml")]
fn render_config(config: &Config) -> Result<String> {
    config.to_toml()
}

#[cfg(not(feature = "toml"))]
fn render_config(config: &Config) -> Result<String> {
    serde_json::to_string_pretty(config).context("Failed to serialize configuration")
}

#[cfg(feature = "toml")]
fn save_config(config: &Config, path: &std::path::Path) -> Result<()> {
    config.save_to_file(path)
}

#[cfg(not(feature = "toml"))]
fn save_config(config: &Config, path: &std::path::Path) -> Result<()> {
    std::fs::write(path, render_config(config)?)
        .with_context(|| format!("Failed to write config file: {}", path.display()))
}
