use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use clap::{ArgAction, Parser, Subcommand};
use folio_core::config_file::{self, ConfigFile, ExtractionConfig, OutputConfig};
use folio_core::{Config, PageRange, ProgressEvent};
use folio_ingest::{AssetSource, FsSink, persist_result};
use folio_parsing::{ContentExtractor, ProfileRegistry, registry};
use indicatif::{ProgressBar, ProgressStyle};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

mod output;

use output::ColorMode;

const DEFAULT_OUTPUT_DIR: &str = "folio-output";

/// Folio - Split RPG rulebooks into monsters, spells, items, tables and journal entries
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug). RUST_LOG overrides.
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Extract content from a PDF or plain-text rulebook
    Extract {
        /// Path to the PDF or text file (form feeds separate pages)
        file_path: PathBuf,

        /// Game-system profile id (e.g. dnd5e, pf2e)
        #[arg(short, long)]
        system: Option<String>,

        /// Comma-separated list of categories (default: the profile's defaults)
        #[arg(short, long, value_delimiter = ',')]
        categories: Vec<String>,

        /// Page range: N, N-M or N-
        #[arg(short, long)]
        pages: Option<PageRange>,

        /// Directory to write entity JSON and tokens into
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Give up on unfinished categories after this many seconds
        #[arg(long)]
        timeout: Option<u64>,

        /// Number of categories processed concurrently
        #[arg(long)]
        workers: Option<usize>,

        /// Config file to use instead of the platform and ./.folio.toml cascade
        #[arg(long)]
        config: Option<PathBuf>,

        /// Do not save creature tokens or adventure maps
        #[arg(long)]
        no_assets: bool,

        /// Extract and list records without writing anything
        #[arg(long)]
        dry_run: bool,

        /// Disable colored output
        #[arg(long)]
        no_color: bool,
    },

    /// List available game-system profiles and their categories
    Profiles {
        /// Compile every pattern and report invalid ones
        #[arg(long)]
        check: bool,

        /// Config file with custom profiles
        #[arg(long)]
        config: Option<PathBuf>,

        /// Disable colored output
        #[arg(long)]
        no_color: bool,
    },

    /// Write a starter config file to the platform config directory
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Command::Extract {
            file_path,
            system,
            categories,
            pages,
            output,
            timeout,
            workers,
            config,
            no_assets,
            dry_run,
            no_color,
        } => {
            let file = load_config_file(config.as_deref())?;
            install_profiles(&file)?;

            // Resolve configuration: CLI flags > env vars > config file > defaults
            let mut cfg = Config::default();
            file.apply_to(&mut cfg);
            if let Ok(system) = std::env::var("FOLIO_SYSTEM") {
                cfg.system = system;
            }
            if let Ok(dir) = std::env::var("FOLIO_OUTPUT_DIR") {
                cfg.output_dir = Some(PathBuf::from(dir));
            }
            if let Some(system) = system {
                cfg.system = system;
            }
            if !categories.is_empty() {
                cfg.categories = categories;
            }
            if let Some(pages) = pages {
                cfg.pages = pages;
            }
            if let Some(dir) = output {
                cfg.output_dir = Some(dir);
            }
            if let Some(secs) = timeout {
                cfg.timeout = Some(Duration::from_secs(secs));
            }
            if let Some(n) = workers {
                cfg.num_workers = n;
            }
            if no_assets {
                cfg.write_assets = false;
            }

            extract(file_path, cfg, dry_run, ColorMode(!no_color)).await
        }
        Command::Profiles {
            check,
            config,
            no_color,
        } => {
            let file = load_config_file(config.as_deref())?;
            install_profiles(&file)?;
            profiles(check, ColorMode(!no_color))
        }
        Command::InitConfig { force } => init_config(force),
    }
}

fn init_logging(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn load_config_file(path: Option<&Path>) -> anyhow::Result<ConfigFile> {
    match path {
        Some(path) => config_file::try_load_from_path(path)?
            .with_context(|| format!("config file not found: {}", path.display())),
        None => Ok(config_file::load_config()),
    }
}

/// Register custom profiles from the config file, if there are any.
fn install_profiles(file: &ConfigFile) -> anyhow::Result<()> {
    if file.profiles().is_empty() {
        return Ok(());
    }
    let registry = ProfileRegistry::with_custom(file.profiles())?;
    registry::install(registry)
        .map_err(|_| anyhow::anyhow!("profile registry was already initialized"))?;
    Ok(())
}

async fn extract(
    file_path: PathBuf,
    mut config: Config,
    dry_run: bool,
    color: ColorMode,
) -> anyhow::Result<()> {
    if !file_path.exists() {
        anyhow::bail!("File not found: {}", file_path.display());
    }
    config.source_name = folio_ingest::source_name(&file_path);
    let pages = folio_ingest::open_document(&file_path, config.write_assets && !dry_run)?;

    let lookup = registry::global().get_profile(&config.system);
    let profile = lookup.profile;
    let total = ContentExtractor::for_lookup(&lookup)
        .resolve_categories(&config.categories)
        .len();

    let bar = ProgressBar::new(total as u64);
    bar.set_style(
        ProgressStyle::with_template("{spinner:.green} {msg} [{bar:40.green/dim}] {pos}/{len}")
            .unwrap()
            .progress_chars("=> "),
    );
    bar.enable_steady_tick(Duration::from_millis(120));

    let progress_cb = {
        let bar = bar.clone();
        move |event: ProgressEvent| {
            if let Some(msg) = output::progress_message(&event) {
                bar.set_message(msg);
            }
            if matches!(
                event,
                ProgressEvent::CategoryFinished { .. } | ProgressEvent::CategoryFailed { .. }
            ) {
                bar.inc(1);
            }
        }
    };

    let cancel = CancellationToken::new();

    // Set up Ctrl+C handler
    let cancel_clone = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel_clone.cancel();
        }
    });

    let mut result = folio_ingest::extract_document(&pages, &config, progress_cb, cancel).await?;
    bar.finish_and_clear();

    let persisted = if dry_run {
        None
    } else {
        let root = config
            .output_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR));
        let sink = FsSink::new(&root);
        let assets = AssetSource {
            provider: &pages,
            sink: &sink,
            pages: config.pages,
        };
        let stats = persist_result(
            &mut result,
            profile,
            &sink,
            config.write_assets.then_some(&assets),
        );
        Some((stats, root))
    };

    let mut writer: Box<dyn Write> = Box::new(std::io::stdout());
    let file_name = file_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    output::print_run_header(&mut writer, &file_name, &result, color)?;
    output::print_category_table(&mut writer, &result, color)?;
    if dry_run {
        output::print_records(&mut writer, &result, color)?;
    }
    output::print_diagnostics(&mut writer, &result.diagnostics, color)?;
    output::print_summary(
        &mut writer,
        &result,
        persisted.as_ref().map(|(stats, root)| (stats, root.as_path())),
        color,
    )?;

    Ok(())
}

fn profiles(check: bool, color: ColorMode) -> anyhow::Result<()> {
    let mut writer: Box<dyn Write> = Box::new(std::io::stdout());
    let all = registry::global().list_profiles();

    if !check {
        output::print_profiles(&mut writer, all, color)?;
        return Ok(());
    }

    let mut invalid = 0;
    for profile in all {
        let errors = profile.validate();
        if !errors.is_empty() {
            invalid += 1;
        }
        output::print_validation(&mut writer, profile, &errors, color)?;
    }
    if invalid > 0 {
        anyhow::bail!("{} profile(s) have invalid patterns", invalid);
    }
    Ok(())
}

fn init_config(force: bool) -> anyhow::Result<()> {
    let path = config_file::config_path().context("could not determine config directory")?;
    if path.exists() && !force {
        anyhow::bail!(
            "{} already exists (use --force to overwrite)",
            path.display()
        );
    }
    let defaults = Config::default();
    let starter = ConfigFile {
        extraction: Some(ExtractionConfig {
            system: Some(defaults.system),
            num_workers: Some(defaults.num_workers),
            ..Default::default()
        }),
        output: Some(OutputConfig {
            dir: Some(DEFAULT_OUTPUT_DIR.to_string()),
            write_assets: Some(defaults.write_assets),
        }),
        profiles: None,
    };
    let written = config_file::save_config(&starter)?;
    println!("Wrote {}", written.display());
    Ok(())
}
