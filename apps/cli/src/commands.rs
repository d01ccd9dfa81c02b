//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use portcall_core::pipeline::{PipelineConfig, PipelineReport, ProgressReporter, run_pipeline};
use portcall_core::resolver::{Stage, StageSummary};
use portcall_shared::{AppConfig, init_config, load_config, load_config_from};
use tracing::info;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// portcall: crawl carrier schedules into port-rotation CSV files.
#[derive(Parser)]
#[command(
    name = "portcall",
    version,
    about = "Crawl a carrier's public schedule endpoints into a port-rotation CSV.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file to use instead of ~/.portcall/portcall.toml.
    #[arg(long, global = true, env = "PORTCALL_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Fetch every service and write the port-rotation CSV.
    Crawl {
        /// Output CSV path (defaults to [output].path from the config).
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// Concurrent requests per stage.
        #[arg(short, long)]
        workers: Option<usize>,

        /// Attempts per URL before giving up.
        #[arg(long)]
        limit: Option<u32>,

        /// Pause before each request, in milliseconds.
        #[arg(long)]
        sleep_ms: Option<u64>,

        /// Skip TLS certificate verification.
        #[arg(long)]
        insecure: bool,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "portcall=info",
        1 => "portcall=debug",
        _ => "portcall=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt().with_env_filter(env_filter).with_target(false).init();
        }
        LogFormat::Json => {
            fmt().json().with_env_filter(env_filter).init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.as_deref();
    match cli.command {
        Command::Crawl {
            out,
            workers,
            limit,
            sleep_ms,
            insecure,
        } => {
            let overrides = CrawlOverrides {
                out,
                workers,
                limit,
                sleep_ms,
                insecure,
            };
            cmd_crawl(config_path, overrides).await
        }
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show(config_path).await,
        },
    }
}

/// Load the config file (explicit path or default location) plus env overrides.
fn load_app_config(path: Option<&Path>) -> Result<AppConfig> {
    let mut config = match path {
        Some(p) => load_config_from(p)?,
        None => load_config()?,
    };
    config.apply_env_overrides();
    Ok(config)
}

/// Crawl flags that take precedence over the config file.
struct CrawlOverrides {
    out: Option<PathBuf>,
    workers: Option<usize>,
    limit: Option<u32>,
    sleep_ms: Option<u64>,
    insecure: bool,
}

impl CrawlOverrides {
    fn apply(self, config: &mut AppConfig) {
        if let Some(out) = self.out {
            config.output.path = out.to_string_lossy().into_owned();
        }
        if let Some(workers) = self.workers {
            config.crawl.workers = workers;
        }
        if let Some(limit) = self.limit {
            config.crawl.limit = limit;
        }
        if let Some(sleep_ms) = self.sleep_ms {
            config.crawl.sleep_ms = sleep_ms;
        }
        if self.insecure {
            config.crawl.accept_invalid_certs = true;
        }
    }
}

async fn cmd_crawl(config_path: Option<&Path>, overrides: CrawlOverrides) -> Result<()> {
    let mut config = load_app_config(config_path)?;
    overrides.apply(&mut config);

    let pipeline_config = PipelineConfig::from(&config);
    if pipeline_config.output.as_os_str().is_empty() {
        return Err(eyre!("output path is empty; pass --out or set [output].path"));
    }

    info!(
        carrier = %config.carrier.carrier_id,
        output = %pipeline_config.output.display(),
        "crawling port rotations"
    );

    let reporter = CliProgress::new();
    let report = run_pipeline(&pipeline_config, &reporter).await?;

    // Print summary
    println!();
    println!("  Port rotations written!");
    for stage in &report.stages {
        println!(
            "  {:<15} {} fetched / {} crawled, {} failed, {} distinct ({:.1}s)",
            format!("{}:", stage.stage),
            stage.fetched,
            stage.done,
            stage.failures.len(),
            stage.entities,
            stage.duration.as_secs_f64(),
        );
    }
    println!("  Records:        {}", report.records_written);
    println!("  Path:           {}", report.output.display());
    println!("  Time:           {:.1}s", report.elapsed.as_secs_f64());
    println!();

    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
        );
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn url_settled(&self, stage: Stage, url: &str, done: usize, total: usize) {
        self.spinner
            .set_message(format!("{stage} [{done}/{total}] {url}"));
    }

    fn stage_done(&self, summary: &StageSummary) {
        if !summary.failures.is_empty() {
            self.spinner.println(format!(
                "  {}: {} of {} URLs failed",
                summary.stage,
                summary.failures.len(),
                summary.done
            ));
        }
    }

    fn done(&self, _report: &PipelineReport) {
        self.spinner.finish_and_clear();
    }
}

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show(config_path: Option<&Path>) -> Result<()> {
    let config = load_app_config(config_path)?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");

    if let Err(e) = config.carrier.templates() {
        println!("# warning: {e}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_crawl_overrides() {
        let cli = Cli::try_parse_from([
            "portcall", "-vv", "crawl", "--out", "out.csv", "--workers", "9", "--insecure",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);

        let Command::Crawl {
            out,
            workers,
            limit,
            sleep_ms,
            insecure,
        } = cli.command
        else {
            panic!("expected crawl");
        };

        let mut config = AppConfig::default();
        CrawlOverrides {
            out,
            workers,
            limit,
            sleep_ms,
            insecure,
        }
        .apply(&mut config);

        assert_eq!(config.output.path, "out.csv");
        assert_eq!(config.crawl.workers, 9);
        assert_eq!(config.crawl.limit, 3);
        assert!(config.crawl.accept_invalid_certs);
    }

    #[test]
    fn cli_rejects_unknown_log_format() {
        assert!(Cli::try_parse_from(["portcall", "--log-format", "xml", "crawl"]).is_err());
    }
}
