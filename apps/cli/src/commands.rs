//! CLI command definitions, routing, and tracing setup.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use conceptlink_client::QueryClient;
use conceptlink_core::link::LinkReport;
use conceptlink_core::{FinalizeReport, LoadReport, Pipeline, ProgressReporter};
use conceptlink_extraction::ExtractionReport;
use conceptlink_linking::MergeOutcome;
use conceptlink_shared::{AppConfig, init_config, load_config, load_config_from};
use conceptlink_storage::GraphStore;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::debug;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// ConceptLink: link text mentions to a reference knowledge base.
#[derive(Parser)]
#[command(
    name = "conceptlink",
    version,
    about = "Annotate text units, link their concepts across knowledge bases, and load the taxonomy into a graph.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Config file (defaults to ~/.conceptlink/conceptlink.toml).
    #[arg(long, env = "CONCEPTLINK_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

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
    /// Annotate every unit in the unit list, resuming an interrupted run.
    Annotate,

    /// Load the extraction dump into the graph as MENTIONS relationships.
    LoadMentions,

    /// Resolve source concepts to target concepts and load SAME_AS links.
    Link {
        /// Load resolved links even if some ambiguous sources are uncurated.
        #[arg(long)]
        force: bool,
    },

    /// Look up instance-of classes of the linked target concepts.
    Classes,

    /// Crawl superclasses of the linked target concepts.
    Hierarchy {
        /// Levels to expand (defaults to crawl.hierarchy_depth).
        #[arg(long)]
        depth: Option<u32>,
    },

    /// Look up labels of the target concepts.
    Labels,

    /// Run link, classes, hierarchy, and labels in order.
    Finalize {
        /// Load resolved links even if some ambiguous sources are uncurated.
        #[arg(long)]
        force: bool,

        /// Hierarchy levels to expand (defaults to crawl.hierarchy_depth).
        #[arg(long)]
        depth: Option<u32>,
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
        0 => "conceptlink=info",
        1 => "conceptlink=debug",
        _ => "conceptlink=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config;
    match cli.command {
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(),
            ConfigAction::Show => cmd_config_show(config_path),
        },
        stage => {
            let config = resolve_config(config_path)?;
            run_stage(&config, stage).await
        }
    }
}

fn resolve_config(path: Option<PathBuf>) -> Result<AppConfig> {
    let config = match path {
        Some(p) => load_config_from(&p)?,
        None => load_config()?,
    };
    config.validate()?;
    Ok(config)
}

/// What a stage returned, held until the spinner is cleared.
enum Outcome {
    Annotate(ExtractionReport),
    Load(&'static str, LoadReport),
    Link(LinkReport),
    Finalize(FinalizeReport),
}

async fn run_stage(config: &AppConfig, stage: Command) -> Result<()> {
    let client = QueryClient::from_config(&config.retry)?;
    let graph = GraphStore::open(&config.paths.graph_db).await?;
    let reporter = CliProgress::new();
    let pipeline = Pipeline::new(config, client, &graph, &reporter);

    let outcome = execute(&pipeline, stage).await;
    reporter.finish();

    match outcome? {
        Outcome::Annotate(report) => {
            println!();
            println!("  Units already done: {}", report.prior_units);
            println!("  Units annotated:    {}", report.annotated_units);
            println!("  Mentions written:   {}", report.records_written);
            if report.discarded_records > 0 {
                println!("  Partial discarded:  {}", report.discarded_records);
            }
            println!("  Output:             {}", config.paths.extraction.display());
            print_elapsed(report.duration);
        }
        Outcome::Load(name, report) => print_load(name, &report),
        Outcome::Link(report) => {
            print_link(&report);
            ensure_linked(&report)?;
        }
        Outcome::Finalize(report) => {
            print_link(&report.link);
            ensure_linked(&report.link)?;
            for (name, stage) in [
                ("Classes", &report.classes),
                ("Hierarchy", &report.hierarchy),
                ("Labels", &report.labels),
            ] {
                if let Some(stage) = stage {
                    print_load(name, stage);
                }
            }
            print_elapsed(report.elapsed);
        }
    }
    Ok(())
}

async fn execute(pipeline: &Pipeline<'_, GraphStore>, stage: Command) -> Result<Outcome> {
    Ok(match stage {
        Command::Annotate => Outcome::Annotate(pipeline.annotate().await?),
        Command::LoadMentions => Outcome::Load("Mentions", pipeline.load_mentions().await?),
        Command::Link { force } => Outcome::Link(pipeline.link(force).await?),
        Command::Classes => Outcome::Load("Classes", pipeline.classes().await?),
        Command::Hierarchy { depth } => Outcome::Load("Hierarchy", pipeline.hierarchy(depth).await?),
        Command::Labels => Outcome::Load("Labels", pipeline.labels().await?),
        Command::Finalize { force, depth } => {
            Outcome::Finalize(pipeline.finalize(force, depth).await?)
        }
        Command::Config { .. } => return Err(eyre!("config commands do not run a stage")),
    })
}

/// A blocked link stage is a failure exit naming the file to curate.
fn ensure_linked(report: &LinkReport) -> Result<()> {
    if let MergeOutcome::Blocked { unresolved } = &report.outcome {
        return Err(eyre!(
            "{} ambiguous source(s) need curation: mark one row per source in the keep column of {} and re-run, or pass --force",
            unresolved.len(),
            report.curation_file.display()
        ));
    }
    Ok(())
}

fn print_link(report: &LinkReport) {
    println!();
    println!("  Candidate links:   {}", report.candidates);
    println!("  Ambiguous sources: {}", report.ambiguous_sources);
    if let Some(links) = report.outcome.links() {
        println!("  Final links:       {}", links.len());
        println!("  SAME_AS created:   {}", report.same_as_created);
    }
    if let MergeOutcome::ResolvedWithForce { unresolved, .. } = &report.outcome {
        println!("  Left unresolved:   {} (forced)", unresolved.len());
    }
    if report.reused_dump {
        println!("  (reused existing candidate dump)");
    }
}

fn print_load(name: &str, report: &LoadReport) {
    println!();
    println!("  {name}");
    println!("    Rows:    {}", report.rows);
    println!("    Written: {}", report.written);
    if report.skipped > 0 {
        println!("    Skipped: {}", report.skipped);
    }
    if report.reused_dump {
        println!("    (reused existing dump)");
    }
    print_elapsed(report.elapsed);
}

fn print_elapsed(elapsed: Duration) {
    println!("  Time: {:.1}s", elapsed.as_secs_f64());
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
        let style = ProgressStyle::with_template("{spinner:.cyan} {prefix} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
        spinner.set_style(style);
        spinner.enable_steady_tick(Duration::from_millis(80));
        Self { spinner }
    }

    fn finish(&self) {
        self.spinner.finish_and_clear();
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_prefix(name.to_string());
        self.spinner.set_message(String::new());
    }

    fn advance(&self, current: usize, total: usize) {
        self.spinner.set_message(format!("[{current}/{total}]"));
    }

    fn done(&self, summary: &str) {
        self.spinner.set_message(summary.to_string());
        debug!(summary, "stage done");
    }
}

// ---------------------------------------------------------------------------
// Config commands
// ---------------------------------------------------------------------------

fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show(path: Option<PathBuf>) -> Result<()> {
    let config = match path {
        Some(p) => load_config_from(&p)?,
        None => load_config()?,
    };
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}
