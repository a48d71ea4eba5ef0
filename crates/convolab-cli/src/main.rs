//! convolab - batch runner for multi-agent conversation experiments
//!
//! ## Commands
//!
//! - `run`: provision every unit of a design, export transcripts, checkpoint
//! - `plan`: enumerate the design without touching the lab
//! - `render`: re-render `dialogue.txt` from a `results.json` checkpoint
//! - `quality`: heuristic quality report over a rendered dialogue
//! - `fix`: thin fillers in a rendered dialogue, or tag echo/hollow lines

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing::{info, Level};

use convolab_core::config::{API_KEY_ENV, BASE_URL_ENV};
use convolab_core::domain::{load_scenarios, select_one_per_group_size};
use convolab_core::{
    design_digest, enumerate, load_results, parse_dialogue, render_dialogue, render_dialogue_in,
    render_quality_report, render_summary, render_summary_table, ApiConfig, BatchScheduler,
    BatchSummary, BehaviorFilter, DesignAxis, DesignConfig, ExperimentSpec, FsCheckpoint,
    HttpLabClient, PollConfig, ProvisionSettings, QualityChecker, SchedulerConfig,
};

#[derive(Parser)]
#[command(name = "convolab")]
#[command(version = convolab_core::VERSION)]
#[command(about = "Batch orchestrator for multi-agent conversation experiments", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every unit of the design against the lab
    Run(RunArgs),

    /// Print the units a design expands to, without calling the lab
    Plan {
        #[command(flatten)]
        design: DesignArgs,
    },

    /// Render dialogue text from a results checkpoint
    Render {
        /// Path to results.json
        #[arg(long)]
        results: PathBuf,

        /// Write here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Show timestamps in UTC instead of local time
        #[arg(long)]
        utc: bool,
    },

    /// Check a rendered dialogue for common quality issues
    Quality {
        /// Path to a dialogue.txt file
        file: PathBuf,

        /// Speaker name treated as a facilitator (repeatable; defaults to
        /// the design's display names)
        #[arg(long = "facilitator")]
        facilitators: Vec<String>,

        #[arg(long, value_enum, default_value_t = ReportFormat::Text)]
        format: ReportFormat,
    },

    /// Rewrite a rendered dialogue with fewer fillers
    Fix {
        /// Path to a dialogue.txt file
        file: PathBuf,

        /// Where to write the rewritten dialogue
        #[arg(short, long)]
        output: PathBuf,

        /// Keep the text and prefix problem lines with [ECHO] / [HOLLOW]
        #[arg(long)]
        flag_only: bool,

        /// Speaker name treated as a facilitator (repeatable)
        #[arg(long = "facilitator")]
        facilitators: Vec<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ReportFormat {
    Text,
    Json,
}

#[derive(Args, Debug, Clone, Default)]
struct DesignArgs {
    /// Design TOML (default: built-in restaurant design)
    #[arg(long)]
    design: Option<PathBuf>,

    /// Scenario JSON; switches the inner axis from group sizes to scenarios
    #[arg(long)]
    scenarios: Option<PathBuf>,

    /// Keep only the first scenario of each group size
    #[arg(long, requires = "scenarios")]
    one_per_size: bool,

    /// Group sizes, e.g. `1,2,3` (default: from the design)
    #[arg(long, value_delimiter = ',')]
    group_sizes: Vec<u32>,

    /// Only run these behaviors
    #[arg(long, value_delimiter = ',')]
    include: Vec<String>,

    /// Skip these behaviors
    #[arg(long, value_delimiter = ',')]
    exclude: Vec<String>,

    /// Override the chat stage duration
    #[arg(long)]
    chat_minutes: Option<u32>,

    /// Override the experiment name prefix
    #[arg(long)]
    name_prefix: Option<String>,
}

#[derive(Args, Debug, Clone)]
struct RunArgs {
    #[command(flatten)]
    design: DesignArgs,

    /// Lab API base URL
    #[arg(long, env = BASE_URL_ENV)]
    base_url: Option<String>,

    /// Lab API bearer token
    #[arg(long, env = API_KEY_ENV, hide_env_values = true)]
    api_key: Option<String>,

    /// Units per window
    #[arg(short, long, default_value_t = 3)]
    concurrency: usize,

    /// Wait for conversations to settle before exporting
    #[arg(long)]
    wait: bool,

    #[arg(long, default_value_t = 10)]
    poll_interval_secs: u64,

    #[arg(long, default_value_t = 1200)]
    max_wait_secs: u64,

    /// Identical samples required before a conversation counts as finished
    #[arg(long, default_value_t = 15)]
    stability_threshold: u32,

    /// Per-request HTTP timeout
    #[arg(long, default_value_t = 60)]
    request_timeout_secs: u64,

    /// Checkpoint directory for results.json and dialogue.txt
    #[arg(short, long, default_value = "batch_output")]
    output_dir: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    convolab_core::init_tracing(cli.json, level);

    match cli.command {
        Commands::Run(args) => cmd_run(&args).await,
        Commands::Plan { design } => cmd_plan(&design),
        Commands::Render {
            results,
            output,
            utc,
        } => cmd_render(&results, output.as_deref(), utc),
        Commands::Quality {
            file,
            facilitators,
            format,
        } => cmd_quality(&file, facilitators, format),
        Commands::Fix {
            file,
            output,
            flag_only,
            facilitators,
        } => cmd_fix(&file, &output, flag_only, facilitators),
    }
}

/// Load the design, apply overrides and expand it into specs.
fn build_plan(args: &DesignArgs) -> Result<(DesignConfig, Vec<ExperimentSpec>)> {
    let mut design = match &args.design {
        Some(path) => DesignConfig::load(path)?,
        None => DesignConfig::builtin()?,
    };
    if let Some(minutes) = args.chat_minutes {
        design.chat_duration_minutes = minutes;
    }
    if let Some(prefix) = &args.name_prefix {
        design.name_prefix = prefix.clone();
    }

    let sizes = if args.group_sizes.is_empty() {
        design.group_sizes.clone()
    } else {
        args.group_sizes.clone()
    };

    let axis = match &args.scenarios {
        Some(path) => {
            let mut scenarios = load_scenarios(path)
                .with_context(|| format!("failed to load scenarios from {}", path.display()))?;
            if args.one_per_size {
                let lo = sizes.iter().copied().min().unwrap_or(1) as usize;
                let hi = sizes.iter().copied().max().unwrap_or(5) as usize;
                scenarios = select_one_per_group_size(&scenarios, lo..=hi);
            }
            DesignAxis::Scenarios(scenarios)
        }
        None => DesignAxis::GroupSizes(sizes),
    };

    let filter = BehaviorFilter {
        include: args.include.clone(),
        exclude: args.exclude.clone(),
    };
    let specs = enumerate(&design.behaviors, &axis, &filter)?;
    Ok((design, specs))
}

fn scheduler_config(args: &RunArgs) -> SchedulerConfig {
    SchedulerConfig {
        concurrency: args.concurrency,
        wait_for_completion: args.wait,
        poll: PollConfig {
            interval: Duration::from_secs(args.poll_interval_secs),
            max_wait: Duration::from_secs(args.max_wait_secs),
            stability_threshold: args.stability_threshold,
        },
    }
}

/// Flags win over the environment.
fn api_config(args: &RunArgs) -> ApiConfig {
    let mut config = ApiConfig::from_env();
    if let Some(url) = &args.base_url {
        config.base_url = url.clone();
    }
    if let Some(key) = args.api_key.as_ref().filter(|k| !k.is_empty()) {
        config.api_key = Some(key.clone());
    }
    config.with_timeout(Duration::from_secs(args.request_timeout_secs))
}

async fn cmd_run(args: &RunArgs) -> Result<()> {
    let (design, specs) = build_plan(&args.design)?;
    let config = scheduler_config(args);
    config.validate()?;

    let client = HttpLabClient::new(&api_config(args))?;
    let digest = design_digest(&specs);
    let sink = Arc::new(
        FsCheckpoint::create(&args.output_dir, digest.clone())
            .with_context(|| format!("cannot use output dir {}", args.output_dir.display()))?,
    );

    info!(
        units = specs.len(),
        concurrency = config.concurrency,
        design_digest = %digest,
        output_dir = %args.output_dir.display(),
        "starting batch"
    );

    let scheduler = BatchScheduler::new(
        Arc::new(client),
        ProvisionSettings::from(&design),
        config,
        sink.clone(),
    )?
    .with_batch_id(sink.batch_id().to_string());

    let state = scheduler.run(&specs).await?;

    println!("{}", render_summary(&BatchSummary::from_results(state.results())));
    println!("{}", render_summary_table(state.results()));
    println!("Results: {}", sink.results_path().display());
    println!("CSV: {}", sink.csv_path().display());
    println!("Dialogue: {}", sink.dialogue_path().display());
    Ok(())
}

fn cmd_plan(args: &DesignArgs) -> Result<()> {
    let (design, specs) = build_plan(args)?;
    for (i, spec) in specs.iter().enumerate() {
        println!("{:>3}. {}_{}", i + 1, design.name_prefix, spec.label());
    }
    println!("\n{} units, design digest {}", specs.len(), design_digest(&specs));
    Ok(())
}

fn cmd_render(results: &Path, output: Option<&Path>, utc: bool) -> Result<()> {
    let artifact = load_results(results)?;
    let dialogue = if utc {
        render_dialogue_in(&artifact.results, &Utc)
    } else {
        render_dialogue(&artifact.results)
    };

    match output {
        Some(path) => {
            std::fs::write(path, &dialogue)
                .with_context(|| format!("failed to write {}", path.display()))?;
            println!("Dialogue written to {}", path.display());
        }
        None => print!("{dialogue}"),
    }
    Ok(())
}

fn cmd_quality(file: &Path, facilitators: Vec<String>, format: ReportFormat) -> Result<()> {
    let text = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read {}", file.display()))?;
    let lines = parse_dialogue(&text);
    if lines.is_empty() {
        bail!("no messages found in {}", file.display());
    }

    let report = checker(facilitators)?.check(&lines);

    match format {
        ReportFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        ReportFormat::Text => {
            let name = file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| file.display().to_string());
            print!("{}", render_quality_report(&report, &name));
        }
    }
    Ok(())
}

fn cmd_fix(file: &Path, output: &Path, flag_only: bool, facilitators: Vec<String>) -> Result<()> {
    let text = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read {}", file.display()))?;
    let fixed = checker(facilitators)?.fix_dialogue(&text, flag_only);
    std::fs::write(output, &fixed.text)
        .with_context(|| format!("failed to write {}", output.display()))?;

    let stats = fixed.stats;
    info!(
        lines = stats.lines_processed,
        fillers_reduced = stats.fillers_reduced,
        echoes = stats.echoes_flagged,
        hollow = stats.hollow_flagged,
        "dialogue fixed"
    );
    println!("Processed {} lines", stats.lines_processed);
    println!("  - Fillers reduced: {}", stats.fillers_reduced);
    println!("  - Echo patterns flagged: {}", stats.echoes_flagged);
    println!("  - Hollow responses flagged: {}", stats.hollow_flagged);
    println!("\nOutput written to: {}", output.display());
    Ok(())
}

/// Quality checker for the given facilitator names, or the built-in design's.
fn checker(facilitators: Vec<String>) -> Result<QualityChecker> {
    let facilitators = if facilitators.is_empty() {
        DesignConfig::builtin()?.facilitator_names()
    } else {
        facilitators
    };
    Ok(QualityChecker::new(facilitators)?)
}
