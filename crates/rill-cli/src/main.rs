//! Rill CLI - compile declarative pipelines into execution DAGs

mod config;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{Shell, generate};
use config::{Config, OutputFormat};
use rill_core::{Dag, PlannerConfig, Workflow};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

/// Output verbosity level.
#[derive(Clone, Copy)]
enum Verbosity {
    Quiet,
    Normal,
    Verbose,
}

impl Verbosity {
    fn from_flags(verbose: bool, quiet: bool) -> Self {
        if quiet {
            Verbosity::Quiet
        } else if verbose {
            Verbosity::Verbose
        } else {
            Verbosity::Normal
        }
    }

    /// Default log filter when `RUST_LOG` is unset.
    fn filter(self) -> &'static str {
        match self {
            Verbosity::Quiet => "error",
            Verbosity::Normal => "warn",
            Verbosity::Verbose => "rill_core=debug,info",
        }
    }

    fn result(self, msg: &str) {
        if !matches!(self, Verbosity::Quiet) {
            println!("{msg}");
        }
    }
}

fn init_tracing(v: Verbosity) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(v.filter()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[derive(Parser)]
#[command(name = "rill")]
#[command(about = "Compile dataflow pipelines into execution DAGs", long_about = None)]
struct Cli {
    /// Verbose output (show planner debug events)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Quiet output (only errors)
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Path to config file (default: ~/.config/rill/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a workflow and print the resulting DAG
    Plan {
        /// Workflow file (YAML, TOML, or JSON)
        file: PathBuf,
        /// Output format
        #[arg(long, value_enum)]
        format: Option<OutputFormat>,
    },

    /// Compile a workflow and report whether it is valid
    Validate {
        /// Workflow file (YAML, TOML, or JSON)
        file: PathBuf,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },

    /// Generate man page
    Manpage,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = if let Some(ref path) = cli.config {
        Config::load_from_path(Some(path.clone()))
    } else {
        Config::load()
    };

    // Config defaults, CLI flags override
    let verbose = cli.verbose || config.defaults.verbose;
    let quiet = cli.quiet || config.defaults.quiet;
    let verbosity = Verbosity::from_flags(verbose, quiet);
    init_tracing(verbosity);

    match cli.command {
        Commands::Plan { file, format } => {
            let format = format.or(config.defaults.format).unwrap_or_default();
            cmd_plan(&file, format, &config.planner)
        }
        Commands::Validate { file } => cmd_validate(&file, &config.planner, verbosity),
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "rill", &mut std::io::stdout());
            Ok(())
        }
        Commands::Manpage => {
            let cmd = Cli::command();
            let man = clap_mangen::Man::new(cmd);
            man.render(&mut std::io::stdout())?;
            Ok(())
        }
    }
}

/// Load a workflow file and compile it.
fn compile(path: &Path, planner: &PlannerConfig) -> Result<Dag> {
    let data =
        std::fs::read(path).with_context(|| format!("Failed to read workflow: {}", path.display()))?;
    let workflow = Workflow::from_bytes(&data, path.to_str())
        .with_context(|| format!("Failed to load workflow: {}", path.display()))?;
    let pipeline = workflow.to_pipeline().context("Failed to build pipeline")?;
    tracing::debug!(stages = pipeline.len(), "built pipeline");
    pipeline
        .to_dag_with(planner)
        .context("Failed to compile pipeline")
}

fn cmd_plan(path: &Path, format: OutputFormat, planner: &PlannerConfig) -> Result<()> {
    let dag = compile(path, planner)?;
    let rendered = match format {
        OutputFormat::Text => dag.to_string(),
        OutputFormat::Json => serde_json::to_string_pretty(&dag.describe())? + "\n",
        OutputFormat::Yaml => serde_yaml::to_string(&dag.describe())?,
    };
    print!("{rendered}");
    Ok(())
}

fn cmd_validate(path: &Path, planner: &PlannerConfig, v: Verbosity) -> Result<()> {
    let dag = compile(path, planner)?;
    v.result(&format!(
        "{}: ok ({} vertices, {} edges)",
        path.display(),
        dag.vertex_count(),
        dag.edges().len()
    ));
    Ok(())
}
