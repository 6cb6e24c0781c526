//! Tessel - Main Entry Point
//!
//! Runs vector layout inference on functions stored as JSON and writes the
//! annotated function back out.

use anyhow::{anyhow, Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use tessel_infer::{verify_annotations, InferVectorLayoutPass};
use tessel_ir::Function;
use tessel_session::Options;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// Tessel - vreg layout inference for tiled vector programs
#[derive(Parser, Debug)]
#[command(name = "tessel")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// The command to execute
    #[command(subcommand)]
    command: Commands,

    /// Verbose output (-v for debug, -vv for trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,
}

/// Output formats
#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum Emit {
    /// The annotated function as JSON, readable by `tessel verify`
    Json,
    /// MLIR-like text with layout annotations
    Text,
}

/// Subcommands
#[derive(Subcommand, Debug)]
enum Commands {
    /// Infer vector layouts for a function
    Infer {
        /// Function to annotate, as JSON
        #[arg(value_name = "FILE")]
        file: Utf8PathBuf,

        /// Options file (TOML)
        #[arg(long, value_name = "FILE")]
        config: Option<Utf8PathBuf>,

        /// Sublanes per vreg, overriding the options file
        #[arg(long)]
        sublanes: Option<i64>,

        /// Lanes per vreg, overriding the options file
        #[arg(long)]
        lanes: Option<i64>,

        /// Output file name (stdout if absent)
        #[arg(short, long, value_name = "FILE")]
        output: Option<Utf8PathBuf>,

        /// Output format
        #[arg(long, value_enum, default_value = "json")]
        emit: Emit,

        /// Skip checking the annotations after inference
        #[arg(long)]
        no_verify: bool,

        /// Print the inference report to stderr
        #[arg(long)]
        report: bool,
    },

    /// Check the annotations of an annotated function
    Verify {
        /// Annotated function, as JSON
        #[arg(value_name = "FILE")]
        file: Utf8PathBuf,
    },

    /// Show version information
    Version,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so that stdout stays parseable.
    let log_level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Infer {
            file,
            config,
            sublanes,
            lanes,
            output,
            emit,
            no_verify,
            report,
        } => {
            let mut options = load_options(config.as_deref())?
                .with_target_overrides(sublanes, lanes)
                .context("invalid target override")?;
            if no_verify {
                options.verify = false;
            }
            infer_file(&file, &options, output.as_deref(), emit, report)?;
        }
        Commands::Verify { file } => {
            verify_file(&file)?;
        }
        Commands::Version => {
            print_version();
        }
    }

    Ok(())
}

fn load_options(config: Option<&Utf8Path>) -> Result<Options> {
    match config {
        Some(path) => {
            tracing::debug!("Loading options from {}", path);
            Options::load(path).with_context(|| format!("failed to load options from {path}"))
        }
        None => Ok(Options::default()),
    }
}

fn read_function(path: &Utf8Path) -> Result<Function> {
    let source =
        std::fs::read_to_string(path).with_context(|| format!("failed to read {path}"))?;
    serde_json::from_str(&source).with_context(|| format!("{path} is not a valid function"))
}

/// Annotate the function in `file` and write it out
fn infer_file(
    file: &Utf8Path,
    options: &Options,
    output: Option<&Utf8Path>,
    emit: Emit,
    show_report: bool,
) -> Result<()> {
    tracing::info!("Inferring layouts for {} on target {}", file, options.target);

    let mut func = read_function(file)?;
    let report = InferVectorLayoutPass::from_options(options)
        .run(&mut func)
        .with_context(|| format!("layout inference failed for @{} in {file}", func.name))?;

    let rendered = match emit {
        Emit::Json => {
            let mut json = serde_json::to_string_pretty(&func)?;
            json.push('\n');
            json
        }
        Emit::Text => func.to_string(),
    };
    match output {
        Some(path) => {
            std::fs::write(path, rendered).with_context(|| format!("failed to write {path}"))?;
            tracing::info!("Generated: {}", path);
        }
        None => print!("{rendered}"),
    }

    if show_report {
        eprint!("{report}");
    }
    Ok(())
}

/// Check the annotations of the function in `file`
fn verify_file(file: &Utf8Path) -> Result<()> {
    let func = read_function(file)?;
    verify_annotations(&func)
        .map_err(|e| anyhow!("'{}' op {}", e.op_name(), e))
        .with_context(|| format!("@{} in {file} is not correctly annotated", func.name))?;
    println!("{file}: @{} is correctly annotated", func.name);
    Ok(())
}

/// Print version information
fn print_version() {
    println!("Tessel");
    println!("Version: {}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("Vector layout inference for tiled-vreg accelerators");
    println!("Default target: {}", Options::default().target);
}
