mod archive;
mod client;
mod commands;
mod config;
mod error;
mod interpreter;
mod protocol;
mod stream;
mod tree;
mod ui;

use clap::{Parser, Subcommand};
use commands::OutputOptions;
use config::{DEFAULT_ARTIFACT_PATH, ExportArgs, InterpreterArgs, UpstreamArgs};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "forge", version, about = "Collect, edit and package code generated by a multi-agent run")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Write logs to this file instead of stderr
    #[arg(long, global = true, env = "FORGE_LOG_FILE")]
    log_file: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Send a task to the agent and follow its event stream
    Run {
        task: String,
        #[command(flatten)]
        upstream: UpstreamArgs,
        #[command(flatten)]
        interpreter: InterpreterArgs,
        #[command(flatten)]
        output: OutputArgs,
    },
    /// Decode a captured event stream from a file
    Replay {
        file: PathBuf,
        /// Bytes fed to the decoder per read
        #[arg(long, default_value_t = 4096)]
        chunk_size: usize,
        #[command(flatten)]
        interpreter: InterpreterArgs,
        #[command(flatten)]
        output: OutputArgs,
    },
    /// Print the project tree of a code artifact
    Tree {
        #[arg(default_value = DEFAULT_ARTIFACT_PATH)]
        artifact: PathBuf,
    },
    /// Package a code artifact as <name>.zip
    Export {
        #[arg(default_value = DEFAULT_ARTIFACT_PATH)]
        artifact: PathBuf,
        #[command(flatten)]
        export: ExportArgs,
    },
    /// Edit a code artifact in the terminal
    Edit {
        #[arg(default_value = DEFAULT_ARTIFACT_PATH)]
        artifact: PathBuf,
        #[command(flatten)]
        export: ExportArgs,
    },
}

#[derive(clap::Args)]
struct OutputArgs {
    /// File the latest code artifact is written to
    #[arg(long, default_value = DEFAULT_ARTIFACT_PATH)]
    artifact: PathBuf,

    /// Also package the artifact as a zip
    #[arg(long)]
    export: bool,

    #[command(flatten)]
    archive: ExportArgs,
}

impl From<OutputArgs> for OutputOptions {
    fn from(args: OutputArgs) -> Self {
        OutputOptions {
            artifact: args.artifact,
            export: args.export.then_some(args.archive),
        }
    }
}

// The editor owns the terminal, so without a log file it logs nothing.
fn init_tracing(verbose: bool, log_file: Option<&PathBuf>, interactive: bool) -> std::io::Result<()> {
    let default = match (interactive && log_file.is_none(), verbose) {
        (true, _) => "off",
        (false, true) => "forge=debug",
        (false, false) => "forge=info",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    match log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            builder
                .with_ansi(false)
                .with_writer(std::sync::Mutex::new(file))
                .init();
        }
        None => builder.with_writer(std::io::stderr).init(),
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let interactive = matches!(cli.command, Command::Edit { .. });
    if let Err(err) = init_tracing(cli.verbose, cli.log_file.as_ref(), interactive) {
        eprintln!("failed to open log file: {err}");
        std::process::exit(1);
    }

    let result = match cli.command {
        Command::Run {
            task,
            upstream,
            interpreter,
            output,
        } => commands::run(task, upstream, interpreter, output.into()).await,
        Command::Replay {
            file,
            chunk_size,
            interpreter,
            output,
        } => commands::replay(file, chunk_size, interpreter, output.into()).await,
        Command::Tree { artifact } => commands::tree(artifact).await,
        Command::Export { artifact, export } => commands::export(artifact, export).await,
        Command::Edit { artifact, export } => commands::edit(artifact, export).await,
    };

    if let Err(err) = result {
        tracing::error!("{err}");
        if cli.log_file.is_some() || interactive {
            eprintln!("error: {err}");
        }
        std::process::exit(1);
    }
}
