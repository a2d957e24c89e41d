use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "procrun")]
#[command(version, about = "Run external processes and pump their standard streams", long_about = None)]
#[command(after_help = "EXAMPLES:
    # Pass output through to the terminal
    procrun run make -j4

    # Capture stdout into a file, stderr still shown
    procrun run --capture listing.txt ls -l /usr

    # Filter stdin through a child
    printf 'b\\na\\n' | procrun run --interactive sort

    # Load the process description from JSON and report the result
    procrun spec --json job.json
")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Show verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a program
    Run {
        #[command(flatten)]
        options: RunOptions,

        /// Program to run
        program: String,

        /// Program arguments
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },

    /// Run a process described by a JSON file
    Spec {
        #[command(flatten)]
        options: RunOptions,

        /// JSON process description
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },
}

#[derive(Args, Debug, Clone, Default)]
pub struct RunOptions {
    /// Working directory for the child
    #[arg(short, long, value_name = "PATH")]
    pub root: Option<PathBuf>,

    /// Timeout in seconds
    #[arg(short, long, value_name = "SECONDS")]
    pub timeout: Option<u64>,

    /// Pump buffer size
    #[arg(short, long, value_name = "BYTES")]
    pub buffer_size: Option<usize>,

    /// Write the child's stdout to FILE
    #[arg(short, long, value_name = "FILE", conflicts_with = "interactive")]
    pub capture: Option<PathBuf>,

    /// Feed stdin to the child and copy its stdout back
    #[arg(short, long)]
    pub interactive: bool,

    /// Discard console-bound output
    #[arg(short, long)]
    pub quiet: bool,

    /// Print the execution result as JSON
    #[arg(long)]
    pub json: bool,

    /// Do not echo the command line before running
    #[arg(long)]
    pub no_echo: bool,
}
