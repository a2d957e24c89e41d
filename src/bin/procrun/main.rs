//! procrun CLI - Run a program and pump its standard streams

mod cli;
mod logging;
mod runner;

use clap::Parser;
use cli::{Cli, Commands, RunOptions};
use console::style;
use procrun::{ProcessSpec, Result};

fn execute(spec: ProcessSpec, options: &RunOptions) -> Result<i32> {
    let result = runner::run(&spec, options)?;
    runner::report(&result, options.json)?;
    Ok(result.exit_code)
}

fn main() {
    let cli = Cli::parse();

    logging::init_logger(cli.verbose);

    let outcome = match cli.command {
        Commands::Run {
            options,
            program,
            args,
        } => execute(ProcessSpec::new(program).args(args), &options),
        Commands::Spec { options, file } => {
            runner::load_spec(&file).and_then(|spec| execute(spec, &options))
        }
    };

    match outcome {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("{} {}", style("error:").red().bold(), e);
            std::process::exit(1);
        }
    }
}
