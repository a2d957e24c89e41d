use console::style;
use log::{debug, info};
use procrun::{ExecutionResult, ProcessSpec, ProcessSupervisor, Result, SupervisorBuilder};
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::time::Duration;

use crate::cli::RunOptions;

/// Build a supervisor from the command-line options
pub fn supervisor(options: &RunOptions) -> Result<ProcessSupervisor> {
    let root = match &options.root {
        Some(root) => root.clone(),
        None => std::env::current_dir()?,
    };
    debug!("Using root: {:?}", root);

    let mut builder = SupervisorBuilder::new(&root).echo_command(!options.no_echo);

    if let Some(t) = options.timeout {
        debug!("Timeout: {}s", t);
        builder = builder.timeout(Duration::from_secs(t));
    }

    if let Some(size) = options.buffer_size {
        debug!("Buffer size: {} bytes", size);
        builder = builder.buffer_size(size);
    }

    if options.quiet {
        builder = builder.quiet();
    }

    builder.build()
}

/// Load a process description from a JSON file
pub fn load_spec(path: &Path) -> Result<ProcessSpec> {
    info!("Loading process spec from {}", path.display());
    let json = fs::read_to_string(path)?;
    ProcessSpec::from_json(&json)
}

/// Run `spec` in the mode selected by `options` and return the result
pub fn run(spec: &ProcessSpec, options: &RunOptions) -> Result<ExecutionResult> {
    let supervisor = supervisor(options)?;

    let result = if let Some(path) = &options.capture {
        let mut sink = BufWriter::new(File::create(path)?);
        let result = supervisor.execute_capture(spec, &mut sink)?;
        sink.flush()?;
        result
    } else if options.interactive {
        // A terminal may never send EOF, so stdin is read off the call path.
        let mut sink = io::stdout();
        supervisor.execute_interactive_owned(spec, io::stdin(), &mut sink)?
    } else {
        supervisor.execute(spec)?
    };

    info!("Execution completed in {}ms", result.wall_time_ms);
    Ok(result)
}

/// Print the result summary to stderr, or as JSON to stdout
pub fn report(result: &ExecutionResult, json: bool) -> Result<()> {
    if json {
        let rendered = serde_json::to_string_pretty(result).map_err(io::Error::from)?;
        println!("{}", rendered);
        return Ok(());
    }

    let exit_code_styled = if result.exit_code == 0 {
        style(result.exit_code).green().bold()
    } else {
        style(result.exit_code).red().bold()
    };

    let mut line = format!(
        "{}={} | {}={} | {}={}",
        style("mode").dim(),
        style(result.mode).bold(),
        style("exit_code").dim(),
        exit_code_styled,
        style("wall_time_ms").dim(),
        style(result.wall_time_ms).bold(),
    );

    if result.timed_out {
        line.push_str(&format!(
            " | {}={}",
            style("timed_out").red(),
            style("true").red().bold()
        ));
    }

    if result.cancelled {
        line.push_str(&format!(
            " | {}={}",
            style("cancelled").yellow(),
            style("true").yellow().bold()
        ));
    }

    for pump in result.pumps.iter().filter(|p| !p.is_ok()) {
        if let Some(err) = &pump.error {
            line.push_str(&format!(
                " | {}={}",
                style(format!("{}_error", pump.stream)).red(),
                err
            ));
        }
    }

    eprintln!("{}", line);
    Ok(())
}
