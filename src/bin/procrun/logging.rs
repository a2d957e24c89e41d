use console::{StyledObject, style};
use env_logger::Builder;
use log::{Level, LevelFilter};
use std::io::Write;

/// Level used when `RUST_LOG` is unset
fn default_filter(verbose: bool) -> LevelFilter {
    if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Warn
    }
}

/// Fixed-width, colored level column
fn level_tag(level: Level) -> StyledObject<&'static str> {
    match level {
        Level::Error => style("ERROR").red().bold(),
        Level::Warn => style("WARN ").yellow().bold(),
        Level::Info => style("INFO ").green(),
        Level::Debug => style("DEBUG").cyan(),
        Level::Trace => style("TRACE").dim(),
    }
}

/// Install the logger. `-v` lowers the default to debug; `RUST_LOG`
/// directives, when present, take precedence.
pub fn init_logger(verbose: bool) {
    let mut builder = Builder::new();
    builder.filter_level(default_filter(verbose));
    if let Ok(directives) = std::env::var("RUST_LOG") {
        builder.parse_filters(&directives);
    }

    builder
        .format(|buf, record| {
            writeln!(
                buf,
                "{} {} {}",
                level_tag(record.level()),
                style(record.target()).dim(),
                record.args()
            )
        })
        .init();
}
