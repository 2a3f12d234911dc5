/// Structured logging for the lexfuse CLI
///
/// stdout belongs to command output: search hits, evaluation reports,
/// comparison tables and the `expand` diagnostics JSON. Every tracing event
/// goes to stderr so `lexfuse evaluate > run.txt` captures only results.
///
/// On a terminal, events print as compact ANSI lines without module targets.
/// When stderr is redirected (batch evaluation runs, CI), they are written as
/// JSON objects carrying the pipeline fields (`qid`, `category`, `round`,
/// `attempt`, `error`) as structured keys.

use std::io::IsTerminal;
use tracing_subscriber::{
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};
use crate::config::Config;

/// Install the global subscriber. `RUST_LOG` takes precedence over
/// `log_level` from the config (default `info`).
pub fn init_logging(config: &Config) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    if std::io::stderr().is_terminal() {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stderr)
                    .compact()
                    .with_ansi(true)
                    .with_target(false)
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stderr)
                    .json()
            )
            .init();
    }
}
