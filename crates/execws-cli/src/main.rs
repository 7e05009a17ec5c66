//! execws binary entry point.
//!
//! One binary, two personalities: invoked under its own name it runs the
//! exec CLI; invoked as `kubectl_complete-execws` it answers kubectl's
//! tab-completion queries.

use std::path::Path;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use execws_cli::{completion, Cli};

/// Binary name kubectl looks for to delegate completion
const COMPLETION_PROGRAM: &str = "kubectl_complete-execws";

#[tokio::main]
async fn main() {
    let args: Vec<String> = std::env::args().collect();

    let program = args
        .first()
        .map(Path::new)
        .and_then(Path::file_stem)
        .and_then(|name| name.to_str())
        .unwrap_or("execws");

    if program == COMPLETION_PROGRAM {
        // Stdout is the completion protocol; keep logging quiet.
        init_logging(0);
        std::process::exit(completion::run(&args[1..]).await);
    }

    let cli = Cli::parse();
    init_logging(cli.global.loglevel);

    match cli.run().await {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{err}");
            std::process::exit(1);
        }
    }
}

/// Map the numeric loglevel onto a tracing filter.
///
/// Level 4 and up carries connection diagnostics; level 7 includes the
/// exact request URI.
fn init_logging(loglevel: u8) {
    let filter = match loglevel {
        0 => "error",
        1 => "warn",
        2 | 3 => "info",
        4..=6 => "debug",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();
}
