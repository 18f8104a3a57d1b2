//! artools CLI Application
//!
//! Scans a corpus of artifact definitions, resolves and downloads the tools
//! they reference, and builds online or offline deployment packages.

// CLI binary needs to output to stdout/stderr - this is intentional
#![allow(clippy::print_stdout, clippy::print_stderr)]

use artools::cli::{self, CliError, exit_code_for, render_error};
use artools::commands::{CommandExecutor, Outcome};
use artools::tracing::{self as logging, TracingConfig};
use tokio_util::sync::CancellationToken;

fn main() {
    // NOTE: Using eprintln! in panic hook is intentional - tracing infrastructure
    // may be corrupted during a panic, so we use the most reliable output method.
    std::panic::set_hook(Box::new(|panic_info| {
        eprintln!("Application panicked: {panic_info}");
        eprintln!("Internal error occurred. Run with RUST_LOG=debug for more information.");
    }));

    let cli = cli::parse();
    let exit_code = run_with_tokio(cli);
    std::process::exit(exit_code);
}

/// Create tokio runtime and run the command
fn run_with_tokio(cli: cli::Cli) -> i32 {
    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Fatal error: Failed to create tokio runtime: {e}");
            return artools::EXIT_FATAL;
        }
    };

    rt.block_on(run(cli))
}

async fn run(cli: cli::Cli) -> i32 {
    let tracing_config = TracingConfig {
        format: cli.log_format,
        level: cli.level.into(),
    };
    if let Err(e) = logging::init_tracing(tracing_config) {
        eprintln!("{e:?}");
    }

    let json = cli.json;
    let config = match cli.load_config() {
        Ok(config) => config,
        Err(e) => return fail(&e, json),
    };

    let cancellation = CancellationToken::new();
    let signal_token = cancellation.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, cancelling outstanding work");
            signal_token.cancel();
        }
    });

    let executor = CommandExecutor::new(config, cancellation);
    match executor.execute(cli.into_command()).await {
        Ok(outcome) => {
            render_outcome(&outcome, json);
            outcome.exit_code()
        }
        Err(e) => fail(&e, json),
    }
}

fn fail(err: &CliError, json: bool) -> i32 {
    render_error(err, json);
    exit_code_for(err)
}

fn render_outcome(outcome: &Outcome, json: bool) {
    if json {
        match serde_json::to_string_pretty(&outcome.result) {
            Ok(text) => println!("{text}"),
            Err(e) => eprintln!("Error serializing result: {e}"),
        }
        return;
    }
    println!("{}", outcome.summary);
    for error in &outcome.result.errors {
        eprintln!("error: {error}");
    }
}
