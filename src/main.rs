//! Network Prober - Main CLI Application

use clap::Parser;
use network_prober::{
    app::{install_panic_hook, run_guarded, App},
    cli::Cli,
    error::ErrorReporter,
};
use std::{error::Error, process};

#[tokio::main]
async fn main() {
    install_panic_hook();

    let cli = Cli::parse();
    let reporter = ErrorReporter::new(cli.use_colors(), cli.verbose || cli.debug);

    let result = run_guarded(async move { App::new(cli)?.run().await }).await;

    if let Err(e) = result {
        reporter.report_error(&e);

        if let Some(source) = e.source() {
            eprintln!("Caused by: {}", source);
        }

        process::exit(e.exit_code());
    }
}
