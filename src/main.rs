use std::process::ExitCode;

use clap::Parser;
use skimmer::cli::Cli;

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    Cli::parse().run().await
}
