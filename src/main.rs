use std::process::ExitCode;

use clap::Parser;
use physiodesk_lib::cli::{self, Cli};

#[tokio::main]
async fn main() -> ExitCode {
    // A missing .env is fine; the environment may already be set.
    let _ = dotenvy::dotenv();
    physiodesk_lib::init_tracing();

    let cli = Cli::parse();
    match cli::run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e}");
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}
