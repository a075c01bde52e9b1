//! Order Producer
//!
//! Binary entry point; see the library docs for commands and configuration.

use clap::Parser;
use order_producer::Cli;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(e) = order_producer::run(cli).await {
        eprintln!("Fatal error: {:?}", e);
        std::process::exit(1);
    }
}
