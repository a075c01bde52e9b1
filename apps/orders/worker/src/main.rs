//! Order Worker
//!
//! Binary entry point for the order consumer.

#[tokio::main]
async fn main() {
    if let Err(e) = order_worker::run().await {
        eprintln!("Fatal error: {:?}", e);
        std::process::exit(1);
    }
}
