// =============================================================================
// titan-sentinel — portfolio / risk / rebalancer control loop
// =============================================================================

use clap::Parser;
use titan_engine::phase::{self, CommonArgs};

#[tokio::main]
async fn main() {
    let args = CommonArgs::parse();
    let code = phase::sentinel::run(args).await;
    std::process::exit(code);
}
