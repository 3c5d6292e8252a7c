// =============================================================================
// titan-scavenger — liquidation/level/derivative tripwire phase
// =============================================================================

use clap::Parser;
use titan_engine::phase::{self, CommonArgs};
use titan_engine::types::PhaseId;

#[tokio::main]
async fn main() {
    let args = CommonArgs::parse();
    let code = phase::engine::run(PhaseId::Scavenger, args).await;
    std::process::exit(code);
}
