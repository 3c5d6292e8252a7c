// =============================================================================
// titan-executor — signed-intent server, router, venue fan-out
// =============================================================================

use clap::Parser;
use titan_engine::phase::{self, CommonArgs};

#[tokio::main]
async fn main() {
    let args = CommonArgs::parse();
    let code = phase::executor::run(args).await;
    std::process::exit(code);
}
