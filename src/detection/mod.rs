pub mod engine;
pub mod shard;

pub use engine::{DetectionConfig, Effect, MarketContext, Veto};
pub use shard::SymbolShard;
