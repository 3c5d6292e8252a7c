pub mod calculators;
pub mod indicators;
pub mod ranking;
pub mod types;
pub mod watchlist;

pub use calculators::CalcParams;
pub use ranking::RankWeights;
pub use types::{
    Regime, Tripwire, TripwireKey, TripwireState, TripwireType, VolatilityMetrics, VolumeCounter,
};
pub use watchlist::{TripwireMap, WatchlistBuilder};
