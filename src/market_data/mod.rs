pub mod candle_buffer;
pub mod derived;
pub mod queue;
pub mod stream;
pub mod trade_flow;

// Re-export the working set (e.g. `use crate::market_data::CandleBuffer`).
pub use candle_buffer::{CandleBuffer, CandleKey};
pub use derived::{DerivedSnapshot, DerivedStore};
pub use queue::TickQueue;
pub use trade_flow::TradeFlow;
