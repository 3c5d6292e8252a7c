pub mod reconnect;

pub use reconnect::{ConnectionState, Lifecycle, ReconnectPolicy};
