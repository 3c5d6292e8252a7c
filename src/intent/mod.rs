pub mod client;
pub mod codec;
pub mod server;
pub mod types;

pub use client::{IntentClient, IpcConfig, IpcError};
pub use codec::{canonical, Envelope, WireError, DEFAULT_CLOCK_SKEW_MS};
pub use server::{IntentHandler, IntentServer};
pub use types::{
    AbortResponse, ConfirmResponse, EntryZone, IntentSignal, PrepareResponse, SignalType,
};
