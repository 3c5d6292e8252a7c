pub mod item;
pub mod registry;
pub mod routing;

// Re-export the working set so call sites read `config::ConfigRegistry`.
pub use item::{
    ConfigItem, ConfigValue, OverrideError, OverrideReceipt, Provenance, RiskDirection,
    SafetyTier, ValueSchema,
};
pub use registry::{ConfigFile, ConfigRegistry, ConfigSnapshot, ReloadReport};
pub use routing::{RouteRule, RoutingConfig};
