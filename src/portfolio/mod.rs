pub mod rebalancer;
pub mod risk;
pub mod tracker;

pub use rebalancer::{RebalanceAction, RebalanceConfig, Rebalancer};
pub use risk::{evaluate as evaluate_risk, RiskEvaluation, RiskInputs, RiskLimits};
pub use tracker::{
    HealthReport, HealthStatus, MarkPrices, PortfolioTracker, Position, PositionType,
};
