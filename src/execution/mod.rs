pub mod router;
pub mod twap;
pub mod venue;

pub use router::{
    ExecutionRouter, OrderIntent, OrderType, RouteError, RouterConfig, TimeInForce,
};
pub use twap::{ClipFill, TwapError, TwapExecutor, TwapParams, TwapResult};
pub use venue::{
    dispatch_children, PaperVenue, RateLimitTracker, SignedRestVenue, VenueAck, VenueClient,
    VenueError,
};
