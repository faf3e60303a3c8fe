//! Configuration-driven event routing
//!
//! - [`RoutingConfig`]: the administrative configuration shape
//! - [`RoutingTable`]: an immutable, versioned compilation of a config
//! - [`SharedRoutingTable`]: the hot-swappable handle readers share
//! - [`Router`]: event + table -> [`RoutingDecision`]
//! - [`RoutingService`]: validate, then route

mod config;
mod router;
mod service;
mod table;

pub use config::{default_priority, OrderedMappings, RoutingConfig, RoutingTier, WorkflowDescriptor};
pub use router::{Router, RoutingDecision};
pub use service::RoutingService;
pub use table::{MatchKey, RoutingRule, RoutingTable, SharedRoutingTable};
