//! Bundle input surface: the declarative specification of a deployment.
//!
//! - [`spec`]: the bundle document structs and YAML ingestion
//! - [`charm`]: charm reference interpretation (series discovery)
//! - [`placement`]: endpoint and placement directive parsing

pub mod charm;
pub mod placement;
pub mod spec;

pub use placement::{Endpoint, Placement};
pub use spec::{ApplicationSpec, Bundle, MachineSpec, ResourceValue};
