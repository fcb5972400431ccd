// ============================================================================
// Strict linting - Dangerous or non-idiomatic practices are forbidden
// ============================================================================

#![deny(unsafe_code)]                 // Unsafe code is forbidden
#![deny(missing_docs)]                // All public items must be documented
#![deny(non_camel_case_types)]        // Types must follow CamelCase convention
#![deny(non_snake_case)]              // Variables and functions must be snake_case
#![deny(non_upper_case_globals)]      // Constants must be UPPER_CASE
#![deny(nonstandard_style)]           // Non-standard code style is forbidden
#![forbid(unsafe_op_in_unsafe_fn)]    // Unsafe ops in unsafe fns are forbidden

// Clippy lints (warnings only)
#![warn(clippy::all)]                 // All standard Clippy lints
#![warn(clippy::pedantic)]            // Very strict Clippy lints
#![warn(clippy::nursery)]             // Experimental lints
#![warn(clippy::unwrap_used)]         // unwrap() warning
#![warn(clippy::expect_used)]         // expect() warning
#![warn(clippy::panic)]               // panic!() warning
#![warn(clippy::print_stdout)]        // println!() warning
#![warn(clippy::todo)]                // TODO warning
#![warn(clippy::unimplemented)]       // unimplemented!() warning
#![warn(clippy::redundant_clone)]     // Useless clones warning
#![warn(clippy::shadow_unrelated)]    // Shadowing unrelated variables warning

// ============================================================================
// Crate Documentation
// ============================================================================

//! # Bundleplan
//!
//! A declarative deployment plan builder: given a **bundle** (the desired
//! applications, machines, relations, and unit placements) and an optional
//! **model** (what is currently deployed), compute the ordered list of
//! change operations that converges the model toward the bundle.
//!
//! ## Overview
//!
//! Planning is pure and deterministic: no I/O, no clocks, no randomness.
//! Two runs over equal inputs produce identical change sequences. The
//! emitted changes carry `requires` edges and are returned in a stable
//! topological order, ready for an external applier to execute.
//!
//! - With no model, the plan is a full deployment.
//! - With a model, only the missing pieces are planned: charms already
//!   uploaded are reused, deployed applications are upgraded or
//!   reconfigured in place, existing machines and units satisfy placement
//!   directives before anything new is created.
//!
//! The [`Differ`] answers the read-only question instead: *what* differs
//! between a bundle and a model, without planning anything.
//!
//! ## Modules
//!
//! - [`bundle`]: the bundle document, charm references, placement grammar
//! - [`model`]: the live-model snapshot and the queries planning runs on it
//! - [`plan`]: the planner, change records, and ordering
//! - [`diff`]: the bundle-vs-model structural differ
//!
//! ## Example
//!
//! ```
//! use bundleplan::{Bundle, Planner};
//!
//! let bundle = Bundle::from_yaml(
//!     "
//!     applications:
//!         mediawiki:
//!             charm: cs:precise/mediawiki-10
//!             num_units: 1
//!     ",
//! )
//! .unwrap();
//!
//! let changes = Planner::new(&bundle).build().unwrap();
//! let descriptions: Vec<String> =
//!     changes.iter().map(|change| change.description()).collect();
//! assert_eq!(
//!     descriptions,
//!     vec![
//!         "upload charm cs:precise/mediawiki-10 for series precise",
//!         "deploy application mediawiki on precise using cs:precise/mediawiki-10",
//!         "add unit mediawiki/0 to new machine 0",
//!     ],
//! );
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod bundle;
pub mod diff;
pub mod error;
pub mod model;
pub mod naturalsort;
pub mod plan;

// ============================================================================
// Re-exports
// ============================================================================

pub use bundle::{ApplicationSpec, Bundle, Endpoint, MachineSpec, Placement, ResourceValue};
pub use diff::{BundleDiff, Differ};
pub use error::{BundleError, PlanError, Result};
pub use model::{Application, ConstraintsEqual, Machine, Model, Relation, Unit};
pub use plan::change::{Change, ChangeParams, EntityType};
pub use plan::Planner;
