//! Chantier Planning
//!
//! Timeline engine of the construction planning chart.
//!
//! Layered architecture:
//! - domain: entities (groups, items, markers) and errors
//! - store / aggregate / repair / tree: the model and its invariants
//! - sync: building the planning from the lot feed
//! - interaction: gestures, zoom and pan
//! - repository / persistence: key-value storage and auto-save
//! - session: everything above wired for one open project

pub mod aggregate;
pub mod config;
pub mod domain;
pub mod export;
pub mod interaction;
pub mod persistence;
pub mod repair;
pub mod repository;
pub mod session;
pub mod store;
pub mod sync;
pub mod time;
pub mod tree;

pub use config::PlanningConfig;
pub use domain::{DomainError, DomainResult};
pub use session::{PlanningSession, SessionOptions, TaskUpdateCallback};
pub use store::{ModelStore, PlanningState, Snapshot};
