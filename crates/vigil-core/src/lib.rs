//! vigil-core: presence and activity analytics primitives.
//!
//! Everything in this crate is pure computation over plain data: the event
//! model, the active-time reconstruction fold, the present/absent page
//! planner, and calendar bucketing. Storage lives in `vigil-store`.
//!
//! # Conventions
//!
//! - **Errors**: typed [`error::EngineError`] for domain failures,
//!   `anyhow::Result` at I/O seams (config loading).
//! - **Timestamps**: milliseconds since the Unix epoch, `i64`.

pub mod bucket;
pub mod config;
pub mod error;
pub mod merge;
pub mod model;
pub mod session;

pub use bucket::{FrequencyBucket, Granularity, TimeBucket};
pub use config::EngineConfig;
pub use error::EngineError;
pub use merge::{PagePlan, SortDirection};
pub use model::{
    ActionEvent, ConnectionCountRow, ConnectionEvent, PresencePing, PresenceRow, Session,
};
