//! modelgrid-state — embedded state store for ModelGrid.
//!
//! Backed by [redb](https://docs.rs/redb), provides the durable record
//! of model versions, the append-only deployment log, the alert log,
//! and retrain requests.
//!
//! # Architecture
//!
//! All domain types are JSON-serialized into redb's `&[u8]` value
//! columns. Composite keys (`{model}/{version}`, `{model}:{id:020}`)
//! enable efficient prefix scans for related records. The per-model
//! active pointer is an index table maintained in the same write
//! transaction as the deployment log append, so the live swap is atomic
//! and readers never observe a partial transition.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by
//! `Arc<Database>`) and can be shared across async tasks.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::StateStore;
pub use types::*;
