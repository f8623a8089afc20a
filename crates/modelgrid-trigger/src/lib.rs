//! ModelGrid retrain trigger.
//!
//! Consumes the alert stream and decides when to request a new
//! training run. The hand-off to the external training system is
//! fire-and-forget; the trigger never drives the training run itself.
//! A completed run is forwarded to the deployment controller as a dry
//! run only — promotion to live is always a separate, explicit call.
//!
//! # Components
//!
//! - **`training`** — the external training-system seam
//! - **`trigger`** — alert accumulation and the request state machine
//! - **`error`** — structured trigger errors

pub mod error;
pub mod training;
pub mod trigger;

pub use error::{TriggerError, TriggerResult};
pub use training::TrainingSystem;
pub use trigger::{RetrainTrigger, TriggerPolicy};
