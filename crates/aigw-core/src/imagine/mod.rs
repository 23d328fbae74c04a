//! Continuous "imagine" generation.
//!
//! - [`SessionStore`]: resumable run parameters keyed by an opaque id
//! - [`ImagineOrchestrator`]: the round loop shared by both transports
//! - [`ImagineEvent`]: the frames both transports emit
//! - [`params`]: request normalisation

mod events;
mod orchestrator;
pub mod params;
mod session;

pub use events::{ErrorPayload, ImagePayload, ImagineEvent, RunStatus, StopReason};
pub use orchestrator::{ImagineOrchestrator, RunHandle, RunParams, RunSummary};
pub use params::ParamError;
pub use session::{ImagineSession, SessionStore};
