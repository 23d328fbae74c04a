//! Core domain for the aigw gateway.
//!
//! Holds the engines (admission control, background tasks, continuous
//! imagine runs) and the ports they need from the outside world. Nothing
//! here knows about HTTP; the axum and upstream crates adapt it.

pub mod batch;
pub mod error;
pub mod images;
pub mod imagine;
pub mod ports;
pub mod rate_limit;
pub mod settings;
pub mod tasks;
pub mod tokens;
pub mod transport;

pub use batch::{JobOutcome, TokenJobs, collect_tokens, run_batch, spawn_job};
pub use error::CoreError;
pub use images::{ImageGenerationBody, ImageService, validate_image_request};
pub use imagine::{
    ImagineEvent, ImagineOrchestrator, ImagineSession, ParamError, RunHandle, RunParams,
    RunSummary, SessionStore, StopReason,
};
pub use ports::{
    GenerationError, GenerationOutput, GenerationService, ImageRequest, ModelCatalog, ModelInfo,
    NsfwOutcome, ProviderEvent, ProviderStream, RefreshState, StaticModelCatalog, TokenError,
    TokenMaintenance, TokenManager, UsageCheck,
};
pub use rate_limit::{Admission, SlidingWindowLimiter};
pub use settings::{
    DEFAULT_IMAGE_MODEL, DEFAULT_PORT, GatewaySettings, SettingsError, is_production_env,
    validate_settings,
};
pub use tasks::{Task, TaskEvent, TaskRegistry, TaskSnapshot, TaskStatus};
pub use tokens::StaticTokenPool;
pub use transport::{Proxies, TransportError};
