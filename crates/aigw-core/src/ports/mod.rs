//! Port definitions (trait abstractions) for external systems.
//!
//! Ports define the interfaces that the core engines expect from the
//! outside world: token pools, the generation backend, and the model
//! catalog. They contain no transport details and use only domain types.
//!
//! # Design Rules
//!
//! - No `reqwest` or `axum` types in any signature
//! - Implementations are thread-safe black boxes (`Send + Sync`)
//! - The orchestrator never assumes exclusivity over a token across rounds

pub mod generation;
pub mod model_catalog;
pub mod token_maintenance;
pub mod token_manager;

pub use generation::{
    GenerationError, GenerationOutput, GenerationService, ImageRequest, ProviderEvent,
    ProviderStream,
};
#[cfg(test)]
pub use model_catalog::MockModelCatalog;
pub use model_catalog::{ModelCatalog, ModelInfo, StaticModelCatalog};
pub use token_maintenance::{NsfwOutcome, TokenMaintenance, UsageCheck};
pub use token_manager::{RefreshState, TokenError, TokenManager, acquire_token};
