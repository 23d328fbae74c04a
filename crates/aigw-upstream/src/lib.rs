//! Upstream provider adapter for aigw.
//!
//! [`UpstreamClient`] implements the generation and token maintenance ports
//! from `aigw-core` over reqwest. Streaming responses are decoded into
//! provider events by [`sse`].

pub mod client;
pub mod generation;
pub mod maintenance;
pub mod sse;

pub use client::{IMPERSONATE_HEADER, UpstreamClient};
pub use generation::IMAGES_PATH;
pub use maintenance::is_cloudflare_challenge;
