//! HTTP handlers, grouped by surface.

pub mod batch;
pub mod images;
pub mod imagine;
pub mod imagine_ws;
pub mod tokens;
