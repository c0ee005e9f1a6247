//! Engines bundled with the binary.

pub mod http;

pub use http::{HttpEngine, PageAction};
