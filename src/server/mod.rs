//! Client transport.

pub mod ws;

pub use ws::{AppState, router, serve};
