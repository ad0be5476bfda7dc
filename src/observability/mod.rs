//! Observability
//!
//! Structured logging for the client shell and its engine.

pub mod logging;

pub use logging::{init_default_logging, init_logging, LogFormat};

// Span macros for structured logging
pub use logging::{client_span, lifecycle_span};
