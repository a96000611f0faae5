//! Error Types
//!
//! This module defines the error types used throughout the crate.
//!
//! # Overview
//!
//! The main error type [`QuarryError`] covers all failure modes including:
//! - Invalid or inconsistent configuration
//! - Memory and descriptor exhaustion
//! - Lookups of removed or never-created resources
//! - Requests for behavior the core does not implement
//! - Unrecoverable failures reported by the graphics backend
//!
//! # Usage
//!
//! All public APIs return [`Result<T>`] which is an alias for
//! `std::result::Result<T, QuarryError>`. Allocators additionally use
//! `Option` internally while probing for free space; only the decision
//! "this request cannot be satisfied" becomes an error.

use thiserror::Error;

/// The main error type for the quarry resource management layer.
#[derive(Error, Debug)]
pub enum QuarryError {
    /// Out-of-range or inconsistent settings, such as a non-power-of-two
    /// alignment or a view kind the requested resource kind cannot carry.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// A heap could not be created at the requested size, or an allocation
    /// exceeded the configured expansion budget.
    #[error("Out of resources: {0}")]
    OutOfResources(String),

    /// An identifier references a removed or never-created resource.
    #[error("Not found: {0}")]
    NotFound(String),

    /// A request asks for behavior the core does not implement,
    /// e.g. category aliasing barriers or category UAV barriers.
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// The underlying graphics API reported an unrecoverable failure
    /// (device lost, fence wait failure, present failure).
    #[error("Fatal backend failure: {0}")]
    Fatal(String),
}

impl QuarryError {
    /// Shorthand used at the device boundary where any backend failure
    /// is terminal for the current operation.
    #[must_use]
    pub fn fatal(context: impl Into<String>) -> Self {
        QuarryError::Fatal(context.into())
    }
}

/// Alias for `Result<T, QuarryError>`.
pub type Result<T> = std::result::Result<T, QuarryError>;
