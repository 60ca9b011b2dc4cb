//! Core protocol types for rpcweave.
//!
//! This crate provides the vocabulary shared by every rpcweave client and by
//! services that forward calls on behalf of their own callers.
//!
//! ## Modules
//!
//! - [`error`]: Status codes, application exceptions and the status-code capability
//! - [`headers`]: Protocol header names, the reserved namespace and outgoing header sets

pub mod error;
pub mod headers;

pub use error::*;
pub use headers::{HeaderError, HeaderSet};
