//! Cascade Core - Fundamental types shared by every pipeline stage
//!
//! This crate defines:
//! - Node identity (NodeId)
//! - Event timestamps (Timestamp)
//! - The notification record passed between stages
//! - The error type used across the workspace

pub mod id;
pub mod time;
pub mod notification;
pub mod error;

pub use id::*;
pub use time::*;
pub use notification::*;
pub use error::*;
