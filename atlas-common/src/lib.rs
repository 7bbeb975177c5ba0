//! Shared chain types for the atlas node: validators, blocks, votes,
//! evidence and the chain state snapshot.

pub mod auth;
pub mod crypto;
pub mod env;
pub mod error;

pub use error::{AtlasError, Result};
