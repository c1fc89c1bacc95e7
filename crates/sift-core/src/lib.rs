//! # sift-core
//!
//! Shared vocabulary for the Sift real-time layer:
//!
//! - **Branded IDs**: `PrincipalId`, `WorkspaceId`, `ClientId` as newtypes
//! - **Identity**: [`identity::IdentityResolver`] for injecting the
//!   authenticated principal instead of falling back to placeholder users
//! - **Logging**: `tracing` subscriber bootstrap plus in-memory log capture
//!   for tests

#![deny(unsafe_code)]

pub mod identity;
pub mod ids;
pub mod logging;

pub use identity::{IdentityError, IdentityResolver, Principal, StaticIdentity};
pub use ids::{ClientId, PrincipalId, WorkspaceId};
