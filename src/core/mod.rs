//! Purpose: Core building blocks for the HTTP-to-COPY bridge.
//! Exports: `bridge`, `error`, `query`, `quote`, `transfer`.
//! Role: Internal modules; binaries reach them through `crate::api`.
pub mod bridge;
pub mod error;
pub mod query;
pub mod quote;
pub mod transfer;
