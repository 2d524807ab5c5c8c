//! Purpose: Define the stable public Rust API boundary for pgpipe.
//! Exports: Error types, request specs, transfer operations, and the HTTP
//! client used by the relay path and the periodic puller.
//! Invariants: This module is the only public path binaries should need.

mod client;

#[doc(hidden)]
pub use crate::core::error::to_exit_code;
pub use crate::core::error::{Error, ErrorKind};
pub use crate::core::query::{CopyFormat, ExportSpec, FilterClause, ImportSpec, Predicate};
pub use crate::core::transfer::{ExportStream, build_pool, run_export, run_import, run_reload};
pub use client::{export_url, fetch_export, relay_url};
