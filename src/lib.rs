//! Windows DLL export analysis and proxy source generation.
//!
//! A run loads a DLL without executing it, walks its export directory,
//! classifies every export as a function, forwarder or data, and renders a
//! C++ proxy (plus MASM stubs for x64) that re-exports the same identities
//! while delegating to the original library.

/// Export classification
pub mod classify;
/// Proxy source generation
pub mod codegen;
/// Configuration tree
pub mod config;
pub mod error;
/// Binary format parsers
pub mod formats;
/// Image loading
pub mod loader;
pub mod logging;
pub mod output;
/// Load, parse and classify in one scoped run
pub mod pipeline;

pub use classify::{ClassifyError, ExportEntry, ExportKind, ExportTable};
pub use codegen::{generate, GeneratedSource, GeneratorOptions, OriginLoadMode};
pub use config::ProxyConfig;
pub use error::{ProxyError, Result};
pub use formats::pe::Architecture;
pub use loader::{Image, LoadError};
pub use pipeline::{analyze, analyze_bytes, Analysis};
