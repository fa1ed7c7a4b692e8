//! Interpolation Engine
//!
//! Resolves `{name}` placeholders in strings and nested configuration
//! documents against a layered [`Context`].
//!
//! # Layers
//!
//! A resolution context is built per call from, in order:
//!
//! 1. the base layer (scalar entries of a job's `collect` block),
//! 2. a caller-supplied runtime layer (e.g. an item id and its fields),
//! 3. a derived layer of upper-cased keys and values computed after the merge.
//!
//! # Modes
//!
//! - [`Mode::Strict`]: every placeholder must resolve, otherwise
//!   [`ResolutionError::MissingVariable`] names the first missing key.
//! - [`Mode::Lenient`]: unknown placeholders are left verbatim as `{key}`.
//!
//! # Example
//!
//! ```
//! use homespool::interpolate::{Context, Mode};
//!
//! let ctx = Context::new([("node", "hl2")]);
//! let url = ctx
//!     .resolve_str("/api2/json/nodes/{node}/status", None, Mode::Strict)
//!     .unwrap();
//! assert_eq!(url, "/api2/json/nodes/hl2/status");
//! ```

mod context;
mod document;

pub use context::{Context, Mode, ResolutionError, Vars};
pub use document::Document;
