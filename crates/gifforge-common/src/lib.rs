//! Gifforge-Common: Shared conversion types and error kinds.
//!
//! This crate provides the vocabulary shared by the gifforge server and its
//! media tooling:
//!
//! - **Formats**: Input and output media formats with their HTTP content types
//! - **Conversion Requests**: The immutable value a token is bound to, with a
//!   deterministic canonical key used for cache lookups
//! - **Error Handling**: A tagged error enum carrying the wrapped cause
//!
//! # Examples
//!
//! ```
//! use gifforge_common::{ConversionRequest, InputFormat, OutputFormat};
//!
//! let request = ConversionRequest::new(
//!     "https://good.example/a.mp4",
//!     InputFormat::Mp4,
//!     OutputFormat::Gif,
//! );
//! assert_eq!(
//!     request.canonical_key(),
//!     r#"{"ifm":"mp4","ofm":"gif","url":"https://good.example/a.mp4"}"#,
//! );
//! ```

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::*;
