//! Video to animated image conversion.
//!
//! - [`HostnameWhitelist`] decides which hosts sources may come from
//! - [`Fetch`] downloads a source into a scratch file
//! - [`ConversionExecutor`] runs fetch + transcode for one request

mod executor;
mod fetch;
mod whitelist;

pub use executor::{ConversionExecutor, Convert};
pub use fetch::{Fetch, HttpFetcher};
pub use whitelist::HostnameWhitelist;
