//! # gifforge-av
//!
//! Video to animated image transcoding for gifforge.
//!
//! This crate provides functionality for:
//! - Running external tools with captured output and a hard timeout
//! - Converting a video file into a looping, palette-optimised GIF with
//!   bounded output dimensions
//! - Detecting whether the required tools are installed
//!
//! ## Example
//!
//! ```no_run
//! use gifforge_av::{FfmpegTranscoder, Transcode, TranscodeOptions};
//! use std::path::Path;
//!
//! # async fn example() -> gifforge_av::Result<()> {
//! let transcoder = FfmpegTranscoder::discover(None)?;
//! let options = TranscodeOptions::new("mp4", "gif", 480);
//! transcoder
//!     .transcode(Path::new("/tmp/in.mp4"), Path::new("/tmp/out.gif"), &options)
//!     .await?;
//! # Ok(())
//! # }
//! ```

mod command;
mod error;
pub mod tools;
pub mod transcode;

// Re-exports
pub use command::{ToolCommand, ToolOutput};
pub use error::{Error, Result};
pub use tools::{check_tool, check_tools, require_tool, ToolInfo};
pub use transcode::{
    scale_filter, scaled_dimensions, FfmpegTranscoder, Transcode, TranscodeOptions,
};
