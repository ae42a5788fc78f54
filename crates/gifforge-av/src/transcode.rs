//! Video to animated image transcoding.
//!
//! The output is bounded to a square of `max_size` pixels: the larger side is
//! clamped to `max_size`, the smaller side follows the aspect ratio and is
//! truncated to an even number of pixels. A reduced palette is generated per
//! clip and applied with ordered dithering.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;

use crate::command::ToolCommand;
use crate::tools::require_tool;
use crate::{Error, Result};

/// Default palette size for GIF output.
const DEFAULT_PALETTE_COLORS: u32 = 32;

/// Default maximum ffmpeg run time: 2 minutes.
const DEFAULT_TRANSCODE_TIMEOUT: Duration = Duration::from_secs(120);

/// Options for a single transcode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscodeOptions {
    /// ffmpeg demuxer name of the input (e.g. `mp4`).
    pub input_format: String,
    /// ffmpeg muxer name of the output (e.g. `gif`).
    pub output_format: String,
    /// Maximum width and height of the output in pixels.
    pub max_size: u32,
    /// Loop the output forever.
    pub loop_forever: bool,
    /// Number of palette colours.
    pub palette_colors: u32,
}

impl TranscodeOptions {
    /// Create options with looping enabled and the default palette size.
    pub fn new(input_format: impl Into<String>, output_format: impl Into<String>, max_size: u32) -> Self {
        Self {
            input_format: input_format.into(),
            output_format: output_format.into(),
            max_size,
            loop_forever: true,
            palette_colors: DEFAULT_PALETTE_COLORS,
        }
    }

    /// Enable or disable infinite looping.
    pub fn with_loop(mut self, loop_forever: bool) -> Self {
        self.loop_forever = loop_forever;
        self
    }
}

/// Converts a source file into an output file.
#[async_trait]
pub trait Transcode: Send + Sync {
    /// Read `input`, write the converted result to `output`.
    async fn transcode(&self, input: &Path, output: &Path, options: &TranscodeOptions) -> Result<()>;
}

/// Output dimensions for a square pixel source of `width` x `height`.
///
/// Mirrors the arithmetic of [`scale_filter`]. Returns `None` for empty
/// inputs.
pub fn scaled_dimensions(width: u32, height: u32, max_size: u32) -> Option<(u32, u32)> {
    if width == 0 || height == 0 || max_size == 0 {
        return None;
    }

    let (w, h, s) = (width as u64, height as u64, max_size as u64);
    let (out_w, out_h) = if w > h {
        let out_w = w.min(s);
        (out_w, 2 * (h * out_w / w / 2))
    } else {
        let out_h = h.min(s);
        (2 * (w * out_h / h / 2), out_h)
    };

    Some((out_w as u32, out_h as u32))
}

/// ffmpeg `scale` filter bounding both axes to `max_size`.
///
/// Landscape sources clamp the width, portrait and square sources clamp the
/// height; the derived side is rounded down to an even value.
pub fn scale_filter(max_size: u32) -> String {
    let s = max_size;
    format!(
        "scale=w='if(gt(dar,{s}/{s}),min({s},iw*sar),2*trunc(iw*sar*oh/ih/2))':\
         h='if(gt(dar,{s}/{s}),2*trunc(ih*ow/iw/sar/2),min({s},ih))'"
    )
}

/// Full filter graph: scale, then palette generation and application.
fn gif_filter_graph(options: &TranscodeOptions) -> String {
    format!(
        "{},split[s0][s1];[s0]palettegen=max_colors={}[p];[s1][p]paletteuse=dither=bayer",
        scale_filter(options.max_size),
        options.palette_colors
    )
}

/// [`Transcode`] implementation backed by the ffmpeg CLI.
#[derive(Debug, Clone)]
pub struct FfmpegTranscoder {
    ffmpeg: PathBuf,
    timeout: Duration,
}

impl FfmpegTranscoder {
    /// Use the ffmpeg binary at `ffmpeg`.
    pub fn new(ffmpeg: PathBuf) -> Self {
        Self {
            ffmpeg,
            timeout: DEFAULT_TRANSCODE_TIMEOUT,
        }
    }

    /// Locate ffmpeg from a configured path or `PATH`.
    pub fn discover(configured: Option<&Path>) -> Result<Self> {
        let ffmpeg = require_tool("ffmpeg", configured)?;
        tracing::debug!(path = %ffmpeg.display(), "Using ffmpeg");
        Ok(Self::new(ffmpeg))
    }

    /// Set the maximum run time of one transcode.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Build the ffmpeg argument list for one transcode.
    pub fn build_args(&self, input: &Path, output: &Path, options: &TranscodeOptions) -> Vec<String> {
        let mut args = vec![
            "-hide_banner".to_string(),
            "-loglevel".to_string(),
            "error".to_string(),
            "-y".to_string(),
            "-f".to_string(),
            options.input_format.clone(),
            "-i".to_string(),
            input.to_string_lossy().to_string(),
            "-vf".to_string(),
            gif_filter_graph(options),
        ];

        // 0 loops forever, -1 plays once
        let loop_count = if options.loop_forever { "0" } else { "-1" };
        args.extend(["-loop".to_string(), loop_count.to_string()]);

        args.extend([
            "-f".to_string(),
            options.output_format.clone(),
            output.to_string_lossy().to_string(),
        ]);

        args
    }
}

#[async_trait]
impl Transcode for FfmpegTranscoder {
    async fn transcode(&self, input: &Path, output: &Path, options: &TranscodeOptions) -> Result<()> {
        if options.max_size == 0 {
            return Err(Error::InvalidInput("maximum output size must be positive".to_string()));
        }

        let args = self.build_args(input, output, options);
        ToolCommand::new(self.ffmpeg.clone())
            .args(args)
            .timeout(self.timeout)
            .execute()
            .await?;

        tracing::debug!(
            input = %input.display(),
            output = %output.display(),
            max_size = options.max_size,
            "Transcode finished"
        );
        Ok(())
    }
}
