//! Conversion request and media format definitions.
//!
//! All enums are serialized in lowercase, matching the query string values
//! accepted by the token endpoint.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use url::Url;
use utoipa::ToSchema;

use crate::{Error, Result};

/// Format of the remote source resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum InputFormat {
    /// MPEG-4 video.
    Mp4,
}

impl InputFormat {
    /// Lowercase identifier used in queries and canonical keys.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mp4 => "mp4",
        }
    }

    /// Value for the `Accept` header when downloading the source.
    pub fn content_type(&self) -> &'static str {
        match self {
            Self::Mp4 => "video/mp4",
        }
    }

    /// Demuxer name passed to ffmpeg with `-f`.
    pub fn ffmpeg_format(&self) -> &'static str {
        match self {
            Self::Mp4 => "mp4",
        }
    }
}

impl fmt::Display for InputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for InputFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mp4" => Ok(Self::Mp4),
            _ => Err(format!("Unknown input format: {}", s)),
        }
    }
}

/// Format of the converted artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Animated GIF.
    Gif,
}

impl OutputFormat {
    /// Lowercase identifier used in queries and canonical keys.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gif => "gif",
        }
    }

    /// `Content-Type` of the served artifact.
    pub fn content_type(&self) -> &'static str {
        match self {
            Self::Gif => "image/gif",
        }
    }

    /// File extension, also accepted as the `/convert.{ext}` suffix.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Gif => "gif",
        }
    }

    /// Muxer name passed to ffmpeg with `-f`.
    pub fn ffmpeg_format(&self) -> &'static str {
        match self {
            Self::Gif => "gif",
        }
    }

    /// Whether the format can loop forever.
    pub fn supports_looping(&self) -> bool {
        match self {
            Self::Gif => true,
        }
    }

    /// Look up an output format by its file extension.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "gif" => Some(Self::Gif),
            _ => None,
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "gif" => Ok(Self::Gif),
            _ => Err(format!("Unknown output format: {}", s)),
        }
    }
}

/// A request to convert one remote resource into one output format.
///
/// This is the value a token is bound to and the identity of a cached
/// artifact. Field names match the query parameters of the token endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub struct ConversionRequest {
    /// URL from which the source video is fetched.
    pub url: String,
    /// Format of the source video.
    pub ifm: InputFormat,
    /// Format of the converted artifact.
    pub ofm: OutputFormat,
}

impl ConversionRequest {
    /// Create a new conversion request.
    pub fn new(url: impl Into<String>, ifm: InputFormat, ofm: OutputFormat) -> Self {
        Self {
            url: url.into(),
            ifm,
            ofm,
        }
    }

    /// Deterministic cache key for this request.
    ///
    /// A JSON object with keys in sorted order, so two equal requests always
    /// produce byte-identical keys.
    pub fn canonical_key(&self) -> String {
        let fields: BTreeMap<&str, &str> = [
            ("url", self.url.as_str()),
            ("ifm", self.ifm.as_str()),
            ("ofm", self.ofm.as_str()),
        ]
        .into_iter()
        .collect();

        // Serializing a map of strings cannot fail.
        serde_json::to_string(&fields).unwrap_or_default()
    }

    /// Parse the source URL, requiring an http(s) scheme and a host.
    pub fn source_url(&self) -> Result<Url> {
        let url = Url::parse(&self.url)
            .map_err(|e| Error::validation(format!("Invalid source URL {:?}: {}", self.url, e)))?;

        match url.scheme() {
            "http" | "https" => {}
            other => {
                return Err(Error::validation(format!(
                    "Unsupported source URL scheme: {}",
                    other
                )))
            }
        }

        if url.host_str().is_none() {
            return Err(Error::validation("Source URL has no host"));
        }

        Ok(url)
    }

    /// Hostname of the source URL.
    pub fn hostname(&self) -> Result<String> {
        let url = self.source_url()?;
        Ok(url.host_str().unwrap_or_default().to_string())
    }

    /// Check the request is internally consistent.
    ///
    /// Rejects an unparsable URL and identical input and output formats.
    pub fn validate(&self) -> Result<()> {
        self.source_url()?;
        if self.ifm.as_str() == self.ofm.as_str() {
            return Err(Error::validation(
                "The input and output format cannot be identical",
            ));
        }
        Ok(())
    }
}

impl fmt::Display for ConversionRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} -> {})", self.url, self.ifm, self.ofm)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ConversionRequest {
        ConversionRequest::new("https://good.example/a.mp4", InputFormat::Mp4, OutputFormat::Gif)
    }

    #[test]
    fn test_canonical_key_is_sorted() {
        assert_eq!(
            sample().canonical_key(),
            r#"{"ifm":"mp4","ofm":"gif","url":"https://good.example/a.mp4"}"#
        );
    }

    #[test]
    fn test_canonical_key_ignores_field_order() {
        let a: ConversionRequest = serde_json::from_str(
            r#"{"url":"https://good.example/a.mp4","ifm":"mp4","ofm":"gif"}"#,
        )
        .unwrap();
        let b: ConversionRequest = serde_json::from_str(
            r#"{"ofm":"gif","ifm":"mp4","url":"https://good.example/a.mp4"}"#,
        )
        .unwrap();
        assert_eq!(a.canonical_key(), b.canonical_key());
        assert_eq!(a.canonical_key(), sample().canonical_key());
    }

    #[test]
    fn test_canonical_key_escapes_url() {
        let request = ConversionRequest::new(
            "https://good.example/a\"b.mp4",
            InputFormat::Mp4,
            OutputFormat::Gif,
        );
        let key = request.canonical_key();
        let parsed: BTreeMap<String, String> = serde_json::from_str(&key).unwrap();
        assert_eq!(parsed["url"], "https://good.example/a\"b.mp4");
    }

    #[test]
    fn test_distinct_urls_have_distinct_keys() {
        let other =
            ConversionRequest::new("https://good.example/b.mp4", InputFormat::Mp4, OutputFormat::Gif);
        assert_ne!(sample().canonical_key(), other.canonical_key());
    }

    #[test]
    fn test_hostname() {
        assert_eq!(sample().hostname().unwrap(), "good.example");
    }

    #[test]
    fn test_source_url_rejects_bad_scheme() {
        let request =
            ConversionRequest::new("ftp://good.example/a.mp4", InputFormat::Mp4, OutputFormat::Gif);
        assert!(matches!(request.source_url(), Err(Error::Validation(_))));

        let request = ConversionRequest::new("not a url", InputFormat::Mp4, OutputFormat::Gif);
        assert!(matches!(request.validate(), Err(Error::Validation(_))));
    }

    #[test]
    fn test_format_parsing() {
        assert_eq!("MP4".parse::<InputFormat>().unwrap(), InputFormat::Mp4);
        assert_eq!("gif".parse::<OutputFormat>().unwrap(), OutputFormat::Gif);
        assert!("webm".parse::<InputFormat>().is_err());
        assert_eq!(OutputFormat::from_extension("GIF"), Some(OutputFormat::Gif));
        assert_eq!(OutputFormat::from_extension("png"), None);
    }

    #[test]
    fn test_format_metadata() {
        assert_eq!(InputFormat::Mp4.content_type(), "video/mp4");
        assert_eq!(OutputFormat::Gif.content_type(), "image/gif");
        assert!(OutputFormat::Gif.supports_looping());
    }

    #[test]
    fn test_serde_lowercase() {
        let json = serde_json::to_string(&sample()).unwrap();
        assert_eq!(
            json,
            r#"{"url":"https://good.example/a.mp4","ifm":"mp4","ofm":"gif"}"#
        );
    }
}
