//! Conversion executor.
//!
//! Runs one conversion end to end: whitelist check, download into a scratch
//! file, transcode into a second scratch file. Only the finished output
//! survives; the download is always removed and the output is removed on
//! failure.

use async_trait::async_trait;
use gifforge_av::{Transcode, TranscodeOptions};
use gifforge_common::{ConversionRequest, Error, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

use super::fetch::Fetch;
use super::whitelist::HostnameWhitelist;
use crate::scratch::ScratchDir;

/// Produces the artifact for a conversion request.
#[async_trait]
pub trait Convert: Send + Sync {
    /// Convert `request`, returning the path of a finished artifact owned by
    /// the caller.
    async fn execute(&self, request: &ConversionRequest) -> Result<PathBuf>;
}

/// Fetch + transcode pipeline for a single conversion request.
pub struct ConversionExecutor {
    whitelist: Arc<HostnameWhitelist>,
    fetcher: Arc<dyn Fetch>,
    transcoder: Arc<dyn Transcode>,
    scratch: ScratchDir,
    max_size: u32,
}

impl ConversionExecutor {
    /// Create a new conversion executor.
    ///
    /// `max_size` bounds both output dimensions in pixels.
    pub fn new(
        whitelist: Arc<HostnameWhitelist>,
        fetcher: Arc<dyn Fetch>,
        transcoder: Arc<dyn Transcode>,
        scratch: ScratchDir,
        max_size: u32,
    ) -> Self {
        Self {
            whitelist,
            fetcher,
            transcoder,
            scratch,
            max_size,
        }
    }

    fn transcode_options(&self, request: &ConversionRequest) -> TranscodeOptions {
        TranscodeOptions::new(
            request.ifm.ffmpeg_format(),
            request.ofm.ffmpeg_format(),
            self.max_size,
        )
        .with_loop(request.ofm.supports_looping())
    }
}

#[async_trait]
impl Convert for ConversionExecutor {
    async fn execute(&self, request: &ConversionRequest) -> Result<PathBuf> {
        let url = request.source_url()?;
        let host = url.host_str().unwrap_or_default();
        if !self.whitelist.is_whitelisted(host) {
            return Err(Error::hostname_not_allowed(host));
        }

        let started = Instant::now();
        let source = self.scratch.allocate(&format!(".{}", request.ifm.as_str()))?;
        let output = self.scratch.allocate(&format!(".{}", request.ofm.extension()))?;

        let bytes = self
            .fetcher
            .fetch(&url, request.ifm.content_type(), source.path())
            .await?;
        debug!(%url, bytes, "Source fetched, transcoding");

        let options = self.transcode_options(request);
        self.transcoder
            .transcode(source.path(), output.path(), &options)
            .await
            .map_err(|e| {
                Error::transcode_with(
                    format!("{} to {} conversion of {} failed", request.ifm, request.ofm, url),
                    e,
                )
            })?;

        drop(source);
        let artifact = output.keep();

        info!(
            %url,
            artifact = %artifact.display(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Conversion complete"
        );
        Ok(artifact)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gifforge_common::{InputFormat, OutputFormat};
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use url::Url;

    #[derive(Default)]
    struct FakeFetcher {
        calls: AtomicUsize,
        fail: bool,
        accepts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Fetch for FakeFetcher {
        async fn fetch(&self, _url: &Url, accept: &str, dest: &Path) -> Result<u64> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.accepts.lock().unwrap().push(accept.to_string());
            if self.fail {
                return Err(Error::fetch("unexpected status 404"));
            }
            std::fs::write(dest, b"video").unwrap();
            Ok(5)
        }
    }

    #[derive(Default)]
    struct FakeTranscoder {
        fail: bool,
        options: Mutex<Option<TranscodeOptions>>,
    }

    #[async_trait]
    impl Transcode for FakeTranscoder {
        async fn transcode(
            &self,
            input: &Path,
            output: &Path,
            options: &TranscodeOptions,
        ) -> gifforge_av::Result<()> {
            *self.options.lock().unwrap() = Some(options.clone());
            if self.fail {
                return Err(gifforge_av::Error::tool_failed("ffmpeg", "invalid data"));
            }
            std::fs::copy(input, output)?;
            Ok(())
        }
    }

    struct Fixture {
        dir: tempfile::TempDir,
        fetcher: Arc<FakeFetcher>,
        transcoder: Arc<FakeTranscoder>,
        executor: ConversionExecutor,
    }

    fn fixture(fetcher: FakeFetcher, transcoder: FakeTranscoder) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(fetcher);
        let transcoder = Arc::new(transcoder);
        let executor = ConversionExecutor::new(
            Arc::new(HostnameWhitelist::new(["good.example"])),
            fetcher.clone(),
            transcoder.clone(),
            ScratchDir::create(dir.path()).unwrap(),
            480,
        );
        Fixture {
            dir,
            fetcher,
            transcoder,
            executor,
        }
    }

    fn files_in(dir: &Path) -> Vec<PathBuf> {
        std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect()
    }

    fn request(url: &str) -> ConversionRequest {
        ConversionRequest::new(url, InputFormat::Mp4, OutputFormat::Gif)
    }

    #[tokio::test]
    async fn test_success_keeps_only_output() {
        let f = fixture(FakeFetcher::default(), FakeTranscoder::default());

        let artifact = f
            .executor
            .execute(&request("https://good.example/a.mp4"))
            .await
            .unwrap();

        assert_eq!(std::fs::read(&artifact).unwrap(), b"video");
        assert_eq!(artifact.extension().unwrap(), "gif");
        assert_eq!(files_in(f.dir.path()), vec![artifact]);
        assert_eq!(f.fetcher.accepts.lock().unwrap().as_slice(), ["video/mp4"]);

        let options = f.transcoder.options.lock().unwrap().clone().unwrap();
        assert_eq!(options.max_size, 480);
        assert!(options.loop_forever);
        assert_eq!(options.input_format, "mp4");
        assert_eq!(options.output_format, "gif");
    }

    #[tokio::test]
    async fn test_non_whitelisted_host_is_not_fetched() {
        let f = fixture(FakeFetcher::default(), FakeTranscoder::default());

        let err = f
            .executor
            .execute(&request("https://evil.example/a.mp4"))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::HostnameNotAllowed { .. }));
        assert_eq!(f.fetcher.calls.load(Ordering::SeqCst), 0);
        assert!(files_in(f.dir.path()).is_empty());
    }

    #[tokio::test]
    async fn test_invalid_url_rejected() {
        let f = fixture(FakeFetcher::default(), FakeTranscoder::default());
        let err = f.executor.execute(&request("not a url")).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert_eq!(f.fetcher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_fetch_failure_leaves_no_files() {
        let f = fixture(
            FakeFetcher {
                fail: true,
                ..Default::default()
            },
            FakeTranscoder::default(),
        );

        let err = f
            .executor
            .execute(&request("https://good.example/a.mp4"))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::FetchFailed { .. }));
        assert!(f.transcoder.options.lock().unwrap().is_none());
        assert!(files_in(f.dir.path()).is_empty());
    }

    #[tokio::test]
    async fn test_transcode_failure_wraps_source() {
        use std::error::Error as _;

        let f = fixture(
            FakeFetcher::default(),
            FakeTranscoder {
                fail: true,
                ..Default::default()
            },
        );

        let err = f
            .executor
            .execute(&request("https://good.example/a.mp4"))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::TranscodeFailed { .. }));
        assert!(err.source().unwrap().to_string().contains("invalid data"));
        assert!(files_in(f.dir.path()).is_empty());
    }
}
