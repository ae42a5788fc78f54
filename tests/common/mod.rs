//! Shared test harness for integration tests.
//!
//! Provides [`TestHarness`] which serves source videos from a wiremock
//! server, stores scratch files in a temporary directory and builds a full
//! [`AppContext`] around the real HTTP fetcher and a copying transcoder.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::{Body, Bytes};
use axum::http::{header, Request, Response};
use axum::Router;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use gifforge::config::Config;
use gifforge::conversion::HttpFetcher;
use gifforge::server::{create_router, AppContext};
use gifforge_av::{Transcode, TranscodeOptions};
use http_body_util::BodyExt;
use tempfile::TempDir;
use tower::ServiceExt;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Transcoder that copies its input, counting invocations.
#[derive(Default)]
pub struct CopyTranscoder {
    calls: AtomicUsize,
    discard_output: AtomicBool,
}

impl CopyTranscoder {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Report success but leave no output file behind.
    pub fn discard_output(&self, discard: bool) {
        self.discard_output.store(discard, Ordering::SeqCst);
    }
}

#[async_trait]
impl Transcode for CopyTranscoder {
    async fn transcode(
        &self,
        input: &Path,
        output: &Path,
        _options: &TranscodeOptions,
    ) -> gifforge_av::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.discard_output.load(Ordering::SeqCst) {
            // The scratch output is pre-created; remove it.
            let _ = tokio::fs::remove_file(output).await;
            return Ok(());
        }
        tokio::fs::copy(input, output).await?;
        Ok(())
    }
}

pub struct TestHarness {
    pub ctx: AppContext,
    pub upstream: MockServer,
    pub transcoder: Arc<CopyTranscoder>,
    pub scratch: TempDir,
}

impl TestHarness {
    /// Create a harness with default configuration.
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Create a harness, letting the caller adjust the configuration.
    ///
    /// The upstream host is whitelisted and the scratch directory points at
    /// a fresh temporary directory before `customize` runs.
    pub async fn with_config(customize: impl FnOnce(&mut Config)) -> Self {
        let upstream = MockServer::start().await;
        let scratch = tempfile::tempdir().expect("failed to create scratch dir");

        let mut config = Config::default();
        config.sources.hostname_whitelist = vec!["127.0.0.1".to_string()];
        config.cache.scratch_dir = Some(scratch.path().to_path_buf());
        config.server.base_url = "https://gif.example".to_string();
        customize(&mut config);

        let transcoder = Arc::new(CopyTranscoder::default());
        let fetcher = HttpFetcher::new(Duration::from_secs(5)).expect("failed to build fetcher");
        let ctx = AppContext::with_collaborators(config, Arc::new(fetcher), transcoder.clone())
            .expect("failed to build context");

        Self {
            ctx,
            upstream,
            transcoder,
            scratch,
        }
    }

    pub fn router(&self) -> Router {
        create_router(self.ctx.clone())
    }

    /// URL of `path` on the upstream server.
    pub fn video_url(&self, path: &str) -> String {
        format!("{}{}", self.upstream.uri(), path)
    }

    /// Serve `body` at `route` on the upstream server.
    pub async fn mount_video(&self, route: &str, body: &[u8]) {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "video/mp4")
                    .set_body_bytes(body.to_vec()),
            )
            .mount(&self.upstream)
            .await;
    }

    /// Number of requests the upstream server received.
    pub async fn upstream_requests(&self) -> usize {
        self.upstream
            .received_requests()
            .await
            .map(|r| r.len())
            .unwrap_or(0)
    }

    /// Files currently in the scratch directory.
    pub fn scratch_files(&self) -> Vec<PathBuf> {
        std::fs::read_dir(self.scratch.path())
            .expect("failed to read scratch dir")
            .map(|e| e.expect("bad dir entry").path())
            .collect()
    }

    pub async fn get(&self, uri: &str) -> Response<Body> {
        self.router()
            .oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    pub async fn get_with_auth(&self, uri: &str, username: &str, password: &str) -> Response<Body> {
        self.router()
            .oneshot(
                Request::get(uri)
                    .header(header::AUTHORIZATION, basic_auth(username, password))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap()
    }

    /// Issue a token for `url` and return it.
    pub async fn issue_token(&self, url: &str) -> String {
        let response = self.get(&token_uri(url)).await;
        assert_eq!(response.status(), 200, "token request failed");
        let json = body_json(response.into_body()).await;
        json["token"].as_str().expect("token missing").to_string()
    }
}

/// `/token` URI for converting `url` from mp4 to gif.
pub fn token_uri(url: &str) -> String {
    format!("/token?url={}&ifm=mp4&ofm=gif", urlencode(url))
}

fn urlencode(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

pub fn basic_auth(username: &str, password: &str) -> String {
    format!("Basic {}", STANDARD.encode(format!("{}:{}", username, password)))
}

/// Helper to get response body as bytes
pub async fn body_bytes(body: Body) -> Bytes {
    body.collect().await.unwrap().to_bytes()
}

/// Helper to get response body as JSON
pub async fn body_json(body: Body) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(body).await).expect("response is not JSON")
}
