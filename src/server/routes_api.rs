use crate::cache::{CacheStats, ConversionCache};
use crate::server::error::AppError;
use crate::server::{auth, AppContext};
use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use gifforge_common::{ConversionRequest, Error, InputFormat, OutputFormat};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::fs::File;
use tokio_util::io::ReaderStream;
use utoipa::{IntoParams, ToSchema};

pub fn api_routes(ctx: &AppContext) -> Router<AppContext> {
    let token_routes = Router::new().route("/token", get(issue_token));
    let token_routes = if ctx.config.server.auth.enabled {
        token_routes.route_layer(middleware::from_fn_with_state(
            ctx.clone(),
            auth::basic_auth_middleware,
        ))
    } else {
        token_routes
    };

    Router::new()
        .route("/health", get(health))
        .route("/convert", get(convert))
        // `/convert.{ext}`; static routes above take precedence.
        .route("/:file", get(convert_with_suffix))
        .merge(token_routes)
}

/// Query parameters of the token endpoint.
#[derive(Debug, Deserialize, IntoParams)]
pub struct TokenQuery {
    /// URL of the source video
    pub url: Option<String>,
    /// Input format (`mp4`)
    pub ifm: Option<String>,
    /// Output format (`gif`)
    pub ofm: Option<String>,
}

/// A newly issued conversion token.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TokenResponse {
    /// Conversion URL including the token
    pub url: String,
    /// The token
    pub token: String,
    /// Unix time in seconds at which the token expires
    pub expires: i64,
    /// The conversion the token is bound to
    pub key: ConversionRequest,
}

/// Query parameters of the conversion endpoints.
#[derive(Debug, Deserialize, IntoParams)]
pub struct ConvertQuery {
    /// Token from `/token`
    pub token: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    /// Stored tokens, including expired ones not yet purged
    pub tokens: usize,
    pub cache: CacheStats,
}

fn required(value: Option<String>, name: &str) -> Result<String, Error> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| Error::validation(format!("Missing query parameter: {}", name)))
}

/// Issue a token for converting a remote video.
#[utoipa::path(
    get,
    path = "/token",
    tag = "conversion",
    params(TokenQuery),
    responses(
        (status = 200, description = "Token issued", body = TokenResponse),
        (status = 400, description = "Invalid request or host not whitelisted"),
        (status = 401, description = "Missing or invalid credentials"),
        (status = 500, description = "Token could not be generated")
    ),
    security(("basic_auth" = []))
)]
pub async fn issue_token(
    State(ctx): State<AppContext>,
    Query(query): Query<TokenQuery>,
) -> Result<Json<TokenResponse>, AppError> {
    let url = required(query.url, "url")?;
    let ifm: InputFormat = required(query.ifm, "ifm")?
        .parse()
        .map_err(Error::validation)?;
    let ofm: OutputFormat = required(query.ofm, "ofm")?
        .parse()
        .map_err(Error::validation)?;

    let request = ConversionRequest::new(url, ifm, ofm);
    request.validate()?;
    ctx.whitelist.check(&request)?;

    let issued = ctx
        .tokens
        .issue(request.clone(), ctx.config.tokens.attempt_limit)?;

    tracing::info!(%request, expires = issued.expires, "Token issued");

    Ok(Json(TokenResponse {
        url: format!("{}/convert?token={}", ctx.config.server.base_url, issued.token),
        token: issued.token,
        expires: issued.expires,
        key: request,
    }))
}

/// Download the converted artifact for a token.
#[utoipa::path(
    get,
    path = "/convert",
    tag = "conversion",
    params(ConvertQuery),
    responses(
        (status = 200, description = "Converted artifact", content_type = "image/gif"),
        (status = 400, description = "Missing token"),
        (status = 404, description = "Unknown or expired token"),
        (status = 502, description = "Source could not be fetched"),
        (status = 500, description = "Conversion failed")
    )
)]
pub async fn convert(
    State(ctx): State<AppContext>,
    Query(query): Query<ConvertQuery>,
) -> Result<Response, AppError> {
    serve_conversion(&ctx, query.token, None).await
}

/// Like `/convert`, with a file extension that must match the output format.
#[utoipa::path(
    get,
    path = "/convert.{ext}",
    tag = "conversion",
    params(
        ("ext" = String, Path, description = "Extension of the output format"),
        ConvertQuery
    ),
    responses(
        (status = 200, description = "Converted artifact", content_type = "image/gif"),
        (status = 400, description = "Missing token or extension mismatch"),
        (status = 404, description = "Unknown or expired token")
    )
)]
pub async fn convert_with_suffix(
    State(ctx): State<AppContext>,
    Path(file): Path<String>,
    Query(query): Query<ConvertQuery>,
) -> Result<Response, AppError> {
    let Some(ext) = file.strip_prefix("convert.") else {
        return Ok(StatusCode::NOT_FOUND.into_response());
    };
    serve_conversion(&ctx, query.token, Some(ext)).await
}

async fn serve_conversion(
    ctx: &AppContext,
    token: Option<String>,
    suffix: Option<&str>,
) -> Result<Response, AppError> {
    let token = required(token, "token")?;
    let request = ctx.tokens.resolve(&token).ok_or(Error::InvalidToken)?;

    if let Some(ext) = suffix {
        if OutputFormat::from_extension(ext) != Some(request.ofm) {
            return Err(Error::validation(format!(
                "Extension .{} does not match output format {}",
                ext, request.ofm
            ))
            .into());
        }
    }

    let path = ctx.cache.get_verified(&request).await?;
    let file = open_artifact(&ctx.cache, &request, path).await?;

    let body = Body::from_stream(ReaderStream::new(file));
    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, request.ofm.content_type())],
        body,
    )
        .into_response())
}

/// Open the artifact at `path`, looking it up again if it was evicted or
/// replaced after the lookup.
async fn open_artifact(
    cache: &ConversionCache,
    request: &ConversionRequest,
    path: PathBuf,
) -> Result<File, Error> {
    match File::open(&path).await {
        Ok(file) => Ok(file),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "Artifact vanished before it was opened");
            let path = cache.get_verified(request).await?;
            File::open(&path)
                .await
                .map_err(|e| Error::internal(format!("Failed to open artifact: {}", e)))
        }
        Err(e) => Err(Error::internal(format!("Failed to open artifact: {}", e))),
    }
}

/// Service health and resource usage.
#[utoipa::path(
    get,
    path = "/health",
    tag = "health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse)
    )
)]
pub async fn health(State(ctx): State<AppContext>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        tokens: ctx.tokens.len(),
        cache: ctx.cache.stats(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheSettings;
    use crate::conversion::Convert;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::io::AsyncReadExt;

    struct WritingConverter {
        dir: PathBuf,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Convert for WritingConverter {
        async fn execute(&self, _request: &ConversionRequest) -> gifforge_common::Result<PathBuf> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            let path = self.dir.join(format!("artifact-{}.gif", n));
            tokio::fs::write(&path, format!("gif {}", n)).await.unwrap();
            Ok(path)
        }
    }

    fn setup() -> (tempfile::TempDir, Arc<WritingConverter>, ConversionCache) {
        let dir = tempfile::tempdir().unwrap();
        let converter = Arc::new(WritingConverter {
            dir: dir.path().to_path_buf(),
            calls: AtomicUsize::new(0),
        });
        let cache = ConversionCache::new(
            converter.clone(),
            CacheSettings {
                max_files: 4,
                max_bytes: 1_000_000,
                ttl: None,
                allow_stale: false,
                fallback_entry_bytes: 10,
            },
        );
        (dir, converter, cache)
    }

    fn request() -> ConversionRequest {
        ConversionRequest::new(
            "https://good.example/a.mp4",
            InputFormat::Mp4,
            OutputFormat::Gif,
        )
    }

    async fn read(mut file: File) -> String {
        let mut contents = String::new();
        file.read_to_string(&mut contents).await.unwrap();
        contents
    }

    #[tokio::test]
    async fn test_open_artifact_uses_looked_up_file() {
        let (_dir, converter, cache) = setup();
        let path = cache.get_verified(&request()).await.unwrap();

        let file = open_artifact(&cache, &request(), path).await.unwrap();
        assert_eq!(read(file).await, "gif 0");
        assert_eq!(converter.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_open_artifact_converts_again_when_file_vanished() {
        let (_dir, converter, cache) = setup();
        let path = cache.get_verified(&request()).await.unwrap();

        // Deleted after the lookup, as an eviction or stale refresh would.
        std::fs::remove_file(&path).unwrap();

        let file = open_artifact(&cache, &request(), path.clone()).await.unwrap();
        assert_eq!(read(file).await, "gif 1");
        assert_eq!(converter.calls.load(Ordering::SeqCst), 2);
        assert_eq!(cache.len(), 1);
        assert!(!path.exists());
    }
}
