//! HTTP uploader speaking to the intake over `reqwest`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pulse_core::time::SyncedTimeProvider;
use pulse_core::{Feature, UploadStatus};
use reqwest::header::{HeaderValue, CONTENT_TYPE, DATE, USER_AGENT};
use reqwest::Url;
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, warn};

use crate::errors::{Result, UploadError};
use crate::uploader::{DataUploader, UploadRequest};

pub const API_KEY_HEADER: &str = "PULSE-API-KEY";
pub const ORIGIN_HEADER: &str = "PULSE-EVP-ORIGIN";
pub const ORIGIN_VERSION_HEADER: &str = "PULSE-EVP-ORIGIN-VERSION";
pub const REQUEST_ID_HEADER: &str = "PULSE-REQUEST-ID";

#[derive(Clone, Debug)]
pub struct HttpUploaderConfig {
    /// Base URL of the intake, e.g. `https://browser-intake.example.com`.
    pub site: String,
    pub client_token: SecretString,
    pub source: String,
    pub sdk_version: String,
    pub request_timeout: Duration,
}

pub struct HttpUploader {
    client: reqwest::Client,
    site: Url,
    client_token: SecretString,
    source: String,
    sdk_version: String,
    user_agent: String,
    time_sync: Option<Arc<SyncedTimeProvider>>,
}

impl std::fmt::Debug for HttpUploader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpUploader")
            .field("site", &self.site.as_str())
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}

impl HttpUploader {
    pub fn new(config: HttpUploaderConfig) -> Result<Self> {
        let site = Url::parse(config.site.trim_end_matches('/'))
            .map_err(|e| UploadError::InvalidSite(format!("{}: {e}", config.site)))?;
        if site.cannot_be_a_base() {
            return Err(UploadError::InvalidSite(config.site));
        }
        HeaderValue::from_str(config.client_token.expose_secret())
            .map_err(|_| UploadError::InvalidHeader(API_KEY_HEADER))?;
        HeaderValue::from_str(&config.source)
            .map_err(|_| UploadError::InvalidHeader(ORIGIN_HEADER))?;

        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;

        let user_agent = format!(
            "pulse-sdk/{} ({} {})",
            config.sdk_version,
            std::env::consts::OS,
            std::env::consts::ARCH
        );

        Ok(Self {
            client,
            site,
            client_token: config.client_token,
            source: config.source,
            sdk_version: config.sdk_version,
            user_agent,
            time_sync: None,
        })
    }

    /// Feed the intake's `Date` header into `provider` after every response.
    pub fn with_time_sync(mut self, provider: Arc<SyncedTimeProvider>) -> Self {
        self.time_sync = Some(provider);
        self
    }

    pub fn endpoint(&self, feature: Feature) -> String {
        format!(
            "{}{}?ddsource={}",
            self.site.as_str().trim_end_matches('/'),
            feature.intake_path(),
            self.source
        )
    }

    fn observe_date(&self, headers: &reqwest::header::HeaderMap) {
        let Some(provider) = &self.time_sync else {
            return;
        };
        let Some(date) = headers.get(DATE).and_then(|v| v.to_str().ok()) else {
            return;
        };
        match DateTime::parse_from_rfc2822(date) {
            Ok(server) => {
                provider.observe_server_time(server.with_timezone(&Utc), Utc::now().timestamp_millis())
            }
            Err(e) => debug!(date, error = %e, "unparseable Date header"),
        }
    }
}

#[async_trait]
impl DataUploader for HttpUploader {
    async fn upload(&self, request: &UploadRequest) -> UploadStatus {
        let url = self.endpoint(request.feature);
        let request_id = uuid::Uuid::new_v4().to_string();
        let started = Instant::now();

        let result = self
            .client
            .post(&url)
            .header(API_KEY_HEADER, self.client_token.expose_secret())
            .header(ORIGIN_HEADER, &self.source)
            .header(ORIGIN_VERSION_HEADER, &self.sdk_version)
            .header(REQUEST_ID_HEADER, &request_id)
            .header(USER_AGENT, &self.user_agent)
            .header(CONTENT_TYPE, request.feature.payload_format().content_type())
            .body(request.body.clone())
            .send()
            .await;

        match result {
            Ok(response) => {
                self.observe_date(response.headers());
                let status = UploadStatus::from_status(response.status().as_u16());
                debug!(
                    feature = %request.feature,
                    batch_id = %request.batch_id,
                    request_id = %request_id,
                    http_status = response.status().as_u16(),
                    status = %status,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "upload response"
                );
                status
            }
            Err(e) => {
                warn!(
                    feature = %request.feature,
                    batch_id = %request.batch_id,
                    request_id = %request_id,
                    error = %e,
                    "upload request failed"
                );
                UploadStatus::NetworkError
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use axum::body::Bytes as BodyBytes;
    use axum::extract::State;
    use axum::http::{HeaderMap, StatusCode};
    use axum::response::IntoResponse;
    use axum::routing::post;
    use axum::Router;
    use parking_lot::Mutex;
    use pulse_core::{BatchId, TimeProvider};

    use super::*;

    #[derive(Clone, Default)]
    struct Intake {
        received: Arc<Mutex<Vec<(HeaderMap, Vec<u8>)>>>,
    }

    async fn accept(State(intake): State<Intake>, headers: HeaderMap, body: BodyBytes) -> impl IntoResponse {
        intake.received.lock().push((headers, body.to_vec()));
        let server_date = (Utc::now() + chrono::Duration::hours(1)).to_rfc2822();
        (StatusCode::ACCEPTED, [("date", server_date)])
    }

    async fn reject() -> StatusCode {
        StatusCode::SERVICE_UNAVAILABLE
    }

    async fn start_intake() -> (String, Intake) {
        let intake = Intake::default();
        let router = Router::new()
            .route("/api/v2/rum", post(accept))
            .route("/api/v2/logs", post(reject))
            .with_state(intake.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.ok();
        });
        (format!("http://{addr}"), intake)
    }

    fn config(site: &str) -> HttpUploaderConfig {
        HttpUploaderConfig {
            site: site.to_string(),
            client_token: SecretString::from("pub-token".to_string()),
            source: "rust".into(),
            sdk_version: "0.1.0".into(),
            request_timeout: Duration::from_secs(5),
        }
    }

    fn request(feature: Feature, body: &'static [u8]) -> UploadRequest {
        UploadRequest {
            feature,
            batch_id: BatchId::new("1700000000000"),
            item_count: 1,
            body: bytes::Bytes::from_static(body),
        }
    }

    #[tokio::test]
    async fn sends_headers_and_syncs_server_time() {
        let (site, intake) = start_intake().await;
        let time = Arc::new(SyncedTimeProvider::new());
        let uploader = HttpUploader::new(config(&site)).unwrap().with_time_sync(time.clone());

        let status = uploader.upload(&request(Feature::Rum, b"{\"a\":1}\n{\"b\":2}")).await;
        assert_eq!(status, UploadStatus::Success);

        let received = intake.received.lock();
        let (headers, body) = &received[0];
        assert_eq!(body.as_slice(), b"{\"a\":1}\n{\"b\":2}");
        assert_eq!(headers[API_KEY_HEADER], "pub-token");
        assert_eq!(headers[ORIGIN_HEADER], "rust");
        assert_eq!(headers[ORIGIN_VERSION_HEADER], "0.1.0");
        assert_eq!(headers["content-type"], "text/plain;charset=UTF-8");
        assert!(headers["user-agent"].to_str().unwrap().starts_with("pulse-sdk/0.1.0"));
        assert_eq!(headers[REQUEST_ID_HEADER].len(), 36);

        // The intake's clock runs an hour ahead; Date has second precision.
        let offset = time.server_offset_ms();
        assert!((3_598_000..=3_601_000).contains(&offset), "offset {offset}");
    }

    #[tokio::test]
    async fn server_errors_are_classified() {
        let (site, _intake) = start_intake().await;
        let uploader = HttpUploader::new(config(&site)).unwrap();
        let status = uploader.upload(&request(Feature::Logs, b"[]")).await;
        assert_eq!(status, UploadStatus::HttpServerError);
    }

    #[tokio::test]
    async fn transport_failure_is_network_error() {
        // Bind then drop to get a port nothing listens on.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let uploader = HttpUploader::new(config(&format!("http://{addr}"))).unwrap();
        let status = uploader.upload(&request(Feature::Rum, b"{}")).await;
        assert_eq!(status, UploadStatus::NetworkError);
    }

    #[test]
    fn endpoint_and_validation() {
        let uploader = HttpUploader::new(config("https://intake.example.com/")).unwrap();
        assert_eq!(
            uploader.endpoint(Feature::Traces),
            "https://intake.example.com/api/v2/spans?ddsource=rust"
        );

        assert!(matches!(
            HttpUploader::new(config("not a url")),
            Err(UploadError::InvalidSite(_))
        ));
        let mut bad = config("https://intake.example.com");
        bad.client_token = SecretString::from("line\nbreak".to_string());
        assert!(matches!(
            HttpUploader::new(bad),
            Err(UploadError::InvalidHeader(API_KEY_HEADER))
        ));
    }
}
