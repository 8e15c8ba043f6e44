/// S3-compatible object store backend (AWS S3, Aliyun OSS, MinIO).
///
/// Requests are signed with AWS Signature V4 and sent with a blocking
/// `reqwest` client. Transient failures are retried with backoff.
use std::io::Write;
use std::path::Path;
use std::time::Duration;

use reqwest::Method;
use reqwest::Url;
use reqwest::blocking::{Client, Response};
use reqwest::header::{AUTHORIZATION, HeaderMap, LAST_MODIFIED};
use tempfile::TempPath;
use time::macros::format_description;
use time::{OffsetDateTime, PrimitiveDateTime};
use tracing::{debug, info};

use super::retry::{DEFAULT_DELAYS, retry_with_backoff};
use super::sigv4::{
    self, CanonicalRequest, Credentials, EMPTY_PAYLOAD_SHA256, amz_date, encode_key, hex_sha256,
};
use super::{ObjectStore, RemoteError, RemoteResult};
use crate::fingerprint::Fingerprint;

/// User metadata header carrying the fingerprint of the uploaded bytes.
pub(crate) const FINGERPRINT_HEADER: &str = "x-amz-meta-notesync-fingerprint";

const DEFAULT_REGION: &str = "us-east-1";
const DEFAULT_KEY: &str = "notes.db";

/// Builder for constructing [`S3ObjectStore`] instances.
///
/// # Examples
///
/// ```
/// use notesync::remote::S3ObjectStoreBuilder;
///
/// let store = S3ObjectStoreBuilder::new()
///     .endpoint("https://oss-cn-hangzhou.aliyuncs.com")
///     .bucket("my-notes")
///     .credentials("AKID", "SECRET")
///     .build()
///     .expect("valid configuration");
///
/// assert_eq!(
///     store.object_url().as_str(),
///     "https://my-notes.oss-cn-hangzhou.aliyuncs.com/notes.db"
/// );
/// ```
#[derive(Debug, Default)]
pub struct S3ObjectStoreBuilder {
    endpoint: Option<String>,
    bucket: Option<String>,
    key: Option<String>,
    region: Option<String>,
    credentials: Option<Credentials>,
    path_style: bool,
    retry_delays: Option<Vec<Duration>>,
    timeout: Option<Duration>,
}

impl S3ObjectStoreBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Service endpoint, e.g. `https://s3.eu-west-1.amazonaws.com`.
    ///
    /// A bare host name is treated as `https://<host>`.
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn bucket(mut self, bucket: impl Into<String>) -> Self {
        self.bucket = Some(bucket.into());
        self
    }

    /// Object key of the store file. Defaults to `notes.db`.
    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Signing region. Defaults to `us-east-1`.
    pub fn region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    pub fn credentials(
        mut self,
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
    ) -> Self {
        self.credentials = Some(Credentials {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
        });
        self
    }

    /// Addresses the bucket as the first path segment instead of a
    /// subdomain (MinIO and most self-hosted deployments).
    pub fn path_style(mut self, path_style: bool) -> Self {
        self.path_style = path_style;
        self
    }

    /// Pauses between retries of transient failures; empty disables retries.
    pub fn retry_delays(mut self, delays: Vec<Duration>) -> Self {
        self.retry_delays = Some(delays);
        self
    }

    /// Overall per-request timeout. Defaults to five minutes.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Builds the store, validating endpoint, bucket and credentials.
    pub fn build(self) -> RemoteResult<S3ObjectStore> {
        let endpoint = self
            .endpoint
            .ok_or_else(|| RemoteError::InvalidConfig("endpoint is required".to_string()))?;
        let bucket = self
            .bucket
            .filter(|b| !b.is_empty())
            .ok_or_else(|| RemoteError::InvalidConfig("bucket is required".to_string()))?;
        let credentials = self
            .credentials
            .ok_or_else(|| RemoteError::InvalidConfig("credentials are required".to_string()))?;
        let key = self.key.unwrap_or_else(|| DEFAULT_KEY.to_string());
        let region = self.region.unwrap_or_else(|| DEFAULT_REGION.to_string());

        let endpoint = if endpoint.contains("://") {
            endpoint
        } else {
            format!("https://{}", endpoint)
        };
        let base = Url::parse(&endpoint)
            .map_err(|e| RemoteError::InvalidConfig(format!("{}: {}", endpoint, e)))?;
        let endpoint_host = base
            .host_str()
            .ok_or_else(|| RemoteError::InvalidConfig(format!("{}: missing host", endpoint)))?;

        let host = if self.path_style {
            endpoint_host.to_string()
        } else {
            format!("{}.{}", bucket, endpoint_host)
        };
        let host = match base.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host,
        };
        let path = if self.path_style {
            format!("/{}/{}", sigv4::uri_encode(&bucket), encode_key(&key))
        } else {
            format!("/{}", encode_key(&key))
        };
        let url = Url::parse(&format!("{}://{}{}", base.scheme(), host, path))
            .map_err(|e| RemoteError::InvalidConfig(format!("{}: {}", endpoint, e)))?;

        let client = Client::builder()
            .timeout(self.timeout.unwrap_or(Duration::from_secs(300)))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(RemoteError::Unavailable)?;

        Ok(S3ObjectStore {
            client,
            url,
            host,
            path,
            key,
            region,
            credentials,
            retry_delays: self.retry_delays.unwrap_or_else(|| DEFAULT_DELAYS.to_vec()),
        })
    }
}

/// The store file kept as one object in an S3-compatible bucket.
///
/// Uploads record the fingerprint of the uploaded bytes as user metadata so
/// that later comparisons only need a HEAD request.
pub struct S3ObjectStore {
    client: Client,
    url: Url,
    host: String,
    path: String,
    key: String,
    region: String,
    credentials: Credentials,
    retry_delays: Vec<Duration>,
}

impl S3ObjectStore {
    /// Full URL of the object.
    pub fn object_url(&self) -> &Url {
        &self.url
    }

    /// Sends one signed request, retrying transient failures, and maps
    /// non-success statuses to errors.
    fn send(
        &self,
        method: Method,
        extra_headers: &[(&str, String)],
        body: Option<&[u8]>,
    ) -> RemoteResult<Response> {
        let payload_sha256 = body
            .map(hex_sha256)
            .unwrap_or_else(|| EMPTY_PAYLOAD_SHA256.to_string());

        retry_with_backoff(&self.retry_delays, || {
            let now = OffsetDateTime::now_utc();
            let mut headers = vec![
                ("host".to_string(), self.host.clone()),
                ("x-amz-content-sha256".to_string(), payload_sha256.clone()),
                ("x-amz-date".to_string(), amz_date(now)),
            ];
            headers.extend(
                extra_headers
                    .iter()
                    .map(|(name, value)| (name.to_ascii_lowercase(), value.clone())),
            );

            let request = CanonicalRequest {
                method: method.as_str(),
                path: &self.path,
                headers,
                payload_sha256: &payload_sha256,
            };
            let authorization =
                sigv4::authorization(&self.credentials, &self.region, &request, now);

            let mut builder = self
                .client
                .request(method.clone(), self.url.clone())
                .header(AUTHORIZATION, authorization);
            // reqwest derives Host from the URL
            for (name, value) in request.headers.iter().filter(|(name, _)| name != "host") {
                builder = builder.header(name.as_str(), value.as_str());
            }
            if let Some(body) = body {
                builder = builder.body(body.to_vec());
            }

            let response = builder.send().map_err(RemoteError::Unavailable)?;
            check_status(response, &self.key)
        })
    }

    /// Object headers, or `None` when the object does not exist.
    fn head(&self) -> RemoteResult<Option<HeaderMap>> {
        match self.send(Method::HEAD, &[], None) {
            Ok(response) => Ok(Some(response.headers().clone())),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }
}

impl std::fmt::Debug for S3ObjectStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3ObjectStore")
            .field("url", &self.url.as_str())
            .field("region", &self.region)
            .field("credentials", &self.credentials)
            .finish()
    }
}

impl ObjectStore for S3ObjectStore {
    fn key(&self) -> &str {
        &self.key
    }

    fn upload(&self, local_path: &Path) -> RemoteResult<()> {
        let body = std::fs::read(local_path)?;
        let fingerprint = Fingerprint::of_bytes(&body);

        self.send(
            Method::PUT,
            &[(FINGERPRINT_HEADER, fingerprint.to_string())],
            Some(&body),
        )?;
        info!(key = %self.key, bytes = body.len(), %fingerprint, "uploaded store file");
        Ok(())
    }

    fn fetch_into(&self, writer: &mut dyn Write) -> RemoteResult<u64> {
        let mut response = self.send(Method::GET, &[], None)?;
        let bytes = response.copy_to(writer).map_err(RemoteError::Unavailable)?;
        debug!(key = %self.key, bytes, "downloaded store file");
        Ok(bytes)
    }

    fn exists(&self) -> RemoteResult<bool> {
        Ok(self.head()?.is_some())
    }

    fn last_modified(&self) -> RemoteResult<Option<OffsetDateTime>> {
        let Some(headers) = self.head()? else {
            return Ok(None);
        };
        Ok(headers
            .get(LAST_MODIFIED)
            .and_then(|value| value.to_str().ok())
            .and_then(parse_http_date))
    }

    fn remote_fingerprint(&self) -> RemoteResult<Option<Fingerprint>> {
        let Some(headers) = self.head()? else {
            return Ok(None);
        };
        let recorded = headers
            .get(FINGERPRINT_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse::<Fingerprint>().ok());
        if let Some(fingerprint) = recorded {
            return Ok(Some(fingerprint));
        }

        debug!(key = %self.key, "no fingerprint metadata, hashing remote object");
        let path: TempPath = self.download_to_temp()?;
        Ok(Some(Fingerprint::of_file(&path)?))
    }

    fn close(&self) -> RemoteResult<()> {
        debug!(key = %self.key, "closing object store");
        Ok(())
    }
}

fn check_status(response: Response, key: &str) -> RemoteResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    match status.as_u16() {
        404 => Err(RemoteError::NotFound {
            key: key.to_string(),
        }),
        status @ (401 | 403) => Err(RemoteError::Auth { status }),
        status => Err(RemoteError::Http { status }),
    }
}

/// Parses an IMF-fixdate such as `Wed, 21 Oct 2015 07:28:00 GMT`.
fn parse_http_date(value: &str) -> Option<OffsetDateTime> {
    let format = format_description!(
        "[weekday repr:short], [day] [month repr:short] [year] [hour]:[minute]:[second] GMT"
    );
    PrimitiveDateTime::parse(value.trim(), &format)
        .ok()
        .map(PrimitiveDateTime::assume_utc)
}
