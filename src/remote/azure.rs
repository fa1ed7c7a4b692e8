//! Azure Append Blob client over the Blob REST API.
//!
//! Supports account-key connection strings (Shared Key request signing) and
//! SAS connection strings (`BlobEndpoint=...;SharedAccessSignature=...`).

use std::collections::HashMap;
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::{Client, Method, StatusCode};
use sha2::Sha256;
use tokio::sync::OnceCell;
use url::Url;

use super::{ObjectState, ObjectStore, RemoteError, snippet};

/// Blob service REST version sent with every request.
const API_VERSION: &str = "2021-08-06";

/// Blob type header value for append blobs.
const APPEND_BLOB: &str = "AppendBlob";

/// Credentials extracted from a connection string.
#[derive(Clone)]
pub enum Credentials {
    /// Storage account name and decoded account key.
    SharedKey {
        /// Account name.
        account: String,
        /// Decoded account key.
        key: Vec<u8>,
    },
    /// SAS token query string (without leading `?`).
    Sas(String),
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SharedKey { account, .. } => f
                .debug_struct("SharedKey")
                .field("account", account)
                .finish_non_exhaustive(),
            Self::Sas(_) => f.write_str("Sas(..)"),
        }
    }
}

/// Parsed Azure Storage connection string.
#[derive(Debug, Clone)]
pub struct ConnectionString {
    /// Blob service endpoint.
    pub blob_endpoint: Url,
    /// Request credentials.
    pub credentials: Credentials,
}

impl ConnectionString {
    /// Parse `Key=Value;Key=Value` connection strings.
    ///
    /// # Errors
    /// [`RemoteError::Config`] when segments are malformed, no endpoint can
    /// be derived, or no credentials are present. Secrets are never echoed.
    pub fn parse(input: &str) -> Result<Self, RemoteError> {
        let mut fields = HashMap::new();
        for segment in input.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            let (key, value) = segment.split_once('=').ok_or_else(|| {
                RemoteError::Config("connection string segment without '='".to_string())
            })?;
            fields.insert(key.trim(), value.trim());
        }

        let account = fields.get("AccountName").copied();
        let blob_endpoint = match fields.get("BlobEndpoint") {
            Some(endpoint) => Url::parse(endpoint)
                .map_err(|e| RemoteError::Config(format!("invalid BlobEndpoint: {e}")))?,
            None => {
                let account = account.ok_or_else(|| {
                    RemoteError::Config(
                        "connection string needs AccountName or BlobEndpoint".to_string(),
                    )
                })?;
                let protocol = fields
                    .get("DefaultEndpointsProtocol")
                    .copied()
                    .unwrap_or("https");
                let suffix = fields
                    .get("EndpointSuffix")
                    .copied()
                    .unwrap_or("core.windows.net");
                Url::parse(&format!("{protocol}://{account}.blob.{suffix}/"))
                    .map_err(|e| RemoteError::Config(format!("invalid blob endpoint: {e}")))?
            }
        };

        let credentials = match (account, fields.get("AccountKey"), fields.get("SharedAccessSignature")) {
            (Some(account), Some(key), _) => Credentials::SharedKey {
                account: account.to_string(),
                key: STANDARD
                    .decode(key)
                    .map_err(|_| RemoteError::Config("AccountKey is not valid base64".to_string()))?,
            },
            (_, _, Some(sas)) => Credentials::Sas(sas.trim_start_matches('?').to_string()),
            _ => {
                return Err(RemoteError::Config(
                    "connection string has no AccountKey or SharedAccessSignature".to_string(),
                ));
            }
        };

        Ok(Self {
            blob_endpoint,
            credentials,
        })
    }
}

/// Append-blob store bound to one container.
pub struct AzureBlobStore {
    client: Client,
    conn: ConnectionString,
    container: String,
    container_ready: OnceCell<()>,
}

impl std::fmt::Debug for AzureBlobStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AzureBlobStore")
            .field("endpoint", &self.conn.blob_endpoint.as_str())
            .field("container", &self.container)
            .finish_non_exhaustive()
    }
}

impl AzureBlobStore {
    /// Create a client for `container`.
    ///
    /// # Errors
    /// Returns [`RemoteError`] if the container name is empty or the HTTP
    /// client cannot be built.
    pub fn new(
        conn: ConnectionString,
        container: &str,
        timeout: Duration,
    ) -> Result<Self, RemoteError> {
        if container.trim().is_empty() {
            return Err(RemoteError::Config("container name is empty".to_string()));
        }
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            conn,
            container: container.to_string(),
            container_ready: OnceCell::new(),
        })
    }

    fn url(&self, blob: Option<&str>, query: &[(&str, &str)]) -> Result<Url, RemoteError> {
        let mut url = self.conn.blob_endpoint.clone();
        {
            let mut segments = url.path_segments_mut().map_err(|()| {
                RemoteError::Config("blob endpoint cannot be used as a base URL".to_string())
            })?;
            segments.pop_if_empty().push(&self.container);
            if let Some(blob) = blob {
                segments.extend(blob.split('/'));
            }
        }

        let mut params: Vec<String> = query.iter().map(|(k, v)| format!("{k}={v}")).collect();
        if let Credentials::Sas(sas) = &self.conn.credentials {
            params.push(sas.clone());
        }
        if params.is_empty() {
            url.set_query(None);
        } else {
            url.set_query(Some(&params.join("&")));
        }
        Ok(url)
    }

    async fn send(
        &self,
        method: Method,
        url: Url,
        headers: &[(&str, &str)],
        body: Option<Vec<u8>>,
    ) -> Result<reqwest::Response, RemoteError> {
        let mut ms_headers: Vec<(String, String)> = vec![
            (
                "x-ms-date".to_string(),
                Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string(),
            ),
            ("x-ms-version".to_string(), API_VERSION.to_string()),
        ];
        ms_headers.extend(headers.iter().map(|(k, v)| (k.to_lowercase(), v.to_string())));
        ms_headers.sort();

        let content_length = body.as_ref().map_or(0, Vec::len);
        let mut request = self.client.request(method.clone(), url.clone());
        for (key, value) in &ms_headers {
            request = request.header(key.as_str(), value.as_str());
        }

        if let Credentials::SharedKey { account, key } = &self.conn.credentials {
            let to_sign = string_to_sign(&method, content_length, &ms_headers, account, &url);
            let signature = sign(key, &to_sign)?;
            request = request.header("Authorization", format!("SharedKey {account}:{signature}"));
        }

        if let Some(body) = body {
            request = request.body(body);
        }

        Ok(request.send().await?)
    }

    async fn ensure_container(&self) -> Result<(), RemoteError> {
        self.container_ready
            .get_or_try_init(|| async {
                let url = self.url(None, &[("restype", "container")])?;
                let response = self.send(Method::PUT, url, &[], Some(Vec::new())).await?;
                match response.status() {
                    s if s.is_success() => {
                        tracing::info!(container = %self.container, "Created blob container");
                        Ok(())
                    }
                    StatusCode::CONFLICT => Ok(()),
                    // Container-scoped SAS tokens may not create containers.
                    StatusCode::FORBIDDEN => {
                        tracing::debug!(container = %self.container, "Container create not permitted, assuming it exists");
                        Ok(())
                    }
                    _ => Err(status_error("create_container", response).await),
                }
            })
            .await
            .map(|_| ())
    }
}

#[async_trait::async_trait]
impl ObjectStore for AzureBlobStore {
    fn describe(&self) -> String {
        format!("{}{}", self.conn.blob_endpoint, self.container)
    }

    async fn inspect(&self, path: &str) -> Result<ObjectState, RemoteError> {
        self.ensure_container().await?;

        let url = self.url(Some(path), &[])?;
        let response = self.send(Method::HEAD, url, &[], None).await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(ObjectState::Missing),
            s if s.is_success() => {
                let kind = response
                    .headers()
                    .get("x-ms-blob-type")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("unknown");
                if kind == APPEND_BLOB {
                    Ok(ObjectState::AppendOnly)
                } else {
                    Ok(ObjectState::Other(kind.to_string()))
                }
            }
            _ => Err(status_error("inspect", response).await),
        }
    }

    async fn create_append_only(&self, path: &str) -> Result<(), RemoteError> {
        let url = self.url(Some(path), &[])?;
        let response = self
            .send(
                Method::PUT,
                url,
                &[("x-ms-blob-type", APPEND_BLOB)],
                Some(Vec::new()),
            )
            .await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(status_error("create", response).await)
        }
    }

    async fn append_block(&self, path: &str, data: Vec<u8>) -> Result<(), RemoteError> {
        let url = self.url(Some(path), &[("comp", "appendblock")])?;
        let response = self.send(Method::PUT, url, &[], Some(data)).await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(status_error("append", response).await)
        }
    }
}

async fn status_error(operation: &'static str, response: reqwest::Response) -> RemoteError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    RemoteError::Status {
        operation,
        status,
        body: snippet(&body),
    }
}

/// Shared Key string-to-sign for blob requests without content headers.
fn string_to_sign(
    method: &Method,
    content_length: usize,
    ms_headers: &[(String, String)],
    account: &str,
    url: &Url,
) -> String {
    let length = if content_length == 0 {
        String::new()
    } else {
        content_length.to_string()
    };

    // VERB, Content-Encoding, Content-Language, Content-Length, Content-MD5,
    // Content-Type, Date, If-Modified-Since, If-Match, If-None-Match,
    // If-Unmodified-Since, Range
    let mut out = format!("{}\n\n\n{}\n\n\n\n\n\n\n\n\n", method.as_str(), length);

    for (key, value) in ms_headers {
        out.push_str(key);
        out.push(':');
        out.push_str(value);
        out.push('\n');
    }

    out.push('/');
    out.push_str(account);
    out.push_str(url.path());

    let mut params: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| (k.to_lowercase(), v.into_owned()))
        .collect();
    params.sort();
    for (key, value) in params {
        out.push('\n');
        out.push_str(&key);
        out.push(':');
        out.push_str(&value);
    }

    out
}

fn sign(key: &[u8], to_sign: &str) -> Result<String, RemoteError> {
    let mut mac = Hmac::<Sha256>::new_from_slice(key)
        .map_err(|e| RemoteError::Config(format!("invalid account key: {e}")))?;
    mac.update(to_sign.as_bytes());
    Ok(STANDARD.encode(mac.finalize().into_bytes()))
}
