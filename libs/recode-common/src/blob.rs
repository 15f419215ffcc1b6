//! Azure Blob Storage client
//!
//! Talks to the Blob REST API directly with Shared Key authorization, so the
//! API and the in-sandbox worker share one implementation and one error type.
//! Connection strings follow the Azure format, including
//! `UseDevelopmentStorage=true` for Azurite.

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::{Client, Method, StatusCode, Url};
use sha2::Sha256;
use std::fmt;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::StorageConfig;

const API_VERSION: &str = "2021-08-06";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

const DEVSTORE_ACCOUNT: &str = "devstoreaccount1";
const DEVSTORE_KEY: &str =
    "Eby8vdM02xNOcqFlqUwJPLlmEtlCDXJ1OUzFT50uSRZ6IFsuFq2UVErCz4I6tq/K1SZFPTOtr/KBHBeksoGMGw==";
const DEVSTORE_BLOB_ENDPOINT: &str = "http://127.0.0.1:10000/devstoreaccount1";

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("invalid connection string: {0}")]
    ConnectionString(String),

    #[error("invalid blob url: {0}")]
    Url(String),

    #[error("blob not found: {0}")]
    NotFound(String),

    #[error("storage request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("storage returned {status} for {operation}: {body}")]
    Status {
        operation: &'static str,
        status: StatusCode,
        body: String,
    },
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Named binary objects in one container
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Create the container if it does not exist yet
    async fn ensure_container(&self) -> StorageResult<()>;

    /// Upload, overwriting any existing object of the same name
    async fn upload(&self, name: &str, data: Vec<u8>) -> StorageResult<()>;

    async fn download(&self, name: &str) -> StorageResult<Vec<u8>>;

    async fn exists(&self, name: &str) -> StorageResult<bool>;

    /// Delete an object. A missing object is not an error.
    async fn delete(&self, name: &str) -> StorageResult<()>;
}

/// Parsed storage connection string
#[derive(Clone, PartialEq)]
pub struct ConnectionString {
    pub account_name: String,
    pub account_key: Vec<u8>,
    pub blob_endpoint: String,
}

impl fmt::Debug for ConnectionString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionString")
            .field("account_name", &self.account_name)
            .field("blob_endpoint", &self.blob_endpoint)
            .finish_non_exhaustive()
    }
}

impl ConnectionString {
    pub fn parse(raw: &str) -> StorageResult<Self> {
        let mut protocol = "https".to_string();
        let mut suffix = "core.windows.net".to_string();
        let mut account_name = None;
        let mut account_key = None;
        let mut blob_endpoint = None;
        let mut development = false;

        for part in raw.split(';').map(str::trim).filter(|p| !p.is_empty()) {
            let (key, value) = part
                .split_once('=')
                .ok_or_else(|| StorageError::ConnectionString(format!("malformed segment '{}'", part)))?;
            match key {
                "DefaultEndpointsProtocol" => protocol = value.to_string(),
                "EndpointSuffix" => suffix = value.to_string(),
                "AccountName" => account_name = Some(value.to_string()),
                "AccountKey" => account_key = Some(value.to_string()),
                "BlobEndpoint" => blob_endpoint = Some(value.trim_end_matches('/').to_string()),
                "UseDevelopmentStorage" => development = value.eq_ignore_ascii_case("true"),
                _ => {}
            }
        }

        if development {
            account_name.get_or_insert_with(|| DEVSTORE_ACCOUNT.to_string());
            account_key.get_or_insert_with(|| DEVSTORE_KEY.to_string());
            blob_endpoint.get_or_insert_with(|| DEVSTORE_BLOB_ENDPOINT.to_string());
        }

        let account_name = account_name
            .ok_or_else(|| StorageError::ConnectionString("missing AccountName".into()))?;
        let account_key = account_key
            .ok_or_else(|| StorageError::ConnectionString("missing AccountKey".into()))?;
        let account_key = general_purpose::STANDARD
            .decode(account_key.as_bytes())
            .map_err(|e| StorageError::ConnectionString(format!("AccountKey is not base64: {}", e)))?;
        let blob_endpoint = blob_endpoint
            .unwrap_or_else(|| format!("{}://{}.blob.{}", protocol, account_name, suffix));

        Ok(Self {
            account_name,
            account_key,
            blob_endpoint,
        })
    }
}

/// Build the Shared Key string-to-sign for a request
///
/// `ms_headers` must hold every `x-ms-*` header sent with the request.
/// A zero content length is signed as an empty line.
pub fn string_to_sign(
    method: &Method,
    content_length: usize,
    content_type: &str,
    ms_headers: &[(&str, String)],
    account: &str,
    url: &Url,
) -> String {
    let length = if content_length == 0 {
        String::new()
    } else {
        content_length.to_string()
    };

    let mut headers: Vec<(String, &str)> = ms_headers
        .iter()
        .map(|(name, value)| (name.to_ascii_lowercase(), value.trim()))
        .collect();
    headers.sort_by(|a, b| a.0.cmp(&b.0));

    let mut query: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| (k.to_ascii_lowercase(), v.into_owned()))
        .collect();
    query.sort();

    let mut out = String::new();
    out.push_str(method.as_str());
    out.push('\n');
    // Content-Encoding, Content-Language
    out.push_str("\n\n");
    out.push_str(&length);
    out.push('\n');
    // Content-MD5
    out.push('\n');
    out.push_str(content_type);
    out.push('\n');
    // Date, If-Modified-Since, If-Match, If-None-Match, If-Unmodified-Since, Range
    out.push_str("\n\n\n\n\n\n");

    for (name, value) in headers {
        out.push_str(&name);
        out.push(':');
        out.push_str(value);
        out.push('\n');
    }

    out.push('/');
    out.push_str(account);
    out.push_str(url.path());
    for (key, value) in query {
        out.push('\n');
        out.push_str(&key);
        out.push(':');
        out.push_str(&value);
    }

    out
}

/// Blob REST client bound to one container
#[derive(Clone)]
pub struct AzureBlobClient {
    http: Client,
    account: ConnectionString,
    container: String,
}

impl AzureBlobClient {
    pub fn new(config: &StorageConfig) -> StorageResult<Self> {
        let account = ConnectionString::parse(&config.connection_string)?;
        let http = Client::builder().timeout(REQUEST_TIMEOUT).build()?;

        info!(
            account = %account.account_name,
            endpoint = %account.blob_endpoint,
            container = %config.container_name,
            "blob client initialized"
        );

        Ok(Self {
            http,
            account,
            container: config.container_name.clone(),
        })
    }

    pub fn container(&self) -> &str {
        &self.container
    }

    fn container_url(&self) -> StorageResult<Url> {
        let raw = format!(
            "{}/{}?restype=container",
            self.account.blob_endpoint, self.container
        );
        Url::parse(&raw).map_err(|e| StorageError::Url(format!("{}: {}", raw, e)))
    }

    fn blob_url(&self, name: &str) -> StorageResult<Url> {
        let raw = format!(
            "{}/{}/{}",
            self.account.blob_endpoint,
            self.container,
            urlencoding::encode(name)
        );
        Url::parse(&raw).map_err(|e| StorageError::Url(format!("{}: {}", raw, e)))
    }

    fn sign(&self, payload: &str) -> StorageResult<String> {
        let mut mac = Hmac::<Sha256>::new_from_slice(&self.account.account_key)
            .map_err(|e| StorageError::ConnectionString(format!("AccountKey: {}", e)))?;
        mac.update(payload.as_bytes());
        Ok(general_purpose::STANDARD.encode(mac.finalize().into_bytes()))
    }

    async fn send(
        &self,
        method: Method,
        url: Url,
        body: Option<Vec<u8>>,
        extra_headers: &[(&str, String)],
    ) -> StorageResult<reqwest::Response> {
        let date = Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string();
        let mut ms_headers: Vec<(&str, String)> = vec![
            ("x-ms-date", date),
            ("x-ms-version", API_VERSION.to_string()),
        ];
        ms_headers.extend(extra_headers.iter().cloned());

        let (content_length, content_type) = match &body {
            Some(data) => (data.len(), "application/octet-stream"),
            None => (0, ""),
        };

        let payload = string_to_sign(
            &method,
            content_length,
            content_type,
            &ms_headers,
            &self.account.account_name,
            &url,
        );
        let signature = self.sign(&payload)?;
        let method_is_put = method == Method::PUT;

        let mut request = self.http.request(method, url).header(
            "Authorization",
            format!("SharedKey {}:{}", self.account.account_name, signature),
        );
        for (name, value) in &ms_headers {
            request = request.header(*name, value.as_str());
        }
        match body {
            Some(data) => {
                request = request.header("Content-Type", content_type).body(data);
            }
            None if method_is_put => {
                request = request.header("Content-Length", "0");
            }
            None => {}
        }

        Ok(request.send().await?)
    }
}

async fn status_error(operation: &'static str, resp: reqwest::Response) -> StorageError {
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    StorageError::Status {
        operation,
        status,
        body,
    }
}

#[async_trait]
impl BlobStore for AzureBlobClient {
    async fn ensure_container(&self) -> StorageResult<()> {
        let resp = self
            .send(Method::PUT, self.container_url()?, None, &[])
            .await?;

        match resp.status() {
            StatusCode::CREATED => {
                info!(container = %self.container, "Created storage container");
                Ok(())
            }
            StatusCode::CONFLICT => Ok(()),
            _ => Err(status_error("create container", resp).await),
        }
    }

    async fn upload(&self, name: &str, data: Vec<u8>) -> StorageResult<()> {
        let size = data.len();
        let resp = self
            .send(
                Method::PUT,
                self.blob_url(name)?,
                Some(data),
                &[("x-ms-blob-type", "BlockBlob".to_string())],
            )
            .await?;

        if !resp.status().is_success() {
            return Err(status_error("upload", resp).await);
        }
        info!(blob = %name, bytes = size, "Uploaded blob");
        Ok(())
    }

    async fn download(&self, name: &str) -> StorageResult<Vec<u8>> {
        let resp = self.send(Method::GET, self.blob_url(name)?, None, &[]).await?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Err(StorageError::NotFound(name.to_string()));
        }
        if !resp.status().is_success() {
            return Err(status_error("download", resp).await);
        }
        let data = resp.bytes().await?.to_vec();
        info!(blob = %name, bytes = data.len(), "Downloaded blob");
        Ok(data)
    }

    async fn exists(&self, name: &str) -> StorageResult<bool> {
        let resp = self.send(Method::HEAD, self.blob_url(name)?, None, &[]).await?;

        match resp.status() {
            s if s.is_success() => Ok(true),
            StatusCode::NOT_FOUND => {
                debug!(blob = %name, "Blob does not exist yet");
                Ok(false)
            }
            _ => Err(status_error("exists", resp).await),
        }
    }

    async fn delete(&self, name: &str) -> StorageResult<()> {
        let resp = self
            .send(Method::DELETE, self.blob_url(name)?, None, &[])
            .await?;

        match resp.status() {
            s if s.is_success() => {
                info!(blob = %name, "Deleted blob");
                Ok(())
            }
            StatusCode::NOT_FOUND => {
                warn!(blob = %name, "Blob not found during deletion");
                Ok(())
            }
            _ => Err(status_error("delete", resp).await),
        }
    }
}
