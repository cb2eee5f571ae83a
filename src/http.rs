use std::io::Read;
use std::time::Duration;

use crate::error::LauncherError;

const USER_AGENT: &str = concat!("claude-launcher/", env!("CARGO_PKG_VERSION"));
const STREAM_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct HttpRequest<'a> {
    pub url: &'a str,
    pub timeout: Duration,
    pub bearer: Option<&'a str>,
}

impl<'a> HttpRequest<'a> {
    pub fn get(url: &'a str, timeout: Duration) -> Self {
        Self {
            url,
            timeout,
            bearer: None,
        }
    }

    pub fn bearer(mut self, token: Option<&'a str>) -> Self {
        self.bearer = token.filter(|value| !value.trim().is_empty());
        self
    }
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn ensure_success(self, url: &str) -> Result<Self, LauncherError> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(LauncherError::HttpStatus {
                url: url.to_string(),
                status: self.status,
            })
        }
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).to_string()
    }

    pub fn json(&self) -> Result<serde_json::Value, LauncherError> {
        Ok(serde_json::from_slice(&self.body)?)
    }
}

pub struct HttpBody {
    pub content_length: Option<u64>,
    pub reader: Box<dyn Read + Send>,
}

/// Byte-level HTTP access used by the catalog, the probe and the installer.
pub trait HttpFetch: Send + Sync {
    /// Performs a GET and returns the response whatever its status; only
    /// transport failures are errors.
    fn fetch(&self, request: &HttpRequest<'_>) -> Result<HttpResponse, LauncherError>;

    /// Opens a successful GET as a stream for large downloads.
    fn open_stream(&self, url: &str) -> Result<HttpBody, LauncherError>;
}

pub struct ReqwestFetcher {
    client: reqwest::blocking::Client,
    stream_client: reqwest::blocking::Client,
}

impl ReqwestFetcher {
    pub fn new() -> Result<Self, LauncherError> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(USER_AGENT)
            .build()?;
        let stream_client = reqwest::blocking::Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(STREAM_CONNECT_TIMEOUT)
            .timeout(None)
            .build()?;
        Ok(Self {
            client,
            stream_client,
        })
    }
}

impl HttpFetch for ReqwestFetcher {
    fn fetch(&self, request: &HttpRequest<'_>) -> Result<HttpResponse, LauncherError> {
        let mut builder = self.client.get(request.url).timeout(request.timeout);
        if let Some(token) = request.bearer {
            builder = builder.bearer_auth(token);
        }
        let response = builder
            .send()
            .map_err(|err| LauncherError::Network(format!("{}: {err}", request.url)))?;
        let status = response.status().as_u16();
        let body = response
            .bytes()
            .map_err(|err| LauncherError::Network(format!("{}: {err}", request.url)))?;
        Ok(HttpResponse {
            status,
            body: body.to_vec(),
        })
    }

    fn open_stream(&self, url: &str) -> Result<HttpBody, LauncherError> {
        let response = self
            .stream_client
            .get(url)
            .header("Accept", "application/octet-stream")
            .send()
            .map_err(|err| LauncherError::Network(format!("{url}: {err}")))?;
        let status = response.status();
        if !status.is_success() {
            return Err(LauncherError::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(HttpBody {
            content_length: response.content_length(),
            reader: Box::new(response),
        })
    }
}
