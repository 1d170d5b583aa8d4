//! HTTP plumbing shared by both cluster clients.
//!
//! One `reqwest::Client` per cluster, built once. TLS verification is
//! skipped unconditionally; self-signed clusters are the norm for this
//! tool's deployments. Responses are always drained into a `String` so the
//! connection is released even on error paths.

use std::fmt;
use std::io::Write;
use std::time::Duration;

use anyhow::{Context, Result};
use flate2::write::GzEncoder;
use flate2::Compression;
use reqwest::header::{CONTENT_ENCODING, CONTENT_TYPE};
use reqwest::{Method, RequestBuilder, StatusCode};
use serde_json::Value;

/// Basic credentials, split from the `user:pass` flag form.
#[derive(Clone)]
pub(crate) struct Auth {
    pub user: String,
    pub pass: String,
}

impl Auth {
    /// Parse `user:pass`; anything without a colon is ignored, matching the
    /// flag's documented form.
    pub(crate) fn parse(raw: Option<&str>) -> Option<Self> {
        let raw = raw?;
        let (user, pass) = raw.split_once(':')?;
        Some(Self {
            user: user.to_string(),
            pass: pass.to_string(),
        })
    }
}

impl fmt::Debug for Auth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // The password stays out of logs.
        f.debug_struct("Auth")
            .field("user", &self.user)
            .field("pass", &"***")
            .finish()
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Transport {
    client: reqwest::Client,
    auth: Option<Auth>,
    compress: bool,
}

impl Transport {
    pub(crate) fn new(auth: Option<Auth>, proxy: Option<&str>, compress: bool) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .danger_accept_invalid_certs(true)
            .connect_timeout(Duration::from_secs(10))
            .gzip(compress);
        if let Some(proxy) = proxy {
            let proxy =
                reqwest::Proxy::all(proxy).with_context(|| format!("invalid proxy url '{proxy}'"))?;
            builder = builder.proxy(proxy);
        }
        let client = builder.build().context("failed to build http client")?;
        Ok(Self {
            client,
            auth,
            compress,
        })
    }

    pub(crate) async fn get(&self, url: &str) -> Result<(StatusCode, String)> {
        self.send(self.client.get(url)).await
    }

    /// JSON request with an optional body; used for everything except bulk.
    pub(crate) async fn request_json(
        &self,
        method: Method,
        url: &str,
        body: Option<&Value>,
    ) -> Result<(StatusCode, String)> {
        let mut request = self.client.request(method, url);
        if let Some(body) = body {
            request = request.json(body);
        }
        self.send(request).await
    }

    /// Bulk POST. The body is newline-delimited JSON; gzip-encoded on the
    /// wire when compression is enabled.
    pub(crate) async fn post_ndjson(&self, url: &str, body: Vec<u8>) -> Result<(StatusCode, String)> {
        let mut request = self
            .client
            .post(url)
            .header(CONTENT_TYPE, "application/x-ndjson");
        if self.compress {
            let mut encoder = GzEncoder::new(Vec::with_capacity(body.len() / 4), Compression::fast());
            encoder
                .write_all(&body)
                .context("failed to gzip bulk body")?;
            let compressed = encoder.finish().context("failed to finish gzip stream")?;
            request = request.header(CONTENT_ENCODING, "gzip").body(compressed);
        } else {
            request = request.body(body);
        }
        self.send(request).await
    }

    async fn send(&self, request: RequestBuilder) -> Result<(StatusCode, String)> {
        let request = match &self.auth {
            Some(auth) => request.basic_auth(&auth.user, Some(&auth.pass)),
            None => request,
        };
        let response = request.send().await.context("http request failed")?;
        let status = response.status();
        let body = response
            .text()
            .await
            .context("failed to read response body")?;
        Ok((status, body))
    }
}
