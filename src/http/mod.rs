//! HTTP Host (SPEC_FULL.md §4.G): synchronous outbound HTTP for the guest
//! import surface. Blocks the calling thread on a dedicated runtime, the
//! same pattern the sync bridge (§4.C) uses for the object-store adapter.

use crate::config::Config;
use crate::error::{WasiErrorCode, WasiResult};
use log::{error, trace, warn};
use tokio::runtime::{Builder, Runtime};

const RESTRICTED_REQUEST_HEADERS: &[&str] = &["host", "user-agent"];

/// A guest-issued outgoing request.
#[derive(Clone, Debug)]
pub struct OutgoingRequest {
    pub method: String,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

/// A fully-materialized incoming response (§4.G: streaming bodies are not
/// supported in this core).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IncomingResponse {
    pub status: u16,
    pub ok: bool,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

pub struct HttpHost {
    client: reqwest::Client,
    runtime: Runtime,
    cors_proxy: Option<String>,
}

impl HttpHost {
    pub fn new(config: &Config) -> std::io::Result<Self> {
        let runtime = Builder::new_current_thread().enable_all().build()?;
        Ok(HttpHost {
            client: reqwest::Client::new(),
            runtime,
            cors_proxy: config.cors_proxy.clone(),
        })
    }

    /// Issues an outgoing request and blocks until the response has been
    /// fully received. Non-2xx statuses are not errors (§4.G); only
    /// transport failure is reported, as kind *io*.
    pub fn fetch(&self, request: OutgoingRequest) -> WasiResult<IncomingResponse> {
        trace!("http fetch {} {}", request.method, request.url);
        self.runtime.block_on(self.fetch_async(request))
    }

    async fn fetch_async(&self, request: OutgoingRequest) -> WasiResult<IncomingResponse> {
        let target = self.routed_url(&request.url);
        url::Url::parse(&target).map_err(|err| {
            warn!("rejecting malformed request url {target}: {err}");
            WasiErrorCode::Invalid
        })?;
        let method = reqwest::Method::from_bytes(request.method.as_bytes())
            .map_err(|_| WasiErrorCode::Invalid)?;
        let mut builder = self.client.request(method, target).body(request.body);
        for (name, value) in &request.headers {
            if RESTRICTED_REQUEST_HEADERS.contains(&name.to_ascii_lowercase().as_str()) {
                warn!("dropping restricted request header {name}");
                continue;
            }
            builder = builder.header(name, value);
        }

        let response = builder.send().await.map_err(|err| {
            error!("http request failed: {err}");
            WasiErrorCode::Io
        })?;

        let status = response.status();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = response
            .bytes()
            .await
            .map_err(|err| {
                error!("http body read failed: {err}");
                WasiErrorCode::Io
            })?
            .to_vec();

        Ok(IncomingResponse {
            status: status.as_u16(),
            ok: status.is_success(),
            headers,
            body,
        })
    }

    fn routed_url(&self, url: &str) -> String {
        match &self.cors_proxy {
            Some(proxy) => format!("{proxy}{url}"),
            None => url.to_string(),
        }
    }
}
