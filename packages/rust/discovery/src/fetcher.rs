//! HTTP page fetching with SSRF protection.

use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use tracing::{debug, instrument};
use url::{Host, Url};

use subscout_shared::{RawEvidence, Result, ScoutError};

use crate::PageFetcher;
use crate::sources::{classify_source, normalize_url};

/// User-Agent string for outbound page requests.
pub(crate) const USER_AGENT: &str = concat!("subscout/", env!("CARGO_PKG_VERSION"));

/// Maximum number of redirects to follow per page.
const MAX_REDIRECTS: usize = 5;

/// Pages larger than this are refused (5 MB).
const MAX_RESPONSE_SIZE: u64 = 5 * 1024 * 1024;

// ---------------------------------------------------------------------------
// HttpPageFetcher
// ---------------------------------------------------------------------------

/// Fetches public web pages over HTTP(S) and tags them with a [`SourceKind`].
///
/// [`SourceKind`]: subscout_shared::SourceKind
#[derive(Debug, Clone)]
pub struct HttpPageFetcher {
    client: Client,
    /// Allow localhost/private IPs (for tests against mock servers).
    allow_localhost: bool,
}

impl HttpPageFetcher {
    /// Build a fetcher whose requests time out after `timeout_secs`.
    pub fn new(timeout_secs: u64) -> Result<Self> {
        Ok(Self {
            client: build_client(timeout_secs)?,
            allow_localhost: false,
        })
    }

    /// Allow fetching localhost/private IPs (for integration tests).
    pub fn allow_localhost(mut self) -> Self {
        self.allow_localhost = true;
        self
    }
}

#[async_trait]
impl PageFetcher for HttpPageFetcher {
    #[instrument(skip_all, fields(url = %url))]
    async fn fetch(&self, url: &Url) -> Result<RawEvidence> {
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ScoutError::fetch(url.as_str(), "unsupported scheme"));
        }
        if !self.allow_localhost && is_ssrf_target(url) {
            return Err(ScoutError::fetch(url.as_str(), "blocked by SSRF protection"));
        }

        debug!("fetching page");

        let response = self
            .client
            .get(url.as_str())
            .send()
            .await
            .map_err(|e| ScoutError::fetch(url.as_str(), e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ScoutError::fetch(url.as_str(), format!("HTTP {status}")));
        }

        if let Some(len) = response.content_length() {
            if len > MAX_RESPONSE_SIZE {
                return Err(ScoutError::fetch(
                    url.as_str(),
                    format!("response too large ({len} bytes, max {MAX_RESPONSE_SIZE})"),
                ));
            }
        }

        let body = response
            .text()
            .await
            .map_err(|e| ScoutError::fetch(url.as_str(), format!("body read failed: {e}")))?;

        debug!(bytes = body.len(), "page fetched");

        Ok(RawEvidence {
            source_url: normalize_url(url),
            fetched_at: Utc::now(),
            kind: classify_source(url),
            content: body,
        })
    }
}

/// Build a reqwest client with the workspace's outbound defaults.
pub(crate) fn build_client(timeout_secs: u64) -> Result<Client> {
    Client::builder()
        .user_agent(USER_AGENT)
        .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| ScoutError::config(format!("failed to build HTTP client: {e}")))
}

// ---------------------------------------------------------------------------
// SSRF protection
// ---------------------------------------------------------------------------

/// Whether a URL targets a non-public resource.
pub fn is_ssrf_target(url: &Url) -> bool {
    if !matches!(url.scheme(), "http" | "https") {
        return true;
    }

    match url.host() {
        Some(Host::Ipv4(v4)) => is_private_ip(&IpAddr::V4(v4)),
        Some(Host::Ipv6(v6)) => is_private_ip(&IpAddr::V6(v6)),
        Some(Host::Domain(host)) => {
            let host = host.to_ascii_lowercase();
            host == "localhost"
                || host.ends_with(".localhost")
                || host.ends_with(".local")
                || host.ends_with(".internal")
        }
        None => true,
    }
}

/// Whether an IP is in a private/reserved range.
fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            let [a, b, c, _] = v4.octets();
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_broadcast()
                || v4.is_unspecified()
                // 100.64.0.0/10 carrier-grade NAT
                || (a == 100 && (b & 0xC0) == 64)
                || (a == 192 && b == 0 && c == 0)
        }
        IpAddr::V6(v6) => {
            let first = v6.segments()[0];
            v6.is_loopback()
                || v6.is_unspecified()
                // fc00::/7 unique local, fe80::/10 link local
                || (first & 0xfe00) == 0xfc00
                || (first & 0xffc0) == 0xfe80
                || v6.to_ipv4_mapped().is_some_and(|v4| is_private_ip(&IpAddr::V4(v4)))
        }
    }
}
