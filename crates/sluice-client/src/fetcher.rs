use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::{Client, StatusCode, redirect};
use sluice_core::error::AppError;
use sluice_core::models::{ContentType, FetchRequest, RawContent};
use sluice_core::traits::{ExecuteOptions, Provider};
use sluice_core::validation::HttpParameters;
use url::Url;

/// Provider name, also the parameter kind this fetcher reads.
pub const HTTP_PROVIDER: &str = "http";

/// HTTP fetcher using reqwest.
///
/// Per-request behaviour (timeout, User-Agent, redirects, body cap, extra
/// headers) comes from the `http` parameters stored for the URL.
/// SSRF protection is **enabled** by default: requests to private/reserved
/// IP ranges are blocked. Use [`allow_private_urls`](Self::allow_private_urls)
/// to disable this (e.g., for CLI usage where the user controls the machine).
#[derive(Clone)]
pub struct ReqwestFetcher {
    client: Client,
    no_redirect_client: Client,
    ssrf_protection: bool,
}

impl ReqwestFetcher {
    pub fn new() -> Result<Self, AppError> {
        let defaults = HttpParameters::default();
        let build = |policy: redirect::Policy| {
            Client::builder()
                .user_agent(defaults.user_agent.as_str())
                .redirect(policy)
                .build()
                .map_err(|e| AppError::HttpError(e.to_string()))
        };

        Ok(Self {
            client: build(redirect::Policy::limited(10))?,
            no_redirect_client: build(redirect::Policy::none())?,
            ssrf_protection: true,
        })
    }

    /// Disable SSRF protection, allowing requests to private/reserved IPs.
    ///
    /// Only use this for CLI usage where the user controls the machine.
    pub fn allow_private_urls(mut self) -> Self {
        self.ssrf_protection = false;
        self
    }
}

#[async_trait]
impl Provider<FetchRequest, RawContent> for ReqwestFetcher {
    fn name(&self) -> &str {
        HTTP_PROVIDER
    }

    fn can_handle(&self, request: &FetchRequest) -> bool {
        Url::parse(&request.url)
            .map(|u| matches!(u.scheme(), "http" | "https"))
            .unwrap_or(false)
    }

    async fn execute(
        &self,
        request: &FetchRequest,
        _opts: &ExecuteOptions,
    ) -> Result<RawContent, AppError> {
        let url = request.url.as_str();
        if self.ssrf_protection {
            validate_url(url).await?;
        }

        let params: HttpParameters = request.parameters_for(HTTP_PROVIDER)?;
        let client = if params.follow_redirects {
            &self.client
        } else {
            &self.no_redirect_client
        };

        let mut builder = client
            .get(url)
            .timeout(Duration::from_millis(params.timeout_ms))
            .header(reqwest::header::USER_AGENT, params.user_agent.as_str());
        for (name, value) in &params.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder
            .send()
            .await
            .map_err(|e| send_error(e, params.timeout_ms))?;

        let status = response.status();
        if !status.is_success() {
            tracing::debug!(url, %status, "Non-success HTTP status");
            return Err(status_error(status));
        }

        let declared_len = response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<usize>().ok());
        if let Some(len) = declared_len
            && len > params.max_body_bytes
        {
            return Err(body_too_large(len, params.max_body_bytes));
        }

        let mime = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let body = response
            .bytes()
            .await
            .map_err(|e| {
                AppError::HttpError(format!("Failed to read response body: {}", e.without_url()))
            })?;
        if body.len() > params.max_body_bytes {
            return Err(body_too_large(body.len(), params.max_body_bytes));
        }

        let content_type = match mime.as_deref().map(ContentType::from_mime) {
            Some(detected) if detected != ContentType::Unknown => detected,
            _ => request.content_type,
        };

        tracing::debug!(url, bytes = body.len(), %content_type, "Fetched over HTTP");

        Ok(RawContent {
            url: url.to_string(),
            body: body.to_vec(),
            mime,
            content_type,
            provider: HTTP_PROVIDER.to_string(),
        })
    }
}

// Error text is what `RetryPolicy` classifies, so it never carries the URL:
// a path containing "timeout" must not turn a 500 into a retryable error.

fn send_error(e: reqwest::Error, timeout_ms: u64) -> AppError {
    if e.is_timeout() {
        AppError::Timeout(timeout_ms)
    } else if e.is_connect() {
        AppError::NetworkError(format!("Connection failed: {}", e.without_url()))
    } else {
        AppError::HttpError(e.without_url().to_string())
    }
}

fn status_error(status: StatusCode) -> AppError {
    AppError::HttpError(format!("HTTP {status}"))
}

fn body_too_large(len: usize, max: usize) -> AppError {
    AppError::HttpError(format!("Response body is {len} bytes, above the {max} byte limit"))
}

// ---------------------------------------------------------------------------
// SSRF protection
// ---------------------------------------------------------------------------

/// Validate a URL to prevent server-side request forgery (SSRF).
///
/// 1. Only allow `http` and `https` schemes.
/// 2. Resolve the hostname via DNS.
/// 3. Reject if any resolved IP is private/reserved.
pub(crate) async fn validate_url(url: &str) -> Result<(), AppError> {
    let parsed = Url::parse(url).map_err(|e| AppError::HttpError(format!("Invalid URL: {e}")))?;

    match parsed.scheme() {
        "http" | "https" => {}
        scheme => {
            return Err(AppError::HttpError(format!(
                "URL scheme '{scheme}' is not allowed (only http/https)"
            )));
        }
    }

    let host = parsed
        .host_str()
        .ok_or_else(|| AppError::HttpError("URL has no host".to_string()))?;
    let host = host.trim_start_matches('[').trim_end_matches(']');

    if let Ok(ip) = host.parse::<IpAddr>() {
        if is_private_ip(ip) {
            tracing::warn!(host, "Blocked request to private address");
            return Err(AppError::HttpError(
                "SSRF blocked: host is a private/reserved IP".to_string(),
            ));
        }
        return Ok(());
    }

    let port = parsed.port_or_known_default().unwrap_or(80);
    let addrs: Vec<_> = tokio::net::lookup_host((host, port))
        .await
        .map_err(|e| {
            tracing::debug!(host, error = %e, "DNS resolution failed");
            AppError::NetworkError(format!("DNS resolution failed: {e}"))
        })?
        .collect();

    if addrs.is_empty() {
        tracing::debug!(host, "DNS resolution returned no addresses");
        return Err(AppError::NetworkError(
            "DNS resolution returned no addresses".to_string(),
        ));
    }

    if let Some(blocked) = addrs.iter().find(|a| is_private_ip(a.ip())) {
        tracing::warn!(host, ip = %blocked.ip(), "Blocked request to private address");
        return Err(AppError::HttpError(
            "SSRF blocked: host resolves to private/reserved IP".to_string(),
        ));
    }

    Ok(())
}

/// Check if an IP address is in a private/reserved/link-local range.
fn is_private_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local() // 169.254.0.0/16, cloud metadata
                || v4.is_unspecified()
                || v4.is_broadcast()
                || v4.is_documentation()
                || v4.octets()[0] == 100 && (v4.octets()[1] & 0xC0) == 64 // 100.64.0.0/10 (CGN)
        }
        IpAddr::V6(v6) => {
            v6.is_loopback()
                || v6.is_unspecified()
                || (v6.segments()[0] & 0xFFC0) == 0xFE80 // fe80::/10
                || (v6.segments()[0] & 0xFE00) == 0xFC00 // fc00::/7
                || v6
                    .to_ipv4_mapped()
                    .is_some_and(|v4| is_private_ip(IpAddr::V4(v4)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sluice_core::RetryPolicy;

    #[test]
    fn test_private_ranges() {
        for ip in [
            "127.0.0.1",
            "10.0.0.1",
            "172.16.0.1",
            "192.168.1.1",
            "169.254.169.254",
            "0.0.0.0",
            "100.64.0.1",
            "::1",
            "fe80::1",
            "fc00::1",
            "::ffff:169.254.169.254",
        ] {
            assert!(is_private_ip(ip.parse().unwrap()), "{ip}");
        }
    }

    #[test]
    fn test_public_ranges() {
        for ip in ["8.8.8.8", "1.1.1.1", "2001:4860:4860::8888"] {
            assert!(!is_private_ip(ip.parse().unwrap()), "{ip}");
        }
    }

    #[tokio::test]
    async fn test_validate_url_rejects_metadata_ip() {
        let err = validate_url("http://169.254.169.254/latest/meta-data/")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("SSRF blocked"));
    }

    #[tokio::test]
    async fn test_validate_url_rejects_ipv6_loopback_literal() {
        let err = validate_url("http://[::1]:8080/").await.unwrap_err();
        assert!(err.to_string().contains("SSRF blocked"));
    }

    #[tokio::test]
    async fn test_validate_url_rejects_bad_scheme() {
        let err = validate_url("file:///etc/passwd").await.unwrap_err();
        assert!(err.to_string().contains("not allowed"));
    }

    #[test]
    fn test_can_handle_only_http_schemes() {
        let fetcher = ReqwestFetcher::new().unwrap();
        assert!(fetcher.can_handle(&FetchRequest::new("https://a.com", ContentType::Html)));
        assert!(!fetcher.can_handle(&FetchRequest::new("ftp://a.com/f", ContentType::Unknown)));
        assert!(!fetcher.can_handle(&FetchRequest::new("not a url", ContentType::Unknown)));
    }

    #[tokio::test]
    async fn test_private_url_is_blocked_before_request() {
        let fetcher = ReqwestFetcher::new().unwrap();
        let request = FetchRequest::new("http://127.0.0.1:9/", ContentType::Html);
        let err = fetcher
            .execute(&request, &ExecuteOptions::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("SSRF blocked"));
    }

    #[test]
    fn test_status_error_is_classified_by_status_only() {
        // The URL path would otherwise match the "timeout" tag.
        let err = status_error(StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!err.to_string().contains("example.com"));
        assert!(!RetryPolicy::default().is_retryable(&err));

        let err = status_error(StatusCode::NOT_FOUND);
        assert!(RetryPolicy::default().is_retryable(&err));
    }

    #[test]
    fn test_body_limit_error_omits_url() {
        let err = body_too_large(2048, 1024);
        assert!(err.to_string().contains("2048 bytes"));
        assert!(!err.to_string().contains("://"));
        assert!(!RetryPolicy::default().is_retryable(&err));
    }

    #[tokio::test]
    async fn test_blocked_host_is_not_echoed_in_error() {
        let err = validate_url("http://10.0.0.7/timeout-report")
            .await
            .unwrap_err();
        assert!(!err.to_string().contains("10.0.0.7"));
        assert!(!RetryPolicy::default().is_retryable(&err));
    }
}
