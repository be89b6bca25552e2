// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Direct Script Fetcher
 * Policy-checked HTTP client for external script bodies: manual redirect
 * resolution, identity encoding, hard body cap
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary - Enterprise Edition
 */

use reqwest::{redirect, Client};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use crate::errors::{HttpError, NetworkError, ScannerError, ScannerResult};
use crate::policy::TargetPolicy;

/// Realistic browser User-Agents to avoid trivial blocks
const BROWSER_USER_AGENTS: &[&str] = &[
    // Chrome on Windows
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36",
    // Chrome on macOS
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36",
    // Firefox on Windows
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:127.0) Gecko/20100101 Firefox/127.0",
    // Safari on macOS
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15",
];

fn next_user_agent() -> &'static str {
    static COUNTER: AtomicUsize = AtomicUsize::new(0);
    let index = COUNTER.fetch_add(1, Ordering::Relaxed) % BROWSER_USER_AGENTS.len();
    BROWSER_USER_AGENTS[index]
}

const MAX_REDIRECTS: usize = 5;

/// A fetched document with its response metadata.
#[derive(Debug, Clone)]
pub struct FetchedResponse {
    pub final_url: String,
    pub status: u16,
    /// Header names lower-cased; Set-Cookie excluded (see `set_cookies`).
    pub headers: HashMap<String, String>,
    pub set_cookies: Vec<String>,
    pub body: Vec<u8>,
}

/// Policy-enforcing fetcher used for external scripts, source maps and the
/// document-header capture.
#[derive(Clone)]
pub struct ScriptFetcher {
    client: Client,
    policy: TargetPolicy,
    max_body_bytes: usize,
}

impl ScriptFetcher {
    pub fn new(
        policy: TargetPolicy,
        timeout: Duration,
        max_body_bytes: usize,
    ) -> ScannerResult<Self> {
        // Redirects are followed manually so every hop passes the SSRF policy.
        let client = Client::builder()
            .timeout(timeout)
            .redirect(redirect::Policy::none())
            .build()
            .map_err(|e| ScannerError::General(format!("Failed to build fetch client: {}", e)))?;

        Ok(Self {
            client,
            policy,
            max_body_bytes,
        })
    }

    fn is_retryable_status(status: u16) -> bool {
        matches!(status, 408 | 429 | 500 | 502 | 503 | 504)
    }

    /// Fetch a URL, following up to 5 redirects with resolved absolute URLs.
    /// Every hop is validated against the SSRF policy.
    pub async fn fetch(&self, url: &str) -> ScannerResult<FetchedResponse> {
        let mut current = self.policy.validate_target_url(url).await?;

        for _ in 0..=MAX_REDIRECTS {
            let response = self
                .client
                .get(current.as_str())
                .header("Accept-Encoding", "identity")
                .header("User-Agent", next_user_agent())
                .send()
                .await?;

            let status = response.status();

            if status.is_redirection() {
                let location = response
                    .headers()
                    .get("location")
                    .and_then(|v| v.to_str().ok())
                    .ok_or_else(|| {
                        ScannerError::Http(HttpError::Other(format!(
                            "Redirect without Location from {}",
                            current
                        )))
                    })?;
                let next = current.join(location).map_err(|_| {
                    ScannerError::Network(NetworkError::InvalidUrl {
                        url: location.to_string(),
                    })
                })?;
                debug!(from = %current, to = %next, "Following redirect");
                current = self.policy.validate_target_url(next.as_str()).await?;
                continue;
            }

            let headers = lowercase_headers(&response);
            let set_cookies = collect_set_cookies(&response);
            let final_url = current.to_string();

            // Enforce the body cap while streaming; Content-Length may lie.
            if let Some(length) = response.content_length() {
                if length as usize > self.max_body_bytes {
                    return Err(ScannerError::Http(HttpError::BodyTooLarge {
                        url: final_url,
                        size: length as usize,
                        max_size: self.max_body_bytes,
                    }));
                }
            }

            let mut body: Vec<u8> = Vec::new();
            let mut stream = response;
            while let Some(chunk) = stream.chunk().await? {
                if body.len() + chunk.len() > self.max_body_bytes {
                    return Err(ScannerError::Http(HttpError::BodyTooLarge {
                        url: final_url,
                        size: body.len() + chunk.len(),
                        max_size: self.max_body_bytes,
                    }));
                }
                body.extend_from_slice(&chunk);
            }

            return Ok(FetchedResponse {
                final_url,
                status: status.as_u16(),
                headers,
                set_cookies,
                body,
            });
        }

        Err(ScannerError::Network(NetworkError::TooManyRedirects {
            url: url.to_string(),
            max_redirects: MAX_REDIRECTS,
        }))
    }

    /// Fetch a script body as text with one extra attempt on transient
    /// failures; non-2xx statuses are errors.
    pub async fn fetch_script(&self, url: &str) -> ScannerResult<String> {
        let response = match self.fetch(url).await {
            Ok(response) if Self::is_retryable_status(response.status) => {
                debug!(url, status = response.status, "Transient status, retrying once");
                self.fetch(url).await?
            }
            Ok(response) => response,
            Err(e) if e.is_retryable() => {
                debug!(url, error = %e, "Fetch failed, retrying once");
                self.fetch(url).await?
            }
            Err(e) => return Err(e),
        };

        if !(200..300).contains(&response.status) {
            warn!(url, status = response.status, "Script fetch returned non-success");
            let err = if response.status >= 500 {
                HttpError::ServerError {
                    status_code: response.status,
                    url: url.to_string(),
                }
            } else {
                HttpError::ClientError {
                    status_code: response.status,
                    url: url.to_string(),
                }
            };
            return Err(ScannerError::Http(err));
        }
        Ok(String::from_utf8_lossy(&response.body).into_owned())
    }

    pub fn resolve(&self, base: &str, relative: &str) -> Option<Url> {
        Url::parse(base).ok()?.join(relative).ok()
    }
}

fn lowercase_headers(response: &reqwest::Response) -> HashMap<String, String> {
    let mut map = HashMap::with_capacity(response.headers().len());
    for (name, value) in response.headers() {
        let name = name.as_str().to_ascii_lowercase();
        if name == "set-cookie" {
            continue;
        }
        if let Ok(value) = value.to_str() {
            // Repeated headers collapse comma-separated, matching browsers.
            map.entry(name)
                .and_modify(|existing: &mut String| {
                    existing.push_str(", ");
                    existing.push_str(value);
                })
                .or_insert_with(|| value.to_string());
        }
    }
    map
}

fn collect_set_cookies(response: &reqwest::Response) -> Vec<String> {
    response
        .headers()
        .get_all("set-cookie")
        .iter()
        .filter_map(|v| v.to_str().ok().map(|s| s.to_string()))
        .collect()
}

/// Extract the sourceMappingURL reference from a script body's trailer, when
/// one is present in its final lines.
pub fn source_mapping_url(script_body: &str) -> Option<&str> {
    script_body
        .lines()
        .rev()
        .take(3)
        .find_map(|line| {
            let trimmed = line.trim();
            trimmed
                .strip_prefix("//# sourceMappingURL=")
                .or_else(|| trimmed.strip_prefix("//@ sourceMappingURL="))
        })
        .map(str::trim)
        .filter(|v| !v.is_empty() && !v.starts_with("data:"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_mapping_url_trailer() {
        let body = "var x = 1;\nconsole.log(x);\n//# sourceMappingURL=app.js.map\n";
        assert_eq!(source_mapping_url(body), Some("app.js.map"));
    }

    #[test]
    fn test_source_mapping_url_legacy_syntax() {
        let body = "var x;\n//@ sourceMappingURL=bundle.map";
        assert_eq!(source_mapping_url(body), Some("bundle.map"));
    }

    #[test]
    fn test_source_mapping_url_absent() {
        assert_eq!(source_mapping_url("var x = 1;"), None);
    }

    #[test]
    fn test_source_mapping_url_ignores_data_uris() {
        let body = "x;\n//# sourceMappingURL=data:application/json;base64,AAAA";
        assert_eq!(source_mapping_url(body), None);
    }

    #[test]
    fn test_source_mapping_url_only_in_trailer() {
        let body = "//# sourceMappingURL=early.map\nline\nline\nline\nline\nline";
        assert_eq!(source_mapping_url(body), None);
    }

    #[test]
    fn test_user_agent_rotation() {
        let first = next_user_agent();
        let second = next_user_agent();
        assert!(first.starts_with("Mozilla/5.0"));
        assert_ne!(first, second);
    }
}
