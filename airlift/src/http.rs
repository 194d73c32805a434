//! HTTP helpers shared by the metadata fetch and the download pipeline

use std::time::Duration;

use reqwest::{Client, Response};
use tracing::{debug, warn};
use url::Url;

use crate::error::{Result, UpdateError};

/// Delay between retry attempts against the same URL.
pub(crate) const RETRY_DELAY: Duration = Duration::from_secs(1);

/// Longest response-body snippet carried in a status error.
pub(crate) const BODY_SNIPPET_LIMIT: usize = 300;

/// Build the shared HTTP client.
///
/// Only the connect timeout lives on the client; read timeouts are enforced
/// per request (metadata) or per chunk (downloads) so long transfers are not
/// killed by a whole-request deadline.
pub fn build_client(connect_timeout_ms: u64) -> Result<Client> {
    Client::builder()
        .connect_timeout(Duration::from_millis(connect_timeout_ms))
        .build()
        .map_err(|e| UpdateError::Config(format!("failed to build http client: {e}")))
}

/// Append the cache-busting query parameter when a token is configured.
///
/// The value is the current timestamp, which defeats intermediate caches.
pub fn apply_no_cache(url: &str, no_cache: Option<&str>) -> Result<String> {
    let Some(token) = no_cache else {
        return Ok(url.to_string());
    };
    let mut parsed =
        Url::parse(url).map_err(|e| UpdateError::decode_error("url", format!("{url}: {e}")))?;
    parsed
        .query_pairs_mut()
        .append_pair(token, &chrono::Utc::now().timestamp_millis().to_string());
    Ok(parsed.to_string())
}

pub(crate) fn truncate_body(body: String) -> String {
    if body.chars().count() > BODY_SNIPPET_LIMIT {
        let snippet: String = body.chars().take(BODY_SNIPPET_LIMIT).collect();
        format!("{snippet}\n...")
    } else {
        body
    }
}

/// Turn a non-success response into a status error carrying a body snippet.
pub(crate) async fn ensure_success(url: &str, response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.ok().map(truncate_body);
    Err(UpdateError::HttpStatus {
        code: status.as_u16(),
        url: url.to_string(),
        body,
    })
}

/// Fetch a text document, retrying transient failures on the same URL.
pub async fn fetch_text(
    client: &Client,
    url: &str,
    no_cache: Option<&str>,
    read_timeout_ms: u64,
    retry_times: u32,
) -> Result<String> {
    let link = apply_no_cache(url, no_cache)?;
    let attempts = retry_times.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        match fetch_text_once(client, &link, read_timeout_ms).await {
            Ok(text) => return Ok(text),
            Err(e) if e.is_retryable() && attempt < attempts => {
                warn!("{e}; retrying ({attempt}/{attempts})");
                tokio::time::sleep(RETRY_DELAY).await;
            }
            Err(e) => return Err(e),
        }
    }
}

async fn fetch_text_once(client: &Client, url: &str, read_timeout_ms: u64) -> Result<String> {
    debug!("http request on {url}");
    let response = client
        .get(url)
        .timeout(Duration::from_millis(read_timeout_ms))
        .send()
        .await
        .map_err(|e| UpdateError::from_reqwest(url, e))?;
    let response = ensure_success(url, response).await?;
    response
        .text()
        .await
        .map_err(|e| UpdateError::from_reqwest(url, e))
}

/// Try each URL in order, falling back on transport and status failures.
pub async fn fetch_text_multiple(
    client: &Client,
    urls: &[String],
    no_cache: Option<&str>,
    read_timeout_ms: u64,
    retry_times: u32,
) -> Result<String> {
    let mut last_error = None;

    for url in urls {
        match fetch_text(client, url, no_cache, read_timeout_ms, retry_times).await {
            Ok(text) => return Ok(text),
            Err(e) if e.is_fallback_worthy() => {
                if urls.len() > 1 {
                    warn!("{e}");
                }
                last_error = Some(e);
            }
            Err(e) => return Err(e),
        }
    }

    Err(last_error
        .unwrap_or_else(|| UpdateError::Config("no server urls configured".into())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_cache_appends_param() {
        let url = apply_no_cache("http://example.com/res/a.txt", Some("ts")).unwrap();
        assert!(url.starts_with("http://example.com/res/a.txt?ts="));

        let url = apply_no_cache("http://example.com/a?x=1", Some("ts")).unwrap();
        assert!(url.starts_with("http://example.com/a?x=1&ts="));
    }

    #[test]
    fn test_no_cache_disabled() {
        let url = apply_no_cache("http://example.com/a", None).unwrap();
        assert_eq!(url, "http://example.com/a");
    }

    #[test]
    fn test_truncate_body() {
        assert_eq!(truncate_body("short".into()), "short");

        let long = "x".repeat(500);
        let truncated = truncate_body(long);
        assert!(truncated.ends_with("\n..."));
        assert!(truncated.chars().count() <= BODY_SNIPPET_LIMIT + 4);
    }
}
