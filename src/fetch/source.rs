use crate::error::IngestError;
use crate::fetch::retry::RetryPolicy;
use crate::process::utils::decode_body;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// GET `url` and decode the body as text, giving up after `timeout`.
///
/// Dropping the request future on timeout cancels the in-flight request.
pub async fn download_text(
    client: &Client,
    url: &Url,
    timeout: Duration,
) -> Result<String, IngestError> {
    let request = async {
        debug!(%url, "fetching");
        let network = |source| IngestError::Network {
            url: url.to_string(),
            source,
        };

        let resp = client.get(url.clone()).send().await.map_err(network)?;
        let status = resp.status();
        if !status.is_success() {
            return Err(IngestError::Status {
                url: url.to_string(),
                status,
            });
        }
        let bytes = resp.bytes().await.map_err(network)?;
        Ok(decode_body(&bytes).into_owned())
    };

    match tokio::time::timeout(timeout, request).await {
        Ok(result) => result,
        Err(_) => Err(IngestError::Timeout {
            url: url.to_string(),
            after: timeout,
        }),
    }
}

/// [`download_text`] under `retry`, retrying only transient failures.
pub async fn download_text_with_retry(
    client: &Client,
    url: &str,
    timeout: Duration,
    retry: &RetryPolicy,
) -> Result<String, IngestError> {
    let parsed = Url::parse(url).map_err(|source| IngestError::InvalidUrl {
        url: url.to_string(),
        source,
    })?;
    retry
        .run(
            url,
            || download_text(client, &parsed, timeout),
            IngestError::is_retryable,
        )
        .await
}
