//! Ready handshake with the embedding host app.
//!
//! The host hides its splash screen once told the mini app is ready. The
//! signal is sent right away and once more after a short delay, in case the
//! host was not listening yet. Failures are only logged.

use std::time::Duration;
use tokio::task::JoinHandle;

#[derive(Debug, thiserror::Error)]
pub enum AnnounceError {
    #[error("Ready request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Host answered {0}")]
    Status(reqwest::StatusCode),
}

/// POST a ready notice to `url`.
pub async fn send_ready(http: &reqwest::Client, url: &str) -> Result<(), AnnounceError> {
    let response = http
        .post(url)
        .json(&serde_json::json!({ "event": "ready" }))
        .send()
        .await?;

    if !response.status().is_success() {
        return Err(AnnounceError::Status(response.status()));
    }
    Ok(())
}

/// Send the ready notice now and again after `retry_delay`.
pub async fn announce_ready(http: reqwest::Client, url: String, retry_delay: Duration) {
    for attempt in 1..=2u32 {
        if attempt > 1 {
            tokio::time::sleep(retry_delay).await;
        }
        match send_ready(&http, &url).await {
            Ok(()) => tracing::debug!(attempt, "Ready signal delivered"),
            Err(e) => tracing::warn!(attempt, error = %e, "Ready signal failed"),
        }
    }
}

/// Run [`announce_ready`] in the background when a ready URL is configured.
pub fn spawn_announce(url: Option<String>, retry_delay: Duration) -> Option<JoinHandle<()>> {
    let url = url?;
    Some(tokio::spawn(announce_ready(
        reqwest::Client::new(),
        url,
        retry_delay,
    )))
}
