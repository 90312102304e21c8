use crate::config::parse_env_u64;
use reqwest::{Client, RequestBuilder, Response};
use std::time::Duration;
use tokio::time::sleep;
use tracing::warn;

const MAX_ATTEMPTS: u32 = 2;
const RETRY_PAUSE_MS: u64 = 300;

pub fn build_client() -> Client {
    // Image models routinely take tens of seconds, hence the long default.
    let timeout = parse_env_u64("HTTP_TIMEOUT_SECS", 120);
    let connect = parse_env_u64("HTTP_CONNECT_TIMEOUT_SECS", 10);
    Client::builder()
        .timeout(Duration::from_secs(timeout))
        .connect_timeout(Duration::from_secs(connect))
        .build()
        .unwrap_or_else(|_| Client::new())
}

/// Sends the request built by `build`, retrying once on connect/timeout
/// failures or a 5xx status. Any other outcome is returned as-is.
///
/// Only for calls that are safe to repeat; storage and row writes are sent once.
pub async fn send_with_retry<F>(target: &'static str, build: F) -> Result<Response, reqwest::Error>
where
    F: Fn() -> RequestBuilder,
{
    let mut attempt = 1;
    loop {
        match build().send().await {
            Ok(response) if response.status().is_server_error() && attempt < MAX_ATTEMPTS => {
                warn!(
                    target = "vitrine.http",
                    call = target,
                    status = %response.status(),
                    "retrying_after_server_error"
                );
            }
            Err(err) if (err.is_timeout() || err.is_connect()) && attempt < MAX_ATTEMPTS => {
                warn!(
                    target = "vitrine.http",
                    call = target,
                    error = %err,
                    "retrying_after_transport_error"
                );
            }
            outcome => return outcome,
        }
        attempt += 1;
        sleep(Duration::from_millis(RETRY_PAUSE_MS)).await;
    }
}
