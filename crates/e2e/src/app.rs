//! Application-under-test readiness

use std::time::Duration;

use tracing::{info, warn};

use crate::error::{E2eError, E2eResult};
use crate::poller::{wait_for, Observation, PollOutcome, PollPolicy, Probe};

/// Wait until `base_url` answers HTTP at all.
///
/// Any status below 500 counts: a locale redirect or a 404 on the bare
/// origin still means the dev server is up and rendering.
pub async fn wait_until_ready(
    base_url: &str,
    bound: Duration,
    interval: Duration,
) -> E2eResult<()> {
    let url = reqwest::Url::parse(base_url)
        .map_err(|e| E2eError::Config(format!("invalid base_url '{}': {}", base_url, e)))?;
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(2))
        .redirect(reqwest::redirect::Policy::none())
        .build()?;
    let client = &client;
    let url = &url;

    info!("Waiting for {} to answer...", url);
    let outcome = wait_for(PollPolicy::new(bound, interval), move || async move {
        match client.get(url.clone()).send().await {
            Ok(resp) if resp.status().as_u16() < 500 => Probe::Ready(resp.status()),
            Ok(resp) => {
                warn!("Readiness check returned {}", resp.status());
                Probe::Pending(Observation::new(0, format!("status {}", resp.status())))
            }
            // Connection refused is expected while the server is starting
            Err(e) if e.is_connect() || e.is_timeout() => {
                Probe::Pending(Observation::new(0, e.to_string()))
            }
            Err(e) => Probe::Fatal(E2eError::Http(e)),
        }
    })
    .await?;

    match outcome {
        PollOutcome::Ok(status) => {
            info!("Application is answering at {} ({})", url, status);
            Ok(())
        }
        PollOutcome::TimedOut(t) => Err(E2eError::NavigationFailure {
            url: url.to_string(),
            reason: format!(
                "not ready after {} ms ({} attempts): {}",
                t.elapsed_ms(),
                t.attempts,
                t.last.detail
            ),
        }),
    }
}
