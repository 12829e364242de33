//! Teardown delivery over blocking HTTP.
//!
//! The beacon hands the request to a detached OS thread running a blocking
//! `ureq` POST, so it completes even if the async runtime is already being
//! shut down. [`UreqTeardown::drain`] lets a host that is about to exit give
//! outstanding beacons a bounded amount of time to finish.

use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use boardsync_core::{PersistRequest, Result, SyncError, TeardownTransport};
use url::Url;

use crate::http::snapshot_url;

/// Timeout applied to every teardown request.
pub const TEARDOWN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Default)]
struct InFlight {
    count: Mutex<usize>,
    done: Condvar,
}

impl InFlight {
    fn begin(&self) {
        *self.count.lock().unwrap() += 1;
    }

    fn end(&self) {
        let mut count = self.count.lock().unwrap();
        *count = count.saturating_sub(1);
        self.done.notify_all();
    }
}

/// Teardown transport backed by `ureq`.
#[derive(Clone)]
pub struct UreqTeardown {
    base_url: Url,
    auth_token: Option<String>,
    agent: ureq::Agent,
    in_flight: Arc<InFlight>,
}

impl UreqTeardown {
    /// Create a transport for the API at `base_url`.
    pub fn new(base_url: Url, auth_token: Option<String>) -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(TEARDOWN_TIMEOUT))
            .build()
            .into();
        Self {
            base_url,
            auth_token,
            agent,
            in_flight: Arc::default(),
        }
    }

    /// Number of beacons still being delivered.
    pub fn in_flight(&self) -> usize {
        *self.in_flight.count.lock().unwrap()
    }

    /// Block until every beacon finished or `timeout` elapsed.
    /// Returns the number still outstanding.
    pub fn drain(&self, timeout: Duration) -> usize {
        let count = self.in_flight.count.lock().unwrap();
        let (count, _) = self
            .in_flight
            .done
            .wait_timeout_while(count, timeout, |n| *n > 0)
            .unwrap();
        *count
    }

    fn post(agent: &ureq::Agent, url: &str, token: Option<&str>, request: &PersistRequest) -> Result<()> {
        let mut builder = agent.post(url);
        if let Some(token) = token {
            builder = builder.header("Authorization", &format!("Bearer {token}"));
        }
        match builder.send_json(request) {
            Ok(_) => Ok(()),
            Err(ureq::Error::StatusCode(status)) => Err(SyncError::Http {
                endpoint: "persist",
                status,
            }),
            Err(e) => Err(SyncError::TeardownDelivery(e.to_string())),
        }
    }
}

impl TeardownTransport for UreqTeardown {
    fn send_beacon(&self, request: &PersistRequest) -> bool {
        let url = match snapshot_url(&self.base_url, &request.id) {
            Ok(url) => url.to_string(),
            Err(e) => {
                log::error!("[Teardown] {}", e);
                return false;
            }
        };

        let agent = self.agent.clone();
        let token = self.auth_token.clone();
        let request = request.clone();
        let in_flight = self.in_flight.clone();
        in_flight.begin();

        let spawned = std::thread::Builder::new()
            .name("boardsync-beacon".into())
            .spawn({
                let in_flight = in_flight.clone();
                move || {
                    match Self::post(&agent, &url, token.as_deref(), &request) {
                        Ok(()) => log::info!("[Teardown] Beacon delivered for {}", request.id),
                        Err(e) => log::error!("[Teardown] Beacon for {} failed: {}", request.id, e),
                    }
                    in_flight.end();
                }
            });

        match spawned {
            Ok(_) => true,
            Err(e) => {
                log::warn!("[Teardown] Could not start beacon thread: {}", e);
                in_flight.end();
                false
            }
        }
    }

    fn persist_blocking(&self, request: &PersistRequest) -> Result<()> {
        let url = snapshot_url(&self.base_url, &request.id)?;
        Self::post(&self.agent, url.as_str(), self.auth_token.as_deref(), request)
    }
}
