use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use agentbus_types::AgentBusError;

use crate::traits::HttpProber;

/// `reqwest`-backed health prober (spec §4.8.2): GET with a bounded
/// timeout, success iff 2xx. Timeout vs non-2xx vs transport failure are
/// distinguished for logging but all resolve to `Ok(false)` — a failed
/// probe is not itself an operation error.
#[derive(Clone, Default)]
pub struct ReqwestHttpProber {
    client: Client,
}

impl ReqwestHttpProber {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }
}

#[async_trait]
impl HttpProber for ReqwestHttpProber {
    async fn probe(&self, url: &str, timeout: Duration) -> Result<bool, AgentBusError> {
        match self.client.get(url).timeout(timeout).send().await {
            Ok(response) => Ok(response.status().is_success()),
            Err(e) if e.is_timeout() => {
                tracing::debug!(url, "health probe timed out");
                Ok(false)
            }
            Err(e) => {
                tracing::debug!(url, error = %e, "health probe transport error");
                Ok(false)
            }
        }
    }
}
