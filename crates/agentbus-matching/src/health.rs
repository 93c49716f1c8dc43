//! Health checker (spec §4.8.2, C9): concurrent liveness probing with
//! status write-back.

use std::time::Duration;

use agentbus_ports::{HttpProber, ProcessorStore};
use agentbus_types::{Processor, ProcessorStatus};
use futures::future::join_all;

/// Probes every candidate concurrently and returns only the healthy ones.
/// A probe failure (timeout, non-2xx, transport error) never aborts the
/// group — each candidate settles independently (spec §4.8.2 "concurrent
/// probe"). Status is written back to the durable store whenever it
/// changes, and unconditionally while the candidate is currently
/// `Unhealthy` (spec: "to bump `lastCheckedAt`"); a failure to persist the
/// status never fails the outer health check.
pub async fn filter_healthy(
    candidates: Vec<Processor>,
    prober: &dyn HttpProber,
    processor_store: &dyn ProcessorStore,
    timeout: Duration,
) -> Vec<Processor> {
    let probed = join_all(candidates.into_iter().map(|processor| async {
        let url = processor.health_endpoint();
        let healthy = match prober.probe(&url, timeout).await {
            Ok(ok) => ok,
            Err(e) => {
                tracing::debug!(
                    processor_id = %processor.processor_id,
                    error = %e,
                    "health probe transport error"
                );
                false
            }
        };
        (processor, healthy)
    }))
    .await;

    let mut healthy_processors = Vec::new();
    for (mut processor, healthy) in probed {
        let observed_status = if healthy {
            ProcessorStatus::Active
        } else {
            ProcessorStatus::Unhealthy
        };
        if observed_status != processor.status || processor.status == ProcessorStatus::Unhealthy {
            if let Err(e) = processor_store
                .update_status(&processor.processor_id, observed_status)
                .await
            {
                tracing::warn!(
                    processor_id = %processor.processor_id,
                    error = %e,
                    "failed to persist processor health status"
                );
            }
        }
        processor.status = observed_status;
        if healthy {
            healthy_processors.push(processor);
        }
    }
    healthy_processors
}
