use super::*;
use async_trait::async_trait;
use mule_dtn::bundle::{Bundle, Eid};
use mule_dtn::node::Node;
use mule_dtn::service::Application;
use mule_dtn::DeliveryRecord;
use std::sync::Arc;
use std::time::Duration;

/// What this node does for a living. Relays need no application hook at
/// all; sources generate telemetry; sinks log what arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Source,
    Relay,
    Sink,
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, String> {
        match s {
            "source" => Ok(Role::Source),
            "relay" => Ok(Role::Relay),
            "sink" => Ok(Role::Sink),
            _ => Err(format!(
                "Invalid 'node_role' value '{s}' (expected source, relay or sink)"
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub destination: Option<Eid>,
    pub period: Duration,
}

/// The sink hook: surface each delivered payload in the log. The node
/// has already appended the durable delivery record by the time this
/// runs.
struct SinkService;

#[async_trait]
impl Application for SinkService {
    async fn on_delivery(&self, bundle: &Bundle, record: &DeliveryRecord) {
        info!(
            "Application received {} byte(s) from {} (bundle {}, {:.2}s end-to-end): {:?}",
            bundle.payload.len(),
            record.source,
            record.bundle_id,
            record.e2e_delay,
            String::from_utf8_lossy(&bundle.payload)
        );
    }
}

pub fn application(role: Role) -> Option<Arc<dyn Application>> {
    match role {
        Role::Sink => Some(Arc::new(SinkService)),
        Role::Source | Role::Relay => None,
    }
}

/// The source workload: submit one telemetry reading per period until
/// told to stop.
pub fn spawn_source(
    node: Arc<Node>,
    telemetry: TelemetryConfig,
    task_set: &mut tokio::task::JoinSet<()>,
    cancel_token: tokio_util::sync::CancellationToken,
) {
    let Some(destination) = telemetry.destination else {
        return;
    };
    info!(
        "Generating telemetry for {destination} every {}s",
        telemetry.period.as_secs()
    );

    task_set.spawn(async move {
        let mut sequence = 0u64;
        loop {
            tokio::select! {
                _ = tokio::time::sleep(telemetry.period) => {}
                _ = cancel_token.cancelled() => break,
            }
            sequence += 1;
            let payload = format!(
                "{{\"node\":\"{}\",\"seq\":{sequence},\"temperature_c\":{:.1}}}",
                node.node_id(),
                20.0 + (sequence % 17) as f64 / 2.0
            );
            let bundle_id = node
                .submit(destination.clone(), payload.into_bytes(), None)
                .await;
            trace!("Telemetry reading {sequence} submitted as bundle {bundle_id}");
        }
    });
}

/// Periodically log the metrics snapshot so a run can be followed from
/// the console alone.
pub fn spawn_metrics_log(
    node: Arc<Node>,
    period: Duration,
    task_set: &mut tokio::task::JoinSet<()>,
    cancel_token: tokio_util::sync::CancellationToken,
) {
    if period.is_zero() {
        return;
    }
    task_set.spawn(async move {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(period) => {}
                _ = cancel_token.cancelled() => break,
            }
            let snapshot = node.metrics();
            info!(
                "Metrics: stored={} sent={} received={} forwarded={} delivered={} expired={} duplicate={}",
                snapshot.bundles_stored,
                snapshot.bundles_sent,
                snapshot.bundles_received,
                snapshot.bundles_forwarded,
                snapshot.bundles_delivered,
                snapshot.bundles_expired,
                snapshot.bundles_duplicate,
            );
        }
    });
}
