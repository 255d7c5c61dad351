//! Evaluation worker -- the polling loop of the evaluator process.
//!
//! Decoupled in time from the capture host: there is no shared clock or
//! push notification, only the registry state machine reached through
//! the RPC socket. Each cycle pulls whatever is pending, runs it through
//! the membrane, and writes the verdict batch back.

use std::time::Duration;

use tracing::{debug, info, warn};

use gatepost_core::error::GatepostError;
use gatepost_core::metrics as m;
use gatepost_core::types::VerdictPolicy;
use gatepost_membrane::Membrane;
use gatepost_packet_view::PacketView;
use gatepost_registry::{PendingPacket, RegistryClient, VerdictDecision};

/// Evaluator-side worker: poll, evaluate, write back.
pub struct EvaluationWorker {
    client: RegistryClient,
    membrane: Membrane,
    policy: VerdictPolicy,
    poll_interval: Duration,
}

impl EvaluationWorker {
    /// Create a worker around a connected RPC client and a membrane.
    pub fn new(
        client: RegistryClient,
        membrane: Membrane,
        policy: VerdictPolicy,
        poll_interval: Duration,
    ) -> Self {
        Self {
            client,
            membrane,
            policy,
            poll_interval,
        }
    }

    /// Run the polling loop until the shutdown signal fires.
    ///
    /// Transport failures propagate to the caller, which owns the
    /// reconnect policy.
    pub async fn run(
        &mut self,
        mut shutdown_rx: tokio::sync::watch::Receiver<bool>,
    ) -> Result<(), GatepostError> {
        let mut interval = tokio::time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        info!(
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            "evaluation worker started"
        );

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.poll_once().await?;
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("evaluation worker shutting down");
                        return Ok(());
                    }
                }
            }
        }
    }

    /// One poll cycle: fetch pending packets, evaluate, write verdicts.
    pub async fn poll_once(&mut self) -> Result<usize, GatepostError> {
        let pending = self.client.get_pending().await?;
        if pending.is_empty() {
            return Ok(0);
        }

        metrics::counter!(m::EVALUATOR_BATCHES_TOTAL).increment(1);
        debug!(batch = pending.len(), "evaluating pending packets");

        let verdicts = evaluate_batch(&mut self.membrane, self.policy, &pending);
        let count = verdicts.len();
        self.client.set_verdicts(verdicts).await?;
        Ok(count)
    }
}

/// Evaluate one poll batch into verdict decisions.
///
/// Per packet: decompose, dispatch to every enabled module, log messages
/// above the warning threshold, and drop iff any message exceeds the
/// error threshold. The whole batch is evaluated synchronously; packet
/// views never outlive this call.
pub fn evaluate_batch(
    membrane: &mut Membrane,
    policy: VerdictPolicy,
    batch: &[PendingPacket],
) -> Vec<VerdictDecision> {
    batch
        .iter()
        .map(|packet| {
            let view = PacketView::from_bytes(packet.bytes.clone());
            let messages = membrane.transmit(packet.id, &view, packet.captured_at);

            for message in messages.iter().filter(|msg| policy.is_loggable(msg)) {
                warn!(
                    packet = packet.id,
                    module = %message.module_name,
                    code = message.code,
                    source = %view.source(),
                    destination = %view.destination(),
                    "{}",
                    message.text,
                );
            }

            let accept = policy.accepts(&messages);
            metrics::counter!(m::EVALUATOR_PACKETS_TOTAL).increment(1);

            VerdictDecision {
                id: packet.id,
                accept,
            }
        })
        .collect()
}
