//! Capture worker -- glues the kernel bridge to the verdict registry.
//!
//! The worker supplies the verdict function that the bridge invokes
//! synchronously on its dedicated thread, once per packet. Each call
//! registers the packet in the shared registry and parks on a
//! single-shot rendezvous until the evaluator's verdict arrives or the
//! configured deadline passes.

use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, warn};

use gatepost_core::metrics as m;
use gatepost_core::types::{PacketHandle, Timeval};
use gatepost_registry::{VerdictEntry, VerdictRegistry};

/// Bridges one packet at a time from the kernel callback into the
/// registry and back.
///
/// The rendezvous is a capacity-1 channel fulfilled exactly once by the
/// registry's verdict callback, making the at-most-once contract
/// explicit. Because the bridge loop is single-threaded, at most one
/// rendezvous is outstanding per host at any time -- intentional
/// backpressure, not a bottleneck to engineer away.
pub struct CaptureWorker {
    registry: VerdictRegistry,
    timeout: Duration,
    /// Verdict applied when the deadline passes (true = fail-open accept).
    fail_open: bool,
}

impl CaptureWorker {
    /// Create a worker around the shared registry handle.
    pub fn new(registry: VerdictRegistry, timeout: Duration, fail_open: bool) -> Self {
        Self {
            registry,
            timeout,
            fail_open,
        }
    }

    /// Decide the verdict for one intercepted packet (blocking).
    ///
    /// Invoked by the kernel bridge on its receive thread. Returns the
    /// evaluator's verdict, or a fallback when registration fails
    /// (fail-open accept) or the deadline passes (configured policy).
    pub fn decide(&self, id: u32, payload: &[u8], captured_at: Timeval) -> bool {
        let handle = PacketHandle::new(id, Bytes::copy_from_slice(payload), captured_at);

        let (verdict_tx, verdict_rx) = mpsc::sync_channel::<bool>(1);
        let entry = VerdictEntry::new(handle, move |accept| {
            // Capacity-1 channel, callback fires at most once: never blocks
            let _ = verdict_tx.send(accept);
        });

        if let Err(e) = self.registry.register(entry) {
            // Registration failure leaves no entry to verdict later, so the
            // packet is resolved locally: fail-open accept, same default the
            // bridge applies to unextractable packets.
            warn!(id, error = %e, "registration failed, fail-open accept");
            metrics::counter!(m::HOST_FALLBACK_TOTAL, m::LABEL_REASON => "registration")
                .increment(1);
            return true;
        }

        match verdict_rx.recv_timeout(self.timeout) {
            Ok(accept) => accept,
            Err(RecvTimeoutError::Timeout) => {
                if self.registry.evict(id) {
                    // Entry removed before any verdict: its callback can never
                    // fire, so the timeout policy is final for this packet.
                    warn!(
                        id,
                        timeout_ms = self.timeout.as_millis() as u64,
                        fail_open = self.fail_open,
                        "verdict deadline passed, applying timeout policy"
                    );
                    metrics::counter!(m::HOST_FALLBACK_TOTAL, m::LABEL_REASON => "timeout")
                        .increment(1);
                    self.fail_open
                } else {
                    // Eviction lost the race: the verdict arrived between the
                    // timeout and the lock. Collect it instead of guessing.
                    debug!(id, "verdict arrived during timeout handling");
                    verdict_rx.try_recv().unwrap_or(self.fail_open)
                }
            }
            Err(RecvTimeoutError::Disconnected) => {
                // Entry dropped without a verdict (registry torn down)
                warn!(id, "registry entry dropped without verdict, applying timeout policy");
                metrics::counter!(m::HOST_FALLBACK_TOTAL, m::LABEL_REASON => "timeout")
                    .increment(1);
                self.fail_open
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn worker(registry: &VerdictRegistry, timeout_ms: u64, fail_open: bool) -> CaptureWorker {
        CaptureWorker::new(
            registry.clone(),
            Duration::from_millis(timeout_ms),
            fail_open,
        )
    }

    #[test]
    fn verdict_unblocks_decide() {
        let registry = VerdictRegistry::new();
        let worker = worker(&registry, 5000, true);

        let registry_remote = registry.clone();
        let evaluator = std::thread::spawn(move || {
            // 폴링이 엔트리를 발견할 때까지 재시도
            loop {
                let batch = registry_remote.poll_pending();
                if let Some(packet) = batch.first() {
                    registry_remote.set_verdicts(&[(packet.id, false)]).unwrap();
                    break;
                }
                std::thread::sleep(Duration::from_millis(1));
            }
        });

        let accept = worker.decide(3, b"\x45payload", Timeval::new(1, 0));
        assert!(!accept);
        evaluator.join().unwrap();
        assert!(registry.is_empty());
    }

    #[test]
    fn timeout_fail_open_accepts() {
        let registry = VerdictRegistry::new();
        let worker = worker(&registry, 20, true);

        let start = Instant::now();
        let accept = worker.decide(1, b"\x45x", Timeval::default());
        assert!(accept);
        assert!(start.elapsed() >= Duration::from_millis(20));
        // 타임아웃된 엔트리는 소거되어 늦은 verdict를 받을 수 없음
        assert!(registry.is_empty());
    }

    #[test]
    fn timeout_fail_closed_drops() {
        let registry = VerdictRegistry::new();
        let worker = worker(&registry, 20, false);
        assert!(!worker.decide(1, b"\x45x", Timeval::default()));
    }

    #[test]
    fn registration_failure_is_fail_open() {
        let registry = VerdictRegistry::new();
        // 같은 id를 선점해 중복 등록을 유도
        registry
            .register(VerdictEntry::new(
                PacketHandle::new(9, Bytes::from_static(b"\x45y"), Timeval::default()),
                |_| {},
            ))
            .unwrap();

        let worker = worker(&registry, 1000, false);
        let start = Instant::now();
        // fail-closed 설정이어도 등록 실패 폴백은 fail-open accept
        assert!(worker.decide(9, b"\x45z", Timeval::default()));
        // 등록 실패는 대기 없이 즉시 해소됨
        assert!(start.elapsed() < Duration::from_millis(500));
    }

    #[test]
    fn evicted_entry_rejects_late_verdict() {
        let registry = VerdictRegistry::new();
        let worker = worker(&registry, 10, true);

        assert!(worker.decide(4, b"\x45x", Timeval::default()));

        // 타임아웃 이후 도착한 verdict는 UnknownId 프로토콜 에러
        let err = registry.set_verdicts(&[(4, false)]).unwrap_err();
        assert!(matches!(
            err,
            gatepost_core::error::RegistryError::UnknownId(4)
        ));
    }
}
