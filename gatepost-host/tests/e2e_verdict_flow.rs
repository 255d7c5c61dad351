//! End-to-end verdict flow, in-process.
//!
//! Simulates the full pipeline without a kernel: the capture worker
//! blocks on a packet exactly as it would inside the bridge callback,
//! while an evaluator-side task polls the registry over the real RPC
//! socket, decomposes the packet, runs the membrane, and writes the
//! verdict back.

use std::time::Duration;

use gatepost_core::pipeline::Pipeline;
use gatepost_core::types::{Timeval, VerdictPolicy};
use gatepost_host::worker::CaptureWorker;
use gatepost_membrane::MembraneBuilder;
use gatepost_packet_view::PacketView;
use gatepost_registry::{RegistryClient, RegistryServer, VerdictDecision, VerdictRegistry};

const MAX_FRAME: usize = 1024 * 1024;

/// Valid IPv4 header (IHL=5, TCP) plus a short payload.
fn ipv4_packet() -> Vec<u8> {
    vec![
        0x45, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x40, 0x06, 0x00, 0x00, 192, 0, 2, 1, 198,
        51, 100, 7, 0xCA, 0xFE,
    ]
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn kernel_delivery_to_verdict_roundtrip() {
    let registry = VerdictRegistry::new();

    // Evaluator side: real RPC server over a temp socket
    let dir = tempfile::tempdir().unwrap();
    let socket_path = dir.path().join("registry.sock");
    let mut server = RegistryServer::new(registry.clone(), &socket_path, MAX_FRAME);
    server.start().await.unwrap();

    // Capture side: worker.decide blocks like the bridge callback would
    let worker = CaptureWorker::new(registry.clone(), Duration::from_secs(5), true);
    let capture_thread = std::thread::spawn(move || {
        worker.decide(7, &ipv4_packet(), Timeval::new(100, 0))
    });

    // Evaluator loop: poll until the packet shows up, evaluate, verdict
    let mut client = RegistryClient::connect(&socket_path, MAX_FRAME).await.unwrap();
    let pending = loop {
        let batch = client.get_pending().await.unwrap();
        if !batch.is_empty() {
            break batch;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    };

    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, 7);
    assert_eq!(pending[0].captured_at, Timeval::new(100, 0));

    // Zero loaded modules: dispatch yields zero messages, policy accepts
    let tmp_modules = tempfile::tempdir().unwrap();
    let (mut host, mut membrane) = MembraneBuilder::new()
        .module_dir(tmp_modules.path())
        .watch(false)
        .build();
    host.start().await.unwrap();

    let packet = &pending[0];
    let view = PacketView::from_bytes(packet.bytes.clone());
    assert!(view.is_decoded());
    let messages = membrane.transmit(packet.id, &view, packet.captured_at);
    assert!(messages.is_empty());

    let policy = VerdictPolicy::new(50, 80);
    let accept = policy.accepts(&messages);
    assert!(accept);

    let applied = client
        .set_verdicts(vec![VerdictDecision {
            id: packet.id,
            accept,
        }])
        .await
        .unwrap();
    assert_eq!(applied, 1);

    // The capture thread unblocks with the evaluator's verdict
    let verdict = capture_thread.join().unwrap();
    assert!(verdict);
    assert!(registry.is_empty());

    host.stop().await.unwrap();
    server.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn capture_serializes_one_packet_at_a_time() {
    // The worker blocks per packet; a second decide only starts after the
    // first verdict resolves, mirroring the bridge's single-threaded loop.
    let registry = VerdictRegistry::new();
    let worker = CaptureWorker::new(registry.clone(), Duration::from_secs(5), true);

    let capture_thread = std::thread::spawn(move || {
        let first = worker.decide(1, &ipv4_packet(), Timeval::default());
        let second = worker.decide(2, &ipv4_packet(), Timeval::default());
        (first, second)
    });

    // Evaluator sees the packets strictly one at a time
    let mut seen = Vec::new();
    while seen.len() < 2 {
        let batch = registry.poll_pending();
        assert!(batch.len() <= 1);
        for packet in batch {
            seen.push(packet.id);
            registry.set_verdicts(&[(packet.id, true)]).unwrap();
        }
        std::thread::sleep(Duration::from_millis(1));
    }

    assert_eq!(seen, vec![1, 2]);
    let (first, second) = capture_thread.join().unwrap();
    assert!(first);
    assert!(second);
}
