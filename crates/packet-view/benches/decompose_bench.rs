//! 패킷 분해 벤치마크
//!
//! IPv4/IPv6/폴백 경로의 분해 처리량을 측정합니다.

use bytes::Bytes;
use criterion::{Criterion, Throughput, black_box, criterion_group, criterion_main};
use gatepost_packet_view::PacketView;

fn ipv4_packet(payload_len: usize) -> Bytes {
    let mut pkt = vec![
        0x45, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x40, 0x06, 0x00, 0x00, 192, 0, 2, 1, 198,
        51, 100, 7,
    ];
    pkt.extend(std::iter::repeat_n(0xAB, payload_len));
    Bytes::from(pkt)
}

fn ipv6_packet(payload_len: usize) -> Bytes {
    let mut pkt = vec![0u8; 40];
    pkt[0] = 0x60;
    pkt[6] = 17;
    pkt.extend(std::iter::repeat_n(0xCD, payload_len));
    Bytes::from(pkt)
}

fn bench_decompose(c: &mut Criterion) {
    let v4_small = ipv4_packet(64);
    let v4_mtu = ipv4_packet(1480);
    let v6_mtu = ipv6_packet(1460);
    let opaque = Bytes::from(vec![0xF0; 1500]);

    let mut group = c.benchmark_group("decompose");
    group.throughput(Throughput::Elements(1));

    group.bench_function("ipv4_small", |b| {
        b.iter(|| PacketView::from_bytes(black_box(v4_small.clone())))
    });
    group.bench_function("ipv4_mtu", |b| {
        b.iter(|| PacketView::from_bytes(black_box(v4_mtu.clone())))
    });
    group.bench_function("ipv6_mtu", |b| {
        b.iter(|| PacketView::from_bytes(black_box(v6_mtu.clone())))
    });
    group.bench_function("opaque_fallback", |b| {
        b.iter(|| PacketView::from_bytes(black_box(opaque.clone())))
    });

    group.finish();
}

criterion_group!(benches, bench_decompose);
criterion_main!(benches);
