#![no_main]

use bytes::Bytes;
use gatepost_packet_view::PacketView;
use libfuzzer_sys::fuzz_target;

// 분해는 모든 바이트 입력에 대해 전역 함수여야 한다: 패닉도, 릭도,
// 세그먼트 합계가 버퍼 길이와 다른 경우도 없어야 한다.
fuzz_target!(|data: &[u8]| {
    let len = data.len();
    let view = PacketView::from_bytes(Bytes::copy_from_slice(data));
    let covered: usize = view.segments().iter().map(|(_, bytes)| bytes.len()).sum();
    assert_eq!(covered, len);
});
