//! 패킷 뷰 — 원시 버퍼의 L3 헤더/페이로드 분해

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::ptr;

use bytes::Bytes;

use crate::segment::{PacketSegment, TAG_IPV4, TAG_IPV6, TAG_UNKNOWN};

/// 원시 패킷의 제로카피 분해 결과
///
/// 분해에 성공하면 두 세그먼트(헤더, 페이로드)가 0→1로 연결되고,
/// 실패하면 전체 버퍼를 덮는 단일 "unknown" 세그먼트가 됩니다.
/// 어느 경로든 [`PacketView::from_bytes`]는 에러를 내지 않습니다.
///
/// 뷰는 원본 `Bytes`를 소유하여 세그먼트 포인터를 유효하게 유지하고,
/// `Drop`에서 자신이 할당한 힙 노드를 정확히 한 번 해제합니다.
pub struct PacketView {
    /// 원본 페이로드 — 세그먼트 data 포인터의 수명 담보
    payload: Bytes,
    /// 헤더 세그먼트 (인라인; next가 힙 페이로드 노드를 가리킴)
    head: PacketSegment,
    /// 출발지 주소 (디코딩 실패 시 unspecified)
    source: IpAddr,
    /// 목적지 주소 (디코딩 실패 시 unspecified)
    destination: IpAddr,
}

impl PacketView {
    /// 원시 버퍼를 분해하여 뷰를 생성합니다.
    ///
    /// 첫 바이트의 상위 니블을 IP 버전으로 읽습니다:
    /// - 6: 40바이트 고정 헤더, 프로토콜 = 바이트 6, 주소 = 8..24 / 24..40
    /// - 4: IHL × 4 헤더, 프로토콜 = 바이트 9, 주소 = 12..16 / 16..20
    /// - 그 외 또는 길이 부족: 전체 버퍼를 덮는 unknown 단일 세그먼트
    ///
    /// 모든 입력에 대해 종료하며 에러를 내지 않습니다.
    pub fn from_bytes(payload: Bytes) -> Self {
        let pkt = payload.as_ref();

        if pkt.is_empty() {
            return Self::opaque(payload);
        }

        let (header_len, tag, proto, source, destination) = match pkt[0] >> 4 {
            6 => {
                if pkt.len() < 40 {
                    return Self::opaque(payload);
                }
                let mut src = [0u8; 16];
                let mut dst = [0u8; 16];
                src.copy_from_slice(&pkt[8..24]);
                dst.copy_from_slice(&pkt[24..40]);
                (
                    40usize,
                    TAG_IPV6,
                    pkt[6],
                    IpAddr::V6(Ipv6Addr::from(src)),
                    IpAddr::V6(Ipv6Addr::from(dst)),
                )
            }
            4 => {
                if pkt.len() < 20 {
                    return Self::opaque(payload);
                }
                let ihl = usize::from(pkt[0] & 0x0F) * 4;
                // IHL이 최소 헤더보다 작거나 버퍼를 넘으면 디코딩 불가
                if ihl < 20 || ihl > pkt.len() {
                    return Self::opaque(payload);
                }
                let mut src = [0u8; 4];
                let mut dst = [0u8; 4];
                src.copy_from_slice(&pkt[12..16]);
                dst.copy_from_slice(&pkt[16..20]);
                (
                    ihl,
                    TAG_IPV4,
                    pkt[9],
                    IpAddr::V4(Ipv4Addr::from(src)),
                    IpAddr::V4(Ipv4Addr::from(dst)),
                )
            }
            _ => return Self::opaque(payload),
        };

        let base = payload.as_ptr();
        // SAFETY: header_len <= payload.len()이므로 add 결과는 같은 할당 내부
        let tail_data = unsafe { base.add(header_len) };
        let tail = Box::new(PacketSegment {
            tag: u64::from(proto),
            len: payload.len() - header_len,
            data: tail_data,
            next: ptr::null_mut(),
        });

        Self {
            head: PacketSegment {
                tag,
                len: header_len,
                data: base,
                next: Box::into_raw(tail),
            },
            payload,
            source,
            destination,
        }
    }

    /// unknown 폴백 뷰를 생성합니다.
    fn opaque(payload: Bytes) -> Self {
        Self {
            head: PacketSegment {
                tag: TAG_UNKNOWN,
                len: payload.len(),
                data: payload.as_ptr(),
                next: ptr::null_mut(),
            },
            payload,
            source: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            destination: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        }
    }

    /// 모듈 entrypoint에 전달할 헤드 세그먼트 포인터를 반환합니다.
    ///
    /// 반환된 포인터는 뷰가 살아있는 동안만 유효합니다.
    pub fn head_ptr(&self) -> *const PacketSegment {
        &raw const self.head
    }

    /// 출발지 주소를 반환합니다.
    pub fn source(&self) -> IpAddr {
        self.source
    }

    /// 목적지 주소를 반환합니다.
    pub fn destination(&self) -> IpAddr {
        self.destination
    }

    /// L3 헤더 디코딩에 성공했는지 확인합니다.
    pub fn is_decoded(&self) -> bool {
        self.head.tag != TAG_UNKNOWN
    }

    /// 전송 계층 프로토콜 번호를 반환합니다 (디코딩 성공 시).
    pub fn transport_protocol(&self) -> Option<u8> {
        if self.head.next.is_null() {
            return None;
        }
        // SAFETY: next는 뷰가 소유한 힙 노드
        let tail = unsafe { &*self.head.next };
        u8::try_from(tail.tag).ok()
    }

    /// 원본 페이로드를 반환합니다.
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// 세그먼트 체인을 (태그, 바이트) 목록으로 수집합니다.
    pub fn segments(&self) -> Vec<(u64, &[u8])> {
        let mut out = Vec::with_capacity(2);
        // SAFETY: head의 data/len은 payload 내부를 가리킴
        out.push((self.head.tag, unsafe { self.head.bytes() }));
        let mut node = self.head.next.cast_const();
        while !node.is_null() {
            // SAFETY: 체인 노드는 뷰가 소유하며 살아있음
            let seg = unsafe { &*node };
            out.push((seg.tag, unsafe { seg.bytes() }));
            node = seg.next.cast_const();
        }
        out
    }
}

impl Drop for PacketView {
    fn drop(&mut self) {
        // 뷰가 할당한 힙 노드만 해제. 인라인 헤드는 뷰와 함께 소멸.
        let mut node = self.head.next;
        self.head.next = ptr::null_mut();
        while !node.is_null() {
            // SAFETY: from_bytes에서 Box::into_raw로 만든 노드를 정확히
            // 한 번 회수. next를 먼저 끊었으므로 이중 해제 불가.
            let boxed = unsafe { Box::from_raw(node) };
            node = boxed.next;
        }
    }
}

impl std::fmt::Debug for PacketView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PacketView")
            .field("tag", &self.head.tag)
            .field("len", &self.payload.len())
            .field("source", &self.source)
            .field("destination", &self.destination)
            .finish()
    }
}
