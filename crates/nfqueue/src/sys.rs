//! libnetfilter_queue FFI 선언
//!
//! 브리지가 사용하는 최소 표면만 선언합니다. 모든 핸들은 불투명
//! 포인터로 다루고, 소유권 규칙(open↔close, create↔destroy)은
//! [`bridge`](crate::bridge) 모듈이 강제합니다.

#![allow(non_camel_case_types)]

use libc::{c_char, c_int, c_void, timeval};

/// IPv4 주소 패밀리
pub const PF_INET: u16 = 2;
/// IPv6 주소 패밀리
pub const PF_INET6: u16 = 10;

/// 전체 페이로드 복사 모드
pub const NFQNL_COPY_PACKET: u8 = 2;

/// drop verdict
pub const NF_DROP: u32 = 0;
/// accept verdict
pub const NF_ACCEPT: u32 = 1;

/// 커널 메시지의 패킷 헤더
///
/// `packet_id`와 `hw_protocol`은 네트워크 바이트 오더입니다.
#[repr(C, packed)]
pub struct nfqnl_msg_packet_hdr {
    /// 패킷 id (big-endian)
    pub packet_id: u32,
    /// 하드웨어 프로토콜 (big-endian)
    pub hw_protocol: u16,
    /// netfilter 훅 번호
    pub hook: u8,
}

/// 큐 콜백 — `nfq_handle_packet`이 메시지당 한 번 동기 호출
pub type nfq_callback = unsafe extern "C" fn(
    qh: *mut c_void,
    nfmsg: *mut c_void,
    nfad: *mut c_void,
    data: *mut c_void,
) -> c_int;

#[link(name = "netfilter_queue")]
unsafe extern "C" {
    pub fn nfq_open() -> *mut c_void;
    pub fn nfq_close(h: *mut c_void) -> c_int;
    pub fn nfq_unbind_pf(h: *mut c_void, pf: u16) -> c_int;
    pub fn nfq_bind_pf(h: *mut c_void, pf: u16) -> c_int;
    pub fn nfq_create_queue(
        h: *mut c_void,
        num: u16,
        cb: nfq_callback,
        data: *mut c_void,
    ) -> *mut c_void;
    pub fn nfq_destroy_queue(qh: *mut c_void) -> c_int;
    pub fn nfq_set_mode(qh: *mut c_void, mode: u8, range: u32) -> c_int;
    pub fn nfq_fd(h: *mut c_void) -> c_int;
    pub fn nfq_handle_packet(h: *mut c_void, buf: *mut c_char, len: c_int) -> c_int;
    pub fn nfq_get_msg_packet_hdr(nfad: *mut c_void) -> *mut nfqnl_msg_packet_hdr;
    pub fn nfq_get_timestamp(nfad: *mut c_void, tv: *mut timeval) -> c_int;
    pub fn nfq_get_payload(nfad: *mut c_void, data: *mut *mut c_char) -> c_int;
    pub fn nfq_set_verdict(
        qh: *mut c_void,
        id: u32,
        verdict: u32,
        data_len: u32,
        buf: *const c_char,
    ) -> c_int;
}

/// 마지막 OS 에러를 진단 문자열로 반환합니다.
pub fn last_os_error() -> String {
    std::io::Error::last_os_error().to_string()
}
