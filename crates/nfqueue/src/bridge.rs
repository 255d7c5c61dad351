//! 커널 큐 브리지 — 바인딩 수명주기와 수신 루프
//!
//! [`NfqueueBridge::run`]은 전용 OS 스레드에서 호출되는 블로킹
//! 루프입니다. 루프가 단일 스레드이고 verdict 함수가 verdict 도착까지
//! 블록하므로, 호스트 한 대의 처리량은 verdict 왕복 지연에 묶입니다.
//! 이는 의도된 배압 메커니즘이며 병렬화로 우회하지 않습니다.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use gatepost_core::error::BridgeError;
use gatepost_core::types::Timeval;

/// 커널 패킷 브리지
///
/// IPv4/IPv6 주소 패밀리에 바인딩하고(기존 바인딩 해제 후 재바인딩),
/// 설정된 번호의 큐를 생성해 전체 페이로드 복사 모드로 둡니다.
/// 수신 루프는 데이터그램마다 커널 메시지 핸들러를 거쳐 등록된 콜백을
/// 같은 스레드에서 메시지당 한 번씩 동기 호출합니다.
pub struct NfqueueBridge {
    queue_num: u16,
    copy_range: u32,
}

impl NfqueueBridge {
    /// 새 브리지를 생성합니다. `run` 전까지 커널 자원은 잡지 않습니다.
    pub fn new(queue_num: u16, copy_range: u32) -> Self {
        Self {
            queue_num,
            copy_range,
        }
    }

    /// 큐 번호를 반환합니다.
    pub fn queue_num(&self) -> u16 {
        self.queue_num
    }

    /// 수신 루프를 실행합니다 (블로킹).
    ///
    /// 메시지마다 패킷 id, 페이로드, 캡처 시각을 추출해 `verdict_fn`을
    /// 호출하고 결과를 accept/drop으로 커널에 되돌려 씁니다. 추출에
    /// 실패한 패킷(음수 길이, 타임스탬프 없음)은 `verdict_fn` 호출 없이
    /// fail-open accept 처리됩니다.
    ///
    /// 루프는 `shutdown` 플래그를 반복마다 확인하며, 플래그가 서거나
    /// recv가 치명적으로 실패하면 종료합니다. 종료 경로에서 항상 큐를
    /// 파괴하고 핸들을 닫습니다.
    ///
    /// # 에러
    /// 바인딩/큐 생성/모드 설정 실패는 시작 시점의 치명적
    /// [`BridgeError`]입니다. 패킷 단위 실패는 에러가 아닙니다.
    #[cfg(target_os = "linux")]
    pub fn run<F>(
        &self,
        mut verdict_fn: F,
        shutdown: Arc<AtomicBool>,
    ) -> Result<(), BridgeError>
    where
        F: FnMut(u32, &[u8], Timeval) -> bool,
    {
        linux::run_loop(
            self.queue_num,
            self.copy_range,
            &mut verdict_fn,
            &shutdown,
        )
    }

    /// 수신 루프 (비-Linux 스텁).
    #[cfg(not(target_os = "linux"))]
    pub fn run<F>(&self, _verdict_fn: F, _shutdown: Arc<AtomicBool>) -> Result<(), BridgeError>
    where
        F: FnMut(u32, &[u8], Timeval) -> bool,
    {
        Err(BridgeError::Unsupported)
    }
}

/// accept 여부를 netfilter verdict 값으로 변환합니다.
#[cfg(target_os = "linux")]
fn verdict_value(accept: bool) -> u32 {
    if accept {
        crate::sys::NF_ACCEPT
    } else {
        crate::sys::NF_DROP
    }
}

#[cfg(target_os = "linux")]
mod linux {
    use std::ptr;
    use std::sync::atomic::{AtomicBool, Ordering};

    use libc::{c_char, c_int, c_void};
    use tracing::{error, info, trace, warn};

    use gatepost_core::error::BridgeError;
    use gatepost_core::metrics as m;
    use gatepost_core::types::Timeval;

    use super::verdict_value;
    use crate::sys;

    /// 수신 버퍼 크기
    const BUFFER_SIZE: usize = 0xFFFF;

    /// recv 타임아웃 — 종료 플래그 확인 주기의 상한
    const RECV_TIMEOUT_MS: i64 = 500;

    /// 콜백으로 전달되는 컨텍스트
    struct CallbackCtx<'a> {
        verdict_fn: &'a mut dyn FnMut(u32, &[u8], Timeval) -> bool,
    }

    /// 커널 메시지당 한 번 호출되는 큐 콜백
    ///
    /// # Safety
    /// `nfq_handle_packet` 내부에서만 호출되며, `data`는 `run_loop`가
    /// 스택에 보관한 `CallbackCtx`를 가리킵니다.
    unsafe extern "C" fn queue_callback(
        qh: *mut c_void,
        _nfmsg: *mut c_void,
        nfad: *mut c_void,
        data: *mut c_void,
    ) -> c_int {
        // SAFETY: run_loop가 루프 수명 동안 유효한 CallbackCtx를 전달
        let ctx = unsafe { &mut *data.cast::<CallbackCtx<'_>>() };

        // SAFETY: nfad는 nfq_handle_packet이 전달한 유효한 메시지 핸들
        let hdr = unsafe { sys::nfq_get_msg_packet_hdr(nfad) };
        if hdr.is_null() {
            warn!("kernel message without packet header, skipping");
            return 0;
        }
        // SAFETY: null 검사 완료; packed 필드는 복사로 읽음
        let id = u32::from_be(unsafe { ptr::read_unaligned(ptr::addr_of!((*hdr).packet_id)) });

        metrics::counter!(m::HOST_PACKETS_TOTAL).increment(1);

        let mut payload: *mut c_char = ptr::null_mut();
        // SAFETY: nfad 유효, payload는 커널 버퍼 내부를 가리키게 됨
        let len = unsafe { sys::nfq_get_payload(nfad, &mut payload) };
        let mut tv = libc::timeval {
            tv_sec: 0,
            tv_usec: 0,
        };
        // SAFETY: tv는 스택의 유효한 timeval
        let ts_result = unsafe { sys::nfq_get_timestamp(nfad, &mut tv) };

        if len < 0 || ts_result != 0 {
            // 추출 실패는 verdict_fn을 호출하지 않는 fail-open 경로
            trace!(id, "packet extraction failed, fail-open accept");
            metrics::counter!(m::HOST_FALLBACK_TOTAL, m::LABEL_REASON => "extraction")
                .increment(1);
            // SAFETY: qh는 콜백 계약상 유효한 큐 핸들
            return unsafe { sys::nfq_set_verdict(qh, id, sys::NF_ACCEPT, 0, ptr::null()) };
        }

        // SAFETY: len >= 0이며 payload는 len 바이트의 커널 복사본
        let packet = unsafe { std::slice::from_raw_parts(payload.cast::<u8>(), len as usize) };
        let captured_at = convert_timestamp(tv.tv_sec as i64, tv.tv_usec as i64);

        let accept = (ctx.verdict_fn)(id, packet, captured_at);
        let verdict_label = if accept { "accept" } else { "drop" };
        metrics::counter!(m::HOST_VERDICTS_TOTAL, m::LABEL_VERDICT => verdict_label)
            .increment(1);

        // SAFETY: qh는 콜백 계약상 유효한 큐 핸들
        unsafe { sys::nfq_set_verdict(qh, id, verdict_value(accept), 0, ptr::null()) }
    }

    /// timeval(마이크로초)을 [`Timeval`](나노초)로 변환합니다.
    pub(super) fn convert_timestamp(tv_sec: i64, tv_usec: i64) -> Timeval {
        Timeval::new(tv_sec, tv_usec * 1000)
    }

    pub(super) fn run_loop(
        queue_num: u16,
        copy_range: u32,
        verdict_fn: &mut dyn FnMut(u32, &[u8], Timeval) -> bool,
        shutdown: &AtomicBool,
    ) -> Result<(), BridgeError> {
        info!("opening nfq handle");
        // SAFETY: FFI 호출; 반환 핸들은 아래에서 null 검사
        let h = unsafe { sys::nfq_open() };
        if h.is_null() {
            return Err(BridgeError::Open(sys::last_os_error()));
        }

        // 이 블록 이후의 실패는 모두 핸들을 닫고 반환해야 한다
        let result = (|| {
            info!("unbinding address families");
            // SAFETY: h는 유효한 핸들
            if unsafe { sys::nfq_unbind_pf(h, sys::PF_INET) } < 0
                || unsafe { sys::nfq_unbind_pf(h, sys::PF_INET6) } < 0
            {
                return Err(BridgeError::Bind {
                    op: "unbind",
                    errno: sys::last_os_error(),
                });
            }

            info!("binding address families");
            // SAFETY: h는 유효한 핸들
            if unsafe { sys::nfq_bind_pf(h, sys::PF_INET) } < 0
                || unsafe { sys::nfq_bind_pf(h, sys::PF_INET6) } < 0
            {
                return Err(BridgeError::Bind {
                    op: "bind",
                    errno: sys::last_os_error(),
                });
            }

            let mut ctx = CallbackCtx { verdict_fn };

            info!(queue = queue_num, "creating queue");
            // SAFETY: ctx는 루프 종료까지 스택에 살아있고, 콜백은
            // nfq_handle_packet 동안에만 호출된다
            let qh = unsafe {
                sys::nfq_create_queue(
                    h,
                    queue_num,
                    queue_callback,
                    (&raw mut ctx).cast::<c_void>(),
                )
            };
            if qh.is_null() {
                return Err(BridgeError::CreateQueue {
                    num: queue_num,
                    errno: sys::last_os_error(),
                });
            }

            let loop_result = (|| {
                info!("setting copy-packet mode");
                // SAFETY: qh는 유효한 큐 핸들
                if unsafe { sys::nfq_set_mode(qh, sys::NFQNL_COPY_PACKET, copy_range) } < 0 {
                    return Err(BridgeError::SetMode(sys::last_os_error()));
                }

                // SAFETY: h는 유효한 핸들
                let fd = unsafe { sys::nfq_fd(h) };
                set_recv_timeout(fd);

                let mut buf = vec![0u8; BUFFER_SIZE];

                loop {
                    if shutdown.load(Ordering::Relaxed) {
                        info!("shutdown signal observed, leaving receive loop");
                        return Ok(());
                    }

                    // SAFETY: buf는 BUFFER_SIZE 바이트의 유효한 쓰기 버퍼
                    let rcv = unsafe {
                        libc::recv(fd, buf.as_mut_ptr().cast::<c_void>(), BUFFER_SIZE, 0)
                    };

                    if rcv >= 0 {
                        // 데이터그램 하나가 커널 메시지 여러 개를 담을 수 있고,
                        // 핸들러가 메시지당 한 번 콜백을 동기 호출한다
                        // SAFETY: buf의 앞 rcv 바이트는 방금 수신된 데이터
                        unsafe {
                            sys::nfq_handle_packet(h, buf.as_mut_ptr().cast::<c_char>(), rcv as c_int)
                        };
                        continue;
                    }

                    let errno = std::io::Error::last_os_error();
                    match errno.raw_os_error() {
                        // 타임아웃/시그널은 종료 플래그 재확인 후 계속
                        Some(libc::EAGAIN) | Some(libc::EWOULDBLOCK) | Some(libc::EINTR) => {
                            continue;
                        }
                        _ => {
                            error!(error = %errno, "fatal recv failure");
                            return Err(BridgeError::Recv(errno.to_string()));
                        }
                    }
                }
            })();

            info!("destroying queue");
            // SAFETY: qh는 이 함수에서 생성한 큐 핸들, 정확히 한 번 파괴
            unsafe { sys::nfq_destroy_queue(qh) };

            loop_result
        })();

        // SAFETY: h는 이 함수에서 연 핸들, 정확히 한 번 닫음
        unsafe { sys::nfq_close(h) };

        result
    }

    /// recv에 타임아웃을 걸어 종료 플래그가 주기적으로 확인되게 합니다.
    fn set_recv_timeout(fd: c_int) {
        let timeout = libc::timeval {
            tv_sec: (RECV_TIMEOUT_MS / 1000) as libc::time_t,
            tv_usec: ((RECV_TIMEOUT_MS % 1000) * 1000) as libc::suseconds_t,
        };
        // SAFETY: fd는 유효한 소켓, timeout은 스택의 유효한 timeval
        let rc = unsafe {
            libc::setsockopt(
                fd,
                libc::SOL_SOCKET,
                libc::SO_RCVTIMEO,
                (&raw const timeout).cast::<c_void>(),
                std::mem::size_of::<libc::timeval>() as libc::socklen_t,
            )
        };
        if rc != 0 {
            warn!(error = %std::io::Error::last_os_error(), "failed to set recv timeout");
        }
    }
}
