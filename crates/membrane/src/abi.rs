//! 네이티브 모듈 ABI — C 함수 시그니처와 메시지 포트
//!
//! 모듈은 두 개의 심볼을 내보내야 합니다:
//! - `initialize(ctx, set_message)`: 로드 시 한 번 호출. 모듈은
//!   `(ctx, set_message)` 쌍을 보관했다가 동기/비동기로 호출하여
//!   메시지를 방출할 수 있습니다.
//! - `entrypoint(id, tv, head)`: 패킷마다 호출. `head`는 분해된
//!   패킷의 첫 세그먼트 포인터입니다.
//!
//! `ctx`는 모듈별 [`MessagePort`]의 원시 포인터입니다. 컨텍스트
//! 포인터 덕분에 다른 스레드에서 방출된 메시지도 모듈 정체성을
//! 유지한 채 수거됩니다.

use std::ffi::{CStr, c_char, c_void};

use tokio::sync::mpsc;
use uuid::Uuid;

use gatepost_core::metrics as m;
use gatepost_core::types::{ModuleMessage, Timeval};
use gatepost_packet_view::PacketSegment;

/// 모듈이 보관하는 메시지 방출 콜백
pub type SetMessageFn = extern "C" fn(ctx: *const c_void, code: u16, text: *const c_char);

/// 모듈 초기화 심볼 시그니처
pub type ModuleInitFn = unsafe extern "C" fn(ctx: *const c_void, set_message: SetMessageFn);

/// 모듈 entrypoint 심볼 시그니처
pub type ModuleEntryFn = unsafe extern "C" fn(id: u32, tv: Timeval, head: *const PacketSegment);

/// entrypoint 심볼 이름
pub const SYM_ENTRYPOINT: &[u8] = b"entrypoint";
/// 초기화 심볼 이름
pub const SYM_INITIALIZE: &[u8] = b"initialize";

/// 모듈별 메시지 포트
///
/// 모듈이 방출한 메시지에 모듈 정체성을 붙여 멤브레인의 수집 채널로
/// 보냅니다. 송신측은 언바운드 채널이므로 커널 콜백이 아닌 어떤
/// 스레드에서든 블로킹 없이 호출할 수 있습니다.
pub struct MessagePort {
    module_id: Uuid,
    module_name: String,
    tx: mpsc::UnboundedSender<ModuleMessage>,
}

impl MessagePort {
    /// 새 포트를 생성합니다.
    pub fn new(
        module_id: Uuid,
        module_name: impl Into<String>,
        tx: mpsc::UnboundedSender<ModuleMessage>,
    ) -> Self {
        Self {
            module_id,
            module_name: module_name.into(),
            tx,
        }
    }

    /// 메시지를 수집 채널로 보냅니다.
    ///
    /// 수신측이 이미 닫힌 경우(멤브레인 종료) 메시지는 버려집니다.
    pub fn push(&self, code: u16, text: String) {
        metrics::counter!(m::MEMBRANE_MESSAGES_TOTAL, m::LABEL_MODULE => self.module_name.clone())
            .increment(1);
        let _ = self.tx.send(ModuleMessage {
            module_id: self.module_id,
            module_name: self.module_name.clone(),
            code,
            text,
        });
    }

    /// 포트가 속한 모듈 id를 반환합니다.
    pub fn module_id(&self) -> Uuid {
        self.module_id
    }
}

/// `set_message` 콜백의 실제 구현 — 모듈 초기화 시 전달됩니다.
///
/// # Safety (모듈 계약)
/// `ctx`는 초기화 때 받은 포인터를 그대로 되돌려줘야 하며, 모듈이
/// 로드되어 있는 동안에만 호출해야 합니다.
pub(crate) extern "C" fn deliver_message(ctx: *const c_void, code: u16, text: *const c_char) {
    if ctx.is_null() {
        return;
    }
    // SAFETY: ctx는 로드 시 전달한 MessagePort이며 모듈 언로드 전까지 유효
    let port = unsafe { &*ctx.cast::<MessagePort>() };
    let text = if text.is_null() {
        String::new()
    } else {
        // SAFETY: null 검사 완료; 모듈 계약상 NUL 종료 UTF-8 문자열
        unsafe { CStr::from_ptr(text) }.to_string_lossy().into_owned()
    };
    port.push(code, text);
}
