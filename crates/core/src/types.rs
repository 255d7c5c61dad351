//! 도메인 타입 — 시스템 전역에서 사용되는 공통 타입
//!
//! 캡처 호스트와 평가자 프로세스가 공유하는 데이터 구조를 정의합니다.
//! [`Timeval`]과 같이 네이티브 모듈 ABI를 건너는 타입은 `repr(C)`로 고정됩니다.

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 패킷 캡처 시각
///
/// 커널 큐에서 추출한 타임스탬프입니다. 네이티브 모듈의 entrypoint로
/// 값 그대로 전달되므로 C 레이아웃을 유지해야 합니다.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[repr(C)]
pub struct Timeval {
    /// 초 단위 (UNIX epoch 기준)
    pub seconds: i64,
    /// 나노초 단위 (0..1_000_000_000)
    pub nanoseconds: i64,
}

impl Timeval {
    /// 초/나노초 쌍으로 생성합니다.
    pub fn new(seconds: i64, nanoseconds: i64) -> Self {
        Self {
            seconds,
            nanoseconds,
        }
    }
}

impl fmt::Display for Timeval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:09}", self.seconds, self.nanoseconds)
    }
}

/// 가로챈 패킷 한 개의 소유권 핸들
///
/// 커널 큐 콜백에서 페이로드를 복사하여 생성되며, 이후 변경되지 않습니다.
/// `bytes`는 `Bytes`이므로 레지스트리 → 평가자 경로에서 참조 카운트
/// 복제만 일어나고 페이로드 자체는 복사되지 않습니다.
#[derive(Debug, Clone)]
pub struct PacketHandle {
    /// 커널이 부여한 패킷 id
    pub id: u32,
    /// 원시 패킷 바이트 (링크 계층 페이로드)
    pub bytes: Bytes,
    /// 캡처 시각
    pub captured_at: Timeval,
}

impl PacketHandle {
    /// 새 패킷 핸들을 생성합니다.
    pub fn new(id: u32, bytes: Bytes, captured_at: Timeval) -> Self {
        Self {
            id,
            bytes,
            captured_at,
        }
    }
}

impl fmt::Display for PacketHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "packet[{}] len={} at={}",
            self.id,
            self.bytes.len(),
            self.captured_at,
        )
    }
}

/// 검사 모듈 메타데이터
///
/// 모듈 파일(`.so`)과 같은 이름의 `.json` 디스크립터에서 로드됩니다.
/// `enabled`는 원격 활성화 토글로만 변경됩니다.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleInfo {
    /// 모듈 고유 id
    pub id: Uuid,
    /// 모듈 이름
    pub name: String,
    /// 모듈 버전 문자열
    pub version: String,
    /// 디스패치 대상 여부 (디스크립터에 없으면 true)
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl fmt::Display for ModuleInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} v{} ({})", self.name, self.version, self.id)
    }
}

/// 디스패치 라운드 중 모듈이 방출한 메시지
///
/// 모듈 식별자는 값으로 운반됩니다. 메시지는 채널을 건너 디스패치
/// 호출보다 오래 살 수 있으므로 모듈 맵 엔트리를 빌려올 수 없습니다.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleMessage {
    /// 메시지를 방출한 모듈 id
    pub module_id: Uuid,
    /// 메시지를 방출한 모듈 이름
    pub module_name: String,
    /// 심각도 코드 (클수록 심각)
    pub code: u16,
    /// 메시지 본문
    pub text: String,
}

impl fmt::Display for ModuleMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.code, self.module_name, self.text)
    }
}

/// 심각도 임계값 기반 판정 정책
///
/// 한 디스패치 라운드의 메시지 집합에 대해:
/// - `warning_threshold` 초과 메시지는 기록 대상
/// - `error_threshold` 초과 메시지가 하나라도 있으면 verdict는 drop
///
/// 메시지 개수나 모듈 정체성과 무관하게 임계값 비교만으로 결정됩니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerdictPolicy {
    /// 기록 대상 임계값
    pub warning_threshold: u16,
    /// drop 판정 임계값
    pub error_threshold: u16,
}

impl VerdictPolicy {
    /// 새 정책을 생성합니다.
    pub fn new(warning_threshold: u16, error_threshold: u16) -> Self {
        Self {
            warning_threshold,
            error_threshold,
        }
    }

    /// 메시지가 기록 대상인지 확인합니다.
    pub fn is_loggable(&self, message: &ModuleMessage) -> bool {
        message.code > self.warning_threshold
    }

    /// 메시지 집합으로부터 accept 여부를 판정합니다.
    ///
    /// `error_threshold`를 초과하는 메시지가 하나라도 있으면 `false`(drop).
    pub fn accepts(&self, messages: &[ModuleMessage]) -> bool {
        !messages.iter().any(|msg| msg.code > self.error_threshold)
    }
}

impl Default for VerdictPolicy {
    fn default() -> Self {
        Self {
            warning_threshold: 50,
            error_threshold: 80,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(code: u16) -> ModuleMessage {
        ModuleMessage {
            module_id: Uuid::new_v4(),
            module_name: "test-module".to_owned(),
            code,
            text: "suspicious payload".to_owned(),
        }
    }

    #[test]
    fn timeval_display() {
        let tv = Timeval::new(1700000000, 42);
        assert_eq!(tv.to_string(), "1700000000.000000042");
    }

    #[test]
    fn packet_handle_display() {
        let handle = PacketHandle::new(7, Bytes::from_static(b"abcd"), Timeval::new(1, 0));
        let display = handle.to_string();
        assert!(display.contains("packet[7]"));
        assert!(display.contains("len=4"));
    }

    #[test]
    fn module_info_enabled_defaults_to_true() {
        let json = r#"{"id":"6f1c1f4e-8c2a-4c3b-9d2e-0a1b2c3d4e5f","name":"dpi","version":"1.0.0"}"#;
        let info: ModuleInfo = serde_json::from_str(json).unwrap();
        assert!(info.enabled);
        assert_eq!(info.name, "dpi");
    }

    #[test]
    fn module_info_enabled_explicit_false() {
        let json = r#"{"id":"6f1c1f4e-8c2a-4c3b-9d2e-0a1b2c3d4e5f","name":"dpi","version":"1.0.0","enabled":false}"#;
        let info: ModuleInfo = serde_json::from_str(json).unwrap();
        assert!(!info.enabled);
    }

    #[test]
    fn policy_drops_on_single_error_message() {
        let policy = VerdictPolicy::new(50, 80);
        assert!(!policy.accepts(&[msg(10), msg(90), msg(5)]));
    }

    #[test]
    fn policy_accepts_below_threshold() {
        let policy = VerdictPolicy::new(50, 80);
        assert!(policy.accepts(&[msg(10), msg(5)]));
    }

    #[test]
    fn policy_threshold_is_exclusive() {
        // 임계값과 같은 코드는 drop 사유가 아님
        let policy = VerdictPolicy::new(50, 80);
        assert!(policy.accepts(&[msg(80)]));
        assert!(!policy.accepts(&[msg(81)]));
    }

    #[test]
    fn policy_accepts_empty_message_set() {
        let policy = VerdictPolicy::default();
        assert!(policy.accepts(&[]));
    }

    #[test]
    fn policy_loggable_above_warning() {
        let policy = VerdictPolicy::new(50, 80);
        assert!(!policy.is_loggable(&msg(50)));
        assert!(policy.is_loggable(&msg(51)));
    }

    #[test]
    fn module_message_display() {
        let m = msg(42);
        let display = m.to_string();
        assert!(display.contains("[42]"));
        assert!(display.contains("test-module"));
    }

    #[test]
    fn timeval_crosses_ffi_boundary() {
        // repr(C) 레이아웃 확인: entrypoint ABI로 값 전달됨
        assert_eq!(std::mem::size_of::<Timeval>(), 16);
    }

    #[test]
    fn types_are_send_sync() {
        fn assert_send_sync<T: Send + Sync + 'static>() {}
        assert_send_sync::<PacketHandle>();
        assert_send_sync::<ModuleInfo>();
        assert_send_sync::<ModuleMessage>();
        assert_send_sync::<VerdictPolicy>();
    }
}
