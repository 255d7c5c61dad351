//! 판정 레지스트리 크레이트
//!
//! 캡처 호스트가 가로챈 패킷은 verdict가 도착할 때까지 이 크레이트의
//! [`VerdictRegistry`]에 머뭅니다. 평가자 프로세스는 유닉스 소켓 RPC로
//! 대기 패킷을 가져가고([`RegistryServer`]), verdict를 되돌려 씁니다.
//!
//! # 모듈 구성
//! - [`registry`]: Reserved/Running/Aborted 상태 머신 (try-lock 규율)
//! - [`protocol`]: 길이 프리픽스 JSON 프레임의 요청/응답 타입
//! - [`server`]: 캡처 호스트 쪽 RPC 서버
//! - [`client`]: 평가자 쪽 RPC 클라이언트

pub mod client;
pub mod protocol;
pub mod registry;
pub mod server;

// --- 주요 타입 re-export ---

pub use client::RegistryClient;
pub use protocol::{Request, Response, VerdictDecision, WirePacket, WireTimestamp};
pub use registry::{PendingPacket, VerdictEntry, VerdictRegistry, VerdictState};
pub use server::RegistryServer;
