//! RPC 프로토콜 — 요청/응답 타입과 프레임 코덱
//!
//! 전송은 유닉스 도메인 소켓 위의 길이 프리픽스 프레임이며
//! ([`tokio_util::codec::LengthDelimitedCodec`]), 페이로드는 JSON입니다.
//!
//! # 연산 계약
//! - `GetPending` → `Pending { packets }`: 빈 목록은 "아직 없음"이라는
//!   정상 응답이지 에러가 아닙니다.
//! - `SetVerdicts` → `Ack { applied }` | `Busy` | `UnknownId { id }`:
//!   `Busy`는 레지스트리 경합으로 아무것도 적용되지 않았음을 뜻하며
//!   클라이언트가 배치 전체를 재시도합니다. 알 수 없는 id는 명시적
//!   프로토콜 에러로 보고됩니다.

use serde::{Deserialize, Serialize};
use tokio_util::codec::LengthDelimitedCodec;

use gatepost_core::error::RpcError;
use gatepost_core::types::Timeval;

use crate::registry::PendingPacket;

/// 평가자 → 캡처 호스트 요청
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    /// 대기 중인 패킷 배치 요청
    GetPending,
    /// verdict 배치 적용 요청
    SetVerdicts {
        /// 패킷별 accept/drop 결정
        verdicts: Vec<VerdictDecision>,
    },
}

/// 패킷 한 개에 대한 verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerdictDecision {
    /// 패킷 id
    pub id: u32,
    /// accept 여부
    pub accept: bool,
}

/// 캡처 호스트 → 평가자 응답
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Response {
    /// 대기 패킷 배치 (빈 목록 허용)
    Pending {
        /// 전달되는 패킷들
        packets: Vec<WirePacket>,
    },
    /// verdict 배치 적용 완료
    Ack {
        /// 적용된 verdict 수
        applied: usize,
    },
    /// 레지스트리 경합 — 아무것도 적용되지 않음, 배치 재시도 필요
    Busy,
    /// 등록된 적 없는 id에 대한 verdict — 프로토콜 에러
    UnknownId {
        /// 문제가 된 패킷 id
        id: u32,
    },
    /// 기타 서버 측 에러
    Error {
        /// 에러 설명
        message: String,
    },
}

/// 와이어 타임스탬프 (초 + 나노초)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireTimestamp {
    /// 초 단위
    pub seconds: i64,
    /// 나노초 단위
    pub nanos: i32,
}

impl From<Timeval> for WireTimestamp {
    fn from(tv: Timeval) -> Self {
        Self {
            seconds: tv.seconds,
            nanos: i32::try_from(tv.nanoseconds).unwrap_or(0),
        }
    }
}

impl From<WireTimestamp> for Timeval {
    fn from(ts: WireTimestamp) -> Self {
        Self {
            seconds: ts.seconds,
            nanoseconds: i64::from(ts.nanos),
        }
    }
}

/// 와이어 패킷 — 폴링 배치의 원소
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WirePacket {
    /// 패킷 id
    pub id: u32,
    /// 캡처 시각
    pub timestamp: WireTimestamp,
    /// 원시 패킷 바이트
    pub bytes: Vec<u8>,
}

impl From<PendingPacket> for WirePacket {
    fn from(pending: PendingPacket) -> Self {
        Self {
            id: pending.id,
            timestamp: pending.captured_at.into(),
            bytes: pending.bytes.to_vec(),
        }
    }
}

impl From<WirePacket> for PendingPacket {
    fn from(wire: WirePacket) -> Self {
        Self {
            id: wire.id,
            captured_at: wire.timestamp.into(),
            bytes: bytes::Bytes::from(wire.bytes),
        }
    }
}

/// 설정된 프레임 한도로 코덱을 생성합니다.
pub fn frame_codec(max_frame_bytes: usize) -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .max_frame_length(max_frame_bytes)
        .new_codec()
}

/// 요청/응답을 프레임 페이로드로 직렬화합니다.
pub fn encode<T: Serialize>(value: &T) -> Result<bytes::Bytes, RpcError> {
    serde_json::to_vec(value)
        .map(bytes::Bytes::from)
        .map_err(|e| RpcError::Codec(e.to_string()))
}

/// 프레임 페이로드를 역직렬화합니다.
pub fn decode<'a, T: Deserialize<'a>>(frame: &'a [u8]) -> Result<T, RpcError> {
    serde_json::from_slice(frame).map_err(|e| RpcError::Codec(e.to_string()))
}
