//! RPC 클라이언트 — 평가자 쪽 레지스트리 접근
//!
//! 폴링 루프가 사용하는 두 연산을 제공합니다. `set_verdicts`는
//! 레지스트리 경합(`Busy`)이면 배치 전체를 재시도하고, 알 수 없는
//! id가 보고되면 해당 id만 제외한 나머지를 재시도합니다. 알 수 없는
//! id는 verdict 타임아웃으로 소거된 엔트리에 늦게 도착한 verdict가
//! 있을 때 발생합니다.

use std::path::Path;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::UnixStream;
use tokio_util::codec::Framed;
use tracing::{debug, warn};

use gatepost_core::error::RpcError;

use crate::protocol::{self, Request, Response, VerdictDecision};
use crate::registry::PendingPacket;

/// Busy 재시도 전 대기 시간
const BUSY_BACKOFF: Duration = Duration::from_millis(10);

/// 레지스트리 RPC 클라이언트
pub struct RegistryClient {
    framed: Framed<UnixStream, tokio_util::codec::LengthDelimitedCodec>,
}

impl RegistryClient {
    /// 캡처 호스트의 레지스트리 소켓에 연결합니다.
    pub async fn connect(
        socket_path: impl AsRef<Path>,
        max_frame_bytes: usize,
    ) -> Result<Self, RpcError> {
        let path = socket_path.as_ref();
        let stream = UnixStream::connect(path)
            .await
            .map_err(|e| RpcError::Transport(format!("connect {}: {e}", path.display())))?;
        debug!(path = %path.display(), "connected to registry rpc server");
        Ok(Self {
            framed: Framed::new(stream, protocol::frame_codec(max_frame_bytes)),
        })
    }

    /// 대기 중인 패킷 배치를 요청합니다.
    ///
    /// 빈 목록은 "아직 없음"을 뜻하는 정상 응답입니다.
    pub async fn get_pending(&mut self) -> Result<Vec<PendingPacket>, RpcError> {
        match self.call(&Request::GetPending).await? {
            Response::Pending { packets } => Ok(packets.into_iter().map(Into::into).collect()),
            Response::Error { message } => Err(RpcError::Remote(message)),
            other => Err(RpcError::Remote(format!(
                "unexpected response to get_pending: {other:?}"
            ))),
        }
    }

    /// verdict 배치를 적용합니다.
    ///
    /// `Busy`면 배치 전체를 재시도하고, `UnknownId`면 그 id를 제외한
    /// 나머지로 재시도합니다. 적용된 verdict 수를 반환합니다.
    pub async fn set_verdicts(
        &mut self,
        verdicts: Vec<VerdictDecision>,
    ) -> Result<usize, RpcError> {
        let mut batch = verdicts;

        loop {
            if batch.is_empty() {
                return Ok(0);
            }

            let request = Request::SetVerdicts {
                verdicts: batch.clone(),
            };
            match self.call(&request).await? {
                Response::Ack { applied } => return Ok(applied),
                Response::Busy => {
                    debug!(batch = batch.len(), "registry busy, retrying verdict batch");
                    tokio::time::sleep(BUSY_BACKOFF).await;
                }
                Response::UnknownId { id } => {
                    warn!(id, "dropping verdict for unknown packet (likely timed out)");
                    batch.retain(|v| v.id != id);
                }
                Response::Error { message } => return Err(RpcError::Remote(message)),
                Response::Pending { .. } => {
                    return Err(RpcError::Remote(
                        "unexpected pending response to set_verdicts".to_owned(),
                    ));
                }
            }
        }
    }

    /// 요청 하나를 보내고 응답 프레임을 기다립니다.
    async fn call(&mut self, request: &Request) -> Result<Response, RpcError> {
        let payload = protocol::encode(request)?;
        self.framed
            .send(payload)
            .await
            .map_err(|e| RpcError::Transport(e.to_string()))?;

        let frame = self
            .framed
            .next()
            .await
            .ok_or_else(|| RpcError::Transport("connection closed by server".to_owned()))?
            .map_err(|e| RpcError::Transport(e.to_string()))?;

        protocol::decode(&frame)
    }
}
