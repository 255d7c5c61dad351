//! RPC 서버 — 캡처 호스트 쪽 레지스트리 노출
//!
//! 유닉스 도메인 소켓에서 평가자 연결을 받아 `GetPending`/`SetVerdicts`
//! 요청을 레지스트리 연산으로 변환합니다. 레지스트리 핸들은 명시적으로
//! 주입되며, 서버는 상태 머신 위의 얇은 어댑터일 뿐입니다.

use std::path::PathBuf;

use futures::{SinkExt, StreamExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::broadcast;
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};

use gatepost_core::error::{GatepostError, PipelineError, RegistryError, RpcError};
use gatepost_core::pipeline::{HealthStatus, Pipeline};

use crate::protocol::{self, Request, Response};
use crate::registry::VerdictRegistry;

/// 레지스트리 RPC 서버
///
/// [`Pipeline`] trait을 구현하여 캡처 호스트 데몬에서 다른 컴포넌트와
/// 동일한 생명주기로 관리됩니다.
pub struct RegistryServer {
    registry: VerdictRegistry,
    socket_path: PathBuf,
    max_frame_bytes: usize,
    shutdown_tx: broadcast::Sender<()>,
    accept_task: Option<tokio::task::JoinHandle<()>>,
}

impl RegistryServer {
    /// 새 서버를 생성합니다. `start` 전까지 소켓은 열리지 않습니다.
    pub fn new(
        registry: VerdictRegistry,
        socket_path: impl Into<PathBuf>,
        max_frame_bytes: usize,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            registry,
            socket_path: socket_path.into(),
            max_frame_bytes,
            shutdown_tx,
            accept_task: None,
        }
    }

    /// 소켓 경로를 반환합니다.
    pub fn socket_path(&self) -> &std::path::Path {
        &self.socket_path
    }
}

impl Pipeline for RegistryServer {
    async fn start(&mut self) -> Result<(), GatepostError> {
        if self.accept_task.is_some() {
            return Err(PipelineError::AlreadyRunning.into());
        }

        // 이전 비정상 종료가 남긴 소켓 파일 제거
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path)?;
        }
        if let Some(parent) = self.socket_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let listener = UnixListener::bind(&self.socket_path)
            .map_err(|e| RpcError::Transport(format!("bind {}: {e}", self.socket_path.display())))?;
        info!(path = %self.socket_path.display(), "registry rpc server listening");

        let registry = self.registry.clone();
        let max_frame = self.max_frame_bytes;
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        self.accept_task = Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    accepted = listener.accept() => {
                        match accepted {
                            Ok((stream, _)) => {
                                debug!("evaluator connected");
                                let registry = registry.clone();
                                let conn_shutdown = shutdown_rx.resubscribe();
                                tokio::spawn(serve_connection(registry, stream, max_frame, conn_shutdown));
                            }
                            Err(e) => {
                                warn!(error = %e, "accept failed");
                            }
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        debug!("registry rpc server shutting down");
                        break;
                    }
                }
            }
        }));

        Ok(())
    }

    async fn stop(&mut self) -> Result<(), GatepostError> {
        let Some(task) = self.accept_task.take() else {
            return Err(PipelineError::NotRunning.into());
        };

        let _ = self.shutdown_tx.send(());
        let _ = task.await;

        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path)?;
        }
        info!("registry rpc server stopped");
        Ok(())
    }

    async fn health_check(&self) -> HealthStatus {
        if self.accept_task.is_none() {
            return HealthStatus::Unhealthy("not running".to_owned());
        }
        HealthStatus::Healthy
    }
}

/// 연결 한 개를 서비스합니다. 프레임 단위 요청/응답 루프.
async fn serve_connection(
    registry: VerdictRegistry,
    stream: UnixStream,
    max_frame_bytes: usize,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let mut framed = Framed::new(stream, protocol::frame_codec(max_frame_bytes));

    loop {
        let frame = tokio::select! {
            frame = framed.next() => frame,
            _ = shutdown_rx.recv() => break,
        };

        let Some(frame) = frame else {
            debug!("evaluator disconnected");
            break;
        };

        let frame = match frame {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "frame read failed, closing connection");
                break;
            }
        };

        let response = match protocol::decode::<Request>(&frame) {
            Ok(request) => handle_request(&registry, request),
            Err(e) => Response::Error {
                message: e.to_string(),
            },
        };

        let payload = match protocol::encode(&response) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "response encode failed, closing connection");
                break;
            }
        };

        if let Err(e) = framed.send(payload).await {
            warn!(error = %e, "frame write failed, closing connection");
            break;
        }
    }
}

/// 요청 하나를 레지스트리 연산으로 변환합니다.
fn handle_request(registry: &VerdictRegistry, request: Request) -> Response {
    match request {
        Request::GetPending => {
            // 경합 시 poll_pending은 빈 배치를 반환하며, 빈 목록은
            // 프로토콜상 정상 응답이므로 그대로 전달한다.
            let packets = registry
                .poll_pending()
                .into_iter()
                .map(Into::into)
                .collect();
            Response::Pending { packets }
        }
        Request::SetVerdicts { verdicts } => {
            let pairs: Vec<(u32, bool)> = verdicts.iter().map(|v| (v.id, v.accept)).collect();
            match registry.set_verdicts(&pairs) {
                Ok(applied) => Response::Ack { applied },
                Err(RegistryError::Contended) => Response::Busy,
                Err(RegistryError::UnknownId(id)) => {
                    warn!(id, "verdict for unknown packet id");
                    Response::UnknownId { id }
                }
                Err(e) => Response::Error {
                    message: e.to_string(),
                },
            }
        }
    }
}
