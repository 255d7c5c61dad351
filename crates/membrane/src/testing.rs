//! 테스트용 인프로세스 모듈
//!
//! 네이티브 라이브러리 없이 [`InspectionModule`] 디스패치 경로를
//! 검증하기 위한 목 구현입니다.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use tokio::sync::mpsc;
use uuid::Uuid;

use gatepost_core::types::{ModuleInfo, ModuleMessage, Timeval};
use gatepost_packet_view::PacketSegment;

use crate::abi::MessagePort;
use crate::host::InspectionModule;

/// 디스패치마다 설정된 코드의 메시지를 방출하는 목 모듈
pub(crate) struct MockModule {
    info: ModuleInfo,
    enabled: AtomicBool,
    port: MessagePort,
    codes: Vec<u16>,
    dispatch_count: AtomicU32,
}

impl MockModule {
    /// 자체 채널을 갖는 목 모듈을 생성합니다.
    pub fn new(
        name: &str,
        codes: &[u16],
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<ModuleMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::with_sender(name, codes, tx), rx)
    }

    /// 주어진 수집 채널로 방출하는 목 모듈을 생성합니다.
    pub fn with_sender(
        name: &str,
        codes: &[u16],
        tx: mpsc::UnboundedSender<ModuleMessage>,
    ) -> Arc<Self> {
        let id = Uuid::new_v4();
        Arc::new(Self {
            info: ModuleInfo {
                id,
                name: name.to_owned(),
                version: "0.0.0".to_owned(),
                enabled: true,
            },
            enabled: AtomicBool::new(true),
            port: MessagePort::new(id, name, tx),
            codes: codes.to_vec(),
            dispatch_count: AtomicU32::new(0),
        })
    }

    /// 지금까지의 디스패치 횟수를 반환합니다.
    pub fn dispatch_count(&self) -> u32 {
        self.dispatch_count.load(Ordering::SeqCst)
    }
}

impl InspectionModule for MockModule {
    fn info(&self) -> &ModuleInfo {
        &self.info
    }

    fn enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    unsafe fn dispatch(&self, id: u32, _tv: Timeval, _head: *const PacketSegment) {
        self.dispatch_count.fetch_add(1, Ordering::SeqCst);
        for &code in &self.codes {
            self.port.push(code, format!("code {code} for packet {id}"));
        }
    }
}
