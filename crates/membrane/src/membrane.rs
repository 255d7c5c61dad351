//! 멤브레인 — 패킷 팬아웃과 메시지 팬인
//!
//! 한 번의 `transmit` 호출은 로드된 모든 활성 모듈의 entrypoint를
//! 순서 보장 없이 동기 호출한 뒤, 그 시점까지 수집 채널에 도착한
//! 메시지를 논블로킹으로 드레인합니다. 드레인은 채널이 비는 즉시
//! 종료하며, 채널 완료를 기다리는 블로킹 열거를 절대 사용하지
//! 않습니다. 비어있는 채널을 기다리면 라운드가 영원히 끝나지 않기
//! 때문입니다.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::trace;

use gatepost_core::types::{ModuleMessage, Timeval};
use gatepost_packet_view::PacketView;

use crate::host::{ModuleHost, ModuleMap};

/// 멤브레인 — 디스패치/집계 엔진
///
/// 메시지 수집 채널의 유일한 소비자입니다. 드레인된 메시지는 호출
/// 결과로 반환되고, 멤브레인은 호출 사이에 메시지를 보관하지 않습니다.
pub struct Membrane {
    modules: ModuleMap,
    message_rx: mpsc::UnboundedReceiver<ModuleMessage>,
}

impl Membrane {
    pub(crate) fn new(modules: ModuleMap, message_rx: mpsc::UnboundedReceiver<ModuleMessage>) -> Self {
        Self {
            modules,
            message_rx,
        }
    }

    /// 분해된 패킷을 모든 활성 모듈에 전달하고 메시지를 수거합니다.
    ///
    /// 모듈 호출 순서는 규정되지 않으며, 모듈은 순서에 의존해서는
    /// 안 됩니다. 모듈이 entrypoint 반환 이후(다른 스레드)에 방출한
    /// 메시지는 다음 라운드에 수거됩니다.
    pub fn transmit(&mut self, id: u32, view: &PacketView, tv: Timeval) -> Vec<ModuleMessage> {
        let head = view.head_ptr();

        let mut dispatched = 0usize;
        for entry in self.modules.iter() {
            let module = entry.value();
            if !module.enabled() {
                continue;
            }
            // SAFETY: head는 이 스코프 동안 살아있는 view에서 얻은
            // 유효한 체인 포인터
            unsafe { module.dispatch(id, tv, head) };
            dispatched += 1;
        }

        let messages = self.drain_available();
        trace!(
            id,
            modules = dispatched,
            messages = messages.len(),
            "dispatch round complete"
        );
        messages
    }

    /// 지금 도착해 있는 메시지만 논블로킹으로 드레인합니다.
    fn drain_available(&mut self) -> Vec<ModuleMessage> {
        let mut messages = Vec::new();
        while let Ok(message) = self.message_rx.try_recv() {
            messages.push(message);
        }
        messages
    }

    /// 현재 디스패치 대상이 될 모듈 수를 반환합니다.
    pub fn active_module_count(&self) -> usize {
        self.modules.iter().filter(|e| e.value().enabled()).count()
    }
}

/// 모듈 호스트와 멤브레인의 빌더
///
/// 둘은 모듈 맵과 메시지 채널을 공유하므로 함께 생성됩니다.
pub struct MembraneBuilder {
    module_dir: std::path::PathBuf,
    watch: bool,
}

impl MembraneBuilder {
    /// 기본 설정의 빌더를 생성합니다.
    pub fn new() -> Self {
        Self {
            module_dir: std::path::PathBuf::from("/usr/lib/gatepost/modules"),
            watch: true,
        }
    }

    /// 모듈 디렉토리를 지정합니다.
    pub fn module_dir(mut self, dir: impl Into<std::path::PathBuf>) -> Self {
        self.module_dir = dir.into();
        self
    }

    /// 디렉토리 감시 여부를 지정합니다.
    pub fn watch(mut self, watch: bool) -> Self {
        self.watch = watch;
        self
    }

    /// 호스트와 멤브레인 쌍을 생성합니다.
    pub fn build(self) -> (ModuleHost, Membrane) {
        let modules: ModuleMap = Arc::new(dashmap::DashMap::new());
        let (message_tx, message_rx) = mpsc::unbounded_channel();

        let host = ModuleHost::new(self.module_dir, self.watch, Arc::clone(&modules), message_tx);
        let membrane = Membrane::new(modules, message_rx);
        (host, membrane)
    }
}

impl Default for MembraneBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::InspectionModule;
    use crate::testing::MockModule;
    use bytes::Bytes;

    fn ipv4_view() -> PacketView {
        PacketView::from_bytes(Bytes::from_static(&[
            0x45, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x40, 0x06, 0x00, 0x00, 192, 0, 2, 1,
            198, 51, 100, 7, b'p', b'l',
        ]))
    }

    fn builder_pair() -> (ModuleHost, Membrane) {
        MembraneBuilder::new()
            .module_dir("/tmp/unused")
            .watch(false)
            .build()
    }

    #[test]
    fn zero_modules_yield_zero_messages() {
        let (_host, mut membrane) = builder_pair();
        let view = ipv4_view();
        let messages = membrane.transmit(1, &view, Timeval::default());
        assert!(messages.is_empty());
    }

    #[test]
    fn messages_from_all_modules_collected() {
        let (host, mut membrane) = builder_pair();
        host.insert_handle(
            "a.so",
            MockModule::with_sender("mod-a", &[10, 90], host.message_sender()),
        );
        host.insert_handle(
            "b.so",
            MockModule::with_sender("mod-b", &[5], host.message_sender()),
        );

        let view = ipv4_view();
        let mut messages = membrane.transmit(7, &view, Timeval::default());
        messages.sort_by_key(|m| m.code);

        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].code, 5);
        assert_eq!(messages[0].module_name, "mod-b");
        assert_eq!(messages[2].code, 90);
        assert_eq!(messages[2].module_name, "mod-a");
    }

    #[test]
    fn disabled_module_is_skipped() {
        let (host, mut membrane) = builder_pair();
        let module = MockModule::with_sender("off", &[99], host.message_sender());
        module.set_enabled(false);
        host.insert_handle("off.so", module.clone());

        let view = ipv4_view();
        let messages = membrane.transmit(1, &view, Timeval::default());
        assert!(messages.is_empty());
        assert_eq!(module.dispatch_count(), 0);
        assert_eq!(membrane.active_module_count(), 0);
    }

    #[test]
    fn messages_consumed_exactly_once() {
        let (host, mut membrane) = builder_pair();
        host.insert_handle(
            "m.so",
            MockModule::with_sender("once", &[42], host.message_sender()),
        );

        let view = ipv4_view();
        let first = membrane.transmit(1, &view, Timeval::default());
        assert_eq!(first.len(), 1);

        // 두 번째 라운드는 새 디스패치의 메시지만 수거
        let second = membrane.transmit(2, &view, Timeval::default());
        assert_eq!(second.len(), 1);
        assert!(second[0].text.contains("packet 2"));
    }

    #[test]
    fn late_messages_surface_in_next_round() {
        let (host, mut membrane) = builder_pair();
        let tx = host.message_sender();

        let view = ipv4_view();
        assert!(membrane.transmit(1, &view, Timeval::default()).is_empty());

        // 라운드 사이에 비동기로 도착한 메시지
        let port = crate::abi::MessagePort::new(uuid::Uuid::new_v4(), "async-mod", tx);
        port.push(70, "late arrival".to_owned());

        let next = membrane.transmit(2, &view, Timeval::default());
        assert_eq!(next.len(), 1);
        assert_eq!(next[0].code, 70);
    }

    #[test]
    fn drain_terminates_on_empty_channel() {
        // 드레인은 채널이 비는 즉시 끝난다 — 행 없이 즉시 반환
        let (_host, mut membrane) = builder_pair();
        let view = ipv4_view();
        let start = std::time::Instant::now();
        let _ = membrane.transmit(1, &view, Timeval::default());
        assert!(start.elapsed() < std::time::Duration::from_secs(1));
    }

    #[test]
    fn transmit_does_not_mutate_payload() {
        let (host, mut membrane) = builder_pair();
        host.insert_handle(
            "ro.so",
            MockModule::with_sender("readonly", &[1], host.message_sender()),
        );

        let original = Bytes::from_static(&[
            0x45, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x40, 0x06, 0x00, 0x00, 192, 0, 2, 1,
            198, 51, 100, 7, 0xDE, 0xAD,
        ]);
        let view = PacketView::from_bytes(original.clone());
        let _ = membrane.transmit(1, &view, Timeval::default());

        assert_eq!(view.payload(), &original);
    }
}
