//! 인플라이트 판정 테이블 — 세 상태 수명주기와 try-lock 규율
//!
//! 레지스트리는 커널 콜백 스레드(등록)와 RPC 태스크(폴링/판정)가
//! 공유하는 유일한 가변 상태입니다. 커널 콜백 컨텍스트를 지연시키지
//! 않기 위해 세 연산 모두 블로킹 lock 대신 try-lock을 사용하며,
//! 획득 실패는 호출자 재시도로 해소되는 일시 상태로 보고됩니다.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::debug;

use gatepost_core::error::RegistryError;
use gatepost_core::metrics as m;
use gatepost_core::types::{PacketHandle, Timeval};

/// 판정 요청 수명주기 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerdictState {
    /// 등록됨, 평가자 픽업 대기
    Reserved,
    /// 평가자에게 전달됨, 판정 대기
    Running,
    /// 판정 완료, 제거 직전
    Aborted,
}

/// verdict 도착 시 정확히 한 번 실행되는 콜백
type VerdictCallback = Box<dyn FnOnce(bool) + Send>;

/// 레지스트리 엔트리 — 패킷 한 개의 인플라이트 판정 요청
pub struct VerdictEntry {
    packet: PacketHandle,
    state: VerdictState,
    on_verdict: Option<VerdictCallback>,
}

impl VerdictEntry {
    /// Reserved 상태의 새 엔트리를 생성합니다.
    pub fn new(packet: PacketHandle, on_verdict: impl FnOnce(bool) + Send + 'static) -> Self {
        Self {
            packet,
            state: VerdictState::Reserved,
            on_verdict: Some(Box::new(on_verdict)),
        }
    }

    /// 현재 상태를 반환합니다.
    pub fn state(&self) -> VerdictState {
        self.state
    }

    /// 패킷 핸들을 반환합니다.
    pub fn packet(&self) -> &PacketHandle {
        &self.packet
    }
}

impl std::fmt::Debug for VerdictEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VerdictEntry")
            .field("packet", &self.packet)
            .field("state", &self.state)
            .finish()
    }
}

/// 폴링 배치의 원소 — 평가자에게 전달되는 패킷 사본
///
/// `bytes`는 `Bytes` 참조 카운트 복제이므로 페이로드는 복사되지 않습니다.
#[derive(Debug, Clone)]
pub struct PendingPacket {
    /// 커널이 부여한 패킷 id
    pub id: u32,
    /// 캡처 시각
    pub captured_at: Timeval,
    /// 원시 패킷 바이트
    pub bytes: Bytes,
}

/// 인플라이트 판정 테이블의 공유 핸들
///
/// 숨은 전역이 아니라 명시적 핸들로 주입됩니다. 캡처 워커와 RPC
/// 서버가 같은 핸들의 복제본을 갖습니다.
///
/// # 불변식
/// - 한 id는 동시에 최대 한 엔트리에만 존재
/// - 한 id는 한 폴링 사이클에서만 전달됨 (Reserved → Running 단방향)
/// - `on_verdict`는 최대 한 번만 실행됨
#[derive(Clone)]
pub struct VerdictRegistry {
    inner: Arc<Mutex<HashMap<u32, VerdictEntry>>>,
}

impl VerdictRegistry {
    /// 빈 레지스트리를 생성합니다.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// 새 판정 요청을 등록합니다.
    ///
    /// # 에러
    /// - [`RegistryError::Contended`]: try-lock 획득 실패. 엔트리는
    ///   저장되지 않으며, 호출자는 등록 실패로 취급해야 합니다.
    /// - [`RegistryError::Duplicate`]: 같은 id의 엔트리가 이미 존재.
    pub fn register(&self, entry: VerdictEntry) -> Result<(), RegistryError> {
        let Some(mut map) = self.inner.try_lock() else {
            metrics::counter!(m::REGISTRY_CONTENTION_TOTAL).increment(1);
            return Err(RegistryError::Contended);
        };

        let id = entry.packet.id;
        if map.contains_key(&id) {
            return Err(RegistryError::Duplicate(id));
        }

        map.insert(id, entry);
        metrics::gauge!(m::REGISTRY_PENDING).set(map.len() as f64);
        Ok(())
    }

    /// Reserved 상태의 엔트리를 모두 Running으로 전이하고 복사해 반환합니다.
    ///
    /// try-lock 획득에 실패하면 빈 배치를 반환합니다. 호출자는 자신의
    /// 폴링 주기로 재시도합니다. 이미 Running인 엔트리는 제외되므로
    /// 한 등록 건은 정확히 한 번만 전달됩니다.
    pub fn poll_pending(&self) -> Vec<PendingPacket> {
        let Some(mut map) = self.inner.try_lock() else {
            metrics::counter!(m::REGISTRY_CONTENTION_TOTAL).increment(1);
            return Vec::new();
        };

        let mut batch = Vec::new();
        for entry in map.values_mut() {
            if entry.state == VerdictState::Reserved {
                entry.state = VerdictState::Running;
                batch.push(PendingPacket {
                    id: entry.packet.id,
                    captured_at: entry.packet.captured_at,
                    bytes: entry.packet.bytes.clone(),
                });
            }
        }

        if !batch.is_empty() {
            debug!(count = batch.len(), "handed pending packets to evaluator");
        }
        batch
    }

    /// verdict 배치를 적용합니다.
    ///
    /// 전체 배치를 먼저 검증한 뒤에 적용합니다. 알 수 없는 id가 하나라도
    /// 있으면 아무 콜백도 실행하지 않고 [`RegistryError::UnknownId`]를
    /// 반환하므로, 호출자는 해당 id를 제외하고 배치 전체를 안전하게
    /// 재시도할 수 있습니다.
    ///
    /// # 에러
    /// - [`RegistryError::Contended`]: try-lock 획득 실패, 상태 변화 없음.
    /// - [`RegistryError::UnknownId`]: 등록된 적 없는 id. 프로토콜 에러.
    pub fn set_verdicts(&self, verdicts: &[(u32, bool)]) -> Result<usize, RegistryError> {
        let Some(mut map) = self.inner.try_lock() else {
            metrics::counter!(m::REGISTRY_CONTENTION_TOTAL).increment(1);
            return Err(RegistryError::Contended);
        };

        for (id, _) in verdicts {
            if !map.contains_key(id) {
                return Err(RegistryError::UnknownId(*id));
            }
        }

        for (id, accept) in verdicts {
            // 위에서 검증했으므로 엔트리는 존재함
            if let Some(mut entry) = map.remove(id) {
                entry.state = VerdictState::Aborted;
                if let Some(callback) = entry.on_verdict.take() {
                    callback(*accept);
                }
            }
        }

        metrics::gauge!(m::REGISTRY_PENDING).set(map.len() as f64);
        Ok(verdicts.len())
    }

    /// 엔트리를 제거합니다 (verdict 타임아웃 경로).
    ///
    /// 제거되면 해당 엔트리의 콜백은 이후 절대 실행되지 않습니다.
    /// `false` 반환은 verdict가 이미 도착해 엔트리가 소거되었음을
    /// 뜻하므로, 호출자는 늦게 도착한 verdict를 회수할 수 있습니다.
    ///
    /// 타임아웃 경로는 커널 콜백의 지연에 더는 민감하지 않으므로
    /// 여기서는 블로킹 lock을 사용합니다.
    pub fn evict(&self, id: u32) -> bool {
        let mut map = self.inner.lock();
        let removed = map.remove(&id).is_some();
        if removed {
            metrics::gauge!(m::REGISTRY_PENDING).set(map.len() as f64);
        }
        removed
    }

    /// 현재 보유 중인 엔트리 수를 반환합니다.
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// 레지스트리가 비어있는지 확인합니다.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

impl Default for VerdictRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::mpsc;

    fn handle(id: u32) -> PacketHandle {
        PacketHandle::new(id, Bytes::from_static(b"\x45packet"), Timeval::new(100, 0))
    }

    #[test]
    fn register_then_poll_then_verdict() {
        let registry = VerdictRegistry::new();
        let (tx, rx) = mpsc::channel();

        registry
            .register(VerdictEntry::new(handle(1), move |accept| {
                tx.send(accept).unwrap();
            }))
            .unwrap();
        assert_eq!(registry.len(), 1);

        let batch = registry.poll_pending();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].id, 1);
        assert_eq!(batch[0].captured_at, Timeval::new(100, 0));

        let applied = registry.set_verdicts(&[(1, true)]).unwrap();
        assert_eq!(applied, 1);
        assert!(rx.try_recv().unwrap());
        assert!(registry.is_empty());
    }

    #[test]
    fn duplicate_register_fails() {
        let registry = VerdictRegistry::new();
        registry
            .register(VerdictEntry::new(handle(7), |_| {}))
            .unwrap();

        let err = registry
            .register(VerdictEntry::new(handle(7), |_| {}))
            .unwrap_err();
        assert!(matches!(err, RegistryError::Duplicate(7)));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn poll_delivers_each_registration_exactly_once() {
        let registry = VerdictRegistry::new();
        registry
            .register(VerdictEntry::new(handle(1), |_| {}))
            .unwrap();
        registry
            .register(VerdictEntry::new(handle(2), |_| {}))
            .unwrap();

        let first = registry.poll_pending();
        assert_eq!(first.len(), 2);

        // 이미 Running인 엔트리는 다시 전달되지 않음
        let second = registry.poll_pending();
        assert!(second.is_empty());

        // 새 등록만 다음 배치에 나타남
        registry
            .register(VerdictEntry::new(handle(3), |_| {}))
            .unwrap();
        let third = registry.poll_pending();
        assert_eq!(third.len(), 1);
        assert_eq!(third[0].id, 3);
    }

    #[test]
    fn empty_poll_is_idempotent() {
        let registry = VerdictRegistry::new();
        assert!(registry.poll_pending().is_empty());
        assert!(registry.poll_pending().is_empty());
        assert!(registry.is_empty());
    }

    #[test]
    fn verdict_for_unknown_id_is_hard_error() {
        let registry = VerdictRegistry::new();
        let err = registry.set_verdicts(&[(99, true)]).unwrap_err();
        assert!(matches!(err, RegistryError::UnknownId(99)));
    }

    #[test]
    fn unknown_id_in_batch_fires_no_callbacks() {
        let registry = VerdictRegistry::new();
        let fired = Arc::new(AtomicU32::new(0));
        let counter = fired.clone();
        registry
            .register(VerdictEntry::new(handle(1), move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();
        registry.poll_pending();

        let err = registry.set_verdicts(&[(1, true), (2, false)]).unwrap_err();
        assert!(matches!(err, RegistryError::UnknownId(2)));
        // 유효한 엔트리도 건드리지 않았으므로 배치 재시도가 안전함
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert_eq!(registry.len(), 1);

        registry.set_verdicts(&[(1, true)]).unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn callback_fires_at_most_once() {
        let registry = VerdictRegistry::new();
        let fired = Arc::new(AtomicU32::new(0));
        let counter = fired.clone();
        registry
            .register(VerdictEntry::new(handle(5), move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();
        registry.poll_pending();
        registry.set_verdicts(&[(5, false)]).unwrap();

        // 같은 id로 다시 verdict를 보내면 UnknownId — 콜백은 두 번 실행되지 않음
        let err = registry.set_verdicts(&[(5, false)]).unwrap_err();
        assert!(matches!(err, RegistryError::UnknownId(5)));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn verdict_value_reaches_callback() {
        let registry = VerdictRegistry::new();
        let (tx, rx) = mpsc::channel();
        let tx2 = tx.clone();
        registry
            .register(VerdictEntry::new(handle(1), move |a| tx.send((1, a)).unwrap()))
            .unwrap();
        registry
            .register(VerdictEntry::new(handle(2), move |a| {
                tx2.send((2, a)).unwrap()
            }))
            .unwrap();
        registry.poll_pending();
        registry.set_verdicts(&[(1, true), (2, false)]).unwrap();

        let mut results: Vec<(u32, bool)> = vec![rx.try_recv().unwrap(), rx.try_recv().unwrap()];
        results.sort_unstable();
        assert_eq!(results, vec![(1, true), (2, false)]);
    }

    #[test]
    fn evict_prevents_future_callback() {
        let registry = VerdictRegistry::new();
        let fired = Arc::new(AtomicU32::new(0));
        let counter = fired.clone();
        registry
            .register(VerdictEntry::new(handle(8), move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();
        registry.poll_pending();

        assert!(registry.evict(8));
        assert!(!registry.evict(8));

        let err = registry.set_verdicts(&[(8, true)]).unwrap_err();
        assert!(matches!(err, RegistryError::UnknownId(8)));
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn concurrent_same_id_register_exactly_one_wins() {
        let registry = VerdictRegistry::new();
        let successes = Arc::new(AtomicU32::new(0));
        let failures = Arc::new(AtomicU32::new(0));

        let threads: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                let successes = successes.clone();
                let failures = failures.clone();
                std::thread::spawn(move || {
                    // Contended는 재시도, Duplicate만 최종 실패로 집계
                    loop {
                        match registry.register(VerdictEntry::new(handle(42), |_| {})) {
                            Ok(()) => {
                                successes.fetch_add(1, Ordering::SeqCst);
                                break;
                            }
                            Err(RegistryError::Contended) => std::thread::yield_now(),
                            Err(_) => {
                                failures.fetch_add(1, Ordering::SeqCst);
                                break;
                            }
                        }
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }

        assert_eq!(successes.load(Ordering::SeqCst), 1);
        assert_eq!(failures.load(Ordering::SeqCst), 7);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn pending_bytes_share_payload() {
        let registry = VerdictRegistry::new();
        let payload = Bytes::from(vec![0x45; 1500]);
        registry
            .register(VerdictEntry::new(
                PacketHandle::new(1, payload.clone(), Timeval::default()),
                |_| {},
            ))
            .unwrap();
        let batch = registry.poll_pending();
        // 참조 카운트 복제 — 같은 내용, 복사 없음
        assert_eq!(batch[0].bytes, payload);
    }
}
