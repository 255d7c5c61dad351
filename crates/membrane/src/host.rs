//! 모듈 호스트 — 네이티브 검사 모듈의 로드/언로드/감시
//!
//! 모듈 맵은 동시 읽기(멤브레인 디스패치)와 이벤트 시 배타 쓰기(감시
//! 콜백)가 공존하는 구조이므로 샤드 락 기반 [`DashMap`]을 사용합니다.
//! 읽기(디스패치 핫패스)가 감시 스레드의 쓰기를 막지 않고, 그 반대도
//! 마찬가지입니다.
//!
//! 맵에 노출된 핸들은 항상 완전히 초기화된 상태입니다. 심볼 해석이나
//! 디스크립터 로드에 실패한 모듈은 라이브러리가 즉시 언로드되고 맵에
//! 들어가지 않습니다.

use std::ffi::c_void;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use libloading::Library;
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use gatepost_core::error::{GatepostError, ModuleError, PipelineError};
use gatepost_core::metrics as m;
use gatepost_core::pipeline::{HealthStatus, Pipeline};
use gatepost_core::types::{ModuleInfo, ModuleMessage, Timeval};
use gatepost_packet_view::PacketSegment;

use crate::abi::{self, MessagePort, ModuleEntryFn, ModuleInitFn};
use crate::descriptor;

/// 모듈 파일 확장자
const MODULE_EXTENSION: &str = "so";

/// 파일명 → 모듈 핸들의 동시 맵
pub(crate) type ModuleMap = Arc<DashMap<String, Arc<dyn InspectionModule>>>;

/// 검사 모듈의 디스패치 인터페이스
///
/// 운영 구현은 네이티브 라이브러리를 감싼 [`ModuleHandle`]이고,
/// 테스트는 인프로세스 구현을 사용합니다.
pub trait InspectionModule: Send + Sync {
    /// 디스크립터에서 읽은 모듈 메타데이터
    fn info(&self) -> &ModuleInfo;

    /// 현재 디스패치 대상 여부
    fn enabled(&self) -> bool;

    /// 디스패치 대상 여부를 토글합니다.
    fn set_enabled(&self, enabled: bool);

    /// 모듈 entrypoint를 호출합니다.
    ///
    /// # Safety
    /// `head`는 살아있는 [`PacketView`](gatepost_packet_view::PacketView)
    /// 에서 얻은 유효한 세그먼트 체인 포인터여야 하며, 호출이 반환될
    /// 때까지 뷰가 살아있어야 합니다.
    unsafe fn dispatch(&self, id: u32, tv: Timeval, head: *const PacketSegment);
}

/// 로드된 네이티브 모듈 핸들
///
/// 라이브러리 참조를 배타 소유하며, 핸들이 드롭될 때 정확히 한 번
/// 언로드됩니다. `info.enabled`는 디스크립터의 초기값이고, 런타임
/// 토글은 원자 플래그가 담당합니다.
pub struct ModuleHandle {
    info: ModuleInfo,
    enabled: AtomicBool,
    entry: ModuleEntryFn,
    /// 모듈 initialize에 전달된 컨텍스트 — 라이브러리보다 오래 살아야 함
    _port: Arc<MessagePort>,
    /// 심볼 포인터의 수명 담보 — 마지막에 드롭
    _library: Library,
}

impl InspectionModule for ModuleHandle {
    fn info(&self) -> &ModuleInfo {
        &self.info
    }

    fn enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    unsafe fn dispatch(&self, id: u32, tv: Timeval, head: *const PacketSegment) {
        // SAFETY: entry는 _library가 살아있는 동안 유효한 심볼이고,
        // head의 유효성은 호출자 계약
        unsafe { (self.entry)(id, tv, head) }
    }
}

/// 호스트 실행 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HostState {
    Initialized,
    Running,
    Stopped,
}

/// 모듈 호스트
///
/// 시작 시 모듈 디렉토리를 스캔해 모든 모듈을 로드하고, 이후
/// 생성/삭제/이름변경 이벤트를 감시하여 맵을 갱신합니다.
pub struct ModuleHost {
    module_dir: PathBuf,
    watch: bool,
    state: HostState,
    modules: ModuleMap,
    message_tx: mpsc::UnboundedSender<ModuleMessage>,
    watcher: Option<RecommendedWatcher>,
}

impl ModuleHost {
    pub(crate) fn new(
        module_dir: PathBuf,
        watch: bool,
        modules: ModuleMap,
        message_tx: mpsc::UnboundedSender<ModuleMessage>,
    ) -> Self {
        Self {
            module_dir,
            watch,
            state: HostState::Initialized,
            modules,
            message_tx,
            watcher: None,
        }
    }

    /// 현재 로드된 모듈 수를 반환합니다.
    pub fn module_count(&self) -> usize {
        self.modules.len()
    }

    /// 메시지 수집 채널의 송신측을 반환합니다.
    ///
    /// 인프로세스 모듈([`insert_handle`](Self::insert_handle))이 파일
    /// 기반 모듈과 같은 채널로 메시지를 방출할 때 사용합니다.
    pub fn message_sender(&self) -> mpsc::UnboundedSender<ModuleMessage> {
        self.message_tx.clone()
    }

    /// 현재 핸들의 스냅샷을 반환합니다.
    pub fn handles(&self) -> Vec<Arc<dyn InspectionModule>> {
        self.modules.iter().map(|e| Arc::clone(e.value())).collect()
    }

    /// 모듈 id로 디스패치 대상 여부를 토글합니다 (원격 활성화 인터페이스).
    pub fn set_enabled(&self, module_id: Uuid, enabled: bool) -> Result<(), ModuleError> {
        for entry in self.modules.iter() {
            if entry.value().info().id == module_id {
                entry.value().set_enabled(enabled);
                info!(module = %entry.value().info().name, enabled, "module activation toggled");
                return Ok(());
            }
        }
        Err(ModuleError::UnknownModule(module_id))
    }

    /// 인프로세스 모듈 핸들을 맵에 등록합니다.
    ///
    /// 파일시스템을 거치지 않는 내장/테스트 모듈용입니다. 파일 기반
    /// 모듈과 동일한 충돌 규칙을 따릅니다 (기존 엔트리가 이김).
    pub fn insert_handle(&self, name: impl Into<String>, handle: Arc<dyn InspectionModule>) {
        let name = name.into();
        match self.modules.entry(name.clone()) {
            Entry::Occupied(_) => {
                warn!(module = %name, "handle already registered, keeping existing entry");
            }
            Entry::Vacant(slot) => {
                slot.insert(handle);
            }
        }
        update_loaded_gauge(&self.modules);
    }

    /// 디렉토리를 스캔해 모든 모듈 파일을 로드합니다.
    fn scan_directory(&self) -> Result<(), GatepostError> {
        let entries = std::fs::read_dir(&self.module_dir)?;
        for dir_entry in entries {
            let path = dir_entry?.path();
            if module_key(&path).is_some() {
                load_and_insert(&self.modules, &self.message_tx, &path);
            }
        }
        Ok(())
    }

    /// 디렉토리 감시를 시작합니다.
    fn start_watcher(&mut self) -> Result<(), ModuleError> {
        let modules = Arc::clone(&self.modules);
        let message_tx = self.message_tx.clone();

        let mut watcher =
            notify::recommended_watcher(move |result: Result<Event, notify::Error>| {
                match result {
                    Ok(event) => handle_fs_event(&modules, &message_tx, event),
                    Err(e) => warn!(error = %e, "module directory watch event error"),
                }
            })
            .map_err(|e| ModuleError::Watch(e.to_string()))?;

        watcher
            .watch(&self.module_dir, RecursiveMode::NonRecursive)
            .map_err(|e| ModuleError::Watch(e.to_string()))?;

        self.watcher = Some(watcher);
        Ok(())
    }
}

impl Pipeline for ModuleHost {
    /// 디렉토리를 스캔하고 감시를 시작합니다.
    async fn start(&mut self) -> Result<(), GatepostError> {
        if self.state == HostState::Running {
            return Err(PipelineError::AlreadyRunning.into());
        }

        info!(dir = %self.module_dir.display(), "scanning module directory");
        self.scan_directory()?;
        info!(modules = self.module_count(), "module scan complete");

        if self.watch {
            self.start_watcher()?;
            debug!("module directory watch active");
        }

        self.state = HostState::Running;
        Ok(())
    }

    /// 감시를 멈추고 모든 모듈을 언로드합니다.
    async fn stop(&mut self) -> Result<(), GatepostError> {
        if self.state != HostState::Running {
            return Err(PipelineError::NotRunning.into());
        }

        self.watcher = None;
        self.modules.clear();
        update_loaded_gauge(&self.modules);

        self.state = HostState::Stopped;
        info!("module host stopped");
        Ok(())
    }

    async fn health_check(&self) -> HealthStatus {
        match self.state {
            HostState::Running => HealthStatus::Healthy,
            HostState::Initialized => HealthStatus::Unhealthy("not started".to_owned()),
            HostState::Stopped => HealthStatus::Unhealthy("stopped".to_owned()),
        }
    }
}

/// 경로가 모듈 파일이면 맵 키(파일명)를 반환합니다.
fn module_key(path: &Path) -> Option<String> {
    if path.extension()?.to_str()? != MODULE_EXTENSION {
        return None;
    }
    Some(path.file_name()?.to_string_lossy().into_owned())
}

/// 로드된 모듈 수 게이지를 갱신합니다.
fn update_loaded_gauge(map: &DashMap<String, Arc<dyn InspectionModule>>) {
    metrics::gauge!(m::MEMBRANE_MODULES_LOADED).set(map.len() as f64);
}

/// 파일시스템 이벤트 하나를 맵 갱신으로 변환합니다.
fn handle_fs_event(
    map: &DashMap<String, Arc<dyn InspectionModule>>,
    message_tx: &mpsc::UnboundedSender<ModuleMessage>,
    event: Event,
) {
    match event.kind {
        EventKind::Create(_) => {
            for path in &event.paths {
                if module_key(path).is_some() {
                    load_and_insert(map, message_tx, path);
                }
            }
        }
        EventKind::Remove(_) => {
            for path in &event.paths {
                if let Some(key) = module_key(path) {
                    remove_module(map, &key);
                }
            }
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            // paths = [이전 이름, 새 이름]
            if let [from, to] = event.paths.as_slice() {
                match (module_key(from), module_key(to)) {
                    (Some(old_key), Some(new_key)) => rekey_module(map, &old_key, new_key),
                    // 모듈 디렉토리 밖으로/안으로의 확장자 변경
                    (Some(old_key), None) => remove_module(map, &old_key),
                    (None, Some(_)) => load_and_insert(map, message_tx, to),
                    (None, None) => {}
                }
            } else {
                warn!("rename event without both paths");
            }
        }
        // inotify가 rename을 분리된 이벤트로 보고하는 경우
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
            for path in &event.paths {
                if let Some(key) = module_key(path) {
                    remove_module(map, &key);
                }
            }
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
            for path in &event.paths {
                if module_key(path).is_some() {
                    load_and_insert(map, message_tx, path);
                }
            }
        }
        _ => {}
    }
}

/// 모듈 파일을 로드해 맵에 삽입합니다.
///
/// 로드 실패는 해당 모듈에 국한됩니다. id 충돌(중복 생성 이벤트) 시
/// 패자는 언로드되고 기존 엔트리가 유지됩니다.
fn load_and_insert(
    map: &DashMap<String, Arc<dyn InspectionModule>>,
    message_tx: &mpsc::UnboundedSender<ModuleMessage>,
    path: &Path,
) {
    let Some(key) = module_key(path) else {
        return;
    };

    match load_module(path, message_tx) {
        Ok(handle) => match map.entry(key.clone()) {
            Entry::Occupied(_) => {
                // 중복 생성 이벤트 — 패자 언로드, 기존 엔트리 승리
                warn!(module = %key, "duplicate module load, keeping existing entry");
                drop(handle);
            }
            Entry::Vacant(slot) => {
                info!(module = %key, info = %handle.info(), "module loaded");
                slot.insert(handle);
                update_loaded_gauge(map);
            }
        },
        Err(e) => {
            warn!(module = %key, error = %e, "module load failed, excluded from dispatch");
            metrics::counter!(m::MEMBRANE_LOAD_FAILURES_TOTAL).increment(1);
        }
    }
}

/// 모듈을 맵에서 제거하고 언로드합니다.
fn remove_module(map: &DashMap<String, Arc<dyn InspectionModule>>, key: &str) {
    if map.remove(key).is_some() {
        info!(module = key, "module unloaded");
        update_loaded_gauge(map);
    }
}

/// 기존 핸들을 새 키로 재등록합니다.
///
/// 새 키가 이미 점유되어 있으면 이동한 핸들을 언로드하고 원본을
/// 유지합니다.
fn rekey_module(map: &DashMap<String, Arc<dyn InspectionModule>>, old_key: &str, new_key: String) {
    let Some((_, handle)) = map.remove(old_key) else {
        return;
    };
    match map.entry(new_key.clone()) {
        Entry::Occupied(_) => {
            warn!(
                from = old_key,
                to = %new_key,
                "rename collision, unloading moved module"
            );
            drop(handle);
            update_loaded_gauge(map);
        }
        Entry::Vacant(slot) => {
            debug!(from = old_key, to = %new_key, "module re-keyed");
            slot.insert(handle);
        }
    }
}

/// 모듈 파일 하나를 로드합니다.
///
/// 디스크립터 로드 → 라이브러리 로드 → 두 필수 심볼 해석이 모두
/// 성공한 다음에야 initialize를 호출하고 핸들을 만듭니다. 어느
/// 단계든 실패하면 부분 로드된 라이브러리는 드롭(언로드)되고 핸들은
/// 노출되지 않습니다.
fn load_module(
    path: &Path,
    message_tx: &mpsc::UnboundedSender<ModuleMessage>,
) -> Result<Arc<dyn InspectionModule>, ModuleError> {
    let info = descriptor::read_descriptor(&descriptor::descriptor_path(path))?;

    // SAFETY: 모듈 디렉토리는 배포자가 관리하는 신뢰 경계 내부이며,
    // 라이브러리 로드는 임의 초기화 코드를 실행할 수 있다
    let library = unsafe { Library::new(path) }.map_err(|e| ModuleError::Load {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;

    // SAFETY: 시그니처는 모듈 ABI 계약
    let entry: ModuleEntryFn = unsafe { library.get::<ModuleEntryFn>(abi::SYM_ENTRYPOINT) }
        .map(|symbol| *symbol)
        .map_err(|_| ModuleError::MissingSymbol {
            module: info.name.clone(),
            symbol: "entrypoint".to_owned(),
        })?;

    // SAFETY: 시그니처는 모듈 ABI 계약
    let init: ModuleInitFn = unsafe { library.get::<ModuleInitFn>(abi::SYM_INITIALIZE) }
        .map(|symbol| *symbol)
        .map_err(|_| ModuleError::MissingSymbol {
            module: info.name.clone(),
            symbol: "initialize".to_owned(),
        })?;

    let port = Arc::new(MessagePort::new(info.id, info.name.clone(), message_tx.clone()));
    let ctx = Arc::as_ptr(&port).cast::<c_void>();

    // SAFETY: ctx는 핸들이 소유한 포트라서 라이브러리 언로드 전까지
    // 유효하고, deliver_message는 ABI 시그니처와 일치
    unsafe { init(ctx, abi::deliver_message) };

    Ok(Arc::new(ModuleHandle {
        enabled: AtomicBool::new(info.enabled),
        info,
        entry,
        _port: port,
        _library: library,
    }))
}
