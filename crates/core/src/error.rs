//! 에러 타입 — 도메인별 에러 정의

/// Gatepost 최상위 에러 타입
#[derive(Debug, thiserror::Error)]
pub enum GatepostError {
    /// 설정 관련 에러
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// 판정 레지스트리 에러
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    /// 커널 큐 브리지 에러
    #[error("bridge error: {0}")]
    Bridge(#[from] BridgeError),

    /// 모듈 로드/디스패치 에러
    #[error("module error: {0}")]
    Module(#[from] ModuleError),

    /// RPC 에러
    #[error("rpc error: {0}")]
    Rpc(#[from] RpcError),

    /// 컴포넌트 생명주기 에러
    #[error("pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    /// I/O 에러
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// 컴포넌트 생명주기 에러
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// 이미 실행 중인 컴포넌트의 start
    #[error("component is already running")]
    AlreadyRunning,

    /// 실행 중이 아닌 컴포넌트의 stop
    #[error("component is not running")]
    NotRunning,

    /// 컴포넌트 초기화 실패
    #[error("component init failed: {0}")]
    InitFailed(String),
}

/// 설정 관련 에러
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// 설정 파일을 찾을 수 없음
    #[error("config file not found: {path}")]
    FileNotFound { path: String },

    /// 설정 파싱 실패
    #[error("failed to parse config: {reason}")]
    ParseFailed { reason: String },

    /// 유효하지 않은 설정 값
    #[error("invalid config value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

/// 판정 레지스트리 에러
///
/// `Contended`는 재시도 가능한 일시 상태이고, 나머지는 프로토콜 위반을
/// 나타내는 하드 에러입니다.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// try-lock 획득 실패 — 호출자가 재시도해야 함
    #[error("registry lock contended, retry")]
    Contended,

    /// 동일 id의 엔트리가 이미 존재함
    #[error("packet {0} is already registered")]
    Duplicate(u32),

    /// 등록된 적 없는 id에 대한 verdict
    #[error("verdict for unknown packet {0}")]
    UnknownId(u32),
}

impl RegistryError {
    /// 재시도로 해소될 수 있는 에러인지 확인합니다.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Contended)
    }
}

/// 커널 큐 브리지 에러
///
/// 모두 시작 시점 또는 수신 루프의 치명적 실패입니다. 패킷 단위
/// 추출 실패는 에러가 아니라 fail-open accept로 처리됩니다.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// 큐 핸들 오픈 실패
    #[error("nfq_open(): {0}")]
    Open(String),

    /// 주소 패밀리 바인딩/언바인딩 실패
    #[error("nfq_{op}_pf(): {errno}")]
    Bind { op: &'static str, errno: String },

    /// 큐 생성 실패
    #[error("nfq_create_queue({num}): {errno}")]
    CreateQueue { num: u16, errno: String },

    /// 복사 모드 설정 실패
    #[error("nfq_set_mode(): {0}")]
    SetMode(String),

    /// 수신 루프의 치명적 recv 실패
    #[error("recv(): {0}")]
    Recv(String),

    /// 지원하지 않는 플랫폼
    #[error("netfilter_queue is only supported on Linux")]
    Unsupported,
}

/// 모듈 로드/언로드 에러
///
/// 개별 모듈에 국한되며, 다른 모듈의 로드에 영향을 주지 않습니다.
#[derive(Debug, thiserror::Error)]
pub enum ModuleError {
    /// 디스크립터 파일 읽기/파싱 실패
    #[error("module descriptor error: {path}: {reason}")]
    Descriptor { path: String, reason: String },

    /// 네이티브 라이브러리 로드 실패
    #[error("failed to load module library: {path}: {reason}")]
    Load { path: String, reason: String },

    /// 필수 심볼 누락
    #[error("module '{module}' is missing required symbol '{symbol}'")]
    MissingSymbol { module: String, symbol: String },

    /// 모듈 디렉토리 감시 실패
    #[error("module directory watch error: {0}")]
    Watch(String),

    /// 알 수 없는 모듈 id에 대한 활성화 토글
    #[error("unknown module id: {0}")]
    UnknownModule(uuid::Uuid),
}

/// RPC 에러
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    /// 소켓 연결/수신 실패
    #[error("transport error: {0}")]
    Transport(String),

    /// 프레임 직렬화/역직렬화 실패
    #[error("codec error: {0}")]
    Codec(String),

    /// 상대 프로세스가 보고한 프로토콜 에러
    #[error("remote error: {0}")]
    Remote(String),
}
