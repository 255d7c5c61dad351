//! 설정 관리 — gatepost.toml 파싱 및 런타임 설정
//!
//! [`GatepostConfig`]는 캡처 호스트와 평가자 양쪽 바이너리의 설정을 담는
//! 최상위 구조체입니다. 각 프로세스는 자기 섹션만 읽어 사용합니다.
//!
//! # 설정 로딩 우선순위
//! 1. CLI 인자 (최고 우선)
//! 2. 환경변수 (`GATEPOST_QUEUE_QUEUE_NUM=3` 형식)
//! 3. 설정 파일 (`gatepost.toml`)
//! 4. 기본값 (`Default` 구현)

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ConfigError, GatepostError};

/// Gatepost 통합 설정
///
/// `gatepost.toml` 파일의 최상위 구조를 나타냅니다.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatepostConfig {
    /// 일반 설정
    #[serde(default)]
    pub general: GeneralConfig,
    /// 커널 큐 설정
    #[serde(default)]
    pub queue: QueueConfig,
    /// RPC 소켓 설정
    #[serde(default)]
    pub rpc: RpcConfig,
    /// 모듈 호스트 설정
    #[serde(default)]
    pub membrane: MembraneConfig,
    /// 판정 정책 설정
    #[serde(default)]
    pub verdict: VerdictConfig,
    /// 메트릭 설정
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl GatepostConfig {
    /// TOML 파일에서 설정을 로드하고 환경변수 오버라이드를 적용합니다.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, GatepostError> {
        let mut config = Self::from_file(path).await?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// TOML 파일에서 설정을 로드합니다 (환경변수 오버라이드 없음).
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, GatepostError> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                GatepostError::Config(ConfigError::FileNotFound {
                    path: path.display().to_string(),
                })
            } else {
                GatepostError::Io(e)
            }
        })?;
        let config = Self::parse(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// TOML 문자열에서 설정을 파싱합니다.
    pub fn parse(toml_str: &str) -> Result<Self, GatepostError> {
        toml::from_str(toml_str).map_err(|e| {
            GatepostError::Config(ConfigError::ParseFailed {
                reason: e.to_string(),
            })
        })
    }

    /// 환경변수로 설정값을 오버라이드합니다.
    ///
    /// 환경변수 네이밍 규칙: `GATEPOST_{SECTION}_{FIELD}`
    pub fn apply_env_overrides(&mut self) {
        // General
        override_string(&mut self.general.log_level, "GATEPOST_GENERAL_LOG_LEVEL");
        override_string(&mut self.general.log_format, "GATEPOST_GENERAL_LOG_FORMAT");

        // Queue
        override_u16(&mut self.queue.queue_num, "GATEPOST_QUEUE_QUEUE_NUM");
        override_u32(&mut self.queue.copy_range, "GATEPOST_QUEUE_COPY_RANGE");

        // RPC
        override_string(&mut self.rpc.socket_path, "GATEPOST_RPC_SOCKET_PATH");
        override_usize(&mut self.rpc.max_frame_bytes, "GATEPOST_RPC_MAX_FRAME_BYTES");

        // Membrane
        override_string(&mut self.membrane.module_dir, "GATEPOST_MEMBRANE_MODULE_DIR");
        override_bool(&mut self.membrane.watch, "GATEPOST_MEMBRANE_WATCH");

        // Verdict
        override_u64(&mut self.verdict.timeout_ms, "GATEPOST_VERDICT_TIMEOUT_MS");
        override_string(&mut self.verdict.on_timeout, "GATEPOST_VERDICT_ON_TIMEOUT");
        override_u16(
            &mut self.verdict.warning_threshold,
            "GATEPOST_VERDICT_WARNING_THRESHOLD",
        );
        override_u16(
            &mut self.verdict.error_threshold,
            "GATEPOST_VERDICT_ERROR_THRESHOLD",
        );
        override_u64(
            &mut self.verdict.poll_interval_ms,
            "GATEPOST_VERDICT_POLL_INTERVAL_MS",
        );

        // Metrics
        override_bool(&mut self.metrics.enabled, "GATEPOST_METRICS_ENABLED");
        override_string(&mut self.metrics.listen_addr, "GATEPOST_METRICS_LISTEN_ADDR");
        override_u16(&mut self.metrics.port, "GATEPOST_METRICS_PORT");
    }

    /// 설정값의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), GatepostError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.general.log_level.as_str()) {
            return Err(ConfigError::InvalidValue {
                field: "general.log_level".to_owned(),
                reason: format!("must be one of: {}", valid_levels.join(", ")),
            }
            .into());
        }

        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.general.log_format.as_str()) {
            return Err(ConfigError::InvalidValue {
                field: "general.log_format".to_owned(),
                reason: format!("must be one of: {}", valid_formats.join(", ")),
            }
            .into());
        }

        if self.rpc.socket_path.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "rpc.socket_path".to_owned(),
                reason: "socket path must not be empty".to_owned(),
            }
            .into());
        }

        if self.rpc.max_frame_bytes == 0 {
            return Err(ConfigError::InvalidValue {
                field: "rpc.max_frame_bytes".to_owned(),
                reason: "frame limit must be positive".to_owned(),
            }
            .into());
        }

        let valid_timeout_policies = ["accept", "drop"];
        if !valid_timeout_policies.contains(&self.verdict.on_timeout.as_str()) {
            return Err(ConfigError::InvalidValue {
                field: "verdict.on_timeout".to_owned(),
                reason: format!("must be one of: {}", valid_timeout_policies.join(", ")),
            }
            .into());
        }

        if self.verdict.warning_threshold >= self.verdict.error_threshold {
            return Err(ConfigError::InvalidValue {
                field: "verdict.warning_threshold".to_owned(),
                reason: "warning threshold must be below error threshold".to_owned(),
            }
            .into());
        }

        if self.verdict.poll_interval_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "verdict.poll_interval_ms".to_owned(),
                reason: "poll interval must be positive".to_owned(),
            }
            .into());
        }

        Ok(())
    }

    /// 판정 정책 섹션으로부터 [`VerdictPolicy`](crate::types::VerdictPolicy)를 구성합니다.
    pub fn verdict_policy(&self) -> crate::types::VerdictPolicy {
        crate::types::VerdictPolicy::new(
            self.verdict.warning_threshold,
            self.verdict.error_threshold,
        )
    }
}

/// 일반 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// 로그 레벨 (trace, debug, info, warn, error)
    pub log_level: String,
    /// 로그 형식 (json, pretty)
    pub log_format: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_owned(),
            log_format: "json".to_owned(),
        }
    }
}

/// 커널 큐 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// netfilter 큐 번호
    pub queue_num: u16,
    /// 커널이 복사해 줄 최대 페이로드 길이
    pub copy_range: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            queue_num: 0,
            copy_range: 0xFFFF,
        }
    }
}

/// RPC 소켓 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcConfig {
    /// 유닉스 도메인 소켓 경로
    pub socket_path: String,
    /// 프레임 최대 길이 (바이트)
    pub max_frame_bytes: usize,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            socket_path: "/run/gatepost/registry.sock".to_owned(),
            max_frame_bytes: 4 * 1024 * 1024,
        }
    }
}

/// 모듈 호스트 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MembraneConfig {
    /// 네이티브 모듈 디렉토리
    pub module_dir: String,
    /// 디렉토리 변경 감시 여부
    pub watch: bool,
}

impl Default for MembraneConfig {
    fn default() -> Self {
        Self {
            module_dir: "/usr/lib/gatepost/modules".to_owned(),
            watch: true,
        }
    }
}

/// 판정 정책 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VerdictConfig {
    /// 캡처 스레드가 verdict를 기다리는 최대 시간 (밀리초)
    pub timeout_ms: u64,
    /// 타임아웃 시 적용할 verdict (accept = fail-open, drop = fail-closed)
    pub on_timeout: String,
    /// 기록 대상 심각도 임계값
    pub warning_threshold: u16,
    /// drop 판정 심각도 임계값
    pub error_threshold: u16,
    /// 평가자 폴링 주기 (밀리초)
    pub poll_interval_ms: u64,
}

impl Default for VerdictConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 5000,
            on_timeout: "accept".to_owned(),
            warning_threshold: 50,
            error_threshold: 80,
            poll_interval_ms: 50,
        }
    }
}

impl VerdictConfig {
    /// 타임아웃 시 accept를 적용해야 하는지 확인합니다.
    pub fn fail_open(&self) -> bool {
        self.on_timeout == "accept"
    }
}

/// 메트릭 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Prometheus 엔드포인트 활성화 여부
    pub enabled: bool,
    /// 리슨 주소
    pub listen_addr: String,
    /// 리슨 포트
    pub port: u16,
    /// 스크레이프 엔드포인트 경로
    pub endpoint: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_addr: "127.0.0.1".to_owned(),
            port: 9184,
            endpoint: "/metrics".to_owned(),
        }
    }
}

// --- 환경변수 오버라이드 헬퍼 ---

fn override_string(target: &mut String, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        *target = val;
    }
}

fn override_bool(target: &mut bool, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<bool>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse bool from env var, ignoring"
            ),
        }
    }
}

fn override_usize(target: &mut usize, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<usize>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse usize from env var, ignoring"
            ),
        }
    }
}

fn override_u16(target: &mut u16, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<u16>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse u16 from env var, ignoring"
            ),
        }
    }
}

fn override_u32(target: &mut u32, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<u32>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse u32 from env var, ignoring"
            ),
        }
    }
}

fn override_u64(target: &mut u64, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<u64>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse u64 from env var, ignoring"
            ),
        }
    }
}
