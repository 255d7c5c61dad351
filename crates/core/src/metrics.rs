//! 메트릭 상수 및 설명 등록
//!
//! 모든 Prometheus 메트릭의 이름과 설명을 중앙에서 정의합니다.
//! 각 크레이트는 이 상수를 사용하여 `metrics::counter!()`,
//! `metrics::gauge!()` 매크로를 호출합니다.
//!
//! # 네이밍 컨벤션
//!
//! - 접두어: `gatepost_`
//! - 컴포넌트명: `host_`, `registry_`, `membrane_`, `evaluator_`
//! - 접미어: `_total` (counter), `_seconds` (histogram), 없음 (gauge)

// ─── 레이블 키 상수 ────────────────────────────────────────────────

/// verdict 레이블 키 (accept, drop)
pub const LABEL_VERDICT: &str = "verdict";

/// 모듈 레이블 키
pub const LABEL_MODULE: &str = "module";

/// 사유 레이블 키 (timeout, registration, extraction)
pub const LABEL_REASON: &str = "reason";

// ─── Capture Host 메트릭 ───────────────────────────────────────────

/// host: 커널 큐에서 수신한 전체 패킷 수 (counter)
pub const HOST_PACKETS_TOTAL: &str = "gatepost_host_packets_total";

/// host: 적용된 verdict 수 (counter, label: verdict)
pub const HOST_VERDICTS_TOTAL: &str = "gatepost_host_verdicts_total";

/// host: fail-open/fail-closed 폴백이 적용된 패킷 수 (counter, label: reason)
pub const HOST_FALLBACK_TOTAL: &str = "gatepost_host_fallback_total";

// ─── Verdict Registry 메트릭 ───────────────────────────────────────

/// registry: 현재 대기 중인 엔트리 수 (gauge)
pub const REGISTRY_PENDING: &str = "gatepost_registry_pending";

/// registry: try-lock 경합 횟수 (counter)
pub const REGISTRY_CONTENTION_TOTAL: &str = "gatepost_registry_contention_total";

// ─── Membrane 메트릭 ───────────────────────────────────────────────

/// membrane: 현재 로드된 모듈 수 (gauge)
pub const MEMBRANE_MODULES_LOADED: &str = "gatepost_membrane_modules_loaded";

/// membrane: 모듈 로드 실패 수 (counter)
pub const MEMBRANE_LOAD_FAILURES_TOTAL: &str = "gatepost_membrane_load_failures_total";

/// membrane: 디스패치 라운드에서 수집된 메시지 수 (counter, label: module)
pub const MEMBRANE_MESSAGES_TOTAL: &str = "gatepost_membrane_messages_total";

// ─── Evaluator 메트릭 ──────────────────────────────────────────────

/// evaluator: 평가한 패킷 수 (counter)
pub const EVALUATOR_PACKETS_TOTAL: &str = "gatepost_evaluator_packets_total";

/// evaluator: 폴링 배치 수 (counter)
pub const EVALUATOR_BATCHES_TOTAL: &str = "gatepost_evaluator_batches_total";

/// 모든 메트릭의 설명을 등록합니다.
///
/// 메트릭 레코더 설치 직후 한 번 호출합니다.
pub fn describe_all() {
    use metrics::{describe_counter, describe_gauge};

    describe_counter!(
        HOST_PACKETS_TOTAL,
        "Packets received from the kernel queue"
    );
    describe_counter!(HOST_VERDICTS_TOTAL, "Verdicts applied, by verdict");
    describe_counter!(
        HOST_FALLBACK_TOTAL,
        "Packets resolved by a fallback policy, by reason"
    );
    describe_gauge!(REGISTRY_PENDING, "Entries currently held by the registry");
    describe_counter!(
        REGISTRY_CONTENTION_TOTAL,
        "Registry try-lock acquisition failures"
    );
    describe_gauge!(MEMBRANE_MODULES_LOADED, "Native modules currently loaded");
    describe_counter!(
        MEMBRANE_LOAD_FAILURES_TOTAL,
        "Native module load failures"
    );
    describe_counter!(
        MEMBRANE_MESSAGES_TOTAL,
        "Module messages collected per dispatch round, by module"
    );
    describe_counter!(EVALUATOR_PACKETS_TOTAL, "Packets evaluated");
    describe_counter!(EVALUATOR_BATCHES_TOTAL, "Poll batches processed");
}
