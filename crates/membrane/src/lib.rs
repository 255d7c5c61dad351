//! 모듈 호스트와 멤브레인 크레이트
//!
//! 평가자 프로세스의 검사 엔진입니다. [`ModuleHost`]가 디렉토리의
//! 네이티브 모듈(`.so` + 동명 `.json` 디스크립터)을 로드하고 변경을
//! 감시하며, [`Membrane`]이 분해된 패킷을 로드된 모든 모듈에 팬아웃하고
//! 모듈이 방출한 메시지를 팬인합니다.
//!
//! # 모듈 구성
//! - [`abi`]: 네이티브 모듈 ABI 타입과 메시지 포트
//! - [`descriptor`]: 모듈 디스크립터 파일 로딩
//! - [`host`]: [`ModuleHost`] — 로드/언로드/감시/활성화 토글
//! - [`membrane`]: [`Membrane`] — 디스패치와 논블로킹 메시지 드레인
//!
//! # 사용 예시
//! ```ignore
//! let (mut host, membrane) = MembraneBuilder::new()
//!     .module_dir("/usr/lib/gatepost/modules")
//!     .build();
//!
//! host.start().await?;
//! let messages = membrane.transmit(id, &view, tv);
//! ```

pub mod abi;
pub mod descriptor;
pub mod host;
pub mod membrane;

#[cfg(test)]
pub(crate) mod testing;

// --- 주요 타입 re-export ---

pub use abi::{MessagePort, ModuleEntryFn, ModuleInitFn, SetMessageFn};
pub use host::{InspectionModule, ModuleHandle, ModuleHost};
pub use membrane::{Membrane, MembraneBuilder};
