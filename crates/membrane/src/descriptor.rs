//! 모듈 디스크립터 로딩
//!
//! 모듈 파일(`dpi.so`)과 같은 이름의 JSON 디스크립터(`dpi.json`)에서
//! [`ModuleInfo`]를 읽습니다.

use std::path::Path;

use gatepost_core::error::ModuleError;
use gatepost_core::types::ModuleInfo;

/// 모듈 파일 경로에 대응하는 디스크립터 경로를 반환합니다.
pub fn descriptor_path(module_path: &Path) -> std::path::PathBuf {
    module_path.with_extension("json")
}

/// 디스크립터 파일을 읽어 파싱합니다.
pub fn read_descriptor(path: &Path) -> Result<ModuleInfo, ModuleError> {
    let content = std::fs::read_to_string(path).map_err(|e| ModuleError::Descriptor {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    serde_json::from_str(&content).map_err(|e| ModuleError::Descriptor {
        path: path.display().to_string(),
        reason: e.to_string(),
    })
}
