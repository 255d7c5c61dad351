#![no_main]

use gatepost_registry::{Request, Response};
use libfuzzer_sys::fuzz_target;

// 프레임 페이로드 역직렬화는 임의 입력에 대해 에러만 반환해야 한다.
fuzz_target!(|data: &[u8]| {
    let _ = serde_json::from_slice::<Request>(data);
    let _ = serde_json::from_slice::<Response>(data);
});
