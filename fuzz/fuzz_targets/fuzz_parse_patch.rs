#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if data.len() > 8192 { return; }
    if let Ok(value) = serde_json::from_slice(data) {
        let _ = fluxbase::query::parse_patch(&value);
    }
});
