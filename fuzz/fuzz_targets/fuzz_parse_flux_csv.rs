#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // The Flux API hands back annotated CSV; the parser must tolerate
    // arbitrary text without panicking
    if let Ok(text) = std::str::from_utf8(data) {
        let _ = helion::telemetry::sungather::parse_annotated_csv(text);
    }
});
