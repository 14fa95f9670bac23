#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        // Arbitrary text is rejected with an error, never a panic.
        let _ = qwed_dsl::parse(s);
    }
});
