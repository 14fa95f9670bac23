#![no_main]
use libfuzzer_sys::fuzz_target;
use qwed_dsl::{parse_and_validate, Limits};
use qwed_smt::{compile, CompileOptions};

fuzz_target!(|data: &[u8]| {
    let Ok(s) = std::str::from_utf8(data) else {
        return;
    };
    // Anything that validates must compile or fail with a CompileError.
    if let Ok(validated) = parse_and_validate(s, &Limits::default()) {
        if let Ok(compiled) = compile(&validated, &CompileOptions::default()) {
            let _ = compiled.fingerprint();
        }
    }
});
