#![no_main]

use ferrous_blueprint::{Converter, TypeSpec, Value};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    if let Ok(spec) = text.parse::<TypeSpec>() {
        let _ = spec.to_string();
        let _ = Converter::new().convert(&Value::str(text), &spec);
    }
});
