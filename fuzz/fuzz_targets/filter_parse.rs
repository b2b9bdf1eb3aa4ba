#![no_main]

use ferrous_blueprint::{Filter, Properties, Value};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    let Ok(filter) = Filter::parse(text) else {
        return;
    };

    // a parsed filter prints to text that parses to the same filter
    let printed = filter.to_string();
    let reparsed = Filter::parse(&printed).expect("printed filter must parse");
    assert_eq!(printed, reparsed.to_string());

    let mut properties = Properties::new();
    properties.insert("objectClass".to_string(), Value::List(vec![Value::str("Fuzz")]));
    properties.insert("service.ranking".to_string(), Value::Int(0));
    let _ = filter.matches(&properties);
});
