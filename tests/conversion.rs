use ferrous_blueprint::convert::parse_bool;
use ferrous_blueprint::{
    ClassDef, ClassRegistry, Converter, DiError, DiResult, Filter, Instance, Properties, TypeConverter,
    TypeSpec, Value,
};
use proptest::prelude::*;
use std::sync::Arc;
use std::time::Duration;

fn convert(text: &str, target: TypeSpec) -> DiResult<Value> {
    Converter::new().convert(&Value::str(text), &target)
}

// ===== Scalars =====

proptest! {
    #[test]
    fn test_i32_text_round_trips(n in any::<i32>()) {
        let value = convert(&n.to_string(), TypeSpec::I32).unwrap();
        prop_assert_eq!(value.get::<i32>(), Some(n));
    }

    #[test]
    fn test_u64_text_round_trips(n in any::<u64>()) {
        let value = convert(&n.to_string(), TypeSpec::U64).unwrap();
        prop_assert_eq!(value, Value::UInt(n));
    }

    #[test]
    fn test_out_of_range_integers_fail(n in (i64::from(u8::MAX) + 1)..i64::MAX) {
        let converted = convert(&n.to_string(), TypeSpec::U8);
        prop_assert!(
            matches!(converted, Err(DiError::Conversion { .. })),
            "expected a conversion error"
        );
    }

    #[test]
    fn test_f64_text_round_trips(f in any::<f64>().prop_filter("finite", |f| f.is_finite())) {
        let value = convert(&f.to_string(), TypeSpec::F64).unwrap();
        prop_assert_eq!(value, Value::Float(f));
    }

    #[test]
    fn test_duration_text_round_trips(ms in 0u64..10_000_000_000) {
        let duration = Duration::from_millis(ms);
        let text = humantime::format_duration(duration).to_string();
        prop_assert_eq!(convert(&text, TypeSpec::Duration).unwrap(), Value::Duration(duration));
    }

    #[test]
    fn test_unknown_boolean_words_fail(word in "[a-z]{1,8}") {
        prop_assume!(!["yes", "no", "true", "false", "on", "off"].contains(&word.as_str()));
        prop_assert!(parse_bool(&word).is_err());
    }

    #[test]
    fn test_equality_filter_matches_its_own_property(value in "[a-zA-Z0-9]{1,12}") {
        let mut properties = Properties::new();
        properties.insert("region".to_string(), Value::str(value.clone()));
        let filter = Filter::equal("region", &value);
        prop_assert!(filter.matches(&properties));
        let parsed: Filter = filter.to_string().parse().unwrap();
        prop_assert!(parsed.matches(&properties));
    }
}

#[test]
fn test_boolean_words() {
    for word in ["true", "TRUE", "yes", "Yes", "on", "ON"] {
        assert_eq!(convert(word, TypeSpec::Bool).unwrap(), Value::Bool(true), "{word}");
    }
    for word in ["false", "no", "Off"] {
        assert_eq!(convert(word, TypeSpec::Bool).unwrap(), Value::Bool(false), "{word}");
    }
    assert!(convert("maybe", TypeSpec::Bool).is_err());
    assert!(convert("", TypeSpec::Bool).is_err());
}

#[test]
fn test_char_requires_exactly_one_character() {
    assert_eq!(convert("x", TypeSpec::Char).unwrap(), Value::Char('x'));
    assert!(convert("xy", TypeSpec::Char).is_err());
}

#[test]
fn test_network_and_regex_types() {
    let ip = convert("10.0.0.1", TypeSpec::IpAddr).unwrap();
    assert!(matches!(ip, Value::Ip(addr) if addr.to_string() == "10.0.0.1"));
    assert!(convert("127.0.0.1:8080", TypeSpec::SocketAddr).is_ok());
    assert!(convert("not an address", TypeSpec::SocketAddr).is_err());
    assert!(matches!(convert("^a+$", TypeSpec::Regex).unwrap(), Value::Regex(re) if re.is_match("aaa")));
    assert!(convert("(", TypeSpec::Regex).is_err());
}

#[test]
fn test_enum_variants() {
    let level = TypeSpec::enumeration("Level", ["Low", "High"]);
    assert_eq!(
        convert("High", level.clone()).unwrap(),
        Value::Enum { type_name: "Level".into(), variant: "High".into() }
    );
    assert!(convert("Medium", level).is_err());
}

// ===== Containers =====

#[test]
fn test_list_elements_are_converted() {
    let list = Value::List(vec![Value::str("1"), Value::str("2")]);
    let converted = Converter::new().convert(&list, &TypeSpec::list(TypeSpec::I64)).unwrap();
    assert_eq!(converted, Value::List(vec![Value::Int(1), Value::Int(2)]));
}

#[test]
fn test_set_conversion_drops_duplicates() {
    let list = Value::List(vec![Value::str("7"), Value::str("07"), Value::str("8")]);
    let converted = Converter::new().convert(&list, &TypeSpec::set(TypeSpec::U8)).unwrap();
    assert_eq!(converted, Value::Set(vec![Value::UInt(7), Value::UInt(8)]));
}

#[test]
fn test_map_keys_and_values_are_converted() {
    let map = Value::Map(vec![(Value::str("timeout"), Value::str("30"))]);
    let converted = Converter::new()
        .convert(&map, &TypeSpec::map(TypeSpec::String, TypeSpec::U32))
        .unwrap();
    assert_eq!(converted.get_key("timeout"), Some(&Value::UInt(30)));
}

#[test]
fn test_one_bad_element_fails_the_collection() {
    let list = Value::List(vec![Value::str("1"), Value::str("two")]);
    assert!(Converter::new().convert(&list, &TypeSpec::list(TypeSpec::I32)).is_err());
}

// ===== Pluggable converters =====

struct Celsius(f64);

struct CelsiusConverter;

impl TypeConverter for CelsiusConverter {
    fn can_convert(&self, value: &Value, target: &TypeSpec) -> bool {
        value.as_str().is_some() && *target == TypeSpec::named("Celsius")
    }

    fn convert(&self, value: &Value, target: &TypeSpec) -> DiResult<Value> {
        let text = value.as_str().unwrap_or_default();
        let degrees = text
            .trim_end_matches("C")
            .parse::<f64>()
            .map_err(|e| DiError::conversion(text, target.clone(), Some(e.to_string())))?;
        Ok(Value::Object(Instance::new(Celsius(degrees)).with_interface("Celsius")))
    }
}

#[test]
fn test_registered_converter_wins_over_builtins() {
    let converter = Converter::new();
    let celsius: Arc<dyn TypeConverter> = Arc::new(CelsiusConverter);
    converter.register(celsius.clone());

    let value = converter.convert(&Value::str("21.5C"), &TypeSpec::named("Celsius")).unwrap();
    assert_eq!(value.downcast::<Celsius>().unwrap().0, 21.5);

    assert!(converter.unregister(&celsius));
    assert_eq!(converter.converter_count(), 0);
    assert!(converter.convert(&Value::str("21.5C"), &TypeSpec::named("Celsius")).is_err());
}

#[test]
fn test_backend_builds_named_types_from_text() {
    struct Port(u16);
    let classes = ClassRegistry::new().with_class(ClassDef::new("Port").from_string(|text: &str| {
        Ok(Instance::new(Port(text.parse::<u16>()?)))
    }));
    let converter = Converter::with_backend(Arc::new(classes));

    let port = converter.convert(&Value::str("8080"), &TypeSpec::named("Port")).unwrap();
    assert_eq!(port.downcast::<Port>().unwrap().0, 8080);
    assert_eq!(port.as_instance().unwrap().class(), "Port");
    assert!(converter.convert(&Value::str("eighty"), &TypeSpec::named("Port")).is_err());
}

#[test]
fn test_null_passes_through_every_target() {
    let converter = Converter::new();
    for target in [TypeSpec::I32, TypeSpec::String, TypeSpec::list(TypeSpec::Bool)] {
        assert_eq!(converter.convert(&Value::Null, &target).unwrap(), Value::Null);
    }
}

#[test]
fn test_type_spec_text_form() {
    let spec: TypeSpec = "map<string, list<i32>>".parse().unwrap();
    assert_eq!(spec, TypeSpec::map(TypeSpec::String, TypeSpec::list(TypeSpec::I32)));
    assert_eq!(spec.to_string(), "map<string, list<i32>>");
}
