use super::*;
use serde::Deserialize;
use std::collections::BTreeMap;
use tempfile::TempDir;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Sample {
    name: String,
    cores: u32,
    flags: Vec<bool>,
}

#[test]
fn test_roundtrip_scalars() {
    assert_eq!(decode::<i64>(&encode(&42i64).unwrap()).unwrap(), 42);
    assert_eq!(
        decode::<String>(&encode(&"far out".to_string()).unwrap()).unwrap(),
        "far out"
    );
    assert_eq!(decode::<bool>(&encode(&true).unwrap()).unwrap(), true);
    assert_eq!(decode::<f64>(&encode(&1.5f64).unwrap()).unwrap(), 1.5);
}

#[test]
fn test_roundtrip_tuples_and_structs() {
    let args = (3i32, "x".to_string(), vec![1u8, 2, 3]);
    let token = encode(&args).unwrap();
    let back: (i32, String, Vec<u8>) = decode(&token).unwrap();
    assert_eq!(back, args);

    let sample = Sample {
        name: "job".to_string(),
        cores: 8,
        flags: vec![true, false],
    };
    let back: Sample = decode(&encode(&sample).unwrap()).unwrap();
    assert_eq!(back, sample);
}

#[test]
fn test_roundtrip_maps() {
    let mut map = BTreeMap::new();
    map.insert("a".to_string(), 1);
    map.insert("b".to_string(), 2);
    let back: BTreeMap<String, i32> = decode(&encode(&map).unwrap()).unwrap();
    assert_eq!(back, map);
}

#[test]
fn test_token_is_single_printable_ascii_word() {
    let token = encode(&"text with\nnewlines and 'quotes' and EOF markers").unwrap();
    assert!(token.starts_with(MARKER_DIRECT));
    assert!(token.is_ascii());
    assert!(!token.contains(char::is_whitespace));
}

#[test]
fn test_unencodable_value_fails_at_encode_time() {
    // Maps with non-string keys have no JSON representation.
    let mut map = BTreeMap::new();
    map.insert(vec![1u8], "value");
    let err = encode(&map).unwrap_err();
    assert!(matches!(err, DispatchError::Serialization(_)));
}

#[test]
fn test_decode_rejects_unknown_marker() {
    let err = decode::<i64>("pickle:abcdef").unwrap_err();
    assert!(err.to_string().contains("unrecognized payload marker"));
}

#[test]
fn test_decode_rejects_corrupt_base64() {
    let err = decode::<i64>("b64json:!!!not-base64!!!").unwrap_err();
    assert!(matches!(err, DispatchError::Serialization(_)));
}

#[test]
fn test_decode_tolerates_surrounding_whitespace() {
    let token = format!("\n{}\n", encode(&7i64).unwrap());
    assert_eq!(decode::<i64>(&token).unwrap(), 7);
}

#[test]
fn test_size_limit_boundary() {
    let value = "x".repeat(600);
    let token = encode(&value).unwrap();
    let options_pass = EncodeOptions {
        size_limit: Some(token.len()),
        proxy: None,
    };
    assert!(encode_with(&value, &options_pass).is_ok());

    let options_fail = EncodeOptions {
        size_limit: Some(token.len() - 1),
        proxy: None,
    };
    let err = encode_with(&value, &options_fail).unwrap_err();
    match err {
        DispatchError::PayloadTooLarge { size, limit } => {
            assert_eq!(size, token.len());
            assert_eq!(limit, token.len() - 1);
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[test]
fn test_proxy_replaces_large_values_with_locator() {
    let temp_dir = TempDir::new().unwrap();
    let store = ContentStore::at(temp_dir.path().join("store")).unwrap();
    let value = "y".repeat(4096);

    let options = EncodeOptions {
        size_limit: None,
        proxy: Some(ProxyPolicy {
            store: store.clone(),
            threshold: 128,
        }),
    };
    let token = encode_with(&value, &options).unwrap();

    assert!(token.starts_with(MARKER_LOCATOR));
    // The locator token stays small no matter how big the value is.
    assert!(token.len() < 512);

    let back: String = decode(&token).unwrap();
    assert_eq!(back, value);
}

#[test]
fn test_proxy_leaves_small_values_inline() {
    let temp_dir = TempDir::new().unwrap();
    let store = ContentStore::at(temp_dir.path().join("store")).unwrap();

    let options = EncodeOptions {
        size_limit: None,
        proxy: Some(ProxyPolicy {
            store,
            threshold: 4096,
        }),
    };
    let token = encode_with(&"small", &options).unwrap();
    assert!(token.starts_with(MARKER_DIRECT));
}

#[test]
fn test_proxy_bypasses_size_limit() {
    let temp_dir = TempDir::new().unwrap();
    let store = ContentStore::at(temp_dir.path().join("store")).unwrap();
    let value = "z".repeat(8192);

    let options = EncodeOptions {
        size_limit: Some(1024),
        proxy: Some(ProxyPolicy {
            store,
            threshold: 1024,
        }),
    };
    // Proxied payloads are bounded by construction, so the cap never trips.
    let token = encode_with(&value, &options).unwrap();
    assert!(token.starts_with(MARKER_LOCATOR));
    assert!(token.len() <= 1024);
}
