//! DNS-SD TXT property codec
//!
//! Each property becomes one TXT character-string: `key` for a true
//! flag, `key=` for a false flag, `key=value` otherwise. A TXT
//! character-string carries at most 255 bytes; oversize entries are
//! dropped with a logged error.

use std::collections::HashMap;

use tracing::error;

use crate::config::PropValue;

/// Maximum encoded size of one TXT entry
pub const MAX_TXT_ENTRY: usize = 255;

/// Encode a property map into TXT character-strings, sorted by key so
/// the output is stable.
pub fn encode_properties(properties: &HashMap<String, PropValue>) -> Vec<Vec<u8>> {
    let mut keys: Vec<&String> = properties.keys().collect();
    keys.sort();

    let mut entries = Vec::with_capacity(keys.len());
    for key in keys {
        let entry = match &properties[key] {
            PropValue::Bool(true) => key.clone(),
            PropValue::Bool(false) => format!("{}=", key),
            PropValue::Str(value) => format!("{}={}", key, value),
        };
        if entry.len() > MAX_TXT_ENTRY {
            error!(
                "Dropping TXT property {:?}: {} bytes exceeds the {}-byte limit",
                key,
                entry.len(),
                MAX_TXT_ENTRY
            );
            continue;
        }
        entries.push(entry.into_bytes());
    }
    entries
}

/// Decode TXT character-strings back into a property map.
pub fn decode_properties<T: AsRef<[u8]>>(entries: &[T]) -> HashMap<String, PropValue> {
    let mut properties = HashMap::new();
    for raw in entries {
        let text = String::from_utf8_lossy(raw.as_ref());
        if text.is_empty() {
            continue;
        }
        match text.split_once('=') {
            None => {
                properties.insert(text.into_owned(), PropValue::Bool(true));
            }
            Some((key, "")) => {
                properties.insert(key.to_string(), PropValue::Bool(false));
            }
            Some((key, value)) => {
                properties.insert(key.to_string(), PropValue::Str(value.to_string()));
            }
        }
    }
    properties
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn encode_decode(props: &HashMap<String, PropValue>) -> HashMap<String, PropValue> {
        decode_properties(&encode_properties(props))
    }

    #[test]
    fn test_encode_forms() {
        let mut props = HashMap::new();
        props.insert("s".to_string(), PropValue::Str("value".to_string()));
        props.insert("t".to_string(), PropValue::Bool(true));
        props.insert("f".to_string(), PropValue::Bool(false));

        let entries = encode_properties(&props);
        let strings: Vec<String> = entries
            .iter()
            .map(|e| String::from_utf8(e.clone()).unwrap())
            .collect();
        assert_eq!(strings, vec!["f=", "s=value", "t"]);
    }

    #[test]
    fn test_roundtrip_mixed() {
        let mut props = HashMap::new();
        props.insert("k1".to_string(), PropValue::Str("v1".to_string()));
        props.insert("k2".to_string(), PropValue::Bool(true));
        props.insert("k3".to_string(), PropValue::Bool(false));
        assert_eq!(encode_decode(&props), props);
    }

    #[test]
    fn test_value_with_equals_sign() {
        let mut props = HashMap::new();
        props.insert("k".to_string(), PropValue::Str("a=b=c".to_string()));
        assert_eq!(encode_decode(&props), props);
    }

    #[test]
    fn test_oversize_entry_dropped() {
        let mut props = HashMap::new();
        props.insert("big".to_string(), PropValue::Str("x".repeat(300)));
        props.insert("ok".to_string(), PropValue::Bool(true));

        let entries = encode_properties(&props);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0], b"ok");
    }

    #[test]
    fn test_empty_entries_ignored() {
        let raw: Vec<&[u8]> = vec![b"", b"k=v"];
        let props = decode_properties(&raw);
        assert_eq!(props.len(), 1);
    }

    proptest! {
        #[test]
        fn prop_roundtrip(
            entries in proptest::collection::hash_map(
                "[a-z][a-z0-9_]{0,15}",
                prop_oneof![
                    any::<bool>().prop_map(PropValue::Bool),
                    "[ -<>-~]{1,40}".prop_map(PropValue::Str),
                ],
                0..8,
            )
        ) {
            prop_assert_eq!(encode_decode(&entries), entries);
        }
    }
}
