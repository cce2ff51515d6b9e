//! Codecs turn typed values into the strings the adapters store.
//!
//! `decode(None)` is always `None`. The JSON codec fails soft: malformed or
//! foreign content decodes to `None` instead of an error, because storage can be
//! written by code we do not control.

use crate::errors::{StorageError, StorageResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::marker::PhantomData;

/// Encode/decode pair for values of type `T`.
pub trait Codec<T>: Send + Sync {
    fn encode(&self, value: &T) -> StorageResult<String>;

    fn decode(&self, serialized: Option<&str>) -> Option<T>;
}

/// Identity codec for plain strings. This is the default codec of a binding.
#[derive(Clone, Copy, Debug, Default)]
pub struct StringCodec;

impl Codec<String> for StringCodec {
    fn encode(&self, value: &String) -> StorageResult<String> {
        Ok(value.clone())
    }

    fn decode(&self, serialized: Option<&str>) -> Option<String> {
        serialized.map(str::to_string)
    }
}

/// Options for [`JsonCodec`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct JsonCodecOptions {
    /// Pretty-print with this many spaces per level. `None` writes compact JSON.
    pub indent: Option<usize>,
}

impl JsonCodecOptions {
    pub fn indent(mut self, spaces: usize) -> Self {
        self.indent = Some(spaces);
        self
    }
}

/// `serde_json` backed codec.
pub struct JsonCodec<T> {
    options: JsonCodecOptions,
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonCodec<T> {
    pub fn new(options: JsonCodecOptions) -> Self {
        Self {
            options,
            _marker: PhantomData,
        }
    }
}

impl<T> Default for JsonCodec<T> {
    fn default() -> Self {
        Self::new(JsonCodecOptions::default())
    }
}

impl<T> Clone for JsonCodec<T> {
    fn clone(&self) -> Self {
        Self::new(self.options.clone())
    }
}

impl<T> fmt::Debug for JsonCodec<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JsonCodec").field("options", &self.options).finish()
    }
}

/// Creates a JSON codec for `T`.
pub fn create_json_codec<T>(options: JsonCodecOptions) -> JsonCodec<T> {
    JsonCodec::new(options)
}

impl<T> Codec<T> for JsonCodec<T>
where
    T: Serialize + DeserializeOwned,
{
    fn encode(&self, value: &T) -> StorageResult<String> {
        match self.options.indent {
            None => Ok(serde_json::to_string(value)?),
            Some(spaces) => {
                let indent = vec![b' '; spaces];
                let formatter = serde_json::ser::PrettyFormatter::with_indent(&indent);
                let mut out = Vec::new();
                let mut ser = serde_json::Serializer::with_formatter(&mut out, formatter);
                value.serialize(&mut ser)?;
                String::from_utf8(out).map_err(|e| StorageError::Serialization(e.to_string()))
            }
        }
    }

    fn decode(&self, serialized: Option<&str>) -> Option<T> {
        let raw = serialized?;
        match serde_json::from_str(raw) {
            Ok(value) => Some(value),
            Err(err) => {
                log::debug!("json codec: discarding undecodable value ({})", err);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::collections::BTreeMap;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Profile {
        name: String,
        tags: Vec<String>,
        age: Option<u8>,
    }

    #[test]
    fn string_codec_is_identity() {
        let codec = StringCodec;
        assert_eq!(codec.encode(&"abc".to_string()).unwrap(), "abc");
        assert_eq!(codec.decode(Some("abc")).as_deref(), Some("abc"));
        assert_eq!(codec.decode(None), None);
    }

    #[test]
    fn json_codec_recovers_structured_values() {
        let codec = create_json_codec::<Profile>(JsonCodecOptions::default());
        let profile = Profile {
            name: "ada".into(),
            tags: vec!["admin".into(), "ops".into()],
            age: None,
        };
        let encoded = codec.encode(&profile).unwrap();
        assert_eq!(codec.decode(Some(&encoded)), Some(profile));

        let nested = create_json_codec::<BTreeMap<String, Vec<i64>>>(JsonCodecOptions::default());
        let mut map = BTreeMap::new();
        map.insert("primes".to_string(), vec![2, 3, 5]);
        map.insert("empty".to_string(), vec![]);
        let encoded = nested.encode(&map).unwrap();
        assert_eq!(nested.decode(Some(&encoded)), Some(map));
    }

    #[test]
    fn json_codec_fails_soft_on_garbage() {
        let codec = create_json_codec::<serde_json::Value>(JsonCodecOptions::default());
        assert_eq!(codec.decode(Some("not json")), None);
        assert_eq!(codec.decode(Some("")), None);
        assert_eq!(codec.decode(None), None);

        // Valid JSON of the wrong shape is also just "no value".
        let numbers = create_json_codec::<u32>(JsonCodecOptions::default());
        assert_eq!(numbers.decode(Some("\"seven\"")), None);
    }

    #[test]
    fn json_codec_honours_indent() {
        let codec = create_json_codec::<Vec<u8>>(JsonCodecOptions::default().indent(2));
        let encoded = codec.encode(&vec![1, 2]).unwrap();
        assert_eq!(encoded, "[\n  1,\n  2\n]");
        assert_eq!(codec.decode(Some(&encoded)), Some(vec![1, 2]));
    }

    #[test]
    fn json_encode_error_is_serialization() {
        let codec = create_json_codec::<BTreeMap<Vec<u8>, u8>>(JsonCodecOptions::default());
        let mut bad = BTreeMap::new();
        bad.insert(vec![1u8], 1u8);
        assert!(matches!(codec.encode(&bad), Err(StorageError::Serialization(_))));
    }
}
