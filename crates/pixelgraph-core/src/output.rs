//! The result of executing a node: an image buffer plus a named metadata map.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::buffer::ImageBuffer;

/// A single scalar leaf value inside a [`NodeOutput`]'s `data` map or a
/// node's parameter tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScalarValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    String(String),
    Null,
}

impl ScalarValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ScalarValue::Int(i) => Some(*i as f64),
            ScalarValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ScalarValue::String(s) => Some(s),
            _ => None,
        }
    }
}

/// A tagged value: scalar, sequence, or mapping — the Rust-native shape of
/// the original implementation's `YAML::Node`-typed output values, without
/// exposing a YAML-library type in the public API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OutputValue {
    Scalar(ScalarValue),
    Sequence(Vec<OutputValue>),
    Mapping(IndexMap<String, OutputValue>),
}

impl OutputValue {
    pub fn int(v: i64) -> Self {
        OutputValue::Scalar(ScalarValue::Int(v))
    }

    pub fn float(v: f64) -> Self {
        OutputValue::Scalar(ScalarValue::Float(v))
    }

    pub fn string(v: impl Into<String>) -> Self {
        OutputValue::Scalar(ScalarValue::String(v.into()))
    }

    pub fn as_scalar(&self) -> Option<&ScalarValue> {
        match self {
            OutputValue::Scalar(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        self.as_scalar().and_then(ScalarValue::as_f64)
    }

    pub fn as_mapping(&self) -> Option<&IndexMap<String, OutputValue>> {
        match self {
            OutputValue::Mapping(m) => Some(m),
            _ => None,
        }
    }
}

/// The full result of executing a node: an image buffer (possibly empty)
/// plus a map of non-image outputs (dimensions, statistics, pass-through
/// metadata). Order of `data` keys is preserved (`IndexMap`) so that YAML
/// serialization round-trips deterministically.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeOutput {
    #[serde(default = "ImageBuffer::empty", skip_serializing)]
    pub image_buffer: ImageBuffer,
    #[serde(default)]
    pub data: IndexMap<String, OutputValue>,
}

impl NodeOutput {
    pub fn with_image(image_buffer: ImageBuffer) -> Self {
        NodeOutput {
            image_buffer,
            data: IndexMap::new(),
        }
    }

    pub fn with_data(data: IndexMap<String, OutputValue>) -> Self {
        NodeOutput {
            image_buffer: ImageBuffer::empty(),
            data,
        }
    }
}

// `ImageBuffer` carries raw pixels; it is never (de)serialized through
// `serde` directly (the cache service encodes/decodes it through an
// `ImageCodec`), but `NodeOutput` still derives `Serialize`/`Deserialize`
// for the sibling `{stem}.yml` metadata file, which only ever touches
// `data`. `skip_serializing` above plus this manual `Deserialize` impl for
// `ImageBuffer` keep that contract honest without requiring callers to
// special-case the image field.
impl Serialize for ImageBuffer {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_unit()
    }
}

impl<'de> Deserialize<'de> for ImageBuffer {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(EmptyBufferVisitor)
    }
}

struct EmptyBufferVisitor;

impl<'de> serde::de::Visitor<'de> for EmptyBufferVisitor {
    type Value = ImageBuffer;

    fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "a placeholder for a non-serialized image buffer")
    }

    fn visit_unit<E: serde::de::Error>(self) -> Result<Self::Value, E> {
        Ok(ImageBuffer::empty())
    }

    fn visit_none<E: serde::de::Error>(self) -> Result<Self::Value, E> {
        Ok(ImageBuffer::empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_only_output_roundtrips_through_yaml() {
        let mut data = IndexMap::new();
        data.insert("width".to_string(), OutputValue::int(128));
        data.insert("mean".to_string(), OutputValue::float(0.5));
        let out = NodeOutput::with_data(data);

        let yaml = serde_yaml::to_string(&out).unwrap();
        let back: NodeOutput = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(back.data, out.data);
        assert!(back.image_buffer.is_empty());
    }
}
