//! The [`Node`] data model: identity, edges, parameters, declared outputs
//! and disk-cache entries, plus the runtime-only cache slots the compute
//! engines populate (never serialized — a freshly loaded graph always
//! starts cold).

use indexmap::IndexMap;
use pixelgraph_core::{NodeOutput, OutputValue, Rect};
use serde::{Deserialize, Serialize};

fn default_output_name() -> String {
    "image".to_string()
}

fn is_default_output_name(name: &str) -> bool {
    name == "image"
}

fn is_false(b: &bool) -> bool {
    !*b
}

/// One image dependency: the producing node and which of its named outputs
/// to read. `from_output_name` defaults to `"image"` and is omitted on
/// write when left at that default, matching the original YAML schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageInput {
    pub from_node_id: i64,
    #[serde(default = "default_output_name", skip_serializing_if = "is_default_output_name")]
    pub from_output_name: String,
}

impl ImageInput {
    pub fn new(from_node_id: i64) -> Self {
        ImageInput {
            from_node_id,
            from_output_name: default_output_name(),
        }
    }

    pub fn named(from_node_id: i64, from_output_name: impl Into<String>) -> Self {
        ImageInput {
            from_node_id,
            from_output_name: from_output_name.into(),
        }
    }
}

/// One parameter dependency: a value produced by another node's output,
/// bound into this node's `runtime_parameters` under `to_parameter_name`
/// at the start of each compute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterInput {
    pub from_node_id: i64,
    #[serde(default = "default_output_name", skip_serializing_if = "is_default_output_name")]
    pub from_output_name: String,
    pub to_parameter_name: String,
}

/// A named output the node declares it produces, with its own sub-schema
/// of output-specific parameters (e.g. a codec's quality knob).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct OutputPort {
    pub output_id: i64,
    pub output_type: String,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub output_parameters: IndexMap<String, OutputValue>,
}

/// One disk-cache binding declared on a node: a cache kind (e.g. `"png"`)
/// and the file name under the node's cache directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub cache_type: String,
    pub location: String,
}

/// A single node in the dataflow graph.
///
/// `cached_output`/`cached_output_high_precision`/`cached_output_real_time`
/// and their versions/ROIs are runtime state only: they are populated by the
/// compute engines and dropped on (de)serialization, so reloading a graph
/// from YAML always starts with cold caches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: i64,
    pub name: String,
    #[serde(rename = "type")]
    pub node_type: String,
    pub subtype: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub image_inputs: Vec<ImageInput>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parameter_inputs: Vec<ParameterInput>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub static_parameters: IndexMap<String, OutputValue>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outputs: Vec<OutputPort>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub caches: Vec<CacheEntry>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub preserved: bool,

    /// Deep-cloned from `static_parameters` plus inbound `parameter_inputs`
    /// at the start of each compute; never persisted.
    #[serde(skip)]
    pub runtime_parameters: IndexMap<String, OutputValue>,

    #[serde(skip)]
    pub cached_output: Option<NodeOutput>,

    #[serde(skip)]
    pub cached_output_high_precision: Option<NodeOutput>,
    #[serde(skip)]
    pub hp_version: u64,
    #[serde(skip)]
    pub hp_roi: Option<Rect>,

    #[serde(skip)]
    pub cached_output_real_time: Option<NodeOutput>,
    #[serde(skip)]
    pub rt_version: u64,
    #[serde(skip)]
    pub rt_roi: Option<Rect>,

    /// The HP input footprint size as of the last HP compute, used to
    /// detect that a node's upstream shape changed and its dirty-ROI
    /// bookkeeping must be invalidated rather than incrementally updated.
    #[serde(skip)]
    pub last_input_size_hp: Option<(u32, u32)>,
}

impl Node {
    pub fn new(id: i64, name: impl Into<String>, node_type: impl Into<String>, subtype: impl Into<String>) -> Self {
        Node {
            id,
            name: name.into(),
            node_type: node_type.into(),
            subtype: subtype.into(),
            image_inputs: Vec::new(),
            parameter_inputs: Vec::new(),
            static_parameters: IndexMap::new(),
            outputs: Vec::new(),
            caches: Vec::new(),
            preserved: false,
            runtime_parameters: IndexMap::new(),
            cached_output: None,
            cached_output_high_precision: None,
            hp_version: 0,
            hp_roi: None,
            cached_output_real_time: None,
            rt_version: 0,
            rt_roi: None,
            last_input_size_hp: None,
        }
    }

    pub fn with_image_input(mut self, input: ImageInput) -> Self {
        self.image_inputs.push(input);
        self
    }

    pub fn with_static_parameter(mut self, key: impl Into<String>, value: OutputValue) -> Self {
        self.static_parameters.insert(key.into(), value);
        self
    }

    pub fn preserved(mut self) -> Self {
        self.preserved = true;
        self
    }

    /// Rebuilds `runtime_parameters` from `static_parameters`, to be
    /// overlaid by resolved `parameter_inputs` before the node computes.
    pub fn reset_runtime_parameters(&mut self) {
        self.runtime_parameters = self.static_parameters.clone();
    }

    /// Drops every cached output and version/ROI, but leaves the legacy
    /// `cached_output` alone when the node is `preserved` — used by
    /// force-recache (spec §4.7: "force-recache clears post-order
    /// (preserved nodes keep legacy, clear HP/RT only)").
    pub fn clear_caches(&mut self) {
        if !self.preserved {
            self.cached_output = None;
        }
        self.cached_output_high_precision = None;
        self.hp_version = 0;
        self.hp_roi = None;
        self.cached_output_real_time = None;
        self.rt_version = 0;
        self.rt_roi = None;
        self.last_input_size_hp = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_output_name_round_trips_without_appearing_in_yaml() {
        let node = Node::new(1, "gen", "generator", "perlin").with_image_input(ImageInput::new(0));
        let yaml = serde_yaml::to_string(&node).unwrap();
        assert!(!yaml.contains("from_output_name"));
        let back: Node = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(back.image_inputs[0].from_output_name, "image");
    }

    #[test]
    fn non_default_output_name_is_preserved() {
        let node = Node::new(1, "gen", "generator", "perlin").with_image_input(ImageInput::named(0, "alpha"));
        let yaml = serde_yaml::to_string(&node).unwrap();
        let back: Node = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(back.image_inputs[0].from_output_name, "alpha");
    }

    #[test]
    fn force_recache_keeps_legacy_output_on_preserved_node() {
        let mut node = Node::new(1, "source", "image", "constant").preserved();
        node.cached_output = Some(NodeOutput::default());
        node.cached_output_high_precision = Some(NodeOutput::default());
        node.clear_caches();
        assert!(node.cached_output.is_some());
        assert!(node.cached_output_high_precision.is_none());
    }
}
