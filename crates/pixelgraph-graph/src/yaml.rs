//! Graph YAML (de)serialization: the on-disk graph model is a list of
//! [`Node`]s. Loading inserts each node through [`GraphModel::add_node`] (so
//! a malformed graph — duplicate id, forward-reference cycle — is rejected
//! the same way programmatic construction is); saving walks nodes in
//! insertion order so a load-then-save round-trips byte-for-byte modulo
//! field defaults.

use std::path::Path;

use serde::{Deserialize, Serialize};

use pixelgraph_core::GraphResult;

use crate::model::GraphModel;
use crate::node::Node;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct GraphYaml {
    #[serde(default)]
    nodes: Vec<Node>,
}

impl GraphModel {
    pub fn load_yaml_str(&self, yaml: &str) -> GraphResult<()> {
        let doc: GraphYaml = serde_yaml::from_str(yaml)?;
        for node in doc.nodes {
            self.add_node(node)?;
        }
        Ok(())
    }

    pub fn load_yaml_file(&self, path: impl AsRef<Path>) -> GraphResult<()> {
        let text = std::fs::read_to_string(path)?;
        self.load_yaml_str(&text)
    }

    pub fn to_yaml_string(&self) -> GraphResult<String> {
        let doc = GraphYaml { nodes: self.all_nodes() };
        Ok(serde_yaml::to_string(&doc)?)
    }

    pub fn save_yaml_file(&self, path: impl AsRef<Path>) -> GraphResult<()> {
        std::fs::write(path, self.to_yaml_string()?)?;
        Ok(())
    }
}
