// Copyright PingCAP Inc. 2025.
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; version 2 of the License.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Deserialize;

use crate::storage::disk::{Disk, LocalDisk};
use crate::storage::node::{LocalNode, Node};
use crate::storage::StorageError;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Stable directory name used as the first path segment on every disk.
    #[serde(default = "default_xl_name")]
    pub xl_name: String,

    /// ACL applied to newly created buckets.
    #[serde(default = "default_acl")]
    pub acl: String,

    /// Nodes and their drive paths. Node ids are sorted lexicographically
    /// to fix the shard order; drives keep their listed order.
    pub nodes: Vec<NodeConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NodeConfig {
    pub id: String,
    pub drives: Vec<String>,
}

fn default_xl_name() -> String {
    "xl".to_string()
}

fn default_acl() -> String {
    "private".to_string()
}

impl Config {
    pub fn from_path(path: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let s = std::fs::read_to_string(path)?;
        let cfg: Config = toml::from_str(&s)?;
        Ok(cfg)
    }

    /// Build the node registry: one `LocalNode` per configured node, each
    /// drive rooted at its configured path.
    pub async fn build_nodes(&self) -> Result<BTreeMap<String, Arc<dyn Node>>, StorageError> {
        if self.nodes.is_empty() {
            return Err(StorageError::InvalidArgument(
                "at least one node with one drive is required".into(),
            ));
        }
        let mut nodes: BTreeMap<String, Arc<dyn Node>> = BTreeMap::new();
        for node_cfg in &self.nodes {
            if node_cfg.drives.is_empty() {
                return Err(StorageError::InvalidArgument(format!(
                    "node {} has no drives",
                    node_cfg.id
                )));
            }
            let mut disks: Vec<Arc<dyn Disk>> = Vec::with_capacity(node_cfg.drives.len());
            for drive in &node_cfg.drives {
                disks.push(Arc::new(LocalDisk::new(drive).await?));
            }
            nodes.insert(node_cfg.id.clone(), Arc::new(LocalNode::new(disks)));
        }
        Ok(nodes)
    }
}
