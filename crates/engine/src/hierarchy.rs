//! Tree of entity primary keys

use crate::storage::{HierarchyIndexPart, StoragePart};
use strata_index_concurrency::{
    LayerMaintainer, TransactionalBoolean, TransactionalLayerProducer, TransactionalMap,
};
use strata_index_core::{Error, ProducerId, Result};

/// Node to parent mapping of a hierarchical entity type
///
/// A node whose parent is not (yet) present is an orphan. Orphans are kept
/// and become regular children once the parent arrives.
#[derive(Debug, Clone)]
pub struct HierarchyIndex {
    id: ProducerId,
    dirty: TransactionalBoolean,
    nodes: TransactionalMap<u32, Option<u32>>,
}

impl HierarchyIndex {
    /// Create an empty hierarchy
    pub fn new() -> Self {
        Self::from_nodes(std::iter::empty())
    }

    /// Rebuild a hierarchy from persisted nodes
    pub fn from_nodes(nodes: impl IntoIterator<Item = (u32, Option<u32>)>) -> Self {
        HierarchyIndex {
            id: ProducerId::next(),
            dirty: TransactionalBoolean::new(),
            nodes: TransactionalMap::from_map(nodes.into_iter().collect()),
        }
    }

    /// Place `node` under `parent` (or at the root); re-parents a known node
    pub fn add_node(&self, tx: &mut LayerMaintainer, node: u32, parent: Option<u32>) -> Result<()> {
        if parent == Some(node) {
            return Err(Error::internal(format!(
                "Hierarchy node {} cannot be its own parent",
                node
            )));
        }
        // bounded walk: restored nodes may already form a cycle elsewhere
        let mut ancestor = parent;
        let mut remaining = self.nodes.len(Some(&*tx));
        while let Some(current) = ancestor.filter(|_| remaining > 0) {
            remaining -= 1;
            if current == node {
                return Err(Error::internal(format!(
                    "Placing hierarchy node {} under {:?} would create a cycle",
                    node, parent
                )));
            }
            ancestor = self.parent_of(Some(&*tx), current);
        }
        if self.nodes.get(Some(&*tx), &node) == Some(&parent) {
            return Ok(());
        }
        self.nodes.insert(tx, node, parent)?;
        self.dirty.set_true(tx)
    }

    /// Remove `node`, returning its former parent
    ///
    /// Children of the node stay in place as orphans.
    pub fn remove_node(&self, tx: &mut LayerMaintainer, node: u32) -> Result<Option<u32>> {
        let parent = self
            .nodes
            .remove(tx, &node)?
            .ok_or_else(|| Error::internal(format!("Hierarchy node {} is not present", node)))?;
        self.dirty.set_true(tx)?;
        Ok(parent)
    }

    /// Whether `node` is present
    pub fn contains(&self, tx: Option<&LayerMaintainer>, node: u32) -> bool {
        self.nodes.contains_key(tx, &node)
    }

    /// Parent of `node`; `None` for roots and unknown nodes
    pub fn parent_of(&self, tx: Option<&LayerMaintainer>, node: u32) -> Option<u32> {
        self.nodes.get(tx, &node).copied().flatten()
    }

    /// Direct children of `parent`, ascending
    pub fn children_of(&self, tx: Option<&LayerMaintainer>, parent: u32) -> Vec<u32> {
        self.nodes_where(tx, |node_parent| node_parent == Some(parent))
    }

    /// Nodes without a parent, ascending
    pub fn roots(&self, tx: Option<&LayerMaintainer>) -> Vec<u32> {
        self.nodes_where(tx, |node_parent| node_parent.is_none())
    }

    /// Nodes whose parent is not present, ascending
    pub fn orphans(&self, tx: Option<&LayerMaintainer>) -> Vec<u32> {
        self.nodes_where(tx, |node_parent| {
            node_parent.map_or(false, |parent| !self.contains(tx, parent))
        })
    }

    /// Number of nodes
    pub fn len(&self, tx: Option<&LayerMaintainer>) -> usize {
        self.nodes.len(tx)
    }

    /// Whether the hierarchy has no node
    pub fn is_empty(&self, tx: Option<&LayerMaintainer>) -> bool {
        self.nodes.is_empty(tx)
    }

    fn nodes_where<F>(&self, tx: Option<&LayerMaintainer>, filter: F) -> Vec<u32>
    where
        F: Fn(Option<u32>) -> bool,
    {
        let mut nodes: Vec<u32> = self
            .nodes
            .iter(tx)
            .filter(|(_, parent)| filter(**parent))
            .map(|(node, _)| *node)
            .collect();
        nodes.sort_unstable();
        nodes
    }

    pub(crate) fn storage_part(
        &self,
        tx: Option<&LayerMaintainer>,
        entity_index_pk: u32,
    ) -> Option<StoragePart> {
        if !self.dirty.is_true(tx) {
            return None;
        }
        let mut nodes: Vec<_> = self
            .nodes
            .iter(tx)
            .map(|(node, parent)| (*node, *parent))
            .collect();
        nodes.sort_unstable();
        Some(StoragePart::Hierarchy(HierarchyIndexPart {
            entity_index_pk,
            nodes,
        }))
    }

    pub(crate) fn reset_dirty(&self, tx: &mut LayerMaintainer) -> Result<()> {
        self.dirty.reset(tx)
    }
}

impl Default for HierarchyIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl TransactionalLayerProducer for HierarchyIndex {
    type Layer = ();

    fn id(&self) -> ProducerId {
        self.id
    }

    fn create_layer(&self) {}

    fn merge_committed(
        &self,
        _layer: Option<()>,
        maintainer: &mut LayerMaintainer,
    ) -> Result<Self> {
        if !self.is_modified_in(maintainer) {
            return Ok(self.clone());
        }
        self.dirty.remove_layer(maintainer);
        Ok(HierarchyIndex {
            id: ProducerId::next(),
            dirty: TransactionalBoolean::new(),
            nodes: maintainer.merge(&self.nodes)?,
        })
    }

    fn remove_layer(&self, maintainer: &mut LayerMaintainer) {
        self.dirty.remove_layer(maintainer);
        self.nodes.remove_layer(maintainer);
    }

    fn is_modified_in(&self, maintainer: &LayerMaintainer) -> bool {
        self.dirty.is_modified_in(maintainer) || self.nodes.is_modified_in(maintainer)
    }
}
