//! Groups of selected nodes and elements, with change notification.
use crate::callback::{CallbackId, CallbackList, CallbackStatus};
use crate::mesh::{ElementId, NodeId};
use crate::picking::{ElementPickFilter, PickedObjectList};
use crate::region::{RegionId, RegionTree};
use log::warn;
use std::collections::{BTreeMap, BTreeSet};
use std::ops::{BitOr, BitOrAssign};

/// Summary of changes made to a selection group, as a set of flags.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash)]
pub struct SelectionChange(u8);

impl SelectionChange {
    pub const NONE: SelectionChange = SelectionChange(0);
    pub const ADD: SelectionChange = SelectionChange(1);
    pub const REMOVE: SelectionChange = SelectionChange(2);
    /// The group is being destroyed.
    pub const FINAL: SelectionChange = SelectionChange(4);

    pub fn contains(self, other: SelectionChange) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for SelectionChange {
    type Output = SelectionChange;

    fn bitor(self, rhs: SelectionChange) -> SelectionChange {
        SelectionChange(self.0 | rhs.0)
    }
}

impl BitOrAssign for SelectionChange {
    fn bitor_assign(&mut self, rhs: SelectionChange) {
        self.0 |= rhs.0;
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SelectionEvent {
    pub summary: SelectionChange,
}

#[derive(Debug, Default)]
pub struct SelectionGroup {
    nodes: BTreeMap<RegionId, BTreeSet<NodeId>>,
    elements: BTreeMap<RegionId, BTreeSet<ElementId>>,
    cache: u32,
    pending: SelectionChange,
    callbacks: CallbackList<SelectionEvent>,
}

impl SelectionGroup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_callback<F>(&mut self, callback: F) -> CallbackId
    where
        F: FnMut(&SelectionEvent) -> CallbackStatus + 'static,
    {
        self.callbacks.add(callback)
    }

    pub fn remove_callback(&mut self, id: CallbackId) -> bool {
        self.callbacks.remove(id)
    }

    pub fn begin_change(&mut self) {
        self.cache += 1;
    }

    pub fn end_change(&mut self) {
        if self.cache == 0 {
            warn!("Selection change bracket closed without being opened");
            return;
        }
        self.cache -= 1;
        self.flush();
    }

    fn changed(&mut self, change: SelectionChange) {
        self.pending |= change;
        self.flush();
    }

    fn flush(&mut self) {
        if self.cache == 0 && !self.pending.is_empty() {
            let summary = std::mem::take(&mut self.pending);
            self.callbacks.notify(&SelectionEvent { summary });
        }
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.elements.is_empty()
    }

    pub fn add_node(&mut self, region: RegionId, node: NodeId) -> bool {
        let added = self.nodes.entry(region).or_default().insert(node);
        if added {
            self.changed(SelectionChange::ADD);
        }
        added
    }

    pub fn remove_node(&mut self, region: RegionId, node: NodeId) -> bool {
        let removed = remove_from(&mut self.nodes, region, &node);
        if removed {
            self.changed(SelectionChange::REMOVE);
        }
        removed
    }

    pub fn contains_node(&self, region: RegionId, node: NodeId) -> bool {
        self.nodes.get(&region).map_or(false, |nodes| nodes.contains(&node))
    }

    /// Selected nodes of `region` in ascending order.
    pub fn nodes(&self, region: RegionId) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes.get(&region).into_iter().flatten().copied()
    }

    pub fn add_element(&mut self, region: RegionId, element: ElementId) -> bool {
        let added = self.elements.entry(region).or_default().insert(element);
        if added {
            self.changed(SelectionChange::ADD);
        }
        added
    }

    pub fn remove_element(&mut self, region: RegionId, element: ElementId) -> bool {
        let removed = remove_from(&mut self.elements, region, &element);
        if removed {
            self.changed(SelectionChange::REMOVE);
        }
        removed
    }

    pub fn contains_element(&self, region: RegionId, element: ElementId) -> bool {
        self.elements
            .get(&region)
            .map_or(false, |elements| elements.contains(&element))
    }

    pub fn elements(&self, region: RegionId) -> impl Iterator<Item = ElementId> + '_ {
        self.elements.get(&region).into_iter().flatten().copied()
    }

    pub fn clear(&mut self) {
        if !self.is_empty() {
            self.nodes.clear();
            self.elements.clear();
            self.changed(SelectionChange::REMOVE);
        }
    }

    /// Adds every picked node (or data point) with a single notification.
    pub fn select_picked_nodes(&mut self, picked: &PickedObjectList, tree: &RegionTree, use_data: bool) -> usize {
        self.begin_change();
        let mut added = 0;
        for (region, nodes) in picked.picked_region_sorted_nodes(tree, use_data) {
            for node in nodes {
                added += usize::from(self.add_node(region, node));
            }
        }
        self.end_change();
        added
    }

    pub fn select_picked_elements(
        &mut self,
        picked: &PickedObjectList,
        tree: &RegionTree,
        filter: ElementPickFilter,
    ) -> usize {
        self.begin_change();
        let mut added = 0;
        for (region, elements) in picked.picked_region_sorted_elements(tree, filter) {
            for element in elements {
                added += usize::from(self.add_element(region, element));
            }
        }
        self.end_change();
        added
    }
}

fn remove_from<T: Ord>(map: &mut BTreeMap<RegionId, BTreeSet<T>>, region: RegionId, item: &T) -> bool {
    let Some(items) = map.get_mut(&region) else {
        return false;
    };
    let removed = items.remove(item);
    if items.is_empty() {
        map.remove(&region);
    }
    removed
}

impl Drop for SelectionGroup {
    fn drop(&mut self) {
        let summary = std::mem::take(&mut self.pending) | SelectionChange::FINAL;
        self.callbacks.notify(&SelectionEvent { summary });
    }
}
