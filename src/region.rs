//! Region tree: named regions, each owning a mesh, fields and a rendition.
//!
//! Rendition changes are reported to callbacks registered on the changed region and on every
//! ancestor, so an observer of a region hears about its whole subtree. Changes can be held
//! back with [`RegionTree::begin_change`]/[`RegionTree::end_change`] brackets; a region's
//! notifications are delayed while it or any of its ancestors has an open bracket.
use crate::callback::{CallbackId, CallbackStatus};
use crate::field::FieldGraph;
use crate::mesh::Mesh;
use crate::rendition::{ChangeStatus, CompileStatus, Graphic, Rendition, RenditionEvent, RenditionEventKind};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::error::Error;
use std::fmt;
use std::fmt::Display;

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RegionId(usize);

#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum RegionError {
    UnknownRegion(RegionId),
    InvalidName(String),
    DuplicateName(String),
    NotAChild { parent: RegionId, child: RegionId },
    NoSuchGraphic { region: RegionId, position: u32 },
    CacheNotOpen(RegionId),
}

impl Display for RegionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegionError::UnknownRegion(id) => write!(f, "Region {} does not exist", id.0),
            RegionError::InvalidName(name) => write!(f, "Invalid region name \"{}\"", name),
            RegionError::DuplicateName(name) => write!(f, "A child region named \"{}\" already exists", name),
            RegionError::NotAChild { parent, child } => {
                write!(f, "Region {} is not a child of region {}", child.0, parent.0)
            }
            RegionError::NoSuchGraphic { region, position } => {
                write!(f, "Region {} has no graphic at position {}", region.0, position)
            }
            RegionError::CacheNotOpen(id) => write!(f, "end_change without begin_change on region {}", id.0),
        }
    }
}

impl Error for RegionError {}

#[derive(Debug)]
pub struct Region {
    name: String,
    parent: Option<RegionId>,
    children: Vec<RegionId>,
    mesh: Mesh,
    fields: FieldGraph,
    rendition: Rendition,
}

impl Region {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parent(&self) -> Option<RegionId> {
        self.parent
    }

    pub fn children(&self) -> &[RegionId] {
        &self.children
    }

    pub fn mesh(&self) -> &Mesh {
        &self.mesh
    }

    pub fn mesh_mut(&mut self) -> &mut Mesh {
        &mut self.mesh
    }

    pub fn fields(&self) -> &FieldGraph {
        &self.fields
    }

    pub fn fields_mut(&mut self) -> &mut FieldGraph {
        &mut self.fields
    }

    pub fn rendition(&self) -> &Rendition {
        &self.rendition
    }
}

#[derive(Debug)]
pub struct RegionTree {
    regions: Vec<Option<Region>>,
    next_rendition_position: u32,
}

impl Default for RegionTree {
    fn default() -> Self {
        Self::new()
    }
}

impl RegionTree {
    /// Creates a tree holding only an unnamed root region.
    pub fn new() -> Self {
        let mut tree = Self {
            regions: Vec::new(),
            next_rendition_position: 1,
        };
        tree.insert("", None);
        tree
    }

    pub fn root(&self) -> RegionId {
        RegionId(0)
    }

    fn insert(&mut self, name: &str, parent: Option<RegionId>) -> RegionId {
        let id = RegionId(self.regions.len());
        let position = self.next_rendition_position;
        self.next_rendition_position += 1;
        self.regions.push(Some(Region {
            name: name.to_string(),
            parent,
            children: Vec::new(),
            mesh: Mesh::new(),
            fields: FieldGraph::new(),
            rendition: Rendition::new(id, position),
        }));
        id
    }

    pub fn region(&self, id: RegionId) -> Option<&Region> {
        self.regions.get(id.0).and_then(Option::as_ref)
    }

    /// Mutable access to a region's mesh and fields. Callers changing what is drawn should
    /// follow up with [`RegionTree::touch_rendition`].
    pub fn region_mut(&mut self, id: RegionId) -> Option<&mut Region> {
        self.regions.get_mut(id.0).and_then(Option::as_mut)
    }

    fn get(&self, id: RegionId) -> Result<&Region, RegionError> {
        self.region(id).ok_or(RegionError::UnknownRegion(id))
    }

    fn get_mut(&mut self, id: RegionId) -> Result<&mut Region, RegionError> {
        self.region_mut(id).ok_or(RegionError::UnknownRegion(id))
    }

    pub fn contains(&self, id: RegionId) -> bool {
        self.region(id).is_some()
    }

    pub fn rendition(&self, id: RegionId) -> Option<&Rendition> {
        self.region(id).map(Region::rendition)
    }

    pub fn create_child(&mut self, parent: RegionId, name: &str) -> Result<RegionId, RegionError> {
        if name.is_empty() || name.contains('/') {
            return Err(RegionError::InvalidName(name.to_string()));
        }
        if self.find_child(parent, name)?.is_some() {
            return Err(RegionError::DuplicateName(name.to_string()));
        }
        let child = self.insert(name, Some(parent));
        self.get_mut(parent)?.children.push(child);
        self.notify_hierarchy(
            parent,
            &RenditionEvent {
                region: parent,
                kind: RenditionEventKind::ChildAdded(child),
            },
        );
        Ok(child)
    }

    /// Removes `child` and its whole subtree. Callbacks registered on removed regions are
    /// dropped with them.
    pub fn remove_child(&mut self, parent: RegionId, child: RegionId) -> Result<(), RegionError> {
        let siblings = &mut self.get_mut(parent)?.children;
        let index = siblings
            .iter()
            .position(|c| *c == child)
            .ok_or(RegionError::NotAChild { parent, child })?;
        siblings.remove(index);
        for id in self.subtree(child) {
            self.regions[id.0] = None;
        }
        self.notify_hierarchy(
            parent,
            &RenditionEvent {
                region: parent,
                kind: RenditionEventKind::ChildRemoved(child),
            },
        );
        Ok(())
    }

    pub fn parent(&self, id: RegionId) -> Option<RegionId> {
        self.region(id)?.parent
    }

    pub fn children(&self, id: RegionId) -> &[RegionId] {
        self.region(id).map(Region::children).unwrap_or(&[])
    }

    pub fn first_child(&self, id: RegionId) -> Option<RegionId> {
        self.children(id).first().copied()
    }

    pub fn next_sibling(&self, id: RegionId) -> Option<RegionId> {
        let siblings = self.children(self.parent(id)?);
        let index = siblings.iter().position(|s| *s == id)?;
        siblings.get(index + 1).copied()
    }

    fn find_child(&self, parent: RegionId, name: &str) -> Result<Option<RegionId>, RegionError> {
        Ok(self
            .get(parent)?
            .children
            .iter()
            .copied()
            .find(|c| self.region(*c).map_or(false, |r| r.name == name)))
    }

    /// Finds a region from a `/`-separated path relative to `start`. Empty segments are
    /// ignored, so `""` and `"/"` give `start` itself.
    pub fn find_by_path(&self, start: RegionId, path: &str) -> Option<RegionId> {
        let mut current = start;
        self.region(current)?;
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            current = self.find_child(current, segment).ok()??;
        }
        Some(current)
    }

    /// `/`-separated names from the root to `id`.
    pub fn path(&self, id: RegionId) -> Option<String> {
        let mut names: Vec<&str> = self.ancestors(id).iter().filter_map(|r| self.region(*r)).map(|r| r.name()).collect();
        names.reverse();
        self.region(id)?;
        Some(names.join("/"))
    }

    /// `id` followed by its ancestors up to the root.
    pub fn ancestors(&self, id: RegionId) -> Vec<RegionId> {
        let mut result = Vec::new();
        let mut current = self.region(id).map(|_| id);
        while let Some(r) = current {
            result.push(r);
            current = self.parent(r);
        }
        result
    }

    /// `id` and all its descendants, parents before children.
    pub fn subtree(&self, id: RegionId) -> Vec<RegionId> {
        let mut result = Vec::new();
        if self.contains(id) {
            let mut stack = vec![id];
            while let Some(r) = stack.pop() {
                result.push(r);
                stack.extend(self.children(r).iter().rev());
            }
        }
        result
    }

    /// Whether `sub` is `region` or one of its descendants.
    pub fn contains_subregion(&self, region: RegionId, sub: RegionId) -> bool {
        self.ancestors(sub).contains(&region)
    }

    /// Drawing order of regions: ancestors before descendants, siblings in child order.
    pub fn is_placed_before(&self, a: RegionId, b: RegionId) -> bool {
        self.compare_regions(a, b) == Ordering::Less
    }

    pub fn compare_regions(&self, a: RegionId, b: RegionId) -> Ordering {
        if a == b {
            return Ordering::Equal;
        }
        let mut path_a = self.ancestors(a);
        let mut path_b = self.ancestors(b);
        path_a.reverse();
        path_b.reverse();
        let common = path_a.iter().zip(&path_b).take_while(|(x, y)| x == y).count();
        match (path_a.get(common), path_b.get(common)) {
            (None, _) => Ordering::Less,
            (_, None) => Ordering::Greater,
            (Some(x), Some(y)) => {
                let siblings = common
                    .checked_sub(1)
                    .map(|i| self.children(path_a[i]))
                    .unwrap_or(&[]);
                let ix = siblings.iter().position(|s| s == x);
                let iy = siblings.iter().position(|s| s == y);
                ix.cmp(&iy)
            }
        }
    }

    pub fn add_rendition_callback<F>(&mut self, region: RegionId, callback: F) -> Result<CallbackId, RegionError>
    where
        F: FnMut(&RenditionEvent) -> CallbackStatus + 'static,
    {
        Ok(self.get_mut(region)?.rendition.callbacks.add(callback))
    }

    pub fn remove_rendition_callback(&mut self, region: RegionId, id: CallbackId) -> bool {
        self.region_mut(region)
            .map_or(false, |r| r.rendition.callbacks.remove(id))
    }

    pub fn begin_change(&mut self, region: RegionId) -> Result<(), RegionError> {
        self.get_mut(region)?.rendition.cache += 1;
        Ok(())
    }

    /// Closes a bracket; when no bracket remains open on the region or its ancestors, pending
    /// changes in the subtree are flushed.
    pub fn end_change(&mut self, region: RegionId) -> Result<(), RegionError> {
        let rendition = &mut self.get_mut(region)?.rendition;
        if rendition.cache == 0 {
            warn!("Region change bracket closed without being opened");
            return Err(RegionError::CacheNotOpen(region));
        }
        rendition.cache -= 1;
        if !self.is_change_held(region) {
            for id in self.subtree(region) {
                if !self.is_change_held(id) {
                    self.flush(id);
                }
            }
        }
        Ok(())
    }

    /// Whether notifications for `region` are currently held by an open bracket.
    pub fn is_change_held(&self, region: RegionId) -> bool {
        self.ancestors(region)
            .iter()
            .filter_map(|r| self.region(*r))
            .any(|r| r.rendition.cache > 0)
    }

    pub fn add_graphic(&mut self, region: RegionId, graphic: Graphic) -> Result<u32, RegionError> {
        let position = self.get_mut(region)?.rendition.push_graphic(graphic);
        self.rendition_changed(region, ChangeStatus::Change);
        Ok(position)
    }

    pub fn remove_graphic(&mut self, region: RegionId, position: u32) -> Result<Graphic, RegionError> {
        let graphic = self
            .get_mut(region)?
            .rendition
            .take_graphic(position)
            .ok_or(RegionError::NoSuchGraphic { region, position })?;
        self.rendition_changed(region, ChangeStatus::Change);
        Ok(graphic)
    }

    /// Modifies a graphic in place. Changes to fast changing graphics are reported as fast
    /// changes.
    pub fn update_graphic<F>(&mut self, region: RegionId, position: u32, update: F) -> Result<(), RegionError>
    where
        F: FnOnce(&mut Graphic),
    {
        let graphic = self
            .get_mut(region)?
            .rendition
            .graphic_mut(position)
            .ok_or(RegionError::NoSuchGraphic { region, position })?;
        let was_fast = graphic.fast_changing;
        update(graphic);
        let status = if was_fast && graphic.fast_changing {
            ChangeStatus::FastChange
        } else {
            ChangeStatus::Change
        };
        self.rendition_changed(region, status);
        Ok(())
    }

    /// Reports a change to what a region draws, e.g. after editing its fields.
    pub fn touch_rendition(&mut self, region: RegionId, status: ChangeStatus) -> Result<(), RegionError> {
        self.get(region)?;
        self.rendition_changed(region, status);
        Ok(())
    }

    /// Renditions with time dependent graphics are marked as fast changed.
    pub fn set_time(&mut self, time: f64) {
        let time_dependent: Vec<RegionId> = self
            .regions
            .iter()
            .flatten()
            .filter(|r| r.rendition.has_time_dependent_graphics())
            .map(|r| r.rendition.region())
            .collect();
        debug!("Time {} affects {} renditions", time, time_dependent.len());
        for region in time_dependent {
            self.rendition_changed(region, ChangeStatus::FastChange);
        }
    }

    pub(crate) fn mark_rendition_compiled(&mut self, region: RegionId) {
        if let Some(r) = self.region_mut(region) {
            r.rendition.compile_status = CompileStatus::Compiled;
        }
    }

    fn rendition_changed(&mut self, region: RegionId, status: ChangeStatus) {
        if let Some(r) = self.region_mut(region) {
            r.rendition.mark_changed(status);
        }
        if !self.is_change_held(region) {
            self.flush(region);
        }
    }

    fn flush(&mut self, region: RegionId) {
        let Some(r) = self.region_mut(region) else {
            return;
        };
        let status = std::mem::take(&mut r.rendition.pending);
        if status.is_changed() {
            let event = RenditionEvent {
                region,
                kind: RenditionEventKind::Changed(status),
            };
            self.notify_hierarchy(region, &event);
        }
    }

    fn notify_hierarchy(&mut self, start: RegionId, event: &RenditionEvent) {
        for id in self.ancestors(start) {
            if let Some(r) = self.region_mut(id) {
                r.rendition.callbacks.notify(event);
            }
        }
    }
}
