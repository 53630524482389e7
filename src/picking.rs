//! Selection buffers, picked objects and nearest-object queries.
//!
//! A hit record consists of the number of names, the near and far depths, and the names. The
//! first name is the position of the rendition that was drawn. The remaining names are
//! subobject names: the graphic position, then the element identifier, then a node, data
//! point or element point number, depending on the graphic.
use crate::mesh::{ElementId, ElementRole, NodeId};
use crate::region::{RegionId, RegionTree};
use crate::rendition::{Graphic, GraphicType, XiDiscretizationMode};
use crate::scene::SceneError;
use log::warn;
use nalgebra::{Matrix4, Point3};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt;
use std::fmt::Display;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PickSettings {
    /// Initial select buffer capacity in words.
    pub initial_buffer_size: usize,
    /// Growth of the select buffer after each overflow.
    pub buffer_size_increment: usize,
    /// Selection passes attempted before the pick is abandoned.
    pub max_attempts: usize,
}

impl Default for PickSettings {
    fn default() -> Self {
        Self {
            initial_buffer_size: 10_000,
            buffer_size_increment: 10_000,
            max_attempts: 64,
        }
    }
}

#[derive(Debug)]
#[non_exhaustive]
pub enum PickError {
    Compile(SceneError),
    Renderer(eyre::Report),
    /// The selection pass still overflowed after the allowed number of attempts.
    BufferOverflow { attempts: usize, buffer_size: usize },
}

impl Display for PickError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PickError::Compile(err) => write!(f, "Could not compile scene for picking: {}", err),
            PickError::Renderer(err) => write!(f, "Selection pass failed: {}", err),
            PickError::BufferOverflow { attempts, buffer_size } => write!(
                f,
                "Select buffer still overflowing after {} attempts (size {})",
                attempts, buffer_size
            ),
        }
    }
}

impl Error for PickError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            PickError::Compile(err) => Some(err),
            _ => None,
        }
    }
}

/// Capacity limited buffer of hit records, written by a backend in selection mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectBuffer {
    capacity: usize,
    words: Vec<u32>,
    hits: usize,
    overflowed: bool,
}

/// One record of a select buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HitRecord<'a> {
    pub near: u32,
    pub far: u32,
    pub names: &'a [u32],
}

impl SelectBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            words: Vec::new(),
            hits: 0,
            overflowed: false,
        }
    }

    /// Wraps raw buffer contents as returned by a driver; a negative hit count means overflow.
    pub fn from_raw(words: Vec<u32>, hit_count: i64) -> Self {
        Self {
            capacity: words.len(),
            hits: hit_count.max(0) as usize,
            overflowed: hit_count < 0,
            words,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn words(&self) -> &[u32] {
        &self.words
    }

    pub fn overflowed(&self) -> bool {
        self.overflowed
    }

    /// Number of complete records, or `None` after overflow.
    pub fn hit_count(&self) -> Option<usize> {
        (!self.overflowed).then_some(self.hits)
    }

    pub fn clear(&mut self) {
        self.words.clear();
        self.hits = 0;
        self.overflowed = false;
    }

    /// Appends a record. Returns `false`, and marks the buffer as overflowed, if it does not fit.
    pub fn push_hit(&mut self, names: &[u32], near: u32, far: u32) -> bool {
        if self.overflowed || self.words.len() + 3 + names.len() > self.capacity {
            self.overflowed = true;
            return false;
        }
        self.words.push(names.len() as u32);
        self.words.push(near);
        self.words.push(far);
        self.words.extend_from_slice(names);
        self.hits += 1;
        true
    }

    /// Parses the records. Parsing stops at the first truncated record, which is logged.
    pub fn records(&self) -> Vec<HitRecord<'_>> {
        // Every record takes at least three words, whatever the hit count claims.
        let mut records = Vec::with_capacity(self.hits.min(self.words.len() / 3));
        let mut offset = 0;
        for hit in 0..self.hits {
            let Some(header) = self.words.get(offset..offset + 3) else {
                warn!("Select buffer truncated in header of hit {}", hit);
                break;
            };
            let name_count = header[0] as usize;
            let Some(names) = self.words.get(offset + 3..offset + 3 + name_count) else {
                warn!("Select buffer truncated in names of hit {}", hit);
                break;
            };
            records.push(HitRecord {
                near: header[1],
                far: header[2],
                names,
            });
            offset += 3 + name_count;
        }
        records
    }
}

/// The modelview and projection used for a selection pass.
#[derive(Debug, Clone, PartialEq)]
pub struct InteractionVolume {
    pub modelview: Matrix4<f64>,
    pub projection: Matrix4<f64>,
}

impl InteractionVolume {
    pub fn new(modelview: Matrix4<f64>, projection: Matrix4<f64>) -> Self {
        Self { modelview, projection }
    }

    /// Narrows `projection` to a `width` by `height` window around `(x, y)` in window
    /// coordinates, as used for picking under the mouse. `viewport` is `[x, y, width, height]`.
    pub fn around_window_point(
        modelview: Matrix4<f64>,
        projection: Matrix4<f64>,
        x: f64,
        y: f64,
        width: f64,
        height: f64,
        viewport: [f64; 4],
    ) -> Self {
        let [vx, vy, vw, vh] = viewport;
        let mut pick = Matrix4::identity();
        pick[(0, 0)] = vw / width;
        pick[(1, 1)] = vh / height;
        pick[(0, 3)] = (vw - 2.0 * (x - vx)) / width;
        pick[(1, 3)] = (vh - 2.0 * (y - vy)) / height;
        Self {
            modelview,
            projection: pick * projection,
        }
    }

    /// Matrices in column-major order, as graphics APIs expect.
    pub fn modelview_column_major(&self) -> [f64; 16] {
        column_major(&self.modelview)
    }

    pub fn projection_column_major(&self) -> [f64; 16] {
        column_major(&self.projection)
    }

    /// Normalized device coordinates of a model point, if it is in front of the viewer.
    pub fn project(&self, point: &Point3<f64>) -> Option<Point3<f64>> {
        let clip = self.projection * self.modelview * point.to_homogeneous();
        (clip.w > 0.0).then(|| Point3::new(clip.x / clip.w, clip.y / clip.w, clip.z / clip.w))
    }

    pub fn contains(&self, point: &Point3<f64>) -> bool {
        self.project(point)
            .map_or(false, |ndc| ndc.iter().all(|c| (-1.0..=1.0).contains(c)))
    }
}

fn column_major(matrix: &Matrix4<f64>) -> [f64; 16] {
    let mut result = [0.0; 16];
    result.copy_from_slice(matrix.as_slice());
    result
}

/// One hit, resolved to the rendition it was drawn by.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PickedObject {
    hit_number: usize,
    renditions: Vec<RegionId>,
    subobjects: Vec<u32>,
    nearest: u32,
    farthest: u32,
}

impl PickedObject {
    pub fn new(hit_number: usize, nearest: u32, farthest: u32) -> Self {
        Self {
            hit_number,
            renditions: Vec::new(),
            subobjects: Vec::new(),
            nearest,
            farthest,
        }
    }

    pub fn add_rendition(&mut self, region: RegionId) {
        self.renditions.push(region);
    }

    pub fn add_subobject(&mut self, name: u32) {
        self.subobjects.push(name);
    }

    pub fn hit_number(&self) -> usize {
        self.hit_number
    }

    /// Regions of the renditions on the path to the hit, outermost first.
    pub fn renditions(&self) -> &[RegionId] {
        &self.renditions
    }

    pub fn last_rendition(&self) -> Option<RegionId> {
        self.renditions.last().copied()
    }

    pub fn subobjects(&self) -> &[u32] {
        &self.subobjects
    }

    pub fn subobject(&self, index: usize) -> Option<u32> {
        self.subobjects.get(index).copied()
    }

    pub fn nearest(&self) -> u32 {
        self.nearest
    }

    pub fn farthest(&self) -> u32 {
        self.farthest
    }
}

/// Which kinds of element a nearest-element query accepts.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ElementPickFilter {
    /// Top-level or three-dimensional elements.
    pub elements: bool,
    /// Faces or two-dimensional elements.
    pub faces: bool,
    /// Lines or one-dimensional elements.
    pub lines: bool,
    /// Only accept hits in this region or its subregions.
    pub region: Option<RegionId>,
}

impl Default for ElementPickFilter {
    fn default() -> Self {
        Self {
            elements: true,
            faces: true,
            lines: true,
            region: None,
        }
    }
}

impl ElementPickFilter {
    fn accepts(&self, role: ElementRole, dimension: usize) -> bool {
        (self.elements && (role == ElementRole::Top || dimension == 3))
            || (self.faces && (role == ElementRole::Face || dimension == 2))
            || (self.lines && (role == ElementRole::Line || dimension == 1))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PickedElement {
    pub region: RegionId,
    pub element: ElementId,
    pub graphic_position: u32,
    pub hit_number: usize,
    pub nearest: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PickedNode {
    pub region: RegionId,
    pub node: NodeId,
    pub graphic_position: u32,
    pub hit_number: usize,
    pub nearest: u32,
}

/// Identifies the element points of one element under one discretization.
#[derive(Debug, Clone, PartialEq)]
pub struct ElementPointIdentifier {
    pub element: ElementId,
    pub top_level_element: ElementId,
    pub discretization: XiDiscretizationMode,
    pub number_in_xi: [usize; 3],
    pub exact_xi: [f64; 3],
}

/// Sorted, non-overlapping ranges of element point numbers sharing one identifier.
#[derive(Debug, Clone, PartialEq)]
pub struct ElementPointRanges {
    identifier: ElementPointIdentifier,
    ranges: Vec<(u32, u32)>,
}

impl ElementPointRanges {
    pub fn new(identifier: ElementPointIdentifier) -> Self {
        Self {
            identifier,
            ranges: Vec::new(),
        }
    }

    pub fn identifier(&self) -> &ElementPointIdentifier {
        &self.identifier
    }

    pub fn ranges(&self) -> &[(u32, u32)] {
        &self.ranges
    }

    pub fn contains(&self, point: u32) -> bool {
        self.ranges.iter().any(|(start, stop)| (*start..=*stop).contains(&point))
    }

    pub fn number_of_points(&self) -> usize {
        self.ranges.iter().map(|(start, stop)| (stop - start) as usize + 1).sum()
    }

    /// Adds the inclusive range, merging with overlapping or adjacent ranges.
    pub fn add_range(&mut self, start: u32, stop: u32) {
        let (mut start, mut stop) = (start.min(stop), start.max(stop));
        let mut merged = Vec::with_capacity(self.ranges.len() + 1);
        for &(s, e) in &self.ranges {
            if e.saturating_add(1) < start || stop.saturating_add(1) < s {
                merged.push((s, e));
            } else {
                start = start.min(s);
                stop = stop.max(e);
            }
        }
        merged.push((start, stop));
        merged.sort_unstable();
        self.ranges = merged;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PickedElementPoint {
    pub region: RegionId,
    pub ranges: ElementPointRanges,
    pub graphic_position: u32,
    pub hit_number: usize,
    pub nearest: u32,
}

/// Hits of one pick, in select buffer order unless sorted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PickedObjectList {
    objects: Vec<PickedObject>,
}

/// A hit resolved to its region, graphic and subobject names.
struct Candidate<'a> {
    object: &'a PickedObject,
    region: RegionId,
    graphic: &'a Graphic,
}

impl PickedObjectList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the list from a select buffer, resolving the first name of each record to a
    /// rendition. Records without names or naming no rendition are skipped.
    pub fn from_select_buffer<F>(buffer: &SelectBuffer, mut resolve_rendition: F) -> Self
    where
        F: FnMut(u32) -> Option<RegionId>,
    {
        let mut objects = Vec::new();
        for (hit_number, record) in buffer.records().iter().enumerate() {
            let Some((&position, subobjects)) = record.names.split_first() else {
                warn!("Hit {} has no names", hit_number);
                continue;
            };
            let Some(region) = resolve_rendition(position) else {
                warn!("Hit {} names unknown rendition position {}", hit_number, position);
                continue;
            };
            let mut object = PickedObject::new(hit_number, record.near, record.far);
            object.add_rendition(region);
            subobjects.iter().for_each(|name| object.add_subobject(*name));
            objects.push(object);
        }
        Self { objects }
    }

    pub fn push(&mut self, object: PickedObject) {
        self.objects.push(object);
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PickedObject> {
        self.objects.iter()
    }

    pub fn get(&self, index: usize) -> Option<&PickedObject> {
        self.objects.get(index)
    }

    /// Stable sort by nearest depth.
    pub fn sort_by_depth(&mut self) {
        self.objects.sort_by_key(PickedObject::nearest);
    }

    /// Nearest object with a rendition. Ties keep the earliest.
    pub fn nearest_any(&self) -> Option<&PickedObject> {
        nearest_by_depth(self.objects.iter().filter(|o| !o.renditions.is_empty()), |o| o.nearest)
    }

    fn candidates<'a>(&'a self, tree: &'a RegionTree, region: Option<RegionId>) -> impl Iterator<Item = Candidate<'a>> {
        self.objects.iter().filter_map(move |object| {
            let picked_region = object.last_rendition()?;
            if let Some(restriction) = region {
                if !tree.contains_subregion(restriction, picked_region) {
                    return None;
                }
            }
            let graphic = tree.rendition(picked_region)?.graphic_at_position(object.subobject(0)?)?;
            Some(Candidate {
                object,
                region: picked_region,
                graphic,
            })
        })
    }

    fn element_candidates<'a>(
        &'a self,
        tree: &'a RegionTree,
        filter: ElementPickFilter,
    ) -> impl Iterator<Item = PickedElement> + 'a {
        self.candidates(tree, filter.region).filter_map(move |c| {
            if !c.graphic.selects_elements() || c.object.subobjects.len() < 2 {
                return None;
            }
            let element = ElementId(c.object.subobjects[1]);
            let mesh = tree.region(c.region)?.mesh();
            let Some(role) = mesh.role(element) else {
                warn!("Picked {} not found in region", element);
                return None;
            };
            let dimension = mesh.element(element)?.dimension();
            filter.accepts(role, dimension).then(|| PickedElement {
                region: c.region,
                element,
                graphic_position: c.object.subobjects[0],
                hit_number: c.object.hit_number,
                nearest: c.object.nearest,
            })
        })
    }

    fn node_candidates<'a>(
        &'a self,
        tree: &'a RegionTree,
        use_data: bool,
        region: Option<RegionId>,
    ) -> impl Iterator<Item = PickedNode> + 'a {
        let wanted = if use_data {
            GraphicType::DataPoints
        } else {
            GraphicType::NodePoints
        };
        self.candidates(tree, region).filter_map(move |c| {
            if c.graphic.graphic_type != wanted || c.object.subobjects.len() < 3 {
                return None;
            }
            let node = NodeId(c.object.subobjects[2]);
            let mesh = tree.region(c.region)?.mesh();
            let exists = if use_data {
                mesh.contains_data_point(node)
            } else {
                mesh.contains_node(node)
            };
            if !exists {
                warn!("Picked {} not found in region", node);
                return None;
            }
            Some(PickedNode {
                region: c.region,
                node,
                graphic_position: c.object.subobjects[0],
                hit_number: c.object.hit_number,
                nearest: c.object.nearest,
            })
        })
    }

    fn element_point_candidates<'a>(
        &'a self,
        tree: &'a RegionTree,
        region: Option<RegionId>,
    ) -> impl Iterator<Item = PickedElementPoint> + 'a {
        self.candidates(tree, region).filter_map(move |c| {
            if c.graphic.graphic_type != GraphicType::ElementPoints || c.object.subobjects.len() < 3 {
                return None;
            }
            let element = ElementId(c.object.subobjects[1]);
            let point = c.object.subobjects[2];
            let identifier = element_point_identifier(tree, c.region, element, c.graphic)?;
            let mut ranges = ElementPointRanges::new(identifier);
            ranges.add_range(point, point);
            Some(PickedElementPoint {
                region: c.region,
                ranges,
                graphic_position: c.object.subobjects[0],
                hit_number: c.object.hit_number,
                nearest: c.object.nearest,
            })
        })
    }

    pub fn nearest_element(&self, tree: &RegionTree, filter: ElementPickFilter) -> Option<PickedElement> {
        nearest_by_depth(self.element_candidates(tree, filter), |e| e.nearest)
    }

    /// Nearest node, or data point if `use_data`, optionally restricted to a region subtree.
    pub fn nearest_node(&self, tree: &RegionTree, use_data: bool, region: Option<RegionId>) -> Option<PickedNode> {
        nearest_by_depth(self.node_candidates(tree, use_data, region), |n| n.nearest)
    }

    pub fn nearest_element_point(&self, tree: &RegionTree, region: Option<RegionId>) -> Option<PickedElementPoint> {
        nearest_by_depth(self.element_point_candidates(tree, region), |p| p.nearest)
    }

    /// All picked element points, merged per identifier in order of first appearance.
    pub fn picked_element_points(&self, tree: &RegionTree, region: Option<RegionId>) -> Vec<ElementPointRanges> {
        let mut merged: Vec<ElementPointRanges> = Vec::new();
        for picked in self.element_point_candidates(tree, region) {
            match merged
                .iter_mut()
                .find(|r| r.identifier == picked.ranges.identifier)
            {
                Some(existing) => {
                    for &(start, stop) in picked.ranges.ranges() {
                        existing.add_range(start, stop);
                    }
                }
                None => merged.push(picked.ranges),
            }
        }
        merged
    }

    /// Picked nodes (or data points) per region, sorted and without duplicates.
    pub fn picked_region_sorted_nodes(&self, tree: &RegionTree, use_data: bool) -> BTreeMap<RegionId, Vec<NodeId>> {
        let mut result: BTreeMap<RegionId, Vec<NodeId>> = BTreeMap::new();
        for picked in self.node_candidates(tree, use_data, None) {
            result.entry(picked.region).or_default().push(picked.node);
        }
        for nodes in result.values_mut() {
            nodes.sort_unstable();
            nodes.dedup();
        }
        result
    }

    pub fn picked_region_sorted_elements(
        &self,
        tree: &RegionTree,
        filter: ElementPickFilter,
    ) -> BTreeMap<RegionId, Vec<ElementId>> {
        let mut result: BTreeMap<RegionId, Vec<ElementId>> = BTreeMap::new();
        for picked in self.element_candidates(tree, filter) {
            result.entry(picked.region).or_default().push(picked.element);
        }
        for elements in result.values_mut() {
            elements.sort_unstable();
            elements.dedup();
        }
        result
    }
}

/// First item with the smallest depth.
fn nearest_by_depth<T, I, D>(items: I, depth: D) -> Option<T>
where
    I: IntoIterator<Item = T>,
    D: Fn(&T) -> u32,
{
    let mut nearest: Option<T> = None;
    for item in items {
        if nearest.as_ref().map_or(true, |best| depth(&item) < depth(best)) {
            nearest = Some(item);
        }
    }
    nearest
}

/// Element point identifier for a picked point. Face and line elements take the point
/// counts of the top-level element axes they follow.
fn element_point_identifier(
    tree: &RegionTree,
    region: RegionId,
    element: ElementId,
    graphic: &Graphic,
) -> Option<ElementPointIdentifier> {
    let mesh = tree.region(region)?.mesh();
    let Some(dimension) = mesh.element(element).map(|e| e.dimension()) else {
        warn!("Picked element point of {} not found in region", element);
        return None;
    };
    let top_level_element = mesh.top_level_element(element)?;
    let mut number_in_xi = [1; 3];
    if graphic.discretization != XiDiscretizationMode::ExactXi {
        match mesh.find_ancestor_map(element, top_level_element) {
            Some(map) => {
                for parent_axis in 0..map.parent_dimension() {
                    if let Some((face_axis, _)) = map.axis_source(parent_axis) {
                        number_in_xi[face_axis] = graphic.number_in_xi[parent_axis];
                    }
                }
            }
            None => number_in_xi[..dimension].copy_from_slice(&graphic.number_in_xi[..dimension]),
        }
    }
    Some(ElementPointIdentifier {
        element,
        top_level_element,
        discretization: graphic.discretization,
        number_in_xi,
        exact_xi: graphic.exact_xi,
    })
}
