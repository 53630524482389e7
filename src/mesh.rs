//! Minimal mesh topology: elements, faces/lines inheriting from parents, nodes and data points.
//!
//! Elements are identified by [`ElementId`] and carry their dimension. A face or line element
//! records each parent element together with a [`ChartMap`] taking its own chart coordinates
//! to the chart coordinates of the parent, which is what allows fields defined only on
//! top-level elements to be evaluated on their faces and lines.
use log::warn;
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::error::Error;
use std::fmt;
use std::fmt::Display;

/// The highest element dimension supported.
pub const MAXIMUM_ELEMENT_XI_DIMENSIONS: usize = 3;

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ElementId(pub u32);

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub u32);

impl Display for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "element {}", self.0)
    }
}

impl Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node {}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum MeshError {
    DuplicateElement(ElementId),
    UnknownElement(ElementId),
    InvalidDimension(usize),
    /// The chart map does not connect an element of the given dimension to its parent.
    ChartMapMismatch { expected_parent_dimension: usize, found: usize },
    /// A parent chart axis depends on more than one face chart axis.
    ChartMapNotAxisAligned,
}

impl Display for MeshError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MeshError::DuplicateElement(id) => write!(f, "{} already exists in mesh", id),
            MeshError::UnknownElement(id) => write!(f, "{} is not in mesh", id),
            MeshError::InvalidDimension(dim) => write!(
                f,
                "Element dimension {} is outside the supported range 1..={}",
                dim, MAXIMUM_ELEMENT_XI_DIMENSIONS
            ),
            MeshError::ChartMapMismatch {
                expected_parent_dimension,
                found,
            } => write!(
                f,
                "Chart map targets a {}-dimensional parent but parent has dimension {}",
                found, expected_parent_dimension
            ),
            MeshError::ChartMapNotAxisAligned => {
                write!(f, "Each parent chart axis may depend on at most one face chart axis")
            }
        }
    }
}

impl Error for MeshError {}

/// Affine map from the chart of a face or line element to the chart of a parent element.
///
/// Parent coordinates are given by `offset + matrix * face_xi`. Every row of the matrix has
/// at most one non-zero entry, i.e. each parent axis is either constant on the face or follows
/// a single face axis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartMap {
    offset: DVector<f64>,
    matrix: DMatrix<f64>,
}

impl ChartMap {
    pub fn new(offset: DVector<f64>, matrix: DMatrix<f64>) -> Result<Self, MeshError> {
        if offset.len() != matrix.nrows() {
            return Err(MeshError::ChartMapMismatch {
                expected_parent_dimension: offset.len(),
                found: matrix.nrows(),
            });
        }
        let aligned = matrix
            .row_iter()
            .all(|row| row.iter().filter(|a| **a != 0.0).count() <= 1);
        if !aligned {
            return Err(MeshError::ChartMapNotAxisAligned);
        }
        Ok(Self { offset, matrix })
    }

    /// The identity map on a chart of the given dimension.
    pub fn identity(dimension: usize) -> Self {
        Self {
            offset: DVector::zeros(dimension),
            matrix: DMatrix::identity(dimension, dimension),
        }
    }

    /// Map from one of the six faces of the unit cube.
    ///
    /// Faces are numbered `xi0 = 0, xi0 = 1, xi1 = 0, xi1 = 1, xi2 = 0, xi2 = 1`; the face
    /// chart axes follow the remaining cube axes in increasing order.
    pub fn cube_face(face_number: usize) -> Option<Self> {
        Self::fixed_axis_map(3, face_number)
    }

    /// Map from one of the four edges of the unit square, numbered as for [`ChartMap::cube_face`].
    pub fn square_edge(edge_number: usize) -> Option<Self> {
        Self::fixed_axis_map(2, edge_number)
    }

    fn fixed_axis_map(parent_dimension: usize, number: usize) -> Option<Self> {
        if number >= 2 * parent_dimension {
            return None;
        }
        let fixed_axis = number / 2;
        let mut offset = DVector::zeros(parent_dimension);
        offset[fixed_axis] = (number % 2) as f64;
        let mut matrix = DMatrix::zeros(parent_dimension, parent_dimension - 1);
        let free_axes = (0..parent_dimension).filter(|&axis| axis != fixed_axis);
        for (face_axis, parent_axis) in free_axes.enumerate() {
            matrix[(parent_axis, face_axis)] = 1.0;
        }
        Some(Self { offset, matrix })
    }

    pub fn face_dimension(&self) -> usize {
        self.matrix.ncols()
    }

    pub fn parent_dimension(&self) -> usize {
        self.matrix.nrows()
    }

    pub fn offset(&self) -> &DVector<f64> {
        &self.offset
    }

    pub fn matrix(&self) -> &DMatrix<f64> {
        &self.matrix
    }

    /// The face axis and scale that parent axis `parent_axis` follows, or `None` if the parent
    /// coordinate is constant over the face.
    pub fn axis_source(&self, parent_axis: usize) -> Option<(usize, f64)> {
        self.matrix
            .row(parent_axis)
            .iter()
            .enumerate()
            .find(|(_, a)| **a != 0.0)
            .map(|(face_axis, a)| (face_axis, *a))
    }

    /// Maps face chart coordinates to the parent chart, or `None` if `face_xi` does not have
    /// exactly [`face_dimension`](Self::face_dimension) entries.
    pub fn apply(&self, face_xi: &[f64]) -> Option<Vec<f64>> {
        if face_xi.len() != self.face_dimension() {
            return None;
        }
        let xi = DVector::from_column_slice(face_xi);
        Some((&self.offset + &self.matrix * xi).as_slice().to_vec())
    }

    /// Composes `self` (face to parent) with `inner` (line to face), giving a map from the line
    /// chart directly to the parent chart. `None` if `inner` does not map onto this face chart.
    pub fn compose(&self, inner: &ChartMap) -> Option<ChartMap> {
        if inner.parent_dimension() != self.face_dimension() {
            return None;
        }
        Some(ChartMap {
            offset: &self.offset + &self.matrix * &inner.offset,
            matrix: &self.matrix * &inner.matrix,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Element {
    id: ElementId,
    dimension: usize,
    parents: Vec<(ElementId, ChartMap)>,
}

impl Element {
    pub fn id(&self) -> ElementId {
        self.id
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn parents(&self) -> &[(ElementId, ChartMap)] {
        &self.parents
    }

    pub fn is_top_level(&self) -> bool {
        self.parents.is_empty()
    }
}

/// How an element takes part in the mesh hierarchy, used when filtering picked elements.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ElementRole {
    Top,
    Face,
    Line,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Mesh {
    elements: BTreeMap<ElementId, Element>,
    nodes: BTreeSet<NodeId>,
    data_points: BTreeSet<NodeId>,
}

impl Mesh {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_element(&mut self, id: ElementId, dimension: usize) -> Result<(), MeshError> {
        if dimension == 0 || dimension > MAXIMUM_ELEMENT_XI_DIMENSIONS {
            return Err(MeshError::InvalidDimension(dimension));
        }
        if self.elements.contains_key(&id) {
            return Err(MeshError::DuplicateElement(id));
        }
        self.elements.insert(
            id,
            Element {
                id,
                dimension,
                parents: Vec::new(),
            },
        );
        Ok(())
    }

    /// Adds `face` as a face (or line) of `parent`, creating the face element if it does not
    /// exist yet. Faces shared between parents are added once per parent.
    pub fn add_face(&mut self, face: ElementId, parent: ElementId, map: ChartMap) -> Result<(), MeshError> {
        let parent_dimension = self
            .elements
            .get(&parent)
            .ok_or(MeshError::UnknownElement(parent))?
            .dimension;
        if map.parent_dimension() != parent_dimension {
            return Err(MeshError::ChartMapMismatch {
                expected_parent_dimension: parent_dimension,
                found: map.parent_dimension(),
            });
        }
        let face_dimension = map.face_dimension();
        if face_dimension == 0 {
            return Err(MeshError::InvalidDimension(face_dimension));
        }
        let element = self.elements.entry(face).or_insert_with(|| Element {
            id: face,
            dimension: face_dimension,
            parents: Vec::new(),
        });
        if element.dimension != face_dimension {
            return Err(MeshError::InvalidDimension(face_dimension));
        }
        element.parents.push((parent, map));
        Ok(())
    }

    pub fn element(&self, id: ElementId) -> Option<&Element> {
        self.elements.get(&id)
    }

    pub fn contains_element(&self, id: ElementId) -> bool {
        self.elements.contains_key(&id)
    }

    pub fn elements(&self) -> impl Iterator<Item = &Element> {
        self.elements.values()
    }

    pub fn number_of_elements(&self) -> usize {
        self.elements.len()
    }

    pub fn role(&self, id: ElementId) -> Option<ElementRole> {
        let element = self.element(id)?;
        let role = if element.is_top_level() {
            ElementRole::Top
        } else if element.dimension == 1 {
            ElementRole::Line
        } else {
            ElementRole::Face
        };
        Some(role)
    }

    pub fn add_node(&mut self, node: NodeId) -> bool {
        self.nodes.insert(node)
    }

    pub fn contains_node(&self, node: NodeId) -> bool {
        self.nodes.contains(&node)
    }

    pub fn add_data_point(&mut self, point: NodeId) -> bool {
        self.data_points.insert(point)
    }

    pub fn contains_data_point(&self, point: NodeId) -> bool {
        self.data_points.contains(&point)
    }

    /// All ancestors of `element` in breadth-first order, each with the composed chart map
    /// from `element` to that ancestor. Ancestors reachable by several paths appear once,
    /// through the first path found.
    pub fn ancestors_breadth_first(&self, element: ElementId) -> Vec<(ElementId, ChartMap)> {
        let mut result: Vec<(ElementId, ChartMap)> = Vec::new();
        let mut queue = VecDeque::new();
        if let Some(start) = self.element(element) {
            queue.push_back((start, ChartMap::identity(start.dimension)));
        }
        while let Some((current, map)) = queue.pop_front() {
            for (parent_id, parent_map) in &current.parents {
                if result.iter().any(|(id, _)| id == parent_id) {
                    continue;
                }
                let Some(composed) = parent_map.compose(&map) else {
                    warn!("Chart map from {:?} to {:?} does not chain", current.id, parent_id);
                    continue;
                };
                if let Some(parent) = self.element(*parent_id) {
                    queue.push_back((parent, composed.clone()));
                }
                result.push((*parent_id, composed));
            }
        }
        result
    }

    /// The chart map from `element` to `ancestor`, if `ancestor` is reachable through parents.
    pub fn find_ancestor_map(&self, element: ElementId, ancestor: ElementId) -> Option<ChartMap> {
        self.ancestors_breadth_first(element)
            .into_iter()
            .find(|(id, _)| *id == ancestor)
            .map(|(_, map)| map)
    }

    /// The first top-level ancestor of `element`, or `element` itself if it has no parents.
    pub fn top_level_element(&self, element: ElementId) -> Option<ElementId> {
        let start = self.element(element)?;
        if start.is_top_level() {
            return Some(element);
        }
        self.ancestors_breadth_first(element)
            .into_iter()
            .map(|(id, _)| id)
            .find(|id| self.element(*id).map_or(false, Element::is_top_level))
    }
}
