//! Computed fields: finite element fields and the expressions built on top of them.
//!
//! Fields live in a [`FieldGraph`] owned by a region and refer to each other through
//! [`FieldId`]s. Evaluation at a location happens through a [`FieldCache`].
use crate::mesh::{ElementId, NodeId};
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt;
use std::fmt::Display;

mod cache;
mod evaluation;
mod fe_field;

pub use cache::*;
pub use evaluation::*;
pub use fe_field::*;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValueType {
    Real,
    Integer,
    String,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FieldId(usize);

impl FieldId {
    pub fn index(&self) -> usize {
        self.0
    }
}

/// Errors raised while defining fields or building the field graph.
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum FieldDefinitionError {
    DuplicateName(String),
    UnknownField(FieldId),
    /// Wrong number of components supplied for a field.
    ComponentCountMismatch { expected: usize, found: usize },
    /// Component storage does not match the declared value type.
    ValueTypeMismatch { component: usize, expected: ValueType },
    /// Stored values do not fill the layout implied by orders/grid sizes and time blocks.
    StorageLength { component: usize, expected: usize, found: usize },
    /// Times must be strictly increasing and cannot change once elements are defined.
    InvalidTimes,
    NotFiniteElement(FieldId),
    InvalidComponent { field: FieldId, component: usize },
    InvalidXiIndex(usize),
}

impl Display for FieldDefinitionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use FieldDefinitionError::*;
        match self {
            DuplicateName(name) => write!(f, "A field named \"{}\" already exists", name),
            UnknownField(id) => write!(f, "Field {} does not exist", id.0),
            ComponentCountMismatch { expected, found } => {
                write!(f, "Expected {} components, found {}", expected, found)
            }
            ValueTypeMismatch { component, expected } => {
                write!(f, "Component {} does not hold {:?} values", component, expected)
            }
            StorageLength {
                component,
                expected,
                found,
            } => write!(
                f,
                "Component {} needs {} stored values, found {}",
                component, expected, found
            ),
            InvalidTimes => write!(f, "Field times must increase strictly and be set before definitions"),
            NotFiniteElement(id) => write!(f, "Field {} is not a finite element field", id.0),
            InvalidComponent { field, component } => {
                write!(f, "Field {} has no component {}", field.0, component)
            }
            InvalidXiIndex(index) => write!(f, "Invalid chart axis {}", index),
        }
    }
}

impl Error for FieldDefinitionError {}

/// Errors raised while evaluating fields.
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum EvaluationError {
    UnknownField(FieldId),
    UnknownElement(ElementId),
    UnknownNode(NodeId),
    NoLocation,
    /// The field takes no values at the current kind of location.
    NotDefinedAtLocation { field: String },
    /// The field is neither defined on the element nor inheritable from any ancestor.
    NotDefined { field: String, element: ElementId },
    /// The field has no values at the node.
    NotDefinedAtNode { field: String, node: NodeId },
    /// A grid-based component cannot be restricted through the face chart map.
    NotInheritable { field: String, element: ElementId },
    DimensionMismatch { expected: usize, found: usize },
    /// `calculate_values` was called on an evaluation that was not cleared.
    NotCleared,
    NotCalculated,
    DerivativesNotCalculated,
    /// Derivatives are only available at element locations for differentiable fields.
    DerivativesUnavailable,
    /// Only monomial components can be differentiated.
    NotMonomial { component: usize },
    WrongValueType { expected: ValueType, found: ValueType },
    InvalidComponent(usize),
    GridIndexOutOfRange,
    SingularJacobian,
    BufferTooSmall { required: usize, found: usize },
}

impl Display for EvaluationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use EvaluationError::*;
        match self {
            UnknownField(id) => write!(f, "Field {} does not exist", id.0),
            UnknownElement(id) => write!(f, "{} is not in mesh", id),
            UnknownNode(id) => write!(f, "{} is not in mesh", id),
            NoLocation => write!(f, "No evaluation location has been set"),
            NotDefinedAtLocation { field } => write!(f, "Field \"{}\" is not defined at this location", field),
            NotDefined { field, element } => {
                write!(f, "Field \"{}\" is not defined on {} or its ancestors", field, element)
            }
            NotDefinedAtNode { field, node } => write!(f, "Field \"{}\" has no values at {}", field, node),
            NotInheritable { field, element } => {
                write!(f, "Field \"{}\" cannot be inherited by {}", field, element)
            }
            DimensionMismatch { expected, found } => {
                write!(f, "Expected dimension {}, found {}", expected, found)
            }
            NotCleared => write!(f, "Element field evaluation must be cleared before recalculating"),
            NotCalculated => write!(f, "Element field evaluation holds no values"),
            DerivativesNotCalculated => write!(f, "Derivatives were not calculated for this evaluation"),
            DerivativesUnavailable => write!(f, "Derivatives are not available at this location"),
            NotMonomial { component } => write!(f, "Component {} is not monomial", component),
            WrongValueType { expected, found } => write!(f, "Expected {:?} values, found {:?}", expected, found),
            InvalidComponent(c) => write!(f, "Invalid component {}", c),
            GridIndexOutOfRange => write!(f, "Grid index out of range"),
            SingularJacobian => write!(f, "Coordinate Jacobian is singular"),
            BufferTooSmall { required, found } => {
                write!(f, "Output buffer holds {} values, {} required", found, required)
            }
        }
    }
}

impl Error for EvaluationError {}

/// A single component of another field.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentRef {
    pub field: FieldId,
    pub component: usize,
}

#[derive(Debug, Clone)]
pub enum FieldKind {
    FiniteElement(FeField),
    Constant(Vec<f64>),
    /// Takes its values only from a field-values location, or from assigned values.
    Input,
    Composite(Vec<ComponentRef>),
    WeightedAdd { weights: [f64; 2] },
    Multiply,
    Magnitude,
    /// Chart derivative of a finite element field along one xi axis.
    Derivative { xi_index: usize },
    /// Gradient of the first source with respect to the second (coordinate) source.
    Gradient,
}

#[derive(Debug, Clone)]
pub struct FieldNode {
    name: String,
    number_of_components: usize,
    sources: Vec<FieldId>,
    kind: FieldKind,
}

impl FieldNode {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn number_of_components(&self) -> usize {
        self.number_of_components
    }

    pub fn sources(&self) -> &[FieldId] {
        &self.sources
    }

    pub fn kind(&self) -> &FieldKind {
        &self.kind
    }

    pub fn value_type(&self) -> ValueType {
        match &self.kind {
            FieldKind::FiniteElement(fe) => fe.value_type(),
            _ => ValueType::Real,
        }
    }

    pub fn as_finite_element(&self) -> Option<&FeField> {
        match &self.kind {
            FieldKind::FiniteElement(fe) => Some(fe),
            _ => None,
        }
    }
}

/// Arena of fields for one region. Fields are only ever added, so ids stay valid.
#[derive(Debug, Clone, Default)]
pub struct FieldGraph {
    fields: Vec<FieldNode>,
}

impl FieldGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn field(&self, id: FieldId) -> Option<&FieldNode> {
        self.fields.get(id.0)
    }

    pub fn ids(&self) -> impl Iterator<Item = FieldId> {
        (0..self.fields.len()).map(FieldId)
    }

    /// Direct sources of `field`; empty for unknown fields.
    pub fn sources(&self, field: FieldId) -> &[FieldId] {
        self.field(field).map(FieldNode::sources).unwrap_or(&[])
    }

    pub fn find_by_name(&self, name: &str) -> Option<FieldId> {
        self.fields.iter().position(|f| f.name == name).map(FieldId)
    }

    /// Mutable access to the storage of a finite element field. Callers editing definitions
    /// must invalidate any caches evaluating the field.
    pub fn finite_element_mut(&mut self, id: FieldId) -> Result<&mut FeField, FieldDefinitionError> {
        match self.fields.get_mut(id.0).map(|f| &mut f.kind) {
            Some(FieldKind::FiniteElement(fe)) => Ok(fe),
            Some(_) => Err(FieldDefinitionError::NotFiniteElement(id)),
            None => Err(FieldDefinitionError::UnknownField(id)),
        }
    }

    fn insert(
        &mut self,
        name: &str,
        number_of_components: usize,
        sources: Vec<FieldId>,
        kind: FieldKind,
    ) -> Result<FieldId, FieldDefinitionError> {
        if self.find_by_name(name).is_some() {
            return Err(FieldDefinitionError::DuplicateName(name.to_string()));
        }
        for source in &sources {
            self.check(*source)?;
        }
        self.fields.push(FieldNode {
            name: name.to_string(),
            number_of_components,
            sources,
            kind,
        });
        Ok(FieldId(self.fields.len() - 1))
    }

    fn check(&self, id: FieldId) -> Result<&FieldNode, FieldDefinitionError> {
        self.field(id).ok_or(FieldDefinitionError::UnknownField(id))
    }

    fn components_of(&self, id: FieldId) -> Result<usize, FieldDefinitionError> {
        Ok(self.check(id)?.number_of_components)
    }

    pub fn create_finite_element(&mut self, field: FeField) -> Result<FieldId, FieldDefinitionError> {
        let name = field.name().to_string();
        let n = field.number_of_components();
        self.insert(&name, n, Vec::new(), FieldKind::FiniteElement(field))
    }

    pub fn create_constant(&mut self, name: &str, values: Vec<f64>) -> Result<FieldId, FieldDefinitionError> {
        self.insert(name, values.len(), Vec::new(), FieldKind::Constant(values))
    }

    pub fn create_input(&mut self, name: &str, number_of_components: usize) -> Result<FieldId, FieldDefinitionError> {
        self.insert(name, number_of_components, Vec::new(), FieldKind::Input)
    }

    pub fn create_composite(
        &mut self,
        name: &str,
        components: Vec<ComponentRef>,
    ) -> Result<FieldId, FieldDefinitionError> {
        let mut sources = Vec::new();
        for c in &components {
            if c.component >= self.components_of(c.field)? {
                return Err(FieldDefinitionError::InvalidComponent {
                    field: c.field,
                    component: c.component,
                });
            }
            if !sources.contains(&c.field) {
                sources.push(c.field);
            }
        }
        let n = components.len();
        self.insert(name, n, sources, FieldKind::Composite(components))
    }

    pub fn create_weighted_add(
        &mut self,
        name: &str,
        a: FieldId,
        weight_a: f64,
        b: FieldId,
        weight_b: f64,
    ) -> Result<FieldId, FieldDefinitionError> {
        let n = self.matching_components(a, b)?;
        let kind = FieldKind::WeightedAdd {
            weights: [weight_a, weight_b],
        };
        self.insert(name, n, vec![a, b], kind)
    }

    pub fn create_multiply(&mut self, name: &str, a: FieldId, b: FieldId) -> Result<FieldId, FieldDefinitionError> {
        let n = self.matching_components(a, b)?;
        self.insert(name, n, vec![a, b], FieldKind::Multiply)
    }

    pub fn create_magnitude(&mut self, name: &str, source: FieldId) -> Result<FieldId, FieldDefinitionError> {
        self.check(source)?;
        self.insert(name, 1, vec![source], FieldKind::Magnitude)
    }

    pub fn create_derivative(
        &mut self,
        name: &str,
        source: FieldId,
        xi_index: usize,
    ) -> Result<FieldId, FieldDefinitionError> {
        let node = self.check(source)?;
        if node.as_finite_element().is_none() {
            return Err(FieldDefinitionError::NotFiniteElement(source));
        }
        if xi_index >= crate::mesh::MAXIMUM_ELEMENT_XI_DIMENSIONS {
            return Err(FieldDefinitionError::InvalidXiIndex(xi_index));
        }
        let n = node.number_of_components;
        self.insert(name, n, vec![source], FieldKind::Derivative { xi_index })
    }

    pub fn create_gradient(
        &mut self,
        name: &str,
        source: FieldId,
        coordinates: FieldId,
    ) -> Result<FieldId, FieldDefinitionError> {
        let n = self.components_of(source)? * self.components_of(coordinates)?;
        self.insert(name, n, vec![source, coordinates], FieldKind::Gradient)
    }

    fn matching_components(&self, a: FieldId, b: FieldId) -> Result<usize, FieldDefinitionError> {
        let (na, nb) = (self.components_of(a)?, self.components_of(b)?);
        if na != nb {
            return Err(FieldDefinitionError::ComponentCountMismatch { expected: na, found: nb });
        }
        Ok(na)
    }

    /// Whether `field` depends on `other`, directly or through its sources. A field depends
    /// on itself.
    pub fn depends_on(&self, field: FieldId, other: FieldId) -> bool {
        if field == other {
            return true;
        }
        self.field(field)
            .map(|node| node.sources.iter().any(|s| self.depends_on(*s, other)))
            .unwrap_or(false)
    }

    /// All fields that depend on `field`, excluding `field` itself.
    pub fn dependents(&self, field: FieldId) -> Vec<FieldId> {
        self.ids()
            .filter(|id| *id != field && self.depends_on(*id, field))
            .collect()
    }

    /// `field` and all fields it depends on.
    pub fn sources_recursive(&self, field: FieldId) -> Vec<FieldId> {
        self.ids().filter(|id| self.depends_on(field, *id)).collect()
    }
}
