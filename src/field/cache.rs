use crate::basis::BasisFunctionValues;
use crate::field::{
    ComponentSelection, ElementFieldEvaluation, EvaluationError, FeField, FieldGraph, FieldId, FieldKind, ValueType,
};
use crate::mesh::{ElementId, Mesh, NodeId};
use log::debug;
use nalgebra::DMatrix;
use rustc_hash::FxHashMap;

/// Where fields are evaluated.
#[derive(Debug, Clone, PartialEq)]
pub enum Location {
    /// Chart coordinates in an element, optionally naming the top-level element to inherit
    /// field values from.
    Element {
        element: ElementId,
        xi: Vec<f64>,
        top_level_element: Option<ElementId>,
    },
    Node(NodeId),
    /// Prescribed values for one field, typically used to find mesh locations from
    /// coordinates.
    FieldValues { field: FieldId, values: Vec<f64> },
}

#[derive(Debug, Clone)]
struct ValueSlot {
    location_counter: u64,
    values: Vec<f64>,
    derivatives: Option<DMatrix<f64>>,
    assigned: bool,
}

/// Per-caller evaluation state for the fields of one region.
///
/// Values are cached per field for the current location and discarded lazily when the
/// location or time changes. Element field evaluations, which are expensive to prepare,
/// survive location changes and are reused while the element and time still match.
#[derive(Debug)]
pub struct FieldCache<'a> {
    mesh: &'a Mesh,
    fields: &'a FieldGraph,
    location: Option<Location>,
    time: f64,
    location_counter: u64,
    values: FxHashMap<FieldId, ValueSlot>,
    element_evaluations: FxHashMap<FieldId, ElementFieldEvaluation>,
    basis_values: BasisFunctionValues,
}

impl<'a> FieldCache<'a> {
    pub fn new(mesh: &'a Mesh, fields: &'a FieldGraph) -> Self {
        Self {
            mesh,
            fields,
            location: None,
            time: 0.0,
            location_counter: 0,
            values: FxHashMap::default(),
            element_evaluations: FxHashMap::default(),
            basis_values: BasisFunctionValues::new(),
        }
    }

    pub fn mesh(&self) -> &'a Mesh {
        self.mesh
    }

    pub fn fields(&self) -> &'a FieldGraph {
        self.fields
    }

    pub fn location(&self) -> Option<&Location> {
        self.location.as_ref()
    }

    pub fn time(&self) -> f64 {
        self.time
    }

    /// Number of basis evaluations performed so far, for checking reuse.
    pub fn basis_evaluation_count(&self) -> usize {
        self.basis_values.evaluation_count()
    }

    /// The cached element evaluation for a finite element (or derivative) field, if any.
    pub fn element_evaluation(&self, field: FieldId) -> Option<&ElementFieldEvaluation> {
        self.element_evaluations.get(&field)
    }

    fn relocate(&mut self, location: Option<Location>) {
        self.location = location;
        self.location_counter += 1;
    }

    /// Sets the time; the location is retained.
    pub fn set_time(&mut self, time: f64) {
        if time != self.time {
            self.time = time;
            self.location_counter += 1;
        }
    }

    pub fn set_mesh_location(&mut self, element: ElementId, xi: &[f64]) -> Result<(), EvaluationError> {
        self.set_mesh_location_with_parent(element, xi, None)
    }

    pub fn set_mesh_location_with_parent(
        &mut self,
        element: ElementId,
        xi: &[f64],
        top_level_element: Option<ElementId>,
    ) -> Result<(), EvaluationError> {
        let dimension = self
            .mesh
            .element(element)
            .ok_or(EvaluationError::UnknownElement(element))?
            .dimension();
        if xi.len() < dimension {
            return Err(EvaluationError::DimensionMismatch {
                expected: dimension,
                found: xi.len(),
            });
        }
        let location = Location::Element {
            element,
            xi: xi[..dimension].to_vec(),
            top_level_element,
        };
        if self.location.as_ref() != Some(&location) {
            self.relocate(Some(location));
        }
        Ok(())
    }

    pub fn set_node(&mut self, node: NodeId) -> Result<(), EvaluationError> {
        if !self.mesh.contains_node(node) && !self.mesh.contains_data_point(node) {
            return Err(EvaluationError::UnknownNode(node));
        }
        if self.location != Some(Location::Node(node)) {
            self.relocate(Some(Location::Node(node)));
        }
        Ok(())
    }

    pub fn set_field_values(&mut self, field: FieldId, values: Vec<f64>) -> Result<(), EvaluationError> {
        let node = self.fields.field(field).ok_or(EvaluationError::UnknownField(field))?;
        if values.len() != node.number_of_components() {
            return Err(EvaluationError::DimensionMismatch {
                expected: node.number_of_components(),
                found: values.len(),
            });
        }
        self.relocate(Some(Location::FieldValues { field, values }));
        Ok(())
    }

    pub fn clear_location(&mut self) {
        self.relocate(None);
    }

    /// Discards cached values of `field` and its sources at the current location.
    pub fn clear_field_values(&mut self, field: FieldId) {
        for id in self.fields.sources_recursive(field) {
            self.values.remove(&id);
        }
    }

    /// Discards everything cached for `field`, its sources and its dependents, including
    /// element evaluations. Needed after editing a field's definition.
    pub fn invalidate_field(&mut self, field: FieldId) {
        let affected = self
            .fields
            .sources_recursive(field)
            .into_iter()
            .chain(self.fields.dependents(field));
        for id in affected {
            self.values.remove(&id);
            self.element_evaluations.remove(&id);
        }
        self.basis_values.invalidate();
    }

    /// Overrides the values of `field` at the current location. Dependent fields see the
    /// assigned values until the location changes.
    pub fn assign_real(&mut self, field: FieldId, values: &[f64]) -> Result<(), EvaluationError> {
        let node = self.fields.field(field).ok_or(EvaluationError::UnknownField(field))?;
        if self.location.is_none() {
            return Err(EvaluationError::NoLocation);
        }
        if values.len() != node.number_of_components() {
            return Err(EvaluationError::DimensionMismatch {
                expected: node.number_of_components(),
                found: values.len(),
            });
        }
        for dependent in self.fields.dependents(field) {
            self.values.remove(&dependent);
        }
        self.values.insert(
            field,
            ValueSlot {
                location_counter: self.location_counter,
                values: values.to_vec(),
                derivatives: None,
                assigned: true,
            },
        );
        Ok(())
    }

    pub fn evaluate_real(&mut self, field: FieldId) -> Result<Vec<f64>, EvaluationError> {
        self.ensure_evaluated(field, false)?;
        Ok(self.slot(field).values.clone())
    }

    /// Values and derivatives with respect to the element chart, one row per component.
    pub fn evaluate_real_with_derivatives(&mut self, field: FieldId) -> Result<(Vec<f64>, DMatrix<f64>), EvaluationError> {
        self.ensure_evaluated(field, true)?;
        let slot = self.slot(field);
        let derivatives = slot
            .derivatives
            .clone()
            .ok_or(EvaluationError::DerivativesUnavailable)?;
        Ok((slot.values.clone(), derivatives))
    }

    pub fn evaluate_int(&mut self, field: FieldId) -> Result<Vec<i32>, EvaluationError> {
        if let Some((fe, element, xi, top_level)) = self.fe_element_location(field) {
            if fe.value_type() == ValueType::Integer {
                self.prepare_element_evaluation(field, fe, element, top_level, false)?;
                let evaluation = &self.element_evaluations[&field];
                let mut values = vec![0; fe.number_of_components()];
                evaluation.evaluate_int(ComponentSelection::All, &xi, &mut self.basis_values, &mut values)?;
                return Ok(values);
            }
        }
        Ok(self
            .evaluate_real(field)?
            .into_iter()
            .map(|v| v.round() as i32)
            .collect())
    }

    pub fn evaluate_string(&mut self, field: FieldId) -> Result<Vec<String>, EvaluationError> {
        if let Some((fe, element, _, top_level)) = self.fe_element_location(field) {
            if fe.value_type() == ValueType::String {
                self.prepare_element_evaluation(field, fe, element, top_level, false)?;
                return self.element_evaluations[&field].evaluate_string(ComponentSelection::All);
            }
        }
        Ok(self
            .evaluate_real(field)?
            .into_iter()
            .map(|v| v.to_string())
            .collect())
    }

    /// All components of any field formatted as one string, separated by `", "`.
    pub fn evaluate_as_string(&mut self, field: FieldId) -> Result<String, EvaluationError> {
        if let Some((fe, element, xi, top_level)) = self.fe_element_location(field) {
            self.prepare_element_evaluation(field, fe, element, top_level, false)?;
            let evaluation = &self.element_evaluations[&field];
            return evaluation.evaluate_as_string(ComponentSelection::All, &xi, &mut self.basis_values);
        }
        Ok(self.evaluate_string(field)?.join(", "))
    }

    /// True if any component is non-zero.
    pub fn evaluate_boolean(&mut self, field: FieldId) -> Result<bool, EvaluationError> {
        Ok(self.evaluate_real(field)?.iter().any(|v| *v != 0.0))
    }

    /// Whether `field` can be evaluated at the current location, checked structurally.
    pub fn is_defined(&self, field: FieldId) -> bool {
        let (Some(node), Some(location)) = (self.fields.field(field), self.location.as_ref()) else {
            return false;
        };
        if let Location::FieldValues { field: located, .. } = location {
            if *located == field {
                return true;
            }
        }
        if let Some(slot) = self.values.get(&field) {
            if slot.assigned && slot.location_counter == self.location_counter {
                return true;
            }
        }
        match node.kind() {
            FieldKind::FiniteElement(fe) => match location {
                Location::Element { element, .. } => {
                    fe.is_defined_on_element(*element)
                        || self
                            .mesh
                            .ancestors_breadth_first(*element)
                            .iter()
                            .any(|(ancestor, _)| fe.is_defined_on_element(*ancestor))
                }
                Location::Node(node) => fe.node_values(*node).is_some(),
                Location::FieldValues { .. } => false,
            },
            FieldKind::Constant(_) => true,
            FieldKind::Input => false,
            _ => node.sources().iter().all(|source| self.is_defined(*source)),
        }
    }

    fn slot(&self, field: FieldId) -> &ValueSlot {
        &self.values[&field]
    }

    fn slot_is_current(&self, field: FieldId, derivatives: bool) -> Result<bool, EvaluationError> {
        match self.values.get(&field) {
            Some(slot) if slot.location_counter == self.location_counter => {
                if slot.assigned && derivatives {
                    Err(EvaluationError::DerivativesUnavailable)
                } else {
                    Ok(!derivatives || slot.derivatives.is_some())
                }
            }
            _ => Ok(false),
        }
    }

    fn fe_element_location(&self, field: FieldId) -> Option<(&'a FeField, ElementId, Vec<f64>, Option<ElementId>)> {
        let fields: &'a FieldGraph = self.fields;
        let fe = fields.field(field)?.as_finite_element()?;
        match self.location.as_ref()? {
            Location::Element {
                element,
                xi,
                top_level_element,
            } => Some((fe, *element, xi.clone(), *top_level_element)),
            _ => None,
        }
    }

    /// Makes the element evaluation for `field` current, recalculating it only if the cached
    /// one does not match the element and time or lacks requested derivatives.
    fn prepare_element_evaluation(
        &mut self,
        field: FieldId,
        fe: &FeField,
        element: ElementId,
        top_level_element: Option<ElementId>,
        derivatives: bool,
    ) -> Result<(), EvaluationError> {
        let mesh = self.mesh;
        let time = self.time;
        // The hint only constrains reuse when the values are inherited.
        let hint = top_level_element.filter(|_| !fe.is_defined_on_element(element));
        let evaluation = self.element_evaluations.entry(field).or_default();
        let reusable =
            evaluation.is_for_element_and_time(element, time, hint) && (!derivatives || evaluation.has_derivatives_calculated());
        if !reusable {
            debug!("Calculating element values of field \"{}\" on {}", fe.name(), element);
            evaluation.clear();
            evaluation.calculate_values(fe, mesh, element, time, derivatives, hint)?;
        }
        Ok(())
    }

    fn ensure_evaluated(&mut self, field: FieldId, derivatives: bool) -> Result<(), EvaluationError> {
        if self.slot_is_current(field, derivatives)? {
            return Ok(());
        }
        let fields = self.fields;
        let node = fields.field(field).ok_or(EvaluationError::UnknownField(field))?;
        let location = self.location.clone().ok_or(EvaluationError::NoLocation)?;

        let (values, jacobian) = match (&location, node.kind()) {
            (Location::FieldValues { field: located, values }, _) if *located == field => {
                if derivatives {
                    return Err(EvaluationError::DerivativesUnavailable);
                }
                (values.clone(), None)
            }
            (_, FieldKind::Input) => {
                return Err(EvaluationError::NotDefinedAtLocation {
                    field: node.name().to_string(),
                })
            }
            (_, FieldKind::Constant(values)) => {
                let jacobian = derivatives
                    .then(|| self.location_dimension(&location))
                    .transpose()?
                    .map(|dim| DMatrix::zeros(values.len(), dim));
                (values.clone(), jacobian)
            }
            (
                Location::Element {
                    element,
                    xi,
                    top_level_element,
                },
                FieldKind::FiniteElement(fe),
            ) => {
                if fe.value_type() == ValueType::String {
                    return Err(EvaluationError::WrongValueType {
                        expected: ValueType::Real,
                        found: ValueType::String,
                    });
                }
                self.prepare_element_evaluation(field, fe, *element, *top_level_element, derivatives)?;
                self.evaluate_prepared(field, xi, derivatives)?
            }
            (Location::Node(node_id), FieldKind::FiniteElement(fe)) => {
                if derivatives {
                    return Err(EvaluationError::DerivativesUnavailable);
                }
                let values = fe.node_values(*node_id).ok_or_else(|| EvaluationError::NotDefinedAtNode {
                    field: fe.name().to_string(),
                    node: *node_id,
                })?;
                (values.to_vec(), None)
            }
            (Location::FieldValues { .. }, FieldKind::FiniteElement(fe)) => {
                return Err(EvaluationError::NotDefinedAtLocation {
                    field: fe.name().to_string(),
                })
            }
            (
                Location::Element {
                    element,
                    xi,
                    top_level_element,
                },
                FieldKind::Derivative { xi_index },
            ) => {
                let source = node.sources()[0];
                let fe = fields
                    .field(source)
                    .and_then(|s| s.as_finite_element())
                    .ok_or(EvaluationError::UnknownField(source))?;
                let time = self.time;
                let hint = top_level_element.filter(|_| !fe.is_defined_on_element(*element));
                let evaluation = self.element_evaluations.entry(field).or_default();
                // Derivative evaluations are differentiated in place, so they never carry
                // chart derivatives of their own.
                if !evaluation.is_for_element_and_time(*element, time, hint) {
                    evaluation.clear();
                    let prepared = evaluation
                        .calculate_values(fe, self.mesh, *element, time, false, hint)
                        .and_then(|_| evaluation.differentiate(*xi_index));
                    if let Err(err) = prepared {
                        // An undifferentiated evaluation must not be reused on the next call.
                        evaluation.clear();
                        return Err(err);
                    }
                }
                if derivatives {
                    return Err(EvaluationError::DerivativesUnavailable);
                }
                self.evaluate_prepared(field, xi, false)?
            }
            (_, FieldKind::Derivative { .. }) => return Err(EvaluationError::DerivativesUnavailable),
            (_, FieldKind::Composite(components)) => {
                let mut values = Vec::with_capacity(components.len());
                let mut rows = Vec::new();
                for c in components {
                    self.ensure_evaluated(c.field, derivatives)?;
                    let slot = self.slot(c.field);
                    values.push(slot.values[c.component]);
                    if let Some(d) = &slot.derivatives {
                        rows.push(d.row(c.component).clone_owned());
                    }
                }
                let jacobian = derivatives.then(|| stack_rows(&rows, self.location_dimension(&location).unwrap_or(0)));
                (values, jacobian)
            }
            (_, FieldKind::WeightedAdd { weights }) => {
                let (a, b) = self.ensure_pair(node.sources(), derivatives)?;
                let values = a.values.iter().zip(&b.values).map(|(x, y)| weights[0] * x + weights[1] * y).collect();
                let jacobian = match (&a.derivatives, &b.derivatives) {
                    (Some(da), Some(db)) => Some(da * weights[0] + db * weights[1]),
                    _ => None,
                };
                (values, jacobian)
            }
            (_, FieldKind::Multiply) => {
                let (a, b) = self.ensure_pair(node.sources(), derivatives)?;
                let values = a.values.iter().zip(&b.values).map(|(x, y)| x * y).collect();
                let jacobian = match (&a.derivatives, &b.derivatives) {
                    (Some(da), Some(db)) => {
                        let mut j = DMatrix::zeros(da.nrows(), da.ncols());
                        for i in 0..da.nrows() {
                            let row = da.row(i) * b.values[i] + db.row(i) * a.values[i];
                            j.set_row(i, &row);
                        }
                        Some(j)
                    }
                    _ => None,
                };
                (values, jacobian)
            }
            (_, FieldKind::Magnitude) => {
                let source = node.sources()[0];
                self.ensure_evaluated(source, derivatives)?;
                let slot = self.slot(source);
                let magnitude = slot.values.iter().map(|v| v * v).sum::<f64>().sqrt();
                let jacobian = slot.derivatives.as_ref().map(|d| {
                    let mut j = DMatrix::zeros(1, d.ncols());
                    if magnitude > 0.0 {
                        for (i, v) in slot.values.iter().enumerate() {
                            for q in 0..d.ncols() {
                                j[(0, q)] += d[(i, q)] * v / magnitude;
                            }
                        }
                    }
                    j
                });
                (vec![magnitude], jacobian)
            }
            (_, FieldKind::Gradient) => {
                if derivatives {
                    return Err(EvaluationError::DerivativesUnavailable);
                }
                let (source, coordinates) = (node.sources()[0], node.sources()[1]);
                self.ensure_evaluated(source, true)?;
                self.ensure_evaluated(coordinates, true)?;
                let ds = self
                    .slot(source)
                    .derivatives
                    .clone()
                    .ok_or(EvaluationError::DerivativesUnavailable)?;
                let dx = self
                    .slot(coordinates)
                    .derivatives
                    .clone()
                    .ok_or(EvaluationError::DerivativesUnavailable)?;
                if dx.nrows() != dx.ncols() {
                    return Err(EvaluationError::DimensionMismatch {
                        expected: dx.ncols(),
                        found: dx.nrows(),
                    });
                }
                let inverse = dx.try_inverse().ok_or(EvaluationError::SingularJacobian)?;
                let gradient = ds * inverse;
                // Row-major: all coordinate derivatives of the first component first.
                (gradient.transpose().as_slice().to_vec(), None)
            }
        };

        if derivatives && jacobian.is_none() {
            return Err(EvaluationError::DerivativesUnavailable);
        }
        self.values.insert(
            field,
            ValueSlot {
                location_counter: self.location_counter,
                values,
                derivatives: jacobian,
                assigned: false,
            },
        );
        Ok(())
    }

    fn evaluate_prepared(
        &mut self,
        field: FieldId,
        xi: &[f64],
        derivatives: bool,
    ) -> Result<(Vec<f64>, Option<DMatrix<f64>>), EvaluationError> {
        let evaluation = self
            .element_evaluations
            .get(&field)
            .ok_or(EvaluationError::NotCalculated)?;
        let mut values = vec![0.0; evaluation.number_of_components()];
        let mut jacobian = derivatives.then(|| DMatrix::zeros(0, 0));
        evaluation.evaluate_real(
            ComponentSelection::All,
            xi,
            &mut self.basis_values,
            &mut values,
            jacobian.as_mut(),
        )?;
        Ok((values, jacobian))
    }

    fn ensure_pair(&mut self, sources: &[FieldId], derivatives: bool) -> Result<(ValueSlot, ValueSlot), EvaluationError> {
        self.ensure_evaluated(sources[0], derivatives)?;
        self.ensure_evaluated(sources[1], derivatives)?;
        Ok((self.slot(sources[0]).clone(), self.slot(sources[1]).clone()))
    }

    fn location_dimension(&self, location: &Location) -> Result<usize, EvaluationError> {
        match location {
            Location::Element { element, .. } => Ok(self
                .mesh
                .element(*element)
                .ok_or(EvaluationError::UnknownElement(*element))?
                .dimension()),
            _ => Err(EvaluationError::DerivativesUnavailable),
        }
    }
}

fn stack_rows(rows: &[nalgebra::RowDVector<f64>], ncols: usize) -> DMatrix<f64> {
    let mut matrix = DMatrix::zeros(rows.len(), ncols);
    for (i, row) in rows.iter().enumerate() {
        matrix.set_row(i, row);
    }
    matrix
}
