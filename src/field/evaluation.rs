use crate::basis::{BasisFunctionValues, MonomialBasis, StandardBasis};
use crate::field::{ComponentValues, EvaluationError, FeField, ValueType};
use crate::mesh::{ChartMap, ElementId, Mesh};
use itertools::Itertools;
use nalgebra::DMatrix;

/// Which components of a field to evaluate.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ComponentSelection {
    All,
    Single(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonomialInfo {
    pub dimension: usize,
    pub orders: Vec<usize>,
}

/// Location of one element's grid points inside the grid stored on the element the field is
/// defined on. Faces and lines of that element address a sub-grid through a base offset and a
/// signed stride per chart axis.
#[derive(Debug, Clone, PartialEq)]
struct GridLayout {
    number_in_xi: Vec<usize>,
    base_offset: isize,
    offsets_in_xi: Vec<isize>,
}

impl GridLayout {
    fn top_level(number_in_xi: &[usize]) -> Self {
        let mut stride = 1;
        let offsets_in_xi = number_in_xi
            .iter()
            .map(|n| {
                let offset = stride;
                stride *= *n as isize + 1;
                offset
            })
            .collect();
        Self {
            number_in_xi: number_in_xi.to_vec(),
            base_offset: 0,
            offsets_in_xi,
        }
    }

    /// Sub-grid seen through `map`. Only maps that fix parent axes at 0 or 1 and follow face
    /// axes with unit scale keep grid points on grid points.
    fn restrict(&self, map: &ChartMap) -> Option<Self> {
        if map.parent_dimension() != self.number_in_xi.len() {
            return None;
        }
        let face_dimension = map.face_dimension();
        let mut number_in_xi = vec![None; face_dimension];
        let mut offsets_in_xi = vec![0; face_dimension];
        let mut base_offset = self.base_offset;
        for parent_axis in 0..map.parent_dimension() {
            let n = self.number_in_xi[parent_axis] as isize;
            let stride = self.offsets_in_xi[parent_axis];
            let b = map.offset()[parent_axis];
            match map.axis_source(parent_axis) {
                None if b == 0.0 => {}
                None if b == 1.0 => base_offset += n * stride,
                None => return None,
                Some((face_axis, a)) => {
                    if number_in_xi[face_axis].is_some() {
                        return None;
                    }
                    if a == 1.0 && b == 0.0 {
                        offsets_in_xi[face_axis] = stride;
                    } else if a == -1.0 && b == 1.0 {
                        base_offset += n * stride;
                        offsets_in_xi[face_axis] = -stride;
                    } else {
                        return None;
                    }
                    number_in_xi[face_axis] = Some(n as usize);
                }
            }
        }
        let number_in_xi = number_in_xi.into_iter().collect::<Option<Vec<_>>>()?;
        Some(Self {
            number_in_xi,
            base_offset,
            offsets_in_xi,
        })
    }

    fn value<T: Copy>(&self, values: &[T], point: &[usize]) -> Result<T, EvaluationError> {
        let index = self.base_offset
            + point
                .iter()
                .zip(&self.offsets_in_xi)
                .map(|(p, offset)| *p as isize * offset)
                .sum::<isize>();
        usize::try_from(index)
            .ok()
            .and_then(|i| values.get(i).copied())
            .ok_or(EvaluationError::GridIndexOutOfRange)
    }

    /// Grid points of this element, first axis varying fastest.
    fn points(&self) -> impl Iterator<Item = Vec<usize>> + '_ {
        self.number_in_xi
            .iter()
            .rev()
            .map(|n| 0..=*n)
            .multi_cartesian_product()
            .map(|mut point| {
                point.reverse();
                point
            })
    }

    fn nearest_point(&self, xi: &[f64]) -> Vec<usize> {
        self.number_in_xi
            .iter()
            .zip(xi)
            .map(|(&n, &x)| (x * n as f64).round().clamp(0.0, n as f64) as usize)
            .collect()
    }

    /// Piecewise multilinear interpolation, with chart derivatives if requested.
    fn interpolate(
        &self,
        values: &[f64],
        xi: &[f64],
        want_derivatives: bool,
    ) -> Result<(f64, Vec<f64>), EvaluationError> {
        let dim = self.number_in_xi.len();
        let mut cell = vec![0usize; dim];
        let mut local = vec![0.0; dim];
        for (axis, &n) in self.number_in_xi.iter().enumerate() {
            if n == 0 {
                continue;
            }
            let x = xi[axis] * n as f64;
            let i = (x.floor().max(0.0) as usize).min(n - 1);
            cell[axis] = i;
            local[axis] = x - i as f64;
        }

        let weight = |axis: usize, upper: bool| if upper { local[axis] } else { 1.0 - local[axis] };
        let mut value = 0.0;
        let mut derivatives = vec![0.0; if want_derivatives { dim } else { 0 }];
        let mut point = vec![0usize; dim];
        'corners: for corner in 0..(1usize << dim) {
            let upper = |axis: usize| (corner >> axis) & 1 == 1;
            let mut w = 1.0;
            for axis in 0..dim {
                if upper(axis) && self.number_in_xi[axis] == 0 {
                    continue 'corners;
                }
                point[axis] = cell[axis] + upper(axis) as usize;
                w *= weight(axis, upper(axis));
            }
            let v = self.value(values, &point)?;
            value += w * v;
            for (q, derivative) in derivatives.iter_mut().enumerate() {
                let n = self.number_in_xi[q];
                if n == 0 {
                    continue;
                }
                let sign = if upper(q) { 1.0 } else { -1.0 };
                let mut d = sign * n as f64 * v;
                for axis in (0..dim).filter(|axis| *axis != q) {
                    d *= weight(axis, upper(axis));
                }
                *derivative += d;
            }
        }
        Ok((value, derivatives))
    }
}

#[derive(Debug, Clone, PartialEq)]
enum ComponentEvaluation {
    Monomial { basis: MonomialBasis, coefficients: Vec<f64> },
    Grid { layout: GridLayout, values: Vec<f64> },
    IntegerGrid { layout: GridLayout, values: Vec<i32> },
    String(String),
}

impl ComponentEvaluation {
    fn value_type(&self) -> ValueType {
        match self {
            ComponentEvaluation::Monomial { .. } | ComponentEvaluation::Grid { .. } => ValueType::Real,
            ComponentEvaluation::IntegerGrid { .. } => ValueType::Integer,
            ComponentEvaluation::String(_) => ValueType::String,
        }
    }
}

fn binomial(n: usize, k: usize) -> f64 {
    (0..k).fold(1.0, |acc, i| acc * (n - i) as f64 / (i + 1) as f64)
}

/// Substitutes the chart map into a monomial expansion, giving the expansion over the face
/// chart. Each parent axis is `b + a * s_j` for a face axis `j`, or the constant `b`.
fn restrict_monomial(orders: &[usize], coefficients: &[f64], map: &ChartMap) -> (Vec<usize>, Vec<f64>) {
    let face_dimension = map.face_dimension();
    let mut face_orders = vec![0; face_dimension];
    for (parent_axis, order) in orders.iter().enumerate() {
        if let Some((face_axis, _)) = map.axis_source(parent_axis) {
            face_orders[face_axis] += order;
        }
    }
    let parent_basis = MonomialBasis::new(orders.to_vec());
    let face_basis = MonomialBasis::new(face_orders.clone());
    let mut restricted = vec![0.0; face_basis.number_of_functions()];

    for (i, &c) in coefficients.iter().enumerate() {
        if c == 0.0 {
            continue;
        }
        let mut terms = vec![(vec![0usize; face_dimension], c)];
        for (parent_axis, &k) in parent_basis.multi_index(i).iter().enumerate() {
            let b = map.offset()[parent_axis];
            match map.axis_source(parent_axis) {
                None => {
                    let factor = b.powi(k as i32);
                    terms.iter_mut().for_each(|term| term.1 *= factor);
                }
                Some((face_axis, a)) => {
                    let mut expanded = Vec::with_capacity(terms.len() * (k + 1));
                    for (index, value) in &terms {
                        for m in 0..=k {
                            let mut index = index.clone();
                            index[face_axis] += m;
                            let factor = binomial(k, m) * b.powi((k - m) as i32) * a.powi(m as i32);
                            expanded.push((index, value * factor));
                        }
                    }
                    terms = expanded;
                }
            }
        }
        for (index, value) in terms {
            restricted[face_basis.coefficient_index(&index)] += value;
        }
    }
    (face_orders, restricted)
}

/// Values of a finite element field prepared for repeated evaluation on one element at one
/// time.
///
/// When the field is not defined on the element itself, values are inherited from an
/// ancestor element by restricting the ancestor's definition through the composed chart map.
#[derive(Debug, Clone, Default)]
pub struct ElementFieldEvaluation {
    field: Option<String>,
    element: Option<ElementId>,
    field_element: Option<ElementId>,
    dimension: usize,
    time: f64,
    time_dependent: bool,
    derivatives_calculated: bool,
    components: Vec<ComponentEvaluation>,
}

impl ElementFieldEvaluation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Releases all values, leaving the evaluation ready for [`Self::calculate_values`].
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn is_calculated(&self) -> bool {
        self.element.is_some()
    }

    pub fn field_name(&self) -> Option<&str> {
        self.field.as_deref()
    }

    pub fn element(&self) -> Option<ElementId> {
        self.element
    }

    /// The element the values were taken from; differs from [`Self::element`] when inherited.
    pub fn field_element(&self) -> Option<ElementId> {
        self.field_element
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn time(&self) -> f64 {
        self.time
    }

    pub fn is_time_dependent(&self) -> bool {
        self.time_dependent
    }

    pub fn has_derivatives_calculated(&self) -> bool {
        self.derivatives_calculated
    }

    pub fn number_of_components(&self) -> usize {
        self.components.len()
    }

    pub fn is_grid_based(&self, component: usize) -> bool {
        matches!(
            self.components.get(component),
            Some(ComponentEvaluation::Grid { .. } | ComponentEvaluation::IntegerGrid { .. })
        )
    }

    /// Whether these values can be reused for `element` at `time`. Time only matters for
    /// time-dependent fields; if `field_element` is given the values must have been taken
    /// from it.
    pub fn is_for_element_and_time(&self, element: ElementId, time: f64, field_element: Option<ElementId>) -> bool {
        self.element == Some(element)
            && (!self.time_dependent || self.time == time)
            && field_element.map_or(true, |fe| self.field_element == Some(fe))
    }

    pub fn calculate_values(
        &mut self,
        field: &FeField,
        mesh: &Mesh,
        element: ElementId,
        time: f64,
        calculate_derivatives: bool,
        top_level_element: Option<ElementId>,
    ) -> Result<(), EvaluationError> {
        if self.is_calculated() {
            return Err(EvaluationError::NotCleared);
        }
        let target = mesh.element(element).ok_or(EvaluationError::UnknownElement(element))?;

        let (field_element, map, definition) = match field.lookup_element(element) {
            Some(definition) => (element, None, definition),
            None => {
                let hinted = top_level_element
                    .and_then(|top| mesh.find_ancestor_map(element, top).map(|map| (top, map)));
                hinted
                    .into_iter()
                    .chain(mesh.ancestors_breadth_first(element))
                    .find_map(|(ancestor, map)| {
                        field
                            .lookup_element(ancestor)
                            .map(|definition| (ancestor, Some(map), definition))
                    })
                    .ok_or_else(|| EvaluationError::NotDefined {
                        field: field.name().to_string(),
                        element,
                    })?
            }
        };
        let field_dimension = mesh
            .element(field_element)
            .ok_or(EvaluationError::UnknownElement(field_element))?
            .dimension();
        let not_inheritable = || EvaluationError::NotInheritable {
            field: field.name().to_string(),
            element,
        };
        let check_dimension = |found: usize| {
            if found == field_dimension {
                Ok(())
            } else {
                Err(EvaluationError::DimensionMismatch {
                    expected: field_dimension,
                    found,
                })
            }
        };
        let layout_for = |number_in_xi: &[usize]| {
            let layout = GridLayout::top_level(number_in_xi);
            match &map {
                None => Some(layout),
                Some(map) => layout.restrict(map),
            }
        };

        let weights = field.time_weights(time);
        let mut components = Vec::with_capacity(definition.len());
        for values in definition {
            let component = match values {
                ComponentValues::Monomial { orders, .. } => {
                    check_dimension(orders.len())?;
                    let coefficients = values.real_block(&weights);
                    let (orders, coefficients) = match &map {
                        None => (orders.clone(), coefficients),
                        Some(map) => restrict_monomial(orders, &coefficients, map),
                    };
                    ComponentEvaluation::Monomial {
                        basis: MonomialBasis::new(orders),
                        coefficients,
                    }
                }
                ComponentValues::Grid { number_in_xi, .. } => {
                    check_dimension(number_in_xi.len())?;
                    ComponentEvaluation::Grid {
                        layout: layout_for(number_in_xi).ok_or_else(not_inheritable)?,
                        values: values.real_block(&weights),
                    }
                }
                ComponentValues::IntegerGrid {
                    number_in_xi,
                    values: integers,
                } => {
                    check_dimension(number_in_xi.len())?;
                    ComponentEvaluation::IntegerGrid {
                        layout: layout_for(number_in_xi).ok_or_else(not_inheritable)?,
                        values: integers.clone(),
                    }
                }
                ComponentValues::Constant(string) => ComponentEvaluation::String(string.clone()),
            };
            components.push(component);
        }

        *self = Self {
            field: Some(field.name().to_string()),
            element: Some(element),
            field_element: Some(field_element),
            dimension: target.dimension(),
            time,
            time_dependent: field.is_time_dependent(),
            derivatives_calculated: calculate_derivatives,
            components,
        };
        Ok(())
    }

    fn selected(&self, selection: ComponentSelection) -> Result<Vec<usize>, EvaluationError> {
        if !self.is_calculated() {
            return Err(EvaluationError::NotCalculated);
        }
        match selection {
            ComponentSelection::All => Ok((0..self.components.len()).collect()),
            ComponentSelection::Single(c) if c < self.components.len() => Ok(vec![c]),
            ComponentSelection::Single(c) => Err(EvaluationError::InvalidComponent(c)),
        }
    }

    fn chart_xi<'a>(&self, xi: &'a [f64]) -> Result<&'a [f64], EvaluationError> {
        xi.get(..self.dimension).ok_or(EvaluationError::DimensionMismatch {
            expected: self.dimension,
            found: xi.len(),
        })
    }

    /// Real value of one component, writing chart derivatives into `derivatives` if given.
    fn component_real(
        &self,
        component: usize,
        xi: &[f64],
        basis_values: &mut BasisFunctionValues,
        derivatives: Option<&mut [f64]>,
    ) -> Result<f64, EvaluationError> {
        let want_derivatives = derivatives.is_some();
        match &self.components[component] {
            ComponentEvaluation::Monomial { basis, coefficients } => {
                let (phi, dphi) = basis_values.evaluate(basis, xi, want_derivatives);
                let value = coefficients.iter().zip(phi).map(|(c, p)| c * p).sum::<f64>();
                if let (Some(derivatives), Some(dphi)) = (derivatives, dphi) {
                    for (q, derivative) in derivatives.iter_mut().enumerate() {
                        *derivative = coefficients
                            .iter()
                            .enumerate()
                            .map(|(i, c)| c * dphi[(i, q)])
                            .sum();
                    }
                }
                Ok(value)
            }
            ComponentEvaluation::Grid { layout, values } => {
                let (value, grid_derivatives) = layout.interpolate(values, xi, want_derivatives)?;
                if let Some(derivatives) = derivatives {
                    derivatives.copy_from_slice(&grid_derivatives);
                }
                Ok(value)
            }
            ComponentEvaluation::IntegerGrid { layout, values } => {
                if let Some(derivatives) = derivatives {
                    derivatives.fill(0.0);
                }
                Ok(layout.value(values, &layout.nearest_point(xi))? as f64)
            }
            ComponentEvaluation::String(_) => Err(EvaluationError::WrongValueType {
                expected: ValueType::Real,
                found: ValueType::String,
            }),
        }
    }

    /// Evaluates real values at `xi`, and the Jacobian with respect to the chart coordinates
    /// (one row per selected component) if `jacobian` is given.
    pub fn evaluate_real(
        &self,
        selection: ComponentSelection,
        xi: &[f64],
        basis_values: &mut BasisFunctionValues,
        values: &mut [f64],
        mut jacobian: Option<&mut DMatrix<f64>>,
    ) -> Result<(), EvaluationError> {
        let components = self.selected(selection)?;
        let xi = self.chart_xi(xi)?;
        if values.len() < components.len() {
            return Err(EvaluationError::BufferTooSmall {
                required: components.len(),
                found: values.len(),
            });
        }
        if jacobian.is_some() && !self.derivatives_calculated {
            return Err(EvaluationError::DerivativesNotCalculated);
        }
        if let Some(jacobian) = jacobian.as_deref_mut() {
            *jacobian = DMatrix::zeros(components.len(), self.dimension);
        }
        let mut row_derivatives = vec![0.0; self.dimension];
        for (row, &component) in components.iter().enumerate() {
            let derivatives = jacobian.is_some().then_some(row_derivatives.as_mut_slice());
            values[row] = self.component_real(component, xi, basis_values, derivatives)?;
            if let Some(jacobian) = jacobian.as_deref_mut() {
                for (q, d) in row_derivatives.iter().enumerate() {
                    jacobian[(row, q)] = *d;
                }
            }
        }
        Ok(())
    }

    /// Evaluates integer values; real components are rounded.
    pub fn evaluate_int(
        &self,
        selection: ComponentSelection,
        xi: &[f64],
        basis_values: &mut BasisFunctionValues,
        values: &mut [i32],
    ) -> Result<(), EvaluationError> {
        let components = self.selected(selection)?;
        let xi = self.chart_xi(xi)?;
        if values.len() < components.len() {
            return Err(EvaluationError::BufferTooSmall {
                required: components.len(),
                found: values.len(),
            });
        }
        for (row, &component) in components.iter().enumerate() {
            values[row] = match &self.components[component] {
                ComponentEvaluation::IntegerGrid { layout, values } => layout.value(values, &layout.nearest_point(xi))?,
                _ => self.component_real(component, xi, basis_values, None)?.round() as i32,
            };
        }
        Ok(())
    }

    pub fn evaluate_string(&self, selection: ComponentSelection) -> Result<Vec<String>, EvaluationError> {
        self.selected(selection)?
            .into_iter()
            .map(|component| match &self.components[component] {
                ComponentEvaluation::String(string) => Ok(string.clone()),
                other => Err(EvaluationError::WrongValueType {
                    expected: ValueType::String,
                    found: other.value_type(),
                }),
            })
            .collect()
    }

    /// Formats the selected components of any value type, separated by `", "`.
    pub fn evaluate_as_string(
        &self,
        selection: ComponentSelection,
        xi: &[f64],
        basis_values: &mut BasisFunctionValues,
    ) -> Result<String, EvaluationError> {
        let xi = self.chart_xi(xi)?;
        let mut parts = Vec::new();
        for component in self.selected(selection)? {
            let part = match &self.components[component] {
                ComponentEvaluation::String(string) => string.clone(),
                ComponentEvaluation::IntegerGrid { layout, values } => {
                    layout.value(values, &layout.nearest_point(xi))?.to_string()
                }
                _ => self.component_real(component, xi, basis_values, None)?.to_string(),
            };
            parts.push(part);
        }
        Ok(parts.join(", "))
    }

    /// Replaces every component by its derivative along chart axis `xi_index`.
    ///
    /// Fails without modifying anything unless all components are monomial.
    pub fn differentiate(&mut self, xi_index: usize) -> Result<(), EvaluationError> {
        if !self.is_calculated() {
            return Err(EvaluationError::NotCalculated);
        }
        if xi_index >= self.dimension {
            return Err(EvaluationError::DimensionMismatch {
                expected: self.dimension,
                found: xi_index + 1,
            });
        }
        if let Some(component) = self
            .components
            .iter()
            .position(|c| !matches!(c, ComponentEvaluation::Monomial { .. }))
        {
            return Err(EvaluationError::NotMonomial { component });
        }
        for component in &mut self.components {
            if let ComponentEvaluation::Monomial { basis, coefficients } = component {
                let mut orders = basis.orders().to_vec();
                let order = orders[xi_index];
                orders[xi_index] = order.saturating_sub(1);
                let derived_basis = MonomialBasis::new(orders);
                let mut derived = vec![0.0; derived_basis.number_of_functions()];
                if order > 0 {
                    for (i, d) in derived.iter_mut().enumerate() {
                        let mut k = derived_basis.multi_index(i);
                        let factor = (k[xi_index] + 1) as f64;
                        k[xi_index] += 1;
                        *d = factor * coefficients[basis.coefficient_index(&k)];
                    }
                }
                *basis = derived_basis;
                *coefficients = derived;
            }
        }
        Ok(())
    }

    /// Raw values of one component on this element: monomial coefficients, or the values at
    /// the element's grid points.
    pub fn get_component_values(&self, component: usize) -> Result<Vec<f64>, EvaluationError> {
        self.selected(ComponentSelection::Single(component))?;
        match &self.components[component] {
            ComponentEvaluation::Monomial { coefficients, .. } => Ok(coefficients.clone()),
            ComponentEvaluation::Grid { layout, values } => {
                layout.points().map(|point| layout.value(values, &point)).collect()
            }
            ComponentEvaluation::IntegerGrid { layout, values } => layout
                .points()
                .map(|point| layout.value(values, &point).map(f64::from))
                .collect(),
            ComponentEvaluation::String(_) => Err(EvaluationError::WrongValueType {
                expected: ValueType::Real,
                found: ValueType::String,
            }),
        }
    }

    pub fn get_monomial_component_info(&self, component: usize) -> Result<MonomialInfo, EvaluationError> {
        self.selected(ComponentSelection::Single(component))?;
        match &self.components[component] {
            ComponentEvaluation::Monomial { basis, .. } => Ok(MonomialInfo {
                dimension: basis.dimension(),
                orders: basis.orders().to_vec(),
            }),
            _ => Err(EvaluationError::NotMonomial { component }),
        }
    }
}
