use crate::basis::MonomialBasis;
use crate::field::{FieldDefinitionError, ValueType};
use crate::mesh::{ElementId, NodeId};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::cell::Cell;

/// Stored values for one component of a finite element field on one element.
///
/// Real-valued storage holds one block of values per field time, blocks stored consecutively.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ComponentValues {
    /// Monomial coefficients, laid out as in [`MonomialBasis`].
    Monomial { orders: Vec<usize>, coefficients: Vec<f64> },
    /// Values at the `number_in_xi[i] + 1` regularly spaced grid points per axis, first axis
    /// varying fastest. Interpolated piecewise multilinearly.
    Grid { number_in_xi: Vec<usize>, values: Vec<f64> },
    /// Integer grid values, evaluated at the nearest grid point. Not time varying.
    IntegerGrid { number_in_xi: Vec<usize>, values: Vec<i32> },
    Constant(String),
}

impl ComponentValues {
    pub fn value_type(&self) -> ValueType {
        match self {
            ComponentValues::Monomial { .. } | ComponentValues::Grid { .. } => ValueType::Real,
            ComponentValues::IntegerGrid { .. } => ValueType::Integer,
            ComponentValues::Constant(_) => ValueType::String,
        }
    }

    /// Number of stored values per time block.
    pub fn block_len(&self) -> usize {
        match self {
            ComponentValues::Monomial { orders, .. } => MonomialBasis::number_of_terms(orders),
            ComponentValues::Grid { number_in_xi, .. } | ComponentValues::IntegerGrid { number_in_xi, .. } => {
                grid_point_count(number_in_xi)
            }
            ComponentValues::Constant(_) => 0,
        }
    }

    fn stored_len(&self) -> usize {
        match self {
            ComponentValues::Monomial { coefficients, .. } => coefficients.len(),
            ComponentValues::Grid { values, .. } => values.len(),
            ComponentValues::IntegerGrid { values, .. } => values.len(),
            ComponentValues::Constant(_) => 0,
        }
    }

    /// Real values of this component at a time, given as interpolation weights over blocks.
    pub(crate) fn real_block(&self, weights: &[(usize, f64)]) -> Vec<f64> {
        let stored = match self {
            ComponentValues::Monomial { coefficients, .. } => coefficients,
            ComponentValues::Grid { values, .. } => values,
            _ => return Vec::new(),
        };
        let len = self.block_len();
        let mut block = vec![0.0; len];
        for &(b, w) in weights {
            for (target, source) in block.iter_mut().zip(&stored[b * len..(b + 1) * len]) {
                *target += w * source;
            }
        }
        block
    }
}

pub(crate) fn grid_point_count(number_in_xi: &[usize]) -> usize {
    number_in_xi.iter().map(|n| n + 1).product()
}

/// Storage of a finite element field: per-element component definitions, optional
/// time levels and per-node values.
#[derive(Debug, Clone)]
pub struct FeField {
    name: String,
    value_type: ValueType,
    number_of_components: usize,
    times: Vec<f64>,
    elements: FxHashMap<ElementId, Vec<ComponentValues>>,
    nodes: FxHashMap<NodeId, Vec<f64>>,
    definition_lookups: Cell<usize>,
}

impl FeField {
    pub fn new(name: &str, value_type: ValueType, number_of_components: usize) -> Self {
        Self {
            name: name.to_string(),
            value_type,
            number_of_components,
            times: Vec::new(),
            elements: FxHashMap::default(),
            nodes: FxHashMap::default(),
            definition_lookups: Cell::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value_type(&self) -> ValueType {
        self.value_type
    }

    pub fn number_of_components(&self) -> usize {
        self.number_of_components
    }

    pub fn times(&self) -> &[f64] {
        &self.times
    }

    /// Values vary in time when more than one time level is stored.
    pub fn is_time_dependent(&self) -> bool {
        self.times.len() > 1
    }

    fn number_of_blocks(&self) -> usize {
        self.times.len().max(1)
    }

    pub fn set_times(&mut self, times: Vec<f64>) -> Result<(), FieldDefinitionError> {
        let increasing = times.windows(2).all(|w| w[0] < w[1]);
        if !increasing || !self.elements.is_empty() {
            return Err(FieldDefinitionError::InvalidTimes);
        }
        self.times = times;
        Ok(())
    }

    pub fn define_on_element(
        &mut self,
        element: ElementId,
        components: Vec<ComponentValues>,
    ) -> Result<(), FieldDefinitionError> {
        if components.len() != self.number_of_components {
            return Err(FieldDefinitionError::ComponentCountMismatch {
                expected: self.number_of_components,
                found: components.len(),
            });
        }
        for (index, component) in components.iter().enumerate() {
            if component.value_type() != self.value_type {
                return Err(FieldDefinitionError::ValueTypeMismatch {
                    component: index,
                    expected: self.value_type,
                });
            }
            let blocks = match component {
                ComponentValues::IntegerGrid { .. } => 1,
                _ => self.number_of_blocks(),
            };
            let expected = component.block_len() * blocks;
            if component.stored_len() != expected {
                return Err(FieldDefinitionError::StorageLength {
                    component: index,
                    expected,
                    found: component.stored_len(),
                });
            }
        }
        self.elements.insert(element, components);
        Ok(())
    }

    pub fn undefine_on_element(&mut self, element: ElementId) -> bool {
        self.elements.remove(&element).is_some()
    }

    /// Whether the field is defined directly on the element, without inheritance.
    pub fn is_defined_on_element(&self, element: ElementId) -> bool {
        self.elements.contains_key(&element)
    }

    pub fn element_definition(&self, element: ElementId) -> Option<&[ComponentValues]> {
        self.elements.get(&element).map(Vec::as_slice)
    }

    /// Looks up the element definition while counting the lookup, so that callers can verify
    /// that repeated evaluations reuse cached element values.
    pub(crate) fn lookup_element(&self, element: ElementId) -> Option<&[ComponentValues]> {
        self.definition_lookups.set(self.definition_lookups.get() + 1);
        self.element_definition(element)
    }

    pub fn definition_lookups(&self) -> usize {
        self.definition_lookups.get()
    }

    pub fn set_node_values(&mut self, node: NodeId, values: Vec<f64>) -> Result<(), FieldDefinitionError> {
        if values.len() != self.number_of_components {
            return Err(FieldDefinitionError::ComponentCountMismatch {
                expected: self.number_of_components,
                found: values.len(),
            });
        }
        self.nodes.insert(node, values);
        Ok(())
    }

    pub fn node_values(&self, node: NodeId) -> Option<&[f64]> {
        self.nodes.get(&node).map(Vec::as_slice)
    }

    /// Block weights for linear interpolation between stored times, clamped to the first and
    /// last time. A NaN time uses the first block.
    pub(crate) fn time_weights(&self, time: f64) -> Vec<(usize, f64)> {
        let times = &self.times;
        if times.len() <= 1 || time.is_nan() || time <= times[0] {
            return vec![(0, 1.0)];
        }
        let last = times.len() - 1;
        if time >= times[last] {
            return vec![(last, 1.0)];
        }
        // times[upper - 1] < time < times[upper]
        let upper = times.partition_point(|t| *t <= time);
        if times[upper - 1] == time {
            return vec![(upper - 1, 1.0)];
        }
        let w = (time - times[upper - 1]) / (times[upper] - times[upper - 1]);
        vec![(upper - 1, 1.0 - w), (upper, w)]
    }
}
