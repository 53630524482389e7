//! Standard bases on element charts.
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

/// A set of basis functions over a reference chart of fixed dimension.
pub trait StandardBasis {
    fn dimension(&self) -> usize;

    fn number_of_functions(&self) -> usize;

    /// Writes the value of every basis function at `xi` into `values`. Coordinates beyond the
    /// end of `xi` are taken as zero.
    fn evaluate(&self, xi: &[f64], values: &mut [f64]);

    /// Writes the derivatives of every basis function at `xi`, one row per function and one
    /// column per chart axis.
    fn evaluate_derivatives(&self, xi: &[f64], derivatives: &mut DMatrix<f64>);
}

/// Tensor-product monomial basis `xi0^k0 * xi1^k1 * xi2^k2` with `k_i <= orders[i]`.
///
/// Coefficients are laid out with the first axis varying fastest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MonomialBasis {
    orders: Vec<usize>,
}

impl MonomialBasis {
    pub fn new(orders: Vec<usize>) -> Self {
        Self { orders }
    }

    pub fn orders(&self) -> &[usize] {
        &self.orders
    }

    /// Number of coefficients needed for the given orders.
    pub fn number_of_terms(orders: &[usize]) -> usize {
        orders.iter().map(|k| k + 1).product()
    }

    pub fn coefficient_index(&self, multi_index: &[usize]) -> usize {
        debug_assert_eq!(multi_index.len(), self.orders.len());
        let mut index = 0;
        let mut stride = 1;
        for (k, order) in multi_index.iter().zip(&self.orders) {
            debug_assert!(k <= order);
            index += k * stride;
            stride *= order + 1;
        }
        index
    }

    pub fn multi_index(&self, mut index: usize) -> Vec<usize> {
        self.orders
            .iter()
            .map(|order| {
                let k = index % (order + 1);
                index /= order + 1;
                k
            })
            .collect()
    }

    fn powers(&self, xi: &[f64]) -> Vec<Vec<f64>> {
        self.orders
            .iter()
            .enumerate()
            .map(|(axis, &order)| {
                let x = xi.get(axis).copied().unwrap_or(0.0);
                (0..=order as i32).map(|k| x.powi(k)).collect()
            })
            .collect()
    }
}

impl StandardBasis for MonomialBasis {
    fn dimension(&self) -> usize {
        self.orders.len()
    }

    fn number_of_functions(&self) -> usize {
        Self::number_of_terms(&self.orders)
    }

    fn evaluate(&self, xi: &[f64], values: &mut [f64]) {
        let powers = self.powers(xi);
        for (i, value) in values.iter_mut().take(self.number_of_functions()).enumerate() {
            *value = self
                .multi_index(i)
                .iter()
                .enumerate()
                .map(|(axis, &k)| powers[axis][k])
                .product();
        }
    }

    fn evaluate_derivatives(&self, xi: &[f64], derivatives: &mut DMatrix<f64>) {
        let n = self.number_of_functions();
        let dim = self.dimension();
        if derivatives.shape() != (n, dim) {
            *derivatives = DMatrix::zeros(n, dim);
        }
        let powers = self.powers(xi);
        for i in 0..n {
            let k = self.multi_index(i);
            for q in 0..dim {
                let mut d = 1.0;
                for (axis, &ka) in k.iter().enumerate() {
                    if axis == q {
                        d *= if ka == 0 { 0.0 } else { ka as f64 * powers[axis][ka - 1] };
                    } else {
                        d *= powers[axis][ka];
                    }
                }
                derivatives[(i, q)] = d;
            }
        }
    }
}

/// Memoized basis function values for the most recent basis and chart location.
///
/// Shared between components and fields evaluated at the same location so that the
/// basis is evaluated once per distinct `(basis, xi)` pair.
#[derive(Debug, Default)]
pub struct BasisFunctionValues {
    basis: Option<MonomialBasis>,
    xi: Vec<f64>,
    values: Vec<f64>,
    derivatives: Option<DMatrix<f64>>,
    evaluations: usize,
}

impl BasisFunctionValues {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of times basis functions (or their derivatives) have actually been computed.
    pub fn evaluation_count(&self) -> usize {
        self.evaluations
    }

    pub fn invalidate(&mut self) {
        self.basis = None;
        self.derivatives = None;
    }

    /// Values and, if requested, derivatives of `basis` at `xi`.
    pub fn evaluate(
        &mut self,
        basis: &MonomialBasis,
        xi: &[f64],
        want_derivatives: bool,
    ) -> (&[f64], Option<&DMatrix<f64>>) {
        let xi = &xi[..basis.dimension().min(xi.len())];
        let hit = self.basis.as_ref() == Some(basis) && self.xi == xi;
        if !hit {
            self.values.resize(basis.number_of_functions(), 0.0);
            basis.evaluate(xi, &mut self.values);
            self.basis = Some(basis.clone());
            self.xi.clear();
            self.xi.extend_from_slice(xi);
            self.derivatives = None;
            self.evaluations += 1;
        }
        if want_derivatives && self.derivatives.is_none() {
            let mut derivatives = DMatrix::zeros(basis.number_of_functions(), basis.dimension());
            basis.evaluate_derivatives(xi, &mut derivatives);
            self.derivatives = Some(derivatives);
            self.evaluations += 1;
        }
        let derivatives = if want_derivatives { self.derivatives.as_ref() } else { None };
        (&self.values, derivatives)
    }
}
