use fieldview::basis::{BasisFunctionValues, MonomialBasis, StandardBasis};
use matrixcompare::assert_scalar_eq;
use nalgebra::DMatrix;
use proptest::prelude::*;

#[test]
fn monomial_terms_follow_first_axis_fastest() {
    let basis = MonomialBasis::new(vec![2, 1]);
    assert_eq!(basis.number_of_functions(), 6);
    assert_eq!(MonomialBasis::number_of_terms(&[2, 1, 3]), 24);
    assert_eq!(basis.multi_index(1), vec![1, 0]);
    assert_eq!(basis.multi_index(3), vec![0, 1]);
    assert_eq!(basis.coefficient_index(&[2, 1]), 5);

    let mut values = vec![0.0; 6];
    basis.evaluate(&[2.0, 3.0], &mut values);
    assert_eq!(values, vec![1.0, 2.0, 4.0, 3.0, 6.0, 12.0]);
}

#[test]
fn monomial_derivatives() {
    let basis = MonomialBasis::new(vec![2, 1]);
    let mut derivatives = DMatrix::zeros(0, 0);
    basis.evaluate_derivatives(&[2.0, 3.0], &mut derivatives);
    assert_eq!(derivatives.shape(), (6, 2));
    // d/dxi0 of xi0^2 xi1 is 2 xi0 xi1
    assert_scalar_eq!(derivatives[(5, 0)], 12.0);
    // d/dxi1 of xi0^2 xi1 is xi0^2
    assert_scalar_eq!(derivatives[(5, 1)], 4.0);
    assert_scalar_eq!(derivatives[(0, 0)], 0.0);
}

#[test]
fn missing_chart_coordinates_are_zero() {
    let basis = MonomialBasis::new(vec![1, 1]);
    let mut short = vec![0.0; 4];
    basis.evaluate(&[2.0], &mut short);
    let mut padded = vec![0.0; 4];
    basis.evaluate(&[2.0, 0.0], &mut padded);
    assert_eq!(short, padded);

    let mut derivatives = DMatrix::zeros(0, 0);
    basis.evaluate_derivatives(&[], &mut derivatives);
    // Only d/dxi_q of xi_q itself survives at the origin.
    assert_scalar_eq!(derivatives[(1, 0)], 1.0);
    assert_scalar_eq!(derivatives[(2, 1)], 1.0);
    assert_scalar_eq!(derivatives[(3, 0)], 0.0);

    let mut cache = BasisFunctionValues::new();
    let (values, _) = cache.evaluate(&basis, &[2.0], false);
    assert_eq!(values, &[1.0, 2.0, 0.0, 0.0]);
}

#[test]
fn derivatives_are_added_to_memoized_values() {
    let basis = MonomialBasis::new(vec![1]);
    let mut cache = BasisFunctionValues::new();
    cache.evaluate(&basis, &[0.5], false);
    let (_, derivatives) = cache.evaluate(&basis, &[0.5], true);
    assert!(derivatives.is_some());
    assert_eq!(cache.evaluation_count(), 2);
    cache.evaluate(&basis, &[0.5], true);
    assert_eq!(cache.evaluation_count(), 2);

    cache.invalidate();
    cache.evaluate(&basis, &[0.5], false);
    assert_eq!(cache.evaluation_count(), 3);
}

proptest! {
    #[test]
    fn monomial_values_match_powers(x in -2.0..2.0f64, y in -2.0..2.0f64) {
        let basis = MonomialBasis::new(vec![3, 2]);
        let mut values = vec![0.0; basis.number_of_functions()];
        basis.evaluate(&[x, y], &mut values);
        for (i, value) in values.iter().enumerate() {
            let k = basis.multi_index(i);
            let expected = x.powi(k[0] as i32) * y.powi(k[1] as i32);
            prop_assert!((value - expected).abs() <= 1e-12);
        }
    }
}
