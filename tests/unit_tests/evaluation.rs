use fieldview::basis::BasisFunctionValues;
use fieldview::field::{
    ComponentSelection, ComponentValues, ElementFieldEvaluation, EvaluationError, FeField, MonomialInfo, ValueType,
};
use fieldview::mesh::{ChartMap, ElementId, Mesh};
use matrixcompare::assert_scalar_eq;
use nalgebra::{DMatrix, DVector};
use util::{assert_approx_matrix_eq, matrix_from_rows, trilinear};

fn bilinear_field() -> FeField {
    // u = 1 + 2 xi0 + 3 xi1 + 4 xi0 xi1
    let mut field = FeField::new("u", ValueType::Real, 1);
    field
        .define_on_element(
            ElementId(1),
            vec![ComponentValues::Monomial {
                orders: vec![1, 1],
                coefficients: vec![1.0, 2.0, 3.0, 4.0],
            }],
        )
        .unwrap();
    field
}

fn square_mesh() -> Mesh {
    let mut mesh = Mesh::new();
    mesh.add_element(ElementId(1), 2).unwrap();
    mesh
}

fn evaluate_single(evaluation: &ElementFieldEvaluation, xi: &[f64]) -> f64 {
    let mut basis = BasisFunctionValues::new();
    let mut values = [0.0];
    evaluation
        .evaluate_real(ComponentSelection::Single(0), xi, &mut basis, &mut values, None)
        .unwrap();
    values[0]
}

#[test]
fn monomial_values_and_jacobian() {
    let field = bilinear_field();
    let mesh = square_mesh();
    let mut evaluation = ElementFieldEvaluation::new();
    evaluation
        .calculate_values(&field, &mesh, ElementId(1), 0.0, true, None)
        .unwrap();
    assert!(evaluation.is_calculated());
    assert_eq!(evaluation.field_name(), Some("u"));
    assert_eq!(evaluation.element(), Some(ElementId(1)));
    assert_eq!(evaluation.field_element(), Some(ElementId(1)));
    assert_eq!(evaluation.dimension(), 2);
    assert!(!evaluation.is_grid_based(0));

    let mut basis = BasisFunctionValues::new();
    let mut values = [0.0];
    let mut jacobian = DMatrix::zeros(0, 0);
    evaluation
        .evaluate_real(
            ComponentSelection::All,
            &[0.5, 0.25],
            &mut basis,
            &mut values,
            Some(&mut jacobian),
        )
        .unwrap();
    assert_scalar_eq!(values[0], 3.25, comp = abs, tol = 1e-12);
    assert_approx_matrix_eq!(jacobian, matrix_from_rows(&[&[3.0, 5.0]]), abstol = 1e-12);
}

#[test]
fn recalculating_requires_clear() {
    let field = bilinear_field();
    let mesh = square_mesh();
    let mut evaluation = ElementFieldEvaluation::new();
    evaluation
        .calculate_values(&field, &mesh, ElementId(1), 0.0, false, None)
        .unwrap();
    assert_eq!(
        evaluation.calculate_values(&field, &mesh, ElementId(1), 0.0, false, None),
        Err(EvaluationError::NotCleared)
    );
    evaluation.clear();
    assert!(!evaluation.is_calculated());
    assert!(evaluation
        .calculate_values(&field, &mesh, ElementId(1), 0.0, false, None)
        .is_ok());
}

#[test]
fn evaluation_errors() {
    let field = bilinear_field();
    let mut mesh = square_mesh();
    mesh.add_element(ElementId(2), 2).unwrap();
    let mut evaluation = ElementFieldEvaluation::new();
    let mut basis = BasisFunctionValues::new();
    let mut values = [0.0; 2];

    assert_eq!(
        evaluation.evaluate_real(ComponentSelection::All, &[0.0, 0.0], &mut basis, &mut values, None),
        Err(EvaluationError::NotCalculated)
    );
    assert_eq!(
        evaluation.calculate_values(&field, &mesh, ElementId(2), 0.0, false, None),
        Err(EvaluationError::NotDefined {
            field: "u".to_string(),
            element: ElementId(2)
        })
    );

    evaluation
        .calculate_values(&field, &mesh, ElementId(1), 0.0, false, None)
        .unwrap();
    assert_eq!(
        evaluation.evaluate_real(ComponentSelection::Single(3), &[0.0, 0.0], &mut basis, &mut values, None),
        Err(EvaluationError::InvalidComponent(3))
    );
    let mut jacobian = DMatrix::zeros(0, 0);
    assert_eq!(
        evaluation.evaluate_real(
            ComponentSelection::All,
            &[0.0, 0.0],
            &mut basis,
            &mut values,
            Some(&mut jacobian)
        ),
        Err(EvaluationError::DerivativesNotCalculated)
    );
    assert!(matches!(
        evaluation.evaluate_real(ComponentSelection::All, &[0.0], &mut basis, &mut values, None),
        Err(EvaluationError::DimensionMismatch { expected: 2, found: 1 })
    ));
}

#[test]
fn monomial_inherited_onto_edge() {
    let field = bilinear_field();
    let mut mesh = square_mesh();
    // Edge at xi1 = 1: u(s) = 1 + 2 s + 3 + 4 s = 4 + 6 s
    mesh.add_face(ElementId(2), ElementId(1), ChartMap::square_edge(3).unwrap())
        .unwrap();
    let mut evaluation = ElementFieldEvaluation::new();
    evaluation
        .calculate_values(&field, &mesh, ElementId(2), 0.0, false, None)
        .unwrap();
    assert_eq!(evaluation.element(), Some(ElementId(2)));
    assert_eq!(evaluation.field_element(), Some(ElementId(1)));
    assert_eq!(evaluation.dimension(), 1);
    assert_eq!(
        evaluation.get_monomial_component_info(0).unwrap(),
        MonomialInfo {
            dimension: 1,
            orders: vec![1]
        }
    );
    let coefficients = evaluation.get_component_values(0).unwrap();
    assert_scalar_eq!(coefficients[0], 4.0, comp = abs, tol = 1e-12);
    assert_eq!(coefficients.len(), 2);
    assert_scalar_eq!(coefficients[1], 6.0, comp = abs, tol = 1e-12);
    assert_scalar_eq!(evaluate_single(&evaluation, &[0.5]), 7.0, comp = abs, tol = 1e-12);
}

#[test]
fn grid_inherited_onto_cube_face() {
    let corners = [0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0];
    let mut field = FeField::new("g", ValueType::Real, 1);
    field
        .define_on_element(
            ElementId(1),
            vec![ComponentValues::Grid {
                number_in_xi: vec![1, 1, 1],
                values: corners.to_vec(),
            }],
        )
        .unwrap();
    let mut mesh = Mesh::new();
    mesh.add_element(ElementId(1), 3).unwrap();
    for face in 0..6 {
        let map = ChartMap::cube_face(face).unwrap();
        mesh.add_face(ElementId(10 + face as u32), ElementId(1), map).unwrap();
    }

    for face in 0..6 {
        let map = ChartMap::cube_face(face).unwrap();
        let mut evaluation = ElementFieldEvaluation::new();
        evaluation
            .calculate_values(&field, &mesh, ElementId(10 + face as u32), 0.0, false, None)
            .unwrap();
        assert!(evaluation.is_grid_based(0));
        for xi in [[0.0, 0.0], [0.25, 0.75], [1.0, 0.5]] {
            let cube_xi = map.apply(&xi).unwrap();
            let expected = trilinear(&corners, &[cube_xi[0], cube_xi[1], cube_xi[2]]);
            assert_scalar_eq!(evaluate_single(&evaluation, &xi), expected, comp = abs, tol = 1e-12);
        }
    }
}

#[test]
fn grid_is_not_inheritable_through_interior_maps() {
    let mut field = FeField::new("g", ValueType::Real, 1);
    field
        .define_on_element(
            ElementId(1),
            vec![ComponentValues::Grid {
                number_in_xi: vec![2, 2],
                values: vec![0.0; 9],
            }],
        )
        .unwrap();
    let mut mesh = square_mesh();
    // Line through the middle of the square at xi0 = 0.5
    let map = ChartMap::new(DVector::from_vec(vec![0.5, 0.0]), DMatrix::from_row_slice(2, 1, &[0.0, 1.0])).unwrap();
    mesh.add_face(ElementId(2), ElementId(1), map).unwrap();

    let mut evaluation = ElementFieldEvaluation::new();
    assert_eq!(
        evaluation.calculate_values(&field, &mesh, ElementId(2), 0.0, false, None),
        Err(EvaluationError::NotInheritable {
            field: "g".to_string(),
            element: ElementId(2)
        })
    );
}

#[test]
fn top_level_hint_chooses_among_shared_parents() {
    let mut field = FeField::new("c", ValueType::Real, 1);
    for (element, value) in [(1, 10.0), (2, 20.0)] {
        field
            .define_on_element(
                ElementId(element),
                vec![ComponentValues::Monomial {
                    orders: vec![0, 0, 0],
                    coefficients: vec![value],
                }],
            )
            .unwrap();
    }
    let mut mesh = Mesh::new();
    mesh.add_element(ElementId(1), 3).unwrap();
    mesh.add_element(ElementId(2), 3).unwrap();
    mesh.add_face(ElementId(3), ElementId(1), ChartMap::cube_face(1).unwrap())
        .unwrap();
    mesh.add_face(ElementId(3), ElementId(2), ChartMap::cube_face(0).unwrap())
        .unwrap();

    let mut evaluation = ElementFieldEvaluation::new();
    evaluation
        .calculate_values(&field, &mesh, ElementId(3), 0.0, false, None)
        .unwrap();
    assert_eq!(evaluation.field_element(), Some(ElementId(1)));
    assert_scalar_eq!(evaluate_single(&evaluation, &[0.5, 0.5]), 10.0);
    assert!(evaluation.is_for_element_and_time(ElementId(3), 0.0, None));
    assert!(!evaluation.is_for_element_and_time(ElementId(3), 0.0, Some(ElementId(2))));

    evaluation.clear();
    evaluation
        .calculate_values(&field, &mesh, ElementId(3), 0.0, false, Some(ElementId(2)))
        .unwrap();
    assert_eq!(evaluation.field_element(), Some(ElementId(2)));
    assert_scalar_eq!(evaluate_single(&evaluation, &[0.5, 0.5]), 20.0);
}

#[test]
fn time_varying_grid_interpolates_between_times() {
    let mut field = FeField::new("t", ValueType::Real, 1);
    field.set_times(vec![0.0, 1.0]).unwrap();
    field
        .define_on_element(
            ElementId(1),
            vec![ComponentValues::Grid {
                number_in_xi: vec![1],
                values: vec![0.0, 1.0, 10.0, 11.0],
            }],
        )
        .unwrap();
    let mut mesh = Mesh::new();
    mesh.add_element(ElementId(1), 1).unwrap();

    let mut evaluation = ElementFieldEvaluation::new();
    evaluation
        .calculate_values(&field, &mesh, ElementId(1), 0.5, false, None)
        .unwrap();
    assert!(evaluation.is_time_dependent());
    assert_scalar_eq!(evaluation.time(), 0.5);
    assert_scalar_eq!(evaluate_single(&evaluation, &[0.5]), 5.5, comp = abs, tol = 1e-12);
    assert!(evaluation.is_for_element_and_time(ElementId(1), 0.5, None));
    assert!(!evaluation.is_for_element_and_time(ElementId(1), 0.6, None));
    assert!(!evaluation.is_for_element_and_time(ElementId(2), 0.5, None));

    evaluation.clear();
    evaluation
        .calculate_values(&field, &mesh, ElementId(1), 3.0, false, None)
        .unwrap();
    assert_scalar_eq!(evaluate_single(&evaluation, &[0.0]), 10.0, comp = abs, tol = 1e-12);
}

#[test]
fn time_is_ignored_for_constant_fields() {
    let field = bilinear_field();
    let mesh = square_mesh();
    let mut evaluation = ElementFieldEvaluation::new();
    evaluation
        .calculate_values(&field, &mesh, ElementId(1), 0.0, false, None)
        .unwrap();
    assert!(!evaluation.is_time_dependent());
    assert!(evaluation.is_for_element_and_time(ElementId(1), 42.0, None));
}

#[test]
fn differentiate_monomial() {
    // u = xi^2
    let mut field = FeField::new("u", ValueType::Real, 1);
    field
        .define_on_element(
            ElementId(1),
            vec![ComponentValues::Monomial {
                orders: vec![2],
                coefficients: vec![0.0, 0.0, 1.0],
            }],
        )
        .unwrap();
    let mut mesh = Mesh::new();
    mesh.add_element(ElementId(1), 1).unwrap();

    let mut evaluation = ElementFieldEvaluation::new();
    evaluation
        .calculate_values(&field, &mesh, ElementId(1), 0.0, false, None)
        .unwrap();
    evaluation.differentiate(0).unwrap();
    assert_eq!(evaluation.get_monomial_component_info(0).unwrap().orders, vec![1]);
    assert_eq!(evaluation.get_component_values(0).unwrap(), vec![0.0, 2.0]);
    assert_scalar_eq!(evaluate_single(&evaluation, &[0.3]), 0.6, comp = abs, tol = 1e-12);

    assert!(matches!(
        evaluation.differentiate(1),
        Err(EvaluationError::DimensionMismatch { .. })
    ));
}

#[test]
fn differentiate_rejects_grids() {
    let mut field = FeField::new("g", ValueType::Real, 1);
    field
        .define_on_element(
            ElementId(1),
            vec![ComponentValues::Grid {
                number_in_xi: vec![1],
                values: vec![0.0, 1.0],
            }],
        )
        .unwrap();
    let mut mesh = Mesh::new();
    mesh.add_element(ElementId(1), 1).unwrap();
    let mut evaluation = ElementFieldEvaluation::new();
    evaluation
        .calculate_values(&field, &mesh, ElementId(1), 0.0, false, None)
        .unwrap();
    assert_eq!(evaluation.differentiate(0), Err(EvaluationError::NotMonomial { component: 0 }));
    assert!(matches!(
        evaluation.get_monomial_component_info(0),
        Err(EvaluationError::NotMonomial { component: 0 })
    ));
}

#[test]
fn integer_grid_uses_nearest_point() {
    let mut field = FeField::new("i", ValueType::Integer, 1);
    field
        .define_on_element(
            ElementId(1),
            vec![ComponentValues::IntegerGrid {
                number_in_xi: vec![2],
                values: vec![1, 5, 9],
            }],
        )
        .unwrap();
    let mut mesh = Mesh::new();
    mesh.add_element(ElementId(1), 1).unwrap();
    let mut evaluation = ElementFieldEvaluation::new();
    evaluation
        .calculate_values(&field, &mesh, ElementId(1), 0.0, false, None)
        .unwrap();

    let mut basis = BasisFunctionValues::new();
    let mut values = [0];
    evaluation
        .evaluate_int(ComponentSelection::All, &[0.6], &mut basis, &mut values)
        .unwrap();
    assert_eq!(values, [5]);
    evaluation
        .evaluate_int(ComponentSelection::All, &[0.8], &mut basis, &mut values)
        .unwrap();
    assert_eq!(values, [9]);
    assert_eq!(
        evaluation
            .evaluate_as_string(ComponentSelection::All, &[0.0], &mut basis)
            .unwrap(),
        "1"
    );
    assert_eq!(evaluation.get_component_values(0).unwrap(), vec![1.0, 5.0, 9.0]);
}

#[test]
fn string_components() {
    let mut field = FeField::new("label", ValueType::String, 2);
    field
        .define_on_element(
            ElementId(1),
            vec![
                ComponentValues::Constant("left".to_string()),
                ComponentValues::Constant("right".to_string()),
            ],
        )
        .unwrap();
    let mesh = square_mesh();
    let mut evaluation = ElementFieldEvaluation::new();
    evaluation
        .calculate_values(&field, &mesh, ElementId(1), 0.0, false, None)
        .unwrap();

    assert_eq!(
        evaluation.evaluate_string(ComponentSelection::All).unwrap(),
        vec!["left".to_string(), "right".to_string()]
    );
    let mut basis = BasisFunctionValues::new();
    assert_eq!(
        evaluation
            .evaluate_as_string(ComponentSelection::All, &[0.0, 0.0], &mut basis)
            .unwrap(),
        "left, right"
    );
    let mut values = [0.0];
    assert_eq!(
        evaluation.evaluate_real(ComponentSelection::Single(1), &[0.0, 0.0], &mut basis, &mut values, None),
        Err(EvaluationError::WrongValueType {
            expected: ValueType::Real,
            found: ValueType::String
        })
    );
}

#[test]
fn real_values_format_as_strings() {
    let field = bilinear_field();
    let mesh = square_mesh();
    let mut evaluation = ElementFieldEvaluation::new();
    evaluation
        .calculate_values(&field, &mesh, ElementId(1), 0.0, false, None)
        .unwrap();
    let mut basis = BasisFunctionValues::new();
    assert_eq!(
        evaluation
            .evaluate_as_string(ComponentSelection::All, &[0.5, 0.25], &mut basis)
            .unwrap(),
        "3.25"
    );
}
