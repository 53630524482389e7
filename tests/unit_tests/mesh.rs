use fieldview::mesh::{ChartMap, ElementId, ElementRole, Mesh, MeshError};
use nalgebra::{DMatrix, DVector};

/// Cube 1 with face 2 at `xi0 = 0` and line 3 at `xi1 = 0` of that face.
fn cube_with_face_and_line() -> Mesh {
    let mut mesh = Mesh::new();
    mesh.add_element(ElementId(1), 3).unwrap();
    mesh.add_face(ElementId(2), ElementId(1), ChartMap::cube_face(0).unwrap())
        .unwrap();
    mesh.add_face(ElementId(3), ElementId(2), ChartMap::square_edge(2).unwrap())
        .unwrap();
    mesh
}

#[test]
fn cube_faces_fix_one_axis() {
    let face = ChartMap::cube_face(1).unwrap();
    assert_eq!(face.face_dimension(), 2);
    assert_eq!(face.parent_dimension(), 3);
    assert_eq!(face.apply(&[0.25, 0.75]), Some(vec![1.0, 0.25, 0.75]));

    let face = ChartMap::cube_face(4).unwrap();
    assert_eq!(face.apply(&[0.25, 0.75]), Some(vec![0.25, 0.75, 0.0]));
    assert_eq!(face.apply(&[0.25]), None);
    assert_eq!(face.apply(&[0.25, 0.75, 0.5]), None);

    assert!(ChartMap::cube_face(6).is_none());
    assert!(ChartMap::square_edge(4).is_none());
}

#[test]
fn composed_maps_reach_the_cube() {
    let line_to_face = ChartMap::square_edge(0).unwrap();
    let face_to_cube = ChartMap::cube_face(4).unwrap();
    let line_to_cube = face_to_cube.compose(&line_to_face).unwrap();
    assert_eq!(line_to_cube.face_dimension(), 1);
    assert_eq!(line_to_cube.apply(&[0.5]), Some(vec![0.0, 0.5, 0.0]));
    assert_eq!(line_to_cube.axis_source(1), Some((0, 1.0)));
    assert_eq!(line_to_cube.axis_source(0), None);
    // Maps chain only from the inner parent chart to the outer face chart.
    assert!(line_to_face.compose(&face_to_cube).is_none());
    assert_eq!(line_to_cube.apply(&[0.5, 0.5]), None);
}

#[test]
fn chart_maps_must_be_axis_aligned() {
    let offset = DVector::zeros(2);
    let skew = DMatrix::from_row_slice(2, 1, &[1.0, 1.0]);
    assert!(ChartMap::new(offset.clone(), skew).is_ok());

    let mixing = DMatrix::from_row_slice(2, 2, &[1.0, 1.0, 0.0, 1.0]);
    assert_eq!(
        ChartMap::new(offset.clone(), mixing).unwrap_err(),
        MeshError::ChartMapNotAxisAligned
    );

    let wrong_rows = DMatrix::from_row_slice(3, 1, &[1.0, 0.0, 0.0]);
    assert!(matches!(
        ChartMap::new(offset, wrong_rows),
        Err(MeshError::ChartMapMismatch { .. })
    ));
}

#[test]
fn element_roles_and_top_level() {
    let mesh = cube_with_face_and_line();
    assert_eq!(mesh.number_of_elements(), 3);
    assert_eq!(mesh.role(ElementId(1)), Some(ElementRole::Top));
    assert_eq!(mesh.role(ElementId(2)), Some(ElementRole::Face));
    assert_eq!(mesh.role(ElementId(3)), Some(ElementRole::Line));
    assert_eq!(mesh.role(ElementId(4)), None);

    assert_eq!(mesh.top_level_element(ElementId(3)), Some(ElementId(1)));
    assert_eq!(mesh.top_level_element(ElementId(1)), Some(ElementId(1)));
}

#[test]
fn ancestors_are_breadth_first_with_composed_maps() {
    let mesh = cube_with_face_and_line();
    let ancestors = mesh.ancestors_breadth_first(ElementId(3));
    let ids: Vec<_> = ancestors.iter().map(|(id, _)| *id).collect();
    assert_eq!(ids, vec![ElementId(2), ElementId(1)]);

    let map = mesh.find_ancestor_map(ElementId(3), ElementId(1)).unwrap();
    assert_eq!(map.apply(&[0.5]), Some(vec![0.0, 0.5, 0.0]));
    assert!(mesh.find_ancestor_map(ElementId(1), ElementId(3)).is_none());
}

#[test]
fn invalid_elements_are_rejected() {
    let mut mesh = cube_with_face_and_line();
    assert_eq!(
        mesh.add_element(ElementId(1), 3),
        Err(MeshError::DuplicateElement(ElementId(1)))
    );
    assert_eq!(mesh.add_element(ElementId(9), 4), Err(MeshError::InvalidDimension(4)));
    assert_eq!(
        mesh.add_face(ElementId(10), ElementId(99), ChartMap::cube_face(0).unwrap()),
        Err(MeshError::UnknownElement(ElementId(99)))
    );
    // A square edge map does not fit a cube parent.
    assert!(matches!(
        mesh.add_face(ElementId(10), ElementId(1), ChartMap::square_edge(0).unwrap()),
        Err(MeshError::ChartMapMismatch { .. })
    ));
}
