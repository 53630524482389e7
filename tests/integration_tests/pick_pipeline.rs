use fieldview::mesh::ElementId;
use fieldview::picking::{ElementPickFilter, InteractionVolume, PickError, PickSettings};
use fieldview::region::{RegionId, RegionTree};
use fieldview::render::{GraphicHit, NameStackRenderer};
use fieldview::rendition::{Graphic, GraphicType};
use fieldview::scene::{FilterAction, FilterMatch, Scene, SceneSettings};
use fieldview::selection::SelectionGroup;
use nalgebra::{Matrix4, Point3};

/// A strip of `count` surface elements along x, element `e` centred at `x = e / count`.
fn strip(count: u32) -> RegionTree {
    let mut tree = RegionTree::new();
    let root = tree.root();
    let mesh = tree.region_mut(root).unwrap().mesh_mut();
    for e in 1..=count {
        mesh.add_element(ElementId(e), 2).unwrap();
    }
    tree.add_graphic(root, Graphic::new("surfaces", GraphicType::Surfaces))
        .unwrap();
    tree
}

/// Hits every element whose centre lies in the volume; nearer elements have larger numbers.
fn strip_hits(count: u32) -> impl FnMut(&InteractionVolume, RegionId, u32) -> Vec<GraphicHit> {
    move |volume, _, _| {
        (1..=count)
            .filter(|e| volume.contains(&Point3::new(f64::from(*e) / f64::from(count), 0.0, 0.0)))
            .map(|e| GraphicHit {
                names: vec![e],
                near: 100_000 - 10 * e,
                far: 100_000,
            })
            .collect()
    }
}

fn showing_scene(tree: &mut RegionTree, settings: SceneSettings) -> Scene {
    let root = tree.root();
    let mut scene = Scene::with_settings("pick", settings);
    scene.set_region(tree, root).unwrap();
    scene.add_filter(FilterMatch::All, FilterAction::Show);
    scene
}

#[test]
fn picking_through_the_window_selects_nearby_elements() {
    let mut tree = strip(20);
    let mut scene = showing_scene(&mut tree, SceneSettings::default());
    let mut renderer = NameStackRenderer::new(strip_hits(20));

    let identity = Matrix4::identity();
    // A 12 pixel wide window around x = 75 of 100 covers model x in [0.38, 0.62].
    let volume = InteractionVolume::around_window_point(identity, identity, 75.0, 50.0, 12.0, 10.0, [0.0, 0.0, 100.0, 100.0]);
    let picked = scene.pick_objects(&mut tree, &mut renderer, &volume);
    assert_eq!(picked.len(), 5);

    let root = tree.root();
    let nearest = picked
        .nearest_element(&tree, ElementPickFilter::default())
        .unwrap();
    assert_eq!((nearest.region, nearest.element), (root, ElementId(12)));

    let mut selection = SelectionGroup::new();
    let added = selection.select_picked_elements(&picked, &tree, ElementPickFilter::default());
    assert_eq!(added, 5);
    assert_eq!(
        selection.elements(root).collect::<Vec<_>>(),
        (8..=12).map(ElementId).collect::<Vec<_>>()
    );
    scene.detach(&mut tree);
}

#[test]
fn select_buffer_grows_until_all_hits_fit() {
    // 2000 hits of six words each overflow the default buffer once.
    let count = 2000;
    let mut tree = strip(count);
    let mut scene = showing_scene(&mut tree, SceneSettings::default());
    let mut renderer = NameStackRenderer::new(strip_hits(count));
    let volume = InteractionVolume::new(Matrix4::identity(), Matrix4::identity());

    let picked = scene
        .try_pick_objects(&mut tree, &mut renderer, &volume)
        .unwrap();
    assert_eq!(picked.len(), count as usize);
    assert_eq!(scene.select_buffer_size(), 20_000);
    let nearest = picked
        .nearest_element(&tree, ElementPickFilter::default())
        .unwrap();
    assert_eq!(nearest.element, ElementId(count));

    // The grown size is kept for the next pick.
    scene.pick_objects(&mut tree, &mut renderer, &volume);
    assert_eq!(scene.select_buffer_size(), 20_000);
    scene.detach(&mut tree);
}

#[test]
fn picking_gives_up_after_the_allowed_attempts() {
    let mut tree = strip(20);
    let settings = SceneSettings {
        pick: PickSettings {
            initial_buffer_size: 16,
            buffer_size_increment: 1,
            max_attempts: 2,
        },
    };
    let mut scene = showing_scene(&mut tree, settings);
    let mut renderer = NameStackRenderer::new(strip_hits(20));
    let volume = InteractionVolume::new(Matrix4::identity(), Matrix4::identity());

    let result = scene.try_pick_objects(&mut tree, &mut renderer, &volume);
    assert!(matches!(
        result,
        Err(PickError::BufferOverflow {
            attempts: 2,
            buffer_size: 18
        })
    ));
    assert!(scene.pick_objects(&mut tree, &mut renderer, &volume).is_empty());
    scene.detach(&mut tree);
}

#[test]
fn picking_without_display_lists_fails() {
    let mut tree = strip(4);
    let mut scene = showing_scene(&mut tree, SceneSettings::default());
    let mut renderer = NameStackRenderer::new(strip_hits(4)).with_display_list_limit(0);
    let volume = InteractionVolume::new(Matrix4::identity(), Matrix4::identity());
    assert!(matches!(
        scene.try_pick_objects(&mut tree, &mut renderer, &volume),
        Err(PickError::Compile(_))
    ));
    scene.detach(&mut tree);
}
