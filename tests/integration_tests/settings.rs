use fieldview::picking::PickSettings;
use fieldview::rendition::{Graphic, GraphicType, XiDiscretizationMode};
use fieldview::scene::{FilterMatch, SceneSettings};

#[test]
fn scene_settings_round_trip() {
    let settings = SceneSettings {
        pick: PickSettings {
            initial_buffer_size: 512,
            buffer_size_increment: 256,
            max_attempts: 4,
        },
    };
    let json = serde_json::to_string(&settings).unwrap();
    let parsed: SceneSettings = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed, settings);
}

#[test]
fn missing_settings_take_defaults() {
    let parsed: SceneSettings = serde_json::from_str("{}").unwrap();
    assert_eq!(parsed, SceneSettings::default());

    let parsed: SceneSettings = serde_json::from_str(r#"{ "pick": { "max_attempts": 3 } }"#).unwrap();
    assert_eq!(parsed.pick.max_attempts, 3);
    assert_eq!(parsed.pick.initial_buffer_size, PickSettings::default().initial_buffer_size);
}

#[test]
fn graphics_and_filters_serialize() {
    let graphic = Graphic::new("points", GraphicType::ElementPoints)
        .with_discretization(XiDiscretizationMode::CellCorners, [2, 2, 1])
        .with_material("blue")
        .fast_changing();
    let json = serde_json::to_string(&graphic).unwrap();
    let parsed: Graphic = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed, graphic);

    let matcher = FilterMatch::Or(vec![
        FilterMatch::GraphicName("points".to_string()),
        FilterMatch::VisibilityFlag,
    ]);
    let parsed: FilterMatch = serde_json::from_str(&serde_json::to_string(&matcher).unwrap()).unwrap();
    assert_eq!(parsed, matcher);
}
