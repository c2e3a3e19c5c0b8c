use serde_json::{Value, json};

use super::*;
use crate::{
    asset::{AssetKind, AssetPath, content_hash},
    project::id::{RandomIds, SequentialIds},
};

fn manifest(frames: u64) -> ProjectManifest {
    let pictures = (0..frames)
        .map(|i| AssetPath::new(&content_hash(&i.to_le_bytes()), AssetKind::Image))
        .collect();
    ProjectManifest {
        name: "clip".to_string(),
        width: 640,
        height: 360,
        pictures,
        sound: AssetPath::new(&content_hash(b"sound"), AssetKind::Sound),
        duration: 1.04,
        framerate: 10.0,
        frame_count: frames,
        use_dummy_code: true,
    }
}

fn to_value(descriptor: &ProjectDescriptor) -> Value {
    serde_json::from_slice(&descriptor.to_bytes().unwrap()).unwrap()
}

#[test]
fn test_top_level_fields() {
    let descriptor = build_descriptor(&manifest(3), &mut SequentialIds::default()).unwrap();
    let value = to_value(&descriptor);

    assert_eq!(value["speed"], json!(10));
    assert_eq!(value["name"], "clip");
    assert_eq!(value["isPracticalCourse"], json!(false));
    assert_eq!(value["scenes"][0]["name"], SCENE_NAME);
    assert_eq!(value["interface"]["menuWidth"], json!(280));
    assert_eq!(value["interface"]["canvasWidth"], json!(480));
    assert_eq!(value["interface"]["object"], value["objects"][0]["id"]);
    assert_eq!(value["objects"][0]["scene"], value["scenes"][0]["id"]);
    for key in [
        "messages",
        "functions",
        "tables",
        "expansionBlocks",
        "aiUtilizeBlocks",
        "hardwareLiteBlocks",
        "externalModules",
        "externalModulesLite",
    ] {
        assert_eq!(value[key], json!([]), "{}", key);
    }
}

#[test]
fn test_variables() {
    let descriptor = build_descriptor(&manifest(1), &mut SequentialIds::default()).unwrap();
    let value = to_value(&descriptor);
    let timer = &value["variables"][0];
    assert_eq!(timer["id"], "brih");
    assert_eq!(timer["variableType"], "timer");
    assert_eq!(timer["object"], json!(null));
    assert_eq!(timer["x"], json!(f64::MIN));
    let answer = &value["variables"][1];
    assert_eq!(answer["id"], "1vu8");
    assert_eq!(answer["name"], " 대답 ");
    assert_eq!(answer["x"], json!(0));
}

#[test]
fn test_entity_scales_to_canvas() {
    let descriptor = build_descriptor(&manifest(1), &mut SequentialIds::default()).unwrap();
    let entity = &to_value(&descriptor)["objects"][0]["entity"];
    assert_eq!(entity["regX"], json!(320));
    assert_eq!(entity["regY"], json!(180));
    assert_eq!(entity["scaleX"], json!(0.75));
    assert_eq!(entity["scaleY"], json!(0.75));
    assert_eq!(entity["direction"], json!(90));
    assert_eq!(entity["font"], "undefinedpx ");
}

#[test]
fn test_pictures_follow_manifest_order() {
    let manifest = manifest(4);
    let descriptor = build_descriptor(&manifest, &mut SequentialIds::default()).unwrap();
    let pictures = &descriptor.objects[0].sprite.pictures;
    assert_eq!(pictures.len(), 4);
    for (picture, path) in pictures.iter().zip(&manifest.pictures) {
        assert_eq!(picture.fileurl, path.as_str());
        assert_eq!(picture.filename, path.hash());
        assert_eq!(picture.filename.len(), 64);
        assert_eq!(picture.dimension.width, 640);
    }

    let sound = &descriptor.objects[0].sprite.sounds[0];
    assert_eq!(sound.duration, 1.0);
    assert_eq!(sound.ext, ".mp3");
    assert_eq!(sound.filename, content_hash(b"sound"));
}

#[test]
fn test_script_is_embedded_as_string() {
    let descriptor = build_descriptor(&manifest(2), &mut SequentialIds::default()).unwrap();
    let script: Value = serde_json::from_str(&descriptor.objects[0].script).unwrap();
    let chains = script.as_array().unwrap();
    assert_eq!(chains.len(), 2);
    assert_eq!(chains[0][0]["type"], "when_run_button_click");
}

#[test]
fn test_random_ids_avoid_reserved() {
    let mut ids = RandomIds::seeded(11).reserve([TIMER_VARIABLE.0, ANSWER_VARIABLE.0]);
    let descriptor = build_descriptor(&manifest(30), &mut ids).unwrap();
    let object = &descriptor.objects[0];
    let mut seen: Vec<&str> = object.sprite.pictures.iter().map(|p| p.id.as_str()).collect();
    seen.push(&object.id);
    seen.push(&descriptor.scenes[0].id);
    assert!(!seen.contains(&"brih"));
    assert!(!seen.contains(&"1vu8"));
}

#[test]
fn test_picture_count_must_match_frames() {
    let mut bad = manifest(3);
    bad.frame_count = 4;
    let err = build_descriptor(&bad, &mut SequentialIds::default()).unwrap_err();
    assert!(matches!(err, ExportError::Capture(_)));
}
