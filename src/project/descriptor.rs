use serde::{Serialize, Serializer};
use serde_json::Value;

use super::{
    id::IdSource,
    script::{PlaybackTiming, js_number, playback_script, strategy},
};
use crate::{
    asset::AssetPath,
    error::{ExportError, ExportResult},
};

/// Stage size the consuming runtime displays objects at.
pub const CANVAS_WIDTH: u32 = 480;
pub const CANVAS_HEIGHT: u32 = 270;
pub const MENU_WIDTH: u32 = 280;
pub const SCENE_NAME: &str = "장면 1";
pub const TIMER_VARIABLE: (&str, &str) = ("brih", "초시계");
pub const ANSWER_VARIABLE: (&str, &str) = ("1vu8", " 대답 ");

fn as_js_number<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
    js_number(*value).serialize(serializer)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectDescriptor {
    pub objects: Vec<ProjectObject>,
    pub scenes: Vec<Scene>,
    pub variables: Vec<Variable>,
    pub messages: Vec<Value>,
    pub functions: Vec<Value>,
    pub tables: Vec<Value>,
    #[serde(serialize_with = "as_js_number")]
    pub speed: f64,
    pub interface: Interface,
    pub expansion_blocks: Vec<Value>,
    pub ai_utilize_blocks: Vec<Value>,
    pub hardware_lite_blocks: Vec<Value>,
    pub external_modules: Vec<Value>,
    pub external_modules_lite: Vec<Value>,
    pub is_practical_course: bool,
    pub name: String,
}

impl ProjectDescriptor {
    pub fn to_bytes(&self) -> ExportResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectObject {
    pub id: String,
    pub name: String,
    pub object_type: &'static str,
    pub rotate_method: &'static str,
    pub scene: String,
    pub lock: bool,
    pub entity: Entity,
    pub sprite: Sprite,
    /// JSON-encoded script forest.
    pub script: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Entity {
    #[serde(serialize_with = "as_js_number")]
    pub x: f64,
    #[serde(serialize_with = "as_js_number")]
    pub y: f64,
    #[serde(rename = "regX", serialize_with = "as_js_number")]
    pub reg_x: f64,
    #[serde(rename = "regY", serialize_with = "as_js_number")]
    pub reg_y: f64,
    #[serde(serialize_with = "as_js_number")]
    pub scale_x: f64,
    #[serde(serialize_with = "as_js_number")]
    pub scale_y: f64,
    #[serde(serialize_with = "as_js_number")]
    pub rotation: f64,
    #[serde(serialize_with = "as_js_number")]
    pub direction: f64,
    pub width: u32,
    pub height: u32,
    pub font: &'static str,
    pub visible: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct Sprite {
    pub pictures: Vec<Picture>,
    pub sounds: Vec<Sound>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Dimension {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Picture {
    pub id: String,
    pub dimension: Dimension,
    pub fileurl: String,
    pub filename: String,
    pub name: String,
    pub image_type: &'static str,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Sound {
    #[serde(serialize_with = "as_js_number")]
    pub duration: f64,
    pub ext: &'static str,
    pub id: String,
    pub fileurl: String,
    pub filename: String,
    pub name: String,
    pub image_type: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct Scene {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Variable {
    pub name: String,
    pub id: String,
    pub visible: bool,
    pub value: u32,
    pub variable_type: &'static str,
    pub is_cloud: bool,
    pub is_real_time: bool,
    pub cloud_date: bool,
    pub object: Option<String>,
    #[serde(serialize_with = "as_js_number")]
    pub x: f64,
    #[serde(serialize_with = "as_js_number")]
    pub y: f64,
}

impl Variable {
    fn hidden(id: &str, name: &str, variable_type: &'static str, at: f64) -> Self {
        Self {
            name: name.to_string(),
            id: id.to_string(),
            visible: false,
            value: 0,
            variable_type,
            is_cloud: false,
            is_real_time: false,
            cloud_date: false,
            object: None,
            x: at,
            y: at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Interface {
    pub menu_width: u32,
    pub canvas_width: u32,
    pub object: String,
}

/// What one export produced, in frame order.
#[derive(Debug, Clone)]
pub struct ProjectManifest {
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub pictures: Vec<AssetPath>,
    pub sound: AssetPath,
    /// Seconds.
    pub duration: f64,
    pub framerate: f64,
    pub frame_count: u64,
    pub use_dummy_code: bool,
}

pub fn build_descriptor(
    manifest: &ProjectManifest,
    ids: &mut dyn IdSource,
) -> ExportResult<ProjectDescriptor> {
    if manifest.pictures.len() as u64 != manifest.frame_count {
        return Err(ExportError::capture(format!(
            "{} pictures for {} frames",
            manifest.pictures.len(),
            manifest.frame_count
        )));
    }
    if manifest.width == 0 || manifest.height == 0 {
        return Err(ExportError::configuration("object size must be non-zero"));
    }

    let object_id = ids.next_id();
    let scene_id = ids.next_id();

    let pictures = manifest
        .pictures
        .iter()
        .map(|path| Picture {
            id: ids.next_id(),
            dimension: Dimension {
                width: manifest.width,
                height: manifest.height,
            },
            fileurl: path.to_string(),
            filename: path.hash().to_string(),
            name: path.hash().to_string(),
            image_type: "png",
        })
        .collect();
    let sound = Sound {
        duration: (manifest.duration * 10.0).round() / 10.0,
        ext: ".mp3",
        id: ids.next_id(),
        fileurl: manifest.sound.to_string(),
        filename: manifest.sound.hash().to_string(),
        name: manifest.sound.hash().to_string(),
        image_type: "png",
    };

    let timing = PlaybackTiming {
        duration: manifest.duration,
        framerate: manifest.framerate,
        frame_count: manifest.frame_count,
    };
    let forest = playback_script(&timing, strategy(manifest.use_dummy_code), ids);
    let script = serde_json::to_string(&forest)?;

    let object = ProjectObject {
        id: object_id.clone(),
        name: manifest.name.clone(),
        object_type: "sprite",
        rotate_method: "free",
        scene: scene_id.clone(),
        lock: false,
        entity: Entity {
            x: 0.0,
            y: 0.0,
            reg_x: manifest.width as f64 / 2.0,
            reg_y: manifest.height as f64 / 2.0,
            scale_x: CANVAS_WIDTH as f64 / manifest.width as f64,
            scale_y: CANVAS_HEIGHT as f64 / manifest.height as f64,
            rotation: 0.0,
            direction: 90.0,
            width: manifest.width,
            height: manifest.height,
            font: "undefinedpx ",
            visible: true,
        },
        sprite: Sprite {
            pictures,
            sounds: vec![sound],
        },
        script,
    };

    Ok(ProjectDescriptor {
        objects: vec![object],
        scenes: vec![Scene {
            id: scene_id,
            name: SCENE_NAME.to_string(),
        }],
        variables: vec![
            Variable::hidden(TIMER_VARIABLE.0, TIMER_VARIABLE.1, "timer", f64::MIN),
            Variable::hidden(ANSWER_VARIABLE.0, ANSWER_VARIABLE.1, "answer", 0.0),
        ],
        messages: Vec::new(),
        functions: Vec::new(),
        tables: Vec::new(),
        speed: manifest.framerate,
        interface: Interface {
            menu_width: MENU_WIDTH,
            canvas_width: CANVAS_WIDTH,
            object: object_id,
        },
        expansion_blocks: Vec::new(),
        ai_utilize_blocks: Vec::new(),
        hardware_lite_blocks: Vec::new(),
        external_modules: Vec::new(),
        external_modules_lite: Vec::new(),
        is_practical_course: false,
        name: manifest.name.clone(),
    })
}

#[cfg(test)]
#[path = "descriptor_test.rs"]
mod descriptor_test;
