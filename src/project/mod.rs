//! Project descriptor (`project.json`) and the playback program it embeds.

pub mod descriptor;
pub mod id;
pub mod script;

pub use descriptor::{ProjectDescriptor, ProjectManifest, build_descriptor};
pub use id::{IdSource, RandomIds, SequentialIds};
pub use script::{OperatorStrategy, ScriptForest, ScriptNode, playback_script, strategy};
