pub mod auxiliary;
pub mod compiler;
pub mod config;
pub mod error;
pub mod mission;
pub mod package;
pub mod point;
pub mod polygon;
pub mod read_kml;
pub mod template;
pub mod write_kml;
pub mod xml;

pub use compiler::{CompiledMission, MissionCompiler};
pub use error::{Error, Result};
pub use template::{CameraMode, TemplateDir, TemplateSource};
