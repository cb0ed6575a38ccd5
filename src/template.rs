use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

use crate::error::{Error, Result};

pub const METERS_PER_FOOT: f64 = 0.3048;

/// Altitudes at or above this many feet use the high-altitude templates.
pub const HIGH_BUCKET_FEET: f64 = 300.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CameraMode {
    Eo,
    Ir,
    Both,
}

impl CameraMode {
    /// Payload sub-mode written to `payloadSubEnumValue`. The dual-sensor
    /// mode shares the IR sub-mode on this payload family.
    pub fn payload_sub_enum(&self) -> &'static str {
        match self {
            CameraMode::Eo => "0",
            CameraMode::Ir | CameraMode::Both => "2",
        }
    }
}

impl fmt::Display for CameraMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CameraMode::Eo => "EO",
            CameraMode::Ir => "IR",
            CameraMode::Both => "EO+IR",
        };
        write!(f, "{}", s)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AltitudeBucket {
    Low,
    High,
}

impl AltitudeBucket {
    pub fn from_meters(altitude_meters: f64) -> Self {
        let feet = altitude_meters / METERS_PER_FOOT;
        if feet < HIGH_BUCKET_FEET {
            AltitudeBucket::Low
        } else {
            AltitudeBucket::High
        }
    }
}

pub fn feet_to_meters(feet: f64) -> f64 {
    feet * METERS_PER_FOOT
}

/// Relative key of a template package, e.g. `templates/200ft/Test3correct.kmz`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TemplateId(String);

impl TemplateId {
    pub fn new(id: impl Into<String>) -> Self {
        TemplateId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TemplateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Fixed mapping from (bucket, camera) to template package.
#[derive(Clone, Debug)]
pub struct TemplateTable {
    pub low_dir: String,
    pub high_dir: String,
    pub eo_file: String,
    pub ir_file: String,
    pub both_file: String,
}

impl Default for TemplateTable {
    fn default() -> Self {
        TemplateTable {
            low_dir: "templates/200ft".to_string(),
            high_dir: "templates/400ft".to_string(),
            eo_file: "Test3correct.kmz".to_string(),
            ir_file: "Test3correctIR.kmz".to_string(),
            both_file: "Test3correctBoth.kmz".to_string(),
        }
    }
}

impl TemplateTable {
    pub fn id(&self, camera: CameraMode, bucket: AltitudeBucket) -> TemplateId {
        let dir = match bucket {
            AltitudeBucket::Low => &self.low_dir,
            AltitudeBucket::High => &self.high_dir,
        };
        let file = match camera {
            CameraMode::Eo => &self.eo_file,
            CameraMode::Ir => &self.ir_file,
            CameraMode::Both => &self.both_file,
        };
        TemplateId(format!("{}/{}", dir, file))
    }

    pub fn select(&self, camera: CameraMode, altitude_meters: f64) -> TemplateId {
        self.id(camera, AltitudeBucket::from_meters(altitude_meters))
    }
}

/// Template selection with the built-in table.
pub fn select(camera: CameraMode, altitude_meters: f64) -> TemplateId {
    TemplateTable::default().select(camera, altitude_meters)
}

/// Read-only store of template packages.
pub trait TemplateSource {
    fn load(&self, id: &TemplateId) -> Result<Vec<u8>>;
}

/// Templates laid out on disk below `root`, keyed by relative path.
#[derive(Clone, Debug)]
pub struct TemplateDir {
    root: PathBuf,
}

impl TemplateDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        TemplateDir { root: root.into() }
    }
}

impl TemplateSource for TemplateDir {
    fn load(&self, id: &TemplateId) -> Result<Vec<u8>> {
        let path = self.root.join(id.as_str());
        log::debug!("template: reading {}", path.display());
        std::fs::read(&path).map_err(|source| Error::TemplateUnavailable {
            id: id.to_string(),
            source,
        })
    }
}

#[derive(Clone, Debug, Default)]
pub struct MemoryTemplates {
    blobs: HashMap<TemplateId, Vec<u8>>,
}

impl MemoryTemplates {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: TemplateId, package: Vec<u8>) {
        self.blobs.insert(id, package);
    }
}

impl TemplateSource for MemoryTemplates {
    fn load(&self, id: &TemplateId) -> Result<Vec<u8>> {
        self.blobs
            .get(id)
            .cloned()
            .ok_or_else(|| Error::TemplateUnavailable {
                id: id.to_string(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such template"),
            })
    }
}
