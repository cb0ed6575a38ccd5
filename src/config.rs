use crate::template::TemplateTable;

pub const MISSION_NAMESPACE: &str = "http://www.dji.com/wpmz/1.0.6";
pub const GEOMETRY_NAMESPACE: &str = "http://www.opengis.net/kml/2.2";

#[derive(Clone, Debug)]
pub struct Namespaces {
    /// Mission markup (waypoint parameters, heights, payload).
    pub mission: String,
    /// Visual geometry (KML).
    pub geometry: String,
}

impl Default for Namespaces {
    fn default() -> Self {
        Namespaces {
            mission: MISSION_NAMESPACE.to_string(),
            geometry: GEOMETRY_NAMESPACE.to_string(),
        }
    }
}

/// Identifiers of the supported aircraft and payload family.
#[derive(Clone, Debug)]
pub struct Aircraft {
    pub drone_enum: String,
    pub payload_enum: String,
}

impl Default for Aircraft {
    fn default() -> Self {
        Aircraft {
            drone_enum: "77".to_string(),
            payload_enum: "67".to_string(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct CompilerConfig {
    pub namespaces: Namespaces,
    /// Probed in order, relative to the package root.
    pub descriptor_candidates: Vec<String>,
    pub aircraft: Aircraft,
    pub execute_height_mode: String,
    pub templates: TemplateTable,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        CompilerConfig {
            namespaces: Namespaces::default(),
            descriptor_candidates: vec![
                "wpmz/waylines.wpml".to_string(),
                "wpmz/mission/waylines.wpml".to_string(),
                "waylines.wpml".to_string(),
            ],
            aircraft: Aircraft::default(),
            execute_height_mode: "relativeToStartPoint".to_string(),
            templates: TemplateTable::default(),
        }
    }
}
