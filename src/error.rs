use std::io;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Reasons a compile stops. None of them leave a partial package behind.
#[derive(Debug, Error)]
pub enum Error {
    #[error("no usable geometry found in KML (Polygon/LinearRing/LineString not present)")]
    NoGeometryFound,

    #[error("KML contains a LineString but no Polygon/LinearRing; draw a polygon to map an area")]
    AreaGeometryRequired,

    #[error("polygon must have at least 3 unique points, found {found}")]
    InsufficientVertices { found: usize },

    #[error("template package is corrupt: {0}")]
    CorruptPackage(String),

    #[error("template has no mission descriptor (looked for {})", .candidates.join(", "))]
    MissionDescriptorMissing { candidates: Vec<String> },

    #[error("failed to rewrite mission: {0}")]
    RewriteFailed(String),

    #[error("mission template {id} is not available: {source}")]
    TemplateUnavailable {
        id: String,
        #[source]
        source: io::Error,
    },

    #[error("mission name {0:?} cannot be used as a file name")]
    InvalidMissionName(String),

    #[error("generated mission package is empty")]
    EmptyPackage,

    #[error(transparent)]
    Io(#[from] io::Error),
}
