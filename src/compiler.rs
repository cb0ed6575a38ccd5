use std::fs;
use std::io::{Seek, Write};
use std::path::{Path, PathBuf};

use crate::auxiliary::AuxiliaryReport;
use crate::config::CompilerConfig;
use crate::error::{Error, Result};
use crate::mission::{MissionRewriter, Waypoints};
use crate::package::StagedTree;
use crate::read_kml;
use crate::template::{self, AltitudeBucket, CameraMode, TemplateId, TemplateSource};

/// A mission package written to disk.
#[derive(Clone, Debug, PartialEq)]
pub struct CompiledMission {
    pub path: PathBuf,
    pub template: TemplateId,
    pub bucket: AltitudeBucket,
    pub altitude_meters: f64,
    pub waypoints: Waypoints,
    pub auxiliary: AuxiliaryReport,
}

impl CompiledMission {
    /// True when the template carried no waypoint to copy from.
    pub fn synthetic_waypoints(&self) -> bool {
        matches!(self.waypoints, Waypoints::Synthetic(_))
    }
}

/// Turns a drawn polygon into a flight-plan package, one compile at a time.
///
/// Each compile stages its template into its own temporary directory, so
/// separate compilers (or compiles) never share state on disk.
pub struct MissionCompiler<S: TemplateSource> {
    config: CompilerConfig,
    templates: S,
    output_dir: PathBuf,
    staging_dir: Option<PathBuf>,
}

impl<S: TemplateSource> MissionCompiler<S> {
    pub fn new(templates: S, output_dir: impl Into<PathBuf>) -> Self {
        Self::with_config(CompilerConfig::default(), templates, output_dir)
    }

    pub fn with_config(config: CompilerConfig, templates: S, output_dir: impl Into<PathBuf>) -> Self {
        MissionCompiler {
            config,
            templates,
            output_dir: output_dir.into(),
            staging_dir: None,
        }
    }

    /// Stages below `dir` instead of the system temporary directory.
    pub fn with_staging_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.staging_dir = Some(dir.into());
        self
    }

    pub fn config(&self) -> &CompilerConfig {
        &self.config
    }

    pub fn output_path(&self, mission_name: &str) -> Result<PathBuf> {
        check_name(mission_name)?;
        Ok(self.output_dir.join(format!("{}.kmz", mission_name)))
    }

    /// Compiles `kml` into `<output_dir>/<mission_name>.kmz`.
    ///
    /// Nothing is written to the output directory unless every step
    /// succeeds; the staging directory is removed on every exit path.
    pub fn compile(
        &self,
        kml: &[u8],
        mission_name: &str,
        altitude_feet: f64,
        camera: CameraMode,
    ) -> Result<CompiledMission> {
        let destination = self.output_path(mission_name)?;
        let altitude_meters = template::feet_to_meters(altitude_feet);
        log::info!(
            "compile: {} at {:.1}ft ({:.3}m), camera {}",
            mission_name,
            altitude_feet,
            altitude_meters,
            camera
        );

        let ring = read_kml::extract(kml)?;

        let bucket = AltitudeBucket::from_meters(altitude_meters);
        let template = self.config.templates.id(camera, bucket);
        log::info!("compile: template {} ({:?})", template, bucket);
        let package = self.templates.load(&template)?;

        let staged = match &self.staging_dir {
            Some(dir) => StagedTree::unpack_in(&package, dir)?,
            None => StagedTree::unpack(&package)?,
        };
        let report = MissionRewriter::new(&self.config).rewrite(
            staged.root(),
            &ring,
            altitude_meters,
            camera,
        )?;
        log::debug!(
            "compile: {} waypoints, {} auxiliary documents",
            report.waypoints.count(),
            report.auxiliary.outcomes.len()
        );

        self.write_package(&staged, &destination)?;
        if let Err(e) = staged.close() {
            log::warn!("compile: could not remove staging directory: {}", e);
        }
        log::info!("compile: wrote {}", destination.display());

        Ok(CompiledMission {
            path: destination,
            template,
            bucket,
            altitude_meters,
            waypoints: report.waypoints,
            auxiliary: report.auxiliary,
        })
    }

    /// Repacks into a temporary file next to `destination` and renames it
    /// into place once it is known to be non-empty.
    fn write_package(&self, staged: &StagedTree, destination: &Path) -> Result<()> {
        fs::create_dir_all(&self.output_dir)?;
        let tmp = tempfile::Builder::new()
            .prefix(".mission")
            .suffix(".kmz.part")
            .tempfile_in(&self.output_dir)?;
        let mut file = staged.repack_to(tmp)?;
        file.flush()?;
        let len = file.as_file_mut().seek(std::io::SeekFrom::End(0))?;
        if len == 0 {
            return Err(Error::EmptyPackage);
        }
        file.persist(destination).map_err(|e| Error::Io(e.error))?;
        Ok(())
    }
}

fn check_name(name: &str) -> Result<()> {
    let unusable = name.trim().is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\'])
        || name.contains('\0');
    if unusable {
        return Err(Error::InvalidMissionName(name.to_string()));
    }
    Ok(())
}
