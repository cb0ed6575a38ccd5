use clap::{Parser, Subcommand, ValueEnum};
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;

use polygon_mission::auxiliary::AuxiliaryStatus;
use polygon_mission::{read_kml, write_kml};
use polygon_mission::{CameraMode, Error, MissionCompiler, TemplateDir};

#[derive(Parser)]
#[command(version, about = "Compile a drawn KML polygon into a drone mission package")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Build `<out>/<name>.kmz` from a polygon and a mission template.
    Compile {
        kml: PathBuf,
        #[arg(long)]
        name: String,
        #[arg(long)]
        altitude_ft: f64,
        #[arg(long, value_enum)]
        camera: Camera,
        /// Directory holding `templates/`; defaults to $MISSION_TEMPLATES.
        #[arg(long)]
        templates: Option<PathBuf>,
        #[arg(long, default_value = ".")]
        out: PathBuf,
    },
    /// Print the polygon found in a KML document.
    Extract {
        kml: PathBuf,
        /// Also write the polygon as a standalone KML document.
        #[arg(long)]
        export: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Camera {
    Eo,
    Ir,
    Both,
}

impl From<Camera> for CameraMode {
    fn from(c: Camera) -> Self {
        match c {
            Camera::Eo => CameraMode::Eo,
            Camera::Ir => CameraMode::Ir,
            Camera::Both => CameraMode::Both,
        }
    }
}

fn templatesenv() -> Option<PathBuf> {
    match env::var("MISSION_TEMPLATES") {
        Ok(val) if !val.is_empty() => Some(PathBuf::from(val)),
        _ => None,
    }
}

fn run(cli: Cli) -> Result<(), Error> {
    match cli.command {
        Command::Compile {
            kml,
            name,
            altitude_ft,
            camera,
            templates,
            out,
        } => {
            let root = templates
                .or_else(templatesenv)
                .unwrap_or_else(|| PathBuf::from("."));
            log::debug!("templates: {}", root.display());
            let bytes = std::fs::read(&kml)?;
            let compiler = MissionCompiler::new(TemplateDir::new(root), out);
            let mission = compiler.compile(&bytes, &name, altitude_ft, camera.into())?;
            println!("{}", mission.path.display());
            println!(
                "  template: {} ({:?}, {:.3}m)",
                mission.template, mission.bucket, mission.altitude_meters
            );
            println!("  waypoints: {}", mission.waypoints.count());
            if mission.synthetic_waypoints() {
                println!("  warning: template had no waypoint to copy, wrote bare waypoints");
            }
            for outcome in &mission.auxiliary.outcomes {
                match &outcome.status {
                    AuxiliaryStatus::Rewritten => println!("  synced: {}", outcome.path.display()),
                    AuxiliaryStatus::Skipped { reason } => {
                        println!("  skipped: {} ({})", outcome.path.display(), reason)
                    }
                }
            }
        }
        Command::Extract { kml, export } => {
            let bytes = std::fs::read(&kml)?;
            let ring = read_kml::extract(&bytes)?;
            ring.info();
            for (i, p) in ring.iter().enumerate() {
                println!("{:>3}: {}", i + 1, p.lon_lat());
            }
            if let Some(path) = export {
                let name = kml
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "polygon".to_string());
                let text = write_kml::polygon_document(&ring, &name, None)
                    .map_err(|e| Error::RewriteFailed(e.to_string()))?;
                std::fs::write(&path, text)?;
                println!("wrote {}", path.display());
            }
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}
