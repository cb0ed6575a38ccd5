//! Keeps the secondary geometry documents of a package (`*.kml` files and
//! `*.kmz` archives) drawing the same polygon as the mission.
//!
//! These documents only feed map previews, so a file that cannot be
//! rewritten is recorded in the report and left untouched.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use walkdir::WalkDir;

use crate::package::{self, Entry};
use crate::polygon::PolygonRing;
use crate::xml::{Document, Element, XmlError};

#[derive(Clone, Debug, PartialEq)]
pub enum AuxiliaryStatus {
    Rewritten,
    Skipped { reason: String },
}

#[derive(Clone, Debug, PartialEq)]
pub struct AuxiliaryOutcome {
    /// Relative to the package root.
    pub path: PathBuf,
    pub status: AuxiliaryStatus,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct AuxiliaryReport {
    pub outcomes: Vec<AuxiliaryOutcome>,
}

impl AuxiliaryReport {
    pub fn rewritten(&self) -> impl Iterator<Item = &Path> {
        self.outcomes
            .iter()
            .filter(|o| o.status == AuxiliaryStatus::Rewritten)
            .map(|o| o.path.as_path())
    }

    pub fn skipped(&self) -> impl Iterator<Item = (&Path, &str)> {
        self.outcomes.iter().filter_map(|o| match &o.status {
            AuxiliaryStatus::Skipped { reason } => Some((o.path.as_path(), reason.as_str())),
            AuxiliaryStatus::Rewritten => None,
        })
    }

    fn record(&mut self, path: PathBuf, result: Result<(), SkipReason>) {
        let status = match result {
            Ok(()) => {
                log::info!("auxiliary: rewrote {}", path.display());
                AuxiliaryStatus::Rewritten
            }
            Err(reason) => {
                log::warn!("auxiliary: skipping {}: {}", path.display(), reason);
                AuxiliaryStatus::Skipped {
                    reason: reason.to_string(),
                }
            }
        };
        self.outcomes.push(AuxiliaryOutcome { path, status });
    }
}

#[derive(Debug, Error)]
pub enum SkipReason {
    #[error("cannot access file: {0}")]
    Io(#[from] io::Error),
    #[error("cannot list directory: {0}")]
    Walk(#[from] walkdir::Error),
    #[error(transparent)]
    Xml(#[from] XmlError),
    #[error(transparent)]
    Package(#[from] crate::error::Error),
    #[error("no coordinates element")]
    NoCoordinates,
    #[error("archive holds no KML document")]
    NoInnerDocument,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum AssetKind {
    Kml,
    Kmz,
}

impl AssetKind {
    fn of(path: &Path) -> Option<AssetKind> {
        let ext = path.extension()?.to_str()?;
        if ext.eq_ignore_ascii_case("kml") {
            Some(AssetKind::Kml)
        } else if ext.eq_ignore_ascii_case("kmz") {
            Some(AssetKind::Kmz)
        } else {
            None
        }
    }
}

/// Rewrites the first polygon ring of every geometry document below `root`.
/// Never fails; per-file problems end up in the report.
pub fn synchronize(root: &Path, ring: &PolygonRing, namespace: &str) -> AuxiliaryReport {
    let mut report = AuxiliaryReport::default();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                let path = e.path().map(|p| relative(root, p)).unwrap_or_default();
                report.record(path, Err(e.into()));
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(kind) = AssetKind::of(entry.path()) else {
            continue;
        };
        let result = sync_file(entry.path(), kind, ring, namespace);
        report.record(relative(root, entry.path()), result);
    }
    report
}

fn relative(root: &Path, path: &Path) -> PathBuf {
    path.strip_prefix(root).unwrap_or(path).to_path_buf()
}

fn sync_file(
    path: &Path,
    kind: AssetKind,
    ring: &PolygonRing,
    namespace: &str,
) -> Result<(), SkipReason> {
    let bytes = fs::read(path)?;
    let rewritten = match kind {
        AssetKind::Kml => rewrite_kml(&bytes, ring, namespace)?,
        AssetKind::Kmz => rewrite_kmz(&bytes, ring, namespace)?,
    };
    fs::write(path, rewritten)?;
    Ok(())
}

/// Replaces the first ring of a KML document and returns the new document.
pub fn rewrite_kml(bytes: &[u8], ring: &PolygonRing, namespace: &str) -> Result<Vec<u8>, SkipReason> {
    let mut doc = Document::from_bytes(bytes)?;
    let coordinates = ring_coordinates(doc.root_mut(), namespace).ok_or(SkipReason::NoCoordinates)?;
    coordinates.set_text(format!("\n{}\n", ring.coordinate_text()));
    Ok(doc.to_bytes()?)
}

/// Rewrites the main document of a KMZ archive (`doc.kml`, else the first
/// `.kml` member); every other member is carried over as is.
pub fn rewrite_kmz(bytes: &[u8], ring: &PolygonRing, namespace: &str) -> Result<Vec<u8>, SkipReason> {
    let mut entries = package::read_entries(bytes)?;
    let target = main_document(&entries).ok_or(SkipReason::NoInnerDocument)?;
    log::debug!("auxiliary: archive document {}", entries[target].name);
    entries[target].data = rewrite_kml(&entries[target].data, ring, namespace)?;
    Ok(package::write_entries(&entries)?)
}

fn main_document(entries: &[Entry]) -> Option<usize> {
    let is_kml = |e: &Entry| !e.is_dir && e.name.to_ascii_lowercase().ends_with(".kml");
    entries
        .iter()
        .position(|e| is_kml(e) && leaf_name(&e.name).eq_ignore_ascii_case("doc.kml"))
        .or_else(|| entries.iter().position(is_kml))
}

fn leaf_name(name: &str) -> &str {
    name.rsplit('/').next().unwrap_or(name)
}

/// Geometry elements are matched in `namespace`, or without any namespace
/// for documents that never declare one.
fn is_geometry(e: &Element, namespace: &str, local_name: &str) -> bool {
    e.local_name() == local_name && e.namespace().is_none_or(|ns| ns == namespace)
}

/// The `<coordinates>` to replace: the outer ring of the first polygon,
/// else the first linear ring, else the first coordinates element at all.
fn ring_coordinates<'a>(root: &'a mut Element, ns: &str) -> Option<&'a mut Element> {
    let has_coordinates = |e: &Element| e.find_where(&|c| is_geometry(c, ns, "coordinates")).is_some();
    let ring = |e: &Element| is_geometry(e, ns, "LinearRing") && has_coordinates(e);
    let polygon = |e: &Element| is_geometry(e, ns, "Polygon") && e.find_where(&ring).is_some();

    if root.find_where(&polygon).is_some() {
        return root
            .find_where_mut(&polygon)?
            .find_where_mut(&ring)?
            .find_where_mut(&|c| is_geometry(c, ns, "coordinates"));
    }
    if root.find_where(&ring).is_some() {
        return root
            .find_where_mut(&ring)?
            .find_where_mut(&|c| is_geometry(c, ns, "coordinates"));
    }
    root.find_where_mut(&|c| is_geometry(c, ns, "coordinates"))
}
