use std::fs;
use std::path::{Path, PathBuf};

use crate::auxiliary::{self, AuxiliaryReport};
use crate::config::{CompilerConfig, Namespaces};
use crate::error::{Error, Result};
use crate::point::GeoPoint;
use crate::polygon::PolygonRing;
use crate::template::CameraMode;
use crate::xml::{local_part, Document, Element, Node};

/// How the waypoint folder of the mission descriptor was rebuilt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Waypoints {
    /// Every vertex got a deep copy of the template's first waypoint.
    Cloned(usize),
    /// The template had no usable waypoint; bare placemarks were written.
    /// Consumers may reject these since they carry no actions.
    Synthetic(usize),
    /// The descriptor has no waypoint folder.
    NoFolder,
}

impl Waypoints {
    pub fn count(&self) -> usize {
        match self {
            Waypoints::Cloned(n) | Waypoints::Synthetic(n) => *n,
            Waypoints::NoFolder => 0,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct RewriteReport {
    /// Descriptor path, relative to the package root.
    pub descriptor: PathBuf,
    pub waypoints: Waypoints,
    pub auxiliary: AuxiliaryReport,
}

/// Rewrites a staged template so it flies the given polygon.
pub struct MissionRewriter<'a> {
    config: &'a CompilerConfig,
}

impl<'a> MissionRewriter<'a> {
    pub fn new(config: &'a CompilerConfig) -> Self {
        MissionRewriter { config }
    }

    /// Probes the configured descriptor locations in order.
    pub fn locate_descriptor(&self, root: &Path) -> Result<PathBuf> {
        self.config
            .descriptor_candidates
            .iter()
            .map(PathBuf::from)
            .find(|candidate| root.join(candidate).is_file())
            .ok_or_else(|| Error::MissionDescriptorMissing {
                candidates: self.config.descriptor_candidates.clone(),
            })
    }

    /// Rewrites the mission descriptor, then brings every auxiliary
    /// KML/KMZ in the tree in line with `ring`.
    pub fn rewrite(
        &self,
        root: &Path,
        ring: &PolygonRing,
        altitude_meters: f64,
        camera: CameraMode,
    ) -> Result<RewriteReport> {
        let descriptor = self.locate_descriptor(root)?;
        log::info!("mission: descriptor {}", descriptor.display());
        let waypoints =
            self.rewrite_descriptor_file(&root.join(&descriptor), ring, altitude_meters, camera)?;
        let auxiliary = auxiliary::synchronize(root, ring, &self.config.namespaces.geometry);
        Ok(RewriteReport {
            descriptor,
            waypoints,
            auxiliary,
        })
    }

    fn rewrite_descriptor_file(
        &self,
        path: &Path,
        ring: &PolygonRing,
        altitude_meters: f64,
        camera: CameraMode,
    ) -> Result<Waypoints> {
        let failed = |e: &dyn std::fmt::Display| Error::RewriteFailed(format!("mission descriptor: {}", e));
        let bytes = fs::read(path).map_err(|e| failed(&e))?;
        let mut doc = Document::from_bytes(&bytes).map_err(|e| failed(&e))?;
        let waypoints = self.rewrite_document(&mut doc, ring, altitude_meters, camera);
        let out = doc.to_bytes().map_err(|e| failed(&e))?;
        fs::write(path, out).map_err(|e| failed(&e))?;
        Ok(waypoints)
    }

    /// All descriptor passes, in order: named scalar fields, the generic
    /// height sweep, then the waypoint folder.
    pub fn rewrite_document(
        &self,
        doc: &mut Document,
        ring: &PolygonRing,
        altitude_meters: f64,
        camera: CameraMode,
    ) -> Waypoints {
        let mission_ns = self.config.namespaces.mission.as_str();
        let height = format!("{:.3}", altitude_meters);

        for (local_name, value) in self.scalar_fields(&height, camera) {
            let n = set_all_texts(doc.root_mut(), mission_ns, local_name, value);
            log::debug!("mission: {} = {} ({} elements)", local_name, value, n);
        }
        let n = normalize_heights(doc.root_mut(), mission_ns, &height);
        log::debug!("mission: height sweep touched {} elements", n);

        let waypoints = rebuild_waypoints(doc, ring, &self.config.namespaces);
        log::info!("mission: waypoints {:?}", waypoints);
        waypoints
    }

    fn scalar_fields<'s>(&'s self, height: &'s str, camera: CameraMode) -> [(&'static str, &'s str); 12] {
        let aircraft = &self.config.aircraft;
        [
            ("droneEnumValue", aircraft.drone_enum.as_str()),
            ("payloadEnumValue", aircraft.payload_enum.as_str()),
            ("payloadSubEnumValue", camera.payload_sub_enum()),
            ("executeHeight", height),
            ("executeHeightMode", self.config.execute_height_mode.as_str()),
            ("isUseAbsoluteAltitude", "false"),
            ("takeOffAlt", height),
            ("takeOffSecurityHeight", height),
            ("globalHeight", height),
            ("height", height),
            ("uavHeight", height),
            ("goHomeHeight", height),
        ]
    }
}

/// Sets the text of every `namespace:local_name` element in the tree.
fn set_all_texts(root: &mut Element, namespace: &str, local_name: &str, value: &str) -> usize {
    let mut n = 0;
    root.walk_mut(&mut |e: &mut Element| {
        if e.is(namespace, local_name) {
            e.set_text(value);
            n += 1;
        }
    });
    n
}

fn is_height_name(name: &str) -> bool {
    name.to_ascii_lowercase().ends_with("height")
}

/// Overwrites every element and attribute of the mission namespace whose
/// local name is `height` or ends in `Height`, ignoring case.
fn normalize_heights(root: &mut Element, namespace: &str, height: &str) -> usize {
    let mut n = 0;
    root.walk_mut(&mut |e: &mut Element| {
        if e.namespace() != Some(namespace) {
            return;
        }
        if is_height_name(e.local_name()) {
            e.set_text(height);
            n += 1;
        }
        for (key, value) in e.attributes_mut() {
            if !key.starts_with("xmlns") && is_height_name(local_part(key)) {
                *value = height.to_string();
                n += 1;
            }
        }
    });
    n
}

fn has_point_coordinates(placemark: &Element, kml: &str) -> bool {
    placemark
        .find(kml, "Point")
        .and_then(|point| point.find(kml, "coordinates"))
        .is_some()
}

fn rebuild_waypoints(
    doc: &mut Document,
    ring: &PolygonRing,
    namespaces: &Namespaces,
) -> Waypoints {
    let kml = namespaces.geometry.as_str();
    let wpml = namespaces.mission.as_str();
    let Some(folder) = doc.find_mut(kml, "Folder") else {
        log::warn!("mission: descriptor has no waypoint Folder; waypoints left as they are");
        return Waypoints::NoFolder;
    };

    let prototype = folder
        .child_elements()
        .filter(|e| e.is(kml, "Placemark"))
        .find(|e| has_point_coordinates(e, kml))
        .cloned();
    let indent = folder.child_indent();
    folder.retain_elements(|e| !e.is(kml, "Placemark"));

    match prototype {
        Some(prototype) => {
            for (i, point) in ring.iter().enumerate() {
                let waypoint = clone_waypoint(&prototype, i, point, kml, wpml);
                folder.append_indented(waypoint, indent.as_deref());
            }
            Waypoints::Cloned(ring.len())
        }
        None => {
            log::warn!("mission: no prototype waypoint in template; writing bare placemarks");
            for (i, point) in ring.iter().enumerate() {
                let waypoint = bare_waypoint(folder, i, point);
                folder.append_indented(waypoint, indent.as_deref());
            }
            Waypoints::Synthetic(ring.len())
        }
    }
}

fn waypoint_name(index: usize) -> String {
    format!("WP {}", index + 1)
}

/// Copies `prototype` and changes only its name, point coordinates and
/// sequence index.
fn clone_waypoint(
    prototype: &Element,
    index: usize,
    point: &GeoPoint,
    kml: &str,
    wpml: &str,
) -> Element {
    let mut waypoint = prototype.clone();

    match waypoint.find_child_mut(kml, "name") {
        Some(name) => name.set_text(waypoint_name(index)),
        None => {
            let mut name = waypoint.new_like("name");
            name.set_text(waypoint_name(index));
            waypoint.children_mut().insert(0, Node::Element(name));
        }
    }
    if let Some(coordinates) = waypoint
        .find_mut(kml, "Point")
        .and_then(|p| p.find_mut(kml, "coordinates"))
    {
        coordinates.set_text(point.lon_lat());
    }
    if let Some(sequence) = waypoint.find_child_mut(wpml, "index") {
        sequence.set_text(index.to_string());
    }
    waypoint
}

fn bare_waypoint(folder: &Element, index: usize, point: &GeoPoint) -> Element {
    let mut name = folder.new_like("name");
    name.set_text(waypoint_name(index));
    let mut coordinates = folder.new_like("coordinates");
    coordinates.set_text(point.lon_lat());
    let mut geometry = folder.new_like("Point");
    geometry.push(Node::Element(coordinates));

    let mut placemark = folder.new_like("Placemark");
    placemark.push(Node::Element(name));
    placemark.push(Node::Element(geometry));
    placemark
}
