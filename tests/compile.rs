use std::fs;
use std::io::{Cursor, Read, Write};
use std::path::Path;

use kml::Kml;
use kml::types::Geometry;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use polygon_mission::auxiliary::AuxiliaryStatus;
use polygon_mission::config::{GEOMETRY_NAMESPACE, MISSION_NAMESPACE};
use polygon_mission::mission::Waypoints;
use polygon_mission::template::{AltitudeBucket, MemoryTemplates, TemplateId};
use polygon_mission::xml::Document;
use polygon_mission::{CameraMode, Error, MissionCompiler, read_kml};

const WAYLINES: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<kml xmlns="http://www.opengis.net/kml/2.2" xmlns:wpml="http://www.dji.com/wpmz/1.0.6">
  <Document>
    <wpml:missionConfig>
      <wpml:flyToWaylineMode>safely</wpml:flyToWaylineMode>
      <wpml:takeOffSecurityHeight>20</wpml:takeOffSecurityHeight>
      <wpml:globalTransitionalSpeed>8</wpml:globalTransitionalSpeed>
      <wpml:droneInfo>
        <wpml:droneEnumValue>68</wpml:droneEnumValue>
      </wpml:droneInfo>
      <wpml:payloadInfo>
        <wpml:payloadEnumValue>52</wpml:payloadEnumValue>
        <wpml:payloadSubEnumValue>1</wpml:payloadSubEnumValue>
      </wpml:payloadInfo>
    </wpml:missionConfig>
    <Folder>
      <wpml:templateId>0</wpml:templateId>
      <wpml:executeHeightMode>WGS84</wpml:executeHeightMode>
      <wpml:waylineId>0</wpml:waylineId>
      <Placemark>
        <Point>
          <coordinates>
            8.5,47.3
          </coordinates>
        </Point>
        <wpml:index>0</wpml:index>
        <wpml:executeHeight>35</wpml:executeHeight>
        <wpml:waypointSpeed>5</wpml:waypointSpeed>
        <wpml:actionGroup>
          <wpml:actionGroupId>0</wpml:actionGroupId>
          <wpml:action>
            <wpml:actionActuatorFunc>takePhoto</wpml:actionActuatorFunc>
          </wpml:action>
        </wpml:actionGroup>
      </Placemark>
      <Placemark>
        <Point>
          <coordinates>
            8.6,47.3
          </coordinates>
        </Point>
        <wpml:index>1</wpml:index>
        <wpml:executeHeight>35</wpml:executeHeight>
      </Placemark>
    </Folder>
  </Document>
</kml>
"#;

const TEMPLATE_KML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<kml xmlns="http://www.opengis.net/kml/2.2">
  <Document>
    <Folder>
      <Placemark>
        <name>area</name>
        <Polygon>
          <outerBoundaryIs>
            <LinearRing>
              <coordinates>
                8.5,47.3,0
                8.6,47.3,0
                8.6,47.4,0
                8.5,47.3,0
              </coordinates>
            </LinearRing>
          </outerBoundaryIs>
        </Polygon>
      </Placemark>
    </Folder>
  </Document>
</kml>
"#;

const AUX_KML: &[u8] = b"<kml><Document><Placemark><coordinates>1,2,0</Placemark>";

const POLYGON: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<kml xmlns="http://www.opengis.net/kml/2.2">
  <Document>
    <Placemark>
      <name>field</name>
      <Polygon>
        <outerBoundaryIs>
          <LinearRing>
            <coordinates>-122.1,37.7,0 -122.0,37.7,0 -122.0,37.8,0 -122.1,37.7,0</coordinates>
          </LinearRing>
        </outerBoundaryIs>
      </Polygon>
    </Placemark>
  </Document>
</kml>
"#;

const POLYGON_AND_PATH: &str = r#"<kml xmlns="http://www.opengis.net/kml/2.2">
  <Document>
    <Placemark>
      <LineString><coordinates>10,10,0 11,11,0 12,12,0 13,13,0 14,14,0</coordinates></LineString>
    </Placemark>
    <Placemark>
      <Polygon><outerBoundaryIs><LinearRing>
        <coordinates>-122.1,37.7,0 -122.0,37.7,0 -122.0,37.8,0 -122.1,37.7,0</coordinates>
      </LinearRing></outerBoundaryIs></Polygon>
    </Placemark>
  </Document>
</kml>
"#;

const EXPECTED: [&str; 3] = [
    "-122.1000000,37.7000000",
    "-122.0000000,37.7000000",
    "-122.0000000,37.8000000",
];

fn nested_preview() -> Vec<u8> {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default();
    zip.start_file("doc.kml", options).unwrap();
    zip.write_all(TEMPLATE_KML.as_bytes()).unwrap();
    zip.start_file("files/icon.png", options).unwrap();
    zip.write_all(&[137, 80, 78, 71]).unwrap();
    zip.finish().unwrap().into_inner()
}

fn template_package() -> Vec<u8> {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let deflated = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let stored = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
    zip.add_directory("wpmz/", stored).unwrap();
    zip.start_file("wpmz/template.kml", deflated).unwrap();
    zip.write_all(TEMPLATE_KML.as_bytes()).unwrap();
    zip.start_file("wpmz/waylines.wpml", deflated).unwrap();
    zip.write_all(WAYLINES.as_bytes()).unwrap();
    zip.start_file("wpmz/res/preview.kmz", stored).unwrap();
    zip.write_all(&nested_preview()).unwrap();
    zip.start_file("aux.kml", stored).unwrap();
    zip.write_all(AUX_KML).unwrap();
    zip.finish().unwrap().into_inner()
}

fn templates() -> MemoryTemplates {
    let mut store = MemoryTemplates::new();
    for dir in ["templates/200ft", "templates/400ft"] {
        for file in ["Test3correct.kmz", "Test3correctIR.kmz", "Test3correctBoth.kmz"] {
            store.insert(TemplateId::new(format!("{}/{}", dir, file)), template_package());
        }
    }
    store
}

fn members(path: &Path) -> Vec<(String, Vec<u8>)> {
    let bytes = fs::read(path).unwrap();
    let mut archive = ZipArchive::new(Cursor::new(bytes)).unwrap();
    (0..archive.len())
        .map(|i| {
            let mut entry = archive.by_index(i).unwrap();
            let mut data = Vec::new();
            entry.read_to_end(&mut data).unwrap();
            (entry.name().to_string(), data)
        })
        .collect()
}

fn member(path: &Path, name: &str) -> Vec<u8> {
    members(path)
        .into_iter()
        .find(|(n, _)| n == name)
        .map(|(_, data)| data)
        .unwrap()
}

fn mission_text(doc: &Document, local_name: &str) -> String {
    doc.find(MISSION_NAMESPACE, local_name).unwrap().text()
}

fn waypoint_coordinates(doc: &Document) -> Vec<(String, String)> {
    doc.find(GEOMETRY_NAMESPACE, "Folder")
        .unwrap()
        .child_elements()
        .filter(|e| e.is(GEOMETRY_NAMESPACE, "Placemark"))
        .map(|p| {
            let name = p.find(GEOMETRY_NAMESPACE, "name").unwrap().text();
            let coordinates = p.find(GEOMETRY_NAMESPACE, "coordinates").unwrap().text();
            (name, coordinates.trim().to_string())
        })
        .collect()
}

fn find_first_polygon(kml: &Kml) -> Option<geo::Polygon> {
    match kml {
        Kml::KmlDocument(doc) => doc.elements.iter().find_map(find_first_polygon),
        Kml::Document { elements, .. } => elements.iter().find_map(find_first_polygon),
        Kml::Folder(z) => z.elements.iter().find_map(find_first_polygon),
        Kml::Placemark(p) => match &p.geometry {
            Some(Geometry::Polygon(polygon)) => Some(geo::Polygon::from(polygon.clone())),
            _ => None,
        },
        _ => None,
    }
}

#[test]
fn test_low_altitude_eo() {
    let out = tempfile::tempdir().unwrap();
    let compiler = MissionCompiler::new(templates(), out.path());
    let mission = compiler
        .compile(POLYGON.as_bytes(), "field", 200.0, CameraMode::Eo)
        .unwrap();

    assert_eq!(mission.path, out.path().join("field.kmz"));
    assert_eq!(mission.bucket, AltitudeBucket::Low);
    assert_eq!(mission.template.as_str(), "templates/200ft/Test3correct.kmz");
    assert_eq!(mission.waypoints, Waypoints::Cloned(3));

    let descriptor = Document::from_bytes(&member(&mission.path, "wpmz/waylines.wpml")).unwrap();
    assert_eq!(mission_text(&descriptor, "executeHeight"), "60.960");
    assert_eq!(mission_text(&descriptor, "takeOffSecurityHeight"), "60.960");
    assert_eq!(mission_text(&descriptor, "executeHeightMode"), "relativeToStartPoint");
    assert_eq!(mission_text(&descriptor, "droneEnumValue"), "77");
    assert_eq!(mission_text(&descriptor, "payloadEnumValue"), "67");
    assert_eq!(mission_text(&descriptor, "payloadSubEnumValue"), "0");
    assert_eq!(mission_text(&descriptor, "globalTransitionalSpeed"), "8");

    let waypoints = waypoint_coordinates(&descriptor);
    assert_eq!(waypoints.len(), 3);
    for (i, (name, coordinates)) in waypoints.iter().enumerate() {
        assert_eq!(name, &format!("WP {}", i + 1));
        assert_eq!(coordinates, EXPECTED[i]);
    }
    let actions = descriptor
        .root()
        .find(GEOMETRY_NAMESPACE, "Folder")
        .unwrap()
        .child_elements()
        .filter(|p| p.find(MISSION_NAMESPACE, "actionActuatorFunc").is_some())
        .count();
    assert_eq!(actions, 3);
}

#[test]
fn test_high_altitude_ir() {
    let out = tempfile::tempdir().unwrap();
    let compiler = MissionCompiler::new(templates(), out.path());
    let mission = compiler
        .compile(POLYGON.as_bytes(), "high", 400.0, CameraMode::Ir)
        .unwrap();

    assert_eq!(mission.bucket, AltitudeBucket::High);
    assert_eq!(mission.template.as_str(), "templates/400ft/Test3correctIR.kmz");
    let descriptor = Document::from_bytes(&member(&mission.path, "wpmz/waylines.wpml")).unwrap();
    assert_eq!(mission_text(&descriptor, "executeHeight"), "121.920");
    assert_eq!(mission_text(&descriptor, "payloadSubEnumValue"), "2");
}

#[test]
fn test_polygon_wins_over_path() {
    let ring = read_kml::extract(POLYGON_AND_PATH.as_bytes()).unwrap();
    assert_eq!(ring.len(), 3);
    let lon_lat: Vec<String> = ring.iter().map(|p| p.lon_lat()).collect();
    assert_eq!(lon_lat, EXPECTED);

    let out = tempfile::tempdir().unwrap();
    let compiler = MissionCompiler::new(templates(), out.path());
    let mission = compiler
        .compile(POLYGON_AND_PATH.as_bytes(), "both", 200.0, CameraMode::Both)
        .unwrap();
    assert_eq!(mission.waypoints.count(), 3);
}

#[test]
fn test_malformed_auxiliary_kept() {
    let out = tempfile::tempdir().unwrap();
    let compiler = MissionCompiler::new(templates(), out.path());
    let mission = compiler
        .compile(POLYGON.as_bytes(), "aux", 200.0, CameraMode::Eo)
        .unwrap();

    assert_eq!(member(&mission.path, "aux.kml"), AUX_KML.to_vec());
    let skipped: Vec<&Path> = mission.auxiliary.skipped().map(|(p, _)| p).collect();
    assert_eq!(skipped, vec![Path::new("aux.kml")]);
    let rewritten: Vec<&Path> = mission.auxiliary.rewritten().collect();
    assert_eq!(
        rewritten,
        vec![Path::new("wpmz/res/preview.kmz"), Path::new("wpmz/template.kml")]
    );
    assert!(
        mission
            .auxiliary
            .outcomes
            .iter()
            .all(|o| o.status == AuxiliaryStatus::Rewritten || o.path == Path::new("aux.kml"))
    );
}

#[test]
fn test_package_layout_preserved() {
    let out = tempfile::tempdir().unwrap();
    let compiler = MissionCompiler::new(templates(), out.path());
    let mission = compiler
        .compile(POLYGON.as_bytes(), "layout", 200.0, CameraMode::Eo)
        .unwrap();

    let names: Vec<String> = members(&mission.path).into_iter().map(|(n, _)| n).collect();
    assert_eq!(
        names,
        vec!["wpmz/", "wpmz/template.kml", "wpmz/waylines.wpml", "wpmz/res/preview.kmz", "aux.kml"]
    );

    let bytes = fs::read(&mission.path).unwrap();
    let mut archive = ZipArchive::new(Cursor::new(bytes)).unwrap();
    assert_eq!(
        archive.by_name("wpmz/res/preview.kmz").unwrap().compression(),
        CompressionMethod::Stored
    );
    assert_eq!(
        archive.by_name("wpmz/waylines.wpml").unwrap().compression(),
        CompressionMethod::Deflated
    );
}

#[test]
fn test_auxiliary_readable_by_kml_consumers() {
    let out = tempfile::tempdir().unwrap();
    let compiler = MissionCompiler::new(templates(), out.path());
    let mission = compiler
        .compile(POLYGON.as_bytes(), "preview", 200.0, CameraMode::Eo)
        .unwrap();

    let text = String::from_utf8(member(&mission.path, "wpmz/template.kml")).unwrap();
    let kml: Kml = text.parse().unwrap();
    let polygon = find_first_polygon(&kml).unwrap();
    let exterior: Vec<(f64, f64)> = polygon.exterior().0.iter().map(|c| (c.x, c.y)).collect();
    assert_eq!(exterior.len(), 4);
    assert_eq!(exterior[0], (-122.1, 37.7));
    assert_eq!(exterior[1], (-122.0, 37.7));
    assert_eq!(exterior[2], (-122.0, 37.8));

    let preview = member(&mission.path, "wpmz/res/preview.kmz");
    let mut nested = ZipArchive::new(Cursor::new(preview)).unwrap();
    let mut doc = String::new();
    nested.by_name("doc.kml").unwrap().read_to_string(&mut doc).unwrap();
    let ring = read_kml::extract(doc.as_bytes()).unwrap();
    assert_eq!(ring.len(), 3);
    let mut icon = Vec::new();
    nested.by_name("files/icon.png").unwrap().read_to_end(&mut icon).unwrap();
    assert_eq!(icon, vec![137, 80, 78, 71]);
}

#[test]
fn test_missing_template_leaves_no_output() {
    let out = tempfile::tempdir().unwrap();
    let compiler = MissionCompiler::new(MemoryTemplates::new(), out.path());
    let err = compiler
        .compile(POLYGON.as_bytes(), "none", 200.0, CameraMode::Eo)
        .unwrap_err();
    assert!(matches!(err, Error::TemplateUnavailable { .. }));
    assert!(err.to_string().contains("templates/200ft/Test3correct.kmz"));
    assert_eq!(fs::read_dir(out.path()).unwrap().count(), 0);
}

#[test]
fn test_concurrent_compiles() {
    let out = tempfile::tempdir().unwrap();
    let staging = tempfile::tempdir().unwrap();
    let compiler = MissionCompiler::new(templates(), out.path()).with_staging_dir(staging.path());
    std::thread::scope(|s| {
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let compiler = &compiler;
                s.spawn(move || {
                    compiler
                        .compile(POLYGON.as_bytes(), &format!("m{}", i), 200.0, CameraMode::Eo)
                        .unwrap()
                })
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap().waypoints.count(), 3);
        }
    });
    assert_eq!(fs::read_dir(out.path()).unwrap().count(), 4);
    assert_eq!(fs::read_dir(staging.path()).unwrap().count(), 0);
}
