use quick_xml::Reader;
use quick_xml::events::Event;

use crate::error::{Error, Result};
use crate::point::GeoPoint;
use crate::polygon::PolygonRing;
use crate::xml;

#[derive(Default)]
struct Scope {
    depth: usize,
    captured: Option<String>,
}

impl Scope {
    fn wants(&self) -> bool {
        self.depth > 0 && self.captured.is_none()
    }
}

/// First `<coordinates>` text seen inside each geometry kind.
#[derive(Default)]
struct Captures {
    polygon: Scope,
    linear_ring: Scope,
    line_string: Scope,
}

impl Captures {
    fn capture(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        let scope = if self.polygon.wants() {
            &mut self.polygon
        } else if self.linear_ring.wants() {
            &mut self.linear_ring
        } else if self.line_string.wants() {
            &mut self.line_string
        } else {
            return;
        };
        scope.captured = Some(text.to_string());
    }

    fn scope_mut(&mut self, local_name: &[u8]) -> Option<&mut Scope> {
        match local_name {
            b"Polygon" => Some(&mut self.polygon),
            b"LinearRing" => Some(&mut self.linear_ring),
            b"LineString" => Some(&mut self.line_string),
            _ => None,
        }
    }
}

/// Extracts the single area polygon of a KML document.
///
/// The document is scanned once. Within `Polygon`, `LinearRing` and
/// `LineString` the first non-empty `<coordinates>` is kept, and the result
/// is chosen in that priority order. A document holding only a path is
/// rejected with [`Error::AreaGeometryRequired`].
///
/// Scanning is lenient: an XML error ends the scan and whatever was
/// captured up to that point is used.
pub fn extract(bytes: &[u8]) -> Result<PolygonRing> {
    let text = match xml::decode_document(bytes) {
        Ok(text) => text,
        Err(e) => {
            log::warn!("kml: cannot decode document: {}", e);
            return Err(Error::NoGeometryFound);
        }
    };
    let captures = scan(&text);

    let chosen = match (
        captures.polygon.captured,
        captures.linear_ring.captured,
        captures.line_string.captured,
    ) {
        (Some(polygon), _, _) => {
            log::debug!("kml: using Polygon coordinates");
            polygon
        }
        (None, Some(ring), _) => {
            log::debug!("kml: using LinearRing coordinates");
            ring
        }
        (None, None, Some(_)) => return Err(Error::AreaGeometryRequired),
        (None, None, None) => return Err(Error::NoGeometryFound),
    };

    let ring = PolygonRing::from_points(parse_coordinates(&chosen))?;
    ring.info();
    Ok(ring)
}

fn scan(text: &str) -> Captures {
    let mut reader = Reader::from_str(text);
    let mut captures = Captures::default();
    // Some(..) while inside <coordinates>
    let mut coordinates: Option<String> = None;

    loop {
        let event = match reader.read_event() {
            Ok(event) => event,
            Err(e) => {
                log::warn!(
                    "kml: stopped scanning at byte {}: {}",
                    reader.buffer_position(),
                    e
                );
                break;
            }
        };
        match event {
            Event::Start(e) => {
                let name = e.local_name();
                if name.as_ref() == b"coordinates" {
                    coordinates = Some(String::new());
                } else if let Some(scope) = captures.scope_mut(name.as_ref()) {
                    scope.depth += 1;
                }
            }
            Event::End(e) => {
                let name = e.local_name();
                if name.as_ref() == b"coordinates" {
                    if let Some(text) = coordinates.take() {
                        captures.capture(text.trim());
                    }
                } else if let Some(scope) = captures.scope_mut(name.as_ref()) {
                    scope.depth = scope.depth.saturating_sub(1);
                }
            }
            Event::Text(t) => {
                if let Some(buf) = coordinates.as_mut() {
                    match t.unescape() {
                        Ok(s) => buf.push_str(&s),
                        Err(e) => log::warn!("kml: bad coordinates text: {}", e),
                    }
                }
            }
            Event::CData(t) => {
                if let Some(buf) = coordinates.as_mut() {
                    buf.push_str(&String::from_utf8_lossy(&t));
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }
    captures
}

/// Parses a KML coordinate tuple list (`lon,lat[,alt]` separated by
/// whitespace). Tuples that do not parse are dropped.
pub fn parse_coordinates(text: &str) -> Vec<GeoPoint> {
    text.split_whitespace()
        .filter_map(|token| {
            let mut parts = token.split(',');
            let lon = parts.next()?.parse::<f64>().ok()?;
            let lat = parts.next()?.parse::<f64>().ok()?;
            Some(GeoPoint::new(lat, lon))
        })
        .collect()
}
