use crate::config::GEOMETRY_NAMESPACE;
use crate::polygon::PolygonRing;
use crate::xml::{Document, Element, Node, XmlError};

fn leaf(name: &str, text: &str) -> Element {
    let mut e = Element::new(name, Some(GEOMETRY_NAMESPACE));
    e.set_text(text);
    e
}

fn wrap(name: &str, child: Element) -> Element {
    let mut e = Element::new(name, Some(GEOMETRY_NAMESPACE));
    e.push(Node::Element(child));
    e
}

/// Minimal KML document holding `ring` as a single closed polygon, as a
/// downstream map viewer expects it.
pub fn polygon_document(
    ring: &PolygonRing,
    name: &str,
    description: Option<&str>,
) -> Result<String, XmlError> {
    let coordinates = leaf(
        "coordinates",
        &format!("\n{}\n", ring.closed_coordinate_text()),
    );
    let polygon = wrap(
        "Polygon",
        wrap("outerBoundaryIs", wrap("LinearRing", coordinates)),
    );

    let mut placemark = Element::new("Placemark", Some(GEOMETRY_NAMESPACE));
    placemark.push(Node::Element(leaf("name", name)));
    placemark.push(Node::Element(polygon));

    let mut document = Element::new("Document", Some(GEOMETRY_NAMESPACE));
    document.push(Node::Element(leaf("name", name)));
    if let Some(description) = description {
        document.push(Node::Element(leaf("description", description)));
    }
    document.push(Node::Element(placemark));

    let mut kml = wrap("kml", document);
    kml.attributes_mut()
        .push(("xmlns".to_string(), GEOMETRY_NAMESPACE.to_string()));

    let bytes = Document::with_root(kml).to_pretty_bytes()?;
    String::from_utf8(bytes).map_err(|e| XmlError::Encoding(e.to_string()))
}
