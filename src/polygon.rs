use geo::BoundingRect;

use crate::error::{Error, Result};
use crate::point::GeoPoint;

/// Open ring of at least three vertices, in flight order.
#[derive(Clone, Debug, PartialEq)]
pub struct PolygonRing {
    points: Vec<GeoPoint>,
}

impl PolygonRing {
    /// Strips an explicit closing vertex and checks the vertex count.
    pub fn from_points(mut points: Vec<GeoPoint>) -> Result<Self> {
        if points.len() >= 2 && points[0].almost_same(&points[points.len() - 1]) {
            points.pop();
        }
        if points.len() < 3 {
            return Err(Error::InsufficientVertices {
                found: points.len(),
            });
        }
        Ok(PolygonRing { points })
    }

    pub fn points(&self) -> &[GeoPoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, GeoPoint> {
        self.points.iter()
    }

    /// KML `<coordinates>` body: one `lon,lat,0` tuple per line, not closed.
    pub fn coordinate_text(&self) -> String {
        Self::coordinate_lines(self.points.iter())
    }

    /// Same as [`coordinate_text`](Self::coordinate_text) with the first
    /// vertex repeated at the end.
    pub fn closed_coordinate_text(&self) -> String {
        Self::coordinate_lines(self.points.iter().chain(self.points.first()))
    }

    fn coordinate_lines<'a>(points: impl Iterator<Item = &'a GeoPoint>) -> String {
        points
            .map(|p| format!("  {},0", p.lon_lat()))
            .collect::<Vec<String>>()
            .join("\n")
    }

    pub fn to_geo(&self) -> geo::Polygon<f64> {
        let coords: Vec<geo::Coord<f64>> = self.points.iter().map(|p| (*p).into()).collect();
        geo::Polygon::new(coords.into(), vec![])
    }

    pub fn info(&self) {
        log::info!("polygon: len: {}", self.points.len());
        if let Some(bbox) = self.to_geo().bounding_rect() {
            log::info!(
                "polygon: bbox: lon {:.7}..{:.7}, lat {:.7}..{:.7}",
                bbox.min().x,
                bbox.max().x,
                bbox.min().y,
                bbox.max().y
            );
        }
        for (i, p) in self.points.iter().enumerate() {
            log::trace!("polygon: vertex {}: {}", i, p);
        }
    }
}

impl<'a> IntoIterator for &'a PolygonRing {
    type Item = &'a GeoPoint;
    type IntoIter = std::slice::Iter<'a, GeoPoint>;

    fn into_iter(self) -> Self::IntoIter {
        self.points.iter()
    }
}
