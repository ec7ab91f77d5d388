//! Polygon / cell overlap geometry.
//!
//! Area of a polygon inside an axis-aligned cell is the area of the boolean
//! intersection with the cell rectangle. Holes are handled by the overlay.

use geo::{Area, BooleanOps, BoundingRect, Coord, MultiPolygon, Polygon, Rect};

/// Axis-aligned clipping window
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CellRect {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl CellRect {
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    pub fn from_bounds(bounds: (f64, f64, f64, f64)) -> Self {
        Self::new(bounds.0, bounds.1, bounds.2, bounds.3)
    }

    pub fn area(&self) -> f64 {
        (self.max_x - self.min_x) * (self.max_y - self.min_y)
    }

    pub fn intersects(&self, other: &CellRect) -> bool {
        self.min_x < other.max_x
            && other.min_x < self.max_x
            && self.min_y < other.max_y
            && other.min_y < self.max_y
    }

    pub fn contains(&self, other: &CellRect) -> bool {
        self.min_x <= other.min_x
            && self.min_y <= other.min_y
            && other.max_x <= self.max_x
            && other.max_y <= self.max_y
    }

    pub fn to_polygon(&self) -> Polygon<f64> {
        Rect::new(
            Coord { x: self.min_x, y: self.min_y },
            Coord { x: self.max_x, y: self.max_y },
        )
        .to_polygon()
    }
}

/// Area of a polygon (exterior minus holes) that lies inside `rect`
pub fn polygon_area_in_rect(polygon: &Polygon<f64>, rect: &CellRect) -> f64 {
    let bounds = match polygon.bounding_rect() {
        Some(r) => CellRect::new(r.min().x, r.min().y, r.max().x, r.max().y),
        None => return 0.0,
    };
    if !bounds.intersects(rect) {
        return 0.0;
    }
    if rect.contains(&bounds) {
        return polygon.unsigned_area();
    }
    polygon.intersection(&rect.to_polygon()).unsigned_area()
}

/// Area of a multipolygon that lies inside `rect`
pub fn multipolygon_area_in_rect(geometry: &MultiPolygon<f64>, rect: &CellRect) -> f64 {
    geometry
        .0
        .iter()
        .map(|polygon| polygon_area_in_rect(polygon, rect))
        .sum()
}

/// Bounding rectangle, `None` for an empty geometry
pub fn bounds_of(geometry: &MultiPolygon<f64>) -> Option<CellRect> {
    geometry
        .bounding_rect()
        .map(|r| CellRect::new(r.min().x, r.min().y, r.max().x, r.max().y))
}
