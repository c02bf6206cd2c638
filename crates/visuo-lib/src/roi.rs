//! Regions of interest in canonical acquisition coordinates.
//!
//! Pixel `(x, y)` covers `[x, x+1) x [y, y+1)`; a pixel belongs to a shape when
//! its center does.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::frame::{Mask, Rect};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BoolOp {
    Union,
    Intersect,
    Subtract,
    Xor,
}

impl BoolOp {
    fn apply(self, a: bool, b: bool) -> bool {
        match self {
            BoolOp::Union => a || b,
            BoolOp::Intersect => a && b,
            BoolOp::Subtract => a && !b,
            BoolOp::Xor => a ^ b,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "shape", rename_all = "lowercase")]
pub enum Shape {
    Rectangle {
        x: f64,
        y: f64,
        width: f64,
        height: f64,
    },
    Ellipse {
        cx: f64,
        cy: f64,
        rx: f64,
        ry: f64,
    },
    Contour {
        points: Vec<[f64; 2]>,
    },
    /// Children are combined left to right with `op`.
    Composite {
        op: BoolOp,
        children: Vec<u32>,
    },
}

impl Shape {
    fn contains(&self, px: f64, py: f64) -> bool {
        match self {
            Shape::Rectangle {
                x,
                y,
                width,
                height,
            } => px >= *x && py >= *y && px < x + width && py < y + height,
            Shape::Ellipse { cx, cy, rx, ry } => {
                if *rx <= 0.0 || *ry <= 0.0 {
                    return false;
                }
                let dx = (px - cx) / rx;
                let dy = (py - cy) / ry;
                dx * dx + dy * dy <= 1.0
            }
            Shape::Contour { points } => point_in_polygon(points, px, py),
            Shape::Composite { .. } => false,
        }
    }

    /// Same shape under `p' = (sx * x + tx, sy * y + ty)`.
    pub fn map_axis_aligned(&self, sx: f64, sy: f64, tx: f64, ty: f64) -> Shape {
        match self {
            Shape::Rectangle {
                x,
                y,
                width,
                height,
            } => Shape::Rectangle {
                x: sx * x + tx,
                y: sy * y + ty,
                width: sx * width,
                height: sy * height,
            },
            Shape::Ellipse { cx, cy, rx, ry } => Shape::Ellipse {
                cx: sx * cx + tx,
                cy: sy * cy + ty,
                rx: sx * rx,
                ry: sy * ry,
            },
            Shape::Contour { points } => Shape::Contour {
                points: points
                    .iter()
                    .map(|[x, y]| [sx * x + tx, sy * y + ty])
                    .collect(),
            },
            composite @ Shape::Composite { .. } => composite.clone(),
        }
    }
}

/// Even-odd rule.
fn point_in_polygon(points: &[[f64; 2]], px: f64, py: f64) -> bool {
    if points.len() < 3 {
        return false;
    }
    let mut inside = false;
    let mut j = points.len() - 1;
    for i in 0..points.len() {
        let [xi, yi] = points[i];
        let [xj, yj] = points[j];
        if (yi > py) != (yj > py) {
            let x_cross = xj + (py - yj) * (xi - xj) / (yi - yj);
            if px < x_cross {
                inside = !inside;
            }
        }
        j = i;
    }
    inside
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub id: u32,
    pub name: String,
    #[serde(flatten)]
    pub shape: Shape,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegionSet {
    pub regions: Vec<Region>,
}

impl RegionSet {
    pub fn get(&self, id: u32) -> Option<&Region> {
        self.regions.iter().find(|r| r.id == id)
    }

    pub fn by_name(&self, name: &str) -> Option<&Region> {
        self.regions.iter().find(|r| r.name == name)
    }

    /// Rasterize region `id` onto a `width` x `height` grid.
    pub fn rasterize(&self, id: u32, width: usize, height: usize) -> Result<Mask> {
        let mut visiting = Vec::new();
        self.rasterize_inner(id, width, height, &mut visiting)
    }

    fn rasterize_inner(
        &self,
        id: u32,
        width: usize,
        height: usize,
        visiting: &mut Vec<u32>,
    ) -> Result<Mask> {
        let region = self
            .get(id)
            .ok_or_else(|| Error::InputMalformed(format!("unknown region id {}", id)))?;
        if visiting.contains(&id) {
            return Err(Error::InputMalformed(format!(
                "region '{}' references itself",
                region.name
            )));
        }
        match &region.shape {
            Shape::Composite { op, children } => {
                visiting.push(id);
                let mut acc: Option<Mask> = None;
                for &child in children {
                    let mask = self.rasterize_inner(child, width, height, visiting)?;
                    acc = Some(match acc {
                        None => mask,
                        Some(prev) => prev.combine(&mask, |a, b| op.apply(a, b))?,
                    });
                }
                visiting.pop();
                Ok(acc.unwrap_or_else(|| Mask::new(width, height)))
            }
            shape => {
                let mut mask = Mask::new(width, height);
                for y in 0..height {
                    for x in 0..width {
                        if shape.contains(x as f64 + 0.5, y as f64 + 0.5) {
                            mask.set(x, y, true);
                        }
                    }
                }
                Ok(mask)
            }
        }
    }

    /// Tight pixel bounds of a rasterized region, `None` when it is empty.
    pub fn bounds(&self, id: u32, width: usize, height: usize) -> Result<Option<Rect>> {
        let mask = self.rasterize(id, width, height)?;
        Ok(mask_bounds(&mask))
    }
}

pub fn mask_bounds(mask: &Mask) -> Option<Rect> {
    let mut coords = mask.coords();
    let (x0, y0) = coords.next()?;
    let (mut min_x, mut min_y, mut max_x, mut max_y) = (x0, y0, x0, y0);
    for (x, y) in coords {
        min_x = min_x.min(x);
        min_y = min_y.min(y);
        max_x = max_x.max(x);
        max_y = max_y.max(y);
    }
    Some(Rect::new(min_x, min_y, max_x - min_x + 1, max_y - min_y + 1))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set() -> RegionSet {
        RegionSet {
            regions: vec![
                Region {
                    id: 1,
                    name: "box".into(),
                    shape: Shape::Rectangle {
                        x: 0.0,
                        y: 0.0,
                        width: 4.0,
                        height: 4.0,
                    },
                },
                Region {
                    id: 2,
                    name: "tri".into(),
                    shape: Shape::Contour {
                        points: vec![[2.0, 0.0], [8.0, 0.0], [8.0, 6.0]],
                    },
                },
                Region {
                    id: 3,
                    name: "box-minus-tri".into(),
                    shape: Shape::Composite {
                        op: BoolOp::Subtract,
                        children: vec![1, 2],
                    },
                },
                Region {
                    id: 4,
                    name: "loop".into(),
                    shape: Shape::Composite {
                        op: BoolOp::Union,
                        children: vec![1, 4],
                    },
                },
            ],
        }
    }

    #[test]
    fn rectangle_covers_pixel_centers() {
        let mask = set().rasterize(1, 8, 8).unwrap();
        assert_eq!(mask.count(), 16);
        assert_eq!(mask_bounds(&mask), Some(Rect::new(0, 0, 4, 4)));
    }

    #[test]
    fn composite_subtracts_children() {
        let regions = set();
        let boxed = regions.rasterize(1, 8, 8).unwrap();
        let tri = regions.rasterize(2, 8, 8).unwrap();
        let diff = regions.rasterize(3, 8, 8).unwrap();
        for y in 0..8 {
            for x in 0..8 {
                assert_eq!(diff.get(x, y), boxed.get(x, y) && !tri.get(x, y));
            }
        }
        assert!(diff.count() < boxed.count());
    }

    #[test]
    fn cycles_and_unknown_ids_are_malformed() {
        assert!(matches!(set().rasterize(4, 8, 8), Err(Error::InputMalformed(_))));
        assert!(matches!(set().rasterize(9, 8, 8), Err(Error::InputMalformed(_))));
    }

    #[test]
    fn region_json_is_tagged_by_shape() {
        let json = serde_json::to_string(&set().regions[0]).unwrap();
        assert!(json.contains("\"shape\":\"rectangle\""));
        let back: Region = serde_json::from_str(&json).unwrap();
        assert_eq!(back, set().regions[0]);
    }
}
