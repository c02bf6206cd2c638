//! Planar shape descriptors of a pixel mask.

use crate::frame::Mask;
use crate::segment;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ShapeStats {
    pub area: f64,
    pub perimeter: f64,
    pub centroid: (f64, f64),
    /// Eigenvalues of the pixel-coordinate covariance, largest first.
    pub eigenvalues: (f64, f64),
    pub max_diameter: f64,
}

impl ShapeStats {
    pub fn compute(mask: &Mask) -> Option<Self> {
        let n = mask.count();
        if n == 0 {
            return None;
        }
        let nf = n as f64;
        let (mut sx, mut sy) = (0.0, 0.0);
        for (x, y) in mask.coords() {
            sx += x as f64;
            sy += y as f64;
        }
        let (cx, cy) = (sx / nf, sy / nf);
        let (mut sxx, mut syy, mut sxy) = (0.0, 0.0, 0.0);
        for (x, y) in mask.coords() {
            let (dx, dy) = (x as f64 - cx, y as f64 - cy);
            sxx += dx * dx;
            syy += dy * dy;
            sxy += dx * dy;
        }
        let (sxx, syy, sxy) = (sxx / nf, syy / nf, sxy / nf);
        let half_trace = (sxx + syy) / 2.0;
        let disc = (((sxx - syy) / 2.0).powi(2) + sxy * sxy).sqrt();
        let l1 = half_trace + disc;
        let l2 = (half_trace - disc).max(0.0);

        let comps = segment::components(mask, 1);
        let perimeter = comps.iter().map(|c| c.perimeter).sum();
        let boundary: Vec<(usize, usize)> = comps.iter().flat_map(|c| c.contour.iter().copied()).collect();
        let mut max_d2 = 0.0f64;
        for (i, a) in boundary.iter().enumerate() {
            for b in &boundary[i + 1..] {
                let dx = a.0 as f64 - b.0 as f64;
                let dy = a.1 as f64 - b.1 as f64;
                max_d2 = max_d2.max(dx * dx + dy * dy);
            }
        }

        Some(Self {
            area: nf,
            perimeter,
            centroid: (cx, cy),
            eigenvalues: (l1, l2),
            max_diameter: max_d2.sqrt(),
        })
    }

    pub fn major_axis_length(&self) -> f64 {
        4.0 * self.eigenvalues.0.sqrt()
    }

    pub fn minor_axis_length(&self) -> f64 {
        4.0 * self.eigenvalues.1.sqrt()
    }

    pub fn eccentricity(&self) -> f64 {
        let (l1, l2) = self.eigenvalues;
        if l1 <= 0.0 {
            0.0
        } else {
            (1.0 - l2 / l1).max(0.0).sqrt()
        }
    }

    pub fn elongation(&self) -> f64 {
        let (l1, l2) = self.eigenvalues;
        if l1 <= 0.0 {
            0.0
        } else {
            (l2 / l1).sqrt()
        }
    }

    pub fn circularity(&self) -> f64 {
        segment::circularity(self.area, self.perimeter)
    }

    pub fn named(&self) -> Vec<(&'static str, f64)> {
        let sphericity = if self.perimeter > 0.0 {
            2.0 * (std::f64::consts::PI * self.area).sqrt() / self.perimeter
        } else {
            0.0
        };
        vec![
            ("Elongation", self.elongation()),
            ("MajorAxisLength", self.major_axis_length()),
            ("MaximumDiameter", self.max_diameter),
            ("MeshSurface", self.area),
            ("MinorAxisLength", self.minor_axis_length()),
            ("Perimeter", self.perimeter),
            (
                "PerimeterSurfaceRatio",
                if self.area > 0.0 { self.perimeter / self.area } else { 0.0 },
            ),
            ("PixelSurface", self.area),
            ("Sphericity", sphericity),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn horizontal_bar_is_elongated() {
        let mut mask = Mask::new(20, 5);
        for x in 2..18 {
            mask.set(x, 2, true);
        }
        let s = ShapeStats::compute(&mask).unwrap();
        assert_eq!(s.area, 16.0);
        assert_eq!(s.centroid, (9.5, 2.0));
        assert!(s.eccentricity() > 0.99);
        assert_eq!(s.max_diameter, 15.0);
        assert!(ShapeStats::compute(&Mask::new(3, 3)).is_none());
    }
}
