use serde::{Deserialize, Serialize};

use crate::cluster::{Clustering, Dendrogram};
use crate::compose::ColorMap;
use crate::rank::GroupCurves;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Axis {
    pub label: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Style {
    pub width: f32,
    pub dash: Option<[f32; 2]>,
    pub color: Color,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Color(pub u32);

impl Color {
    pub fn rgb(&self) -> (u8, u8, u8) {
        (
            ((self.0 >> 16) & 0xFF) as u8,
            ((self.0 >> 8) & 0xFF) as u8,
            (self.0 & 0xFF) as u8,
        )
    }
}

/// Categorical palette cycled across group curves.
pub const PALETTE: [u32; 10] = [
    0x1F77B4, 0xFF7F0E, 0x2CA02C, 0xD62728, 0x9467BD, 0x8C564B, 0xE377C2, 0x7F7F7F, 0xBCBD22, 0x17BECF,
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineSeries {
    pub name: String,
    pub points: Vec<[f64; 2]>,
    pub style: Style,
}

/// Square matrix drawn cell by cell, rows top to bottom.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeatmapSeries {
    pub labels: Vec<String>,
    pub values: Vec<Vec<f64>>,
    pub colormap: ColorMap,
    /// Low values get the bright end of the map.
    pub reversed: bool,
    /// Tree drawn above the columns; rows and columns are already in its leaf order.
    pub dendrogram: Option<Dendrogram>,
}

impl HeatmapSeries {
    /// Finite value range, `(0, 1)` when there is none.
    pub fn range(&self) -> (f64, f64) {
        let finite = self.values.iter().flatten().copied().filter(|v| v.is_finite());
        let (lo, hi) = finite.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)));
        if lo.is_finite() && hi.is_finite() {
            (lo, hi)
        } else {
            (0.0, 1.0)
        }
    }

    pub fn cell_color(&self, value: f64) -> (u8, u8, u8) {
        let (lo, hi) = self.range();
        let t = if hi > lo && value.is_finite() { (value - lo) / (hi - lo) } else { 0.0 };
        let px = if self.reversed {
            self.colormap.sample_reversed(t)
        } else {
            self.colormap.sample(t)
        };
        (px[0], px[1], px[2])
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Series {
    Line(LineSeries),
    Heatmap(HeatmapSeries),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Figure {
    pub title: Option<String>,
    pub x: Axis,
    pub y: Axis,
    pub series: Vec<Series>,
}

impl Figure {
    pub fn new(title: impl Into<Option<String>>) -> Self {
        Self {
            title: title.into(),
            x: Axis { label: None },
            y: Axis { label: None },
            series: Vec::new(),
        }
    }

    pub fn add_series(&mut self, series: Series) {
        self.series.push(series);
    }

    /// Bounds over all line points as `(x_min, x_max, y_min, y_max)`.
    pub fn line_bounds(&self) -> Option<(f64, f64, f64, f64)> {
        let mut bounds: Option<(f64, f64, f64, f64)> = None;
        for series in &self.series {
            let Series::Line(line) = series else { continue };
            for p in line.points.iter().filter(|p| p[0].is_finite() && p[1].is_finite()) {
                bounds = Some(match bounds {
                    None => (p[0], p[0], p[1], p[1]),
                    Some((x0, x1, y0, y1)) => (x0.min(p[0]), x1.max(p[0]), y0.min(p[1]), y1.max(p[1])),
                });
            }
        }
        bounds
    }
}

pub trait PlotBackend {
    fn draw(&mut self, fig: &Figure) -> anyhow::Result<()>;
}

pub fn decimate_points(points: &[[f64; 2]], max_points: usize) -> Vec<[f64; 2]> {
    if points.len() <= max_points {
        return points.to_vec();
    }
    let bucket_size = points.len() as f64 / max_points as f64;
    let mut result = Vec::with_capacity(max_points);
    for i in 0..max_points {
        let start = (i as f64 * bucket_size).floor() as usize;
        if start >= points.len() {
            break;
        }
        result.push(points[start]);
    }
    result
}

/// One line per group, time on x.
pub fn figure_from_curves(feature: &str, curves: &GroupCurves, max_points: usize) -> Figure {
    let mut fig = Figure::new(Some(feature.to_string()));
    fig.x.label = Some("time".into());
    fig.y.label = Some(feature.to_string());
    for (k, (group, values)) in curves.curves.iter().enumerate() {
        let points: Vec<[f64; 2]> = curves
            .times
            .iter()
            .zip(values)
            .map(|(&t, &v)| [t, v])
            .collect();
        fig.add_series(Series::Line(LineSeries {
            name: group.clone(),
            points: decimate_points(&points, max_points),
            style: Style {
                width: 2.0,
                dash: None,
                color: Color(PALETTE[k % PALETTE.len()]),
            },
        }));
    }
    fig
}

/// Distance heatmap in dendrogram order.
pub fn figure_from_clustering(clustering: &Clustering) -> Figure {
    let ordered = clustering.ordered_matrix();
    let mut fig = Figure::new(Some(format!("{} distance", clustering.name)));
    fig.add_series(Series::Heatmap(HeatmapSeries {
        labels: ordered.labels,
        values: ordered.values,
        colormap: ColorMap::Magma,
        reversed: true,
        dendrogram: Some(clustering.dendrogram.clone()),
    }));
    fig
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{hierarchical, DistanceMatrix, Linkage};

    #[test]
    fn decimation_keeps_bucket_starts() {
        let points: Vec<[f64; 2]> = (0..10).map(|i| [i as f64, 0.0]).collect();
        let d = decimate_points(&points, 5);
        assert_eq!(d.len(), 5);
        assert_eq!(d[1], [2.0, 0.0]);
        assert_eq!(decimate_points(&points, 20).len(), 10);
    }

    #[test]
    fn curves_become_one_line_per_group() {
        let mut curves = GroupCurves::default();
        curves.times = vec![0.0, 30.0];
        curves.curves.insert("A".into(), vec![1.0, 2.0]);
        curves.curves.insert("B".into(), vec![3.0, 0.5]);
        let fig = figure_from_curves("f", &curves, 100);
        assert_eq!(fig.series.len(), 2);
        assert_eq!(fig.line_bounds(), Some((0.0, 30.0, 0.5, 3.0)));
    }

    #[test]
    fn heatmap_follows_dendrogram_order() {
        let points: [f64; 3] = [0.0, 10.0, 1.0];
        let matrix = DistanceMatrix::from_fn(vec!["a".into(), "b".into(), "c".into()], |i, j| {
            (points[i] - points[j]).abs()
        });
        let clustering = Clustering {
            name: "f".into(),
            dendrogram: hierarchical(&matrix, Linkage::Average),
            matrix,
        };
        let fig = figure_from_clustering(&clustering);
        let Series::Heatmap(h) = &fig.series[0] else { panic!("expected heatmap") };
        assert_eq!(h.labels, vec!["a", "c", "b"]);
        assert_eq!(h.range(), (0.0, 10.0));
        assert_eq!(h.cell_color(0.0), {
            let px = ColorMap::Magma.sample_reversed(0.0);
            (px[0], px[1], px[2])
        });
    }
}
