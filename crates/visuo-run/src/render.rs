//! PNG rendering of plot figures through plotters.

use anyhow::{anyhow, Result};
use plotters::coord::ranged1d::SegmentValue;
use plotters::coord::Shift;
use plotters::prelude::*;
use std::path::{Path, PathBuf};

use visuo_lib::cluster::Dendrogram;
use visuo_lib::plot::{Figure, HeatmapSeries, PlotBackend, Series};

pub struct PngBackend {
    pub path: PathBuf,
    pub size: (u32, u32),
}

impl PngBackend {
    pub fn new(path: &Path, size: (u32, u32)) -> Self {
        Self {
            path: path.to_path_buf(),
            size,
        }
    }
}

impl PlotBackend for PngBackend {
    fn draw(&mut self, fig: &Figure) -> Result<()> {
        let heatmap = fig.series.iter().find_map(|s| match s {
            Series::Heatmap(h) => Some(h),
            Series::Line(_) => None,
        });
        match heatmap {
            Some(h) => draw_heatmap(&self.path, self.size, fig, h),
            None => draw_lines(&self.path, self.size, fig),
        }
    }
}

fn rgb(c: (u8, u8, u8)) -> RGBColor {
    RGBColor(c.0, c.1, c.2)
}

fn draw_lines(path: &Path, size: (u32, u32), fig: &Figure) -> Result<()> {
    let (x_min, x_max, y_min, y_max) = fig
        .line_bounds()
        .ok_or_else(|| anyhow!("figure has no finite points"))?;
    let pad = ((y_max - y_min) * 0.05).max(1e-9);
    let x_max = if x_max > x_min { x_max } else { x_min + 1.0 };
    let backend = BitMapBackend::new(path, size);
    let root = backend.into_drawing_area();
    root.fill(&WHITE)?;
    let mut chart = ChartBuilder::on(&root)
        .margin(10)
        .caption(
            fig.title.clone().unwrap_or_else(|| "Plot".into()),
            ("sans-serif", 24),
        )
        .x_label_area_size(30)
        .y_label_area_size(50)
        .build_cartesian_2d(x_min..x_max, (y_min - pad)..(y_max + pad))?;
    chart
        .configure_mesh()
        .x_desc(fig.x.label.clone().unwrap_or_default())
        .y_desc(fig.y.label.clone().unwrap_or_default())
        .draw()?;
    for series in &fig.series {
        if let Series::Line(line) = series {
            let color = rgb(line.style.color.rgb());
            chart
                .draw_series(LineSeries::new(
                    line.points
                        .iter()
                        .filter(|p| p[1].is_finite())
                        .map(|p| (p[0], p[1])),
                    color.stroke_width(line.style.width.round().max(1.0) as u32),
                ))?
                .label(line.name.clone())
                .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 16, y)], color));
        }
    }
    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .draw()?;
    root.present()?;
    Ok(())
}

/// `(x, height)` of every dendrogram node, leaves first, then merges in order.
fn dendrogram_layout(tree: &Dendrogram) -> Vec<(f64, f64)> {
    let n = tree.order.len();
    let mut nodes = vec![(0.0, 0.0); n];
    for (pos, &leaf) in tree.order.iter().enumerate() {
        if leaf < n {
            nodes[leaf] = (pos as f64 + 0.5, 0.0);
        }
    }
    for merge in &tree.merges {
        let l = nodes.get(merge.left).copied().unwrap_or_default();
        let r = nodes.get(merge.right).copied().unwrap_or_default();
        let top = if merge.distance.is_finite() {
            merge.distance.max(l.1).max(r.1)
        } else {
            l.1.max(r.1)
        };
        nodes.push(((l.0 + r.0) / 2.0, top));
    }
    nodes
}

fn draw_dendrogram(area: &DrawingArea<BitMapBackend<'_>, Shift>, tree: &Dendrogram) -> Result<()> {
    let n = tree.order.len();
    let nodes = dendrogram_layout(tree);
    let top = nodes.iter().map(|p| p.1).fold(0.0, f64::max).max(1e-9);
    let mut chart = ChartBuilder::on(area)
        .margin_left(80)
        .margin_right(10)
        .build_cartesian_2d(0.0..n as f64, 0.0..top * 1.05)?;
    for (k, merge) in tree.merges.iter().enumerate() {
        let (Some(&l), Some(&r)) = (nodes.get(merge.left), nodes.get(merge.right)) else {
            continue;
        };
        let h = nodes[n + k].1;
        chart.draw_series(std::iter::once(PathElement::new(
            vec![(l.0, l.1), (l.0, h), (r.0, h), (r.0, r.1)],
            BLACK,
        )))?;
    }
    Ok(())
}

fn draw_heatmap(path: &Path, size: (u32, u32), fig: &Figure, h: &HeatmapSeries) -> Result<()> {
    let n = h.labels.len();
    if n == 0 {
        return Err(anyhow!("heatmap has no rows"));
    }
    let backend = BitMapBackend::new(path, size);
    let root = backend.into_drawing_area();
    root.fill(&WHITE)?;
    let root = root.titled(
        &fig.title.clone().unwrap_or_else(|| "Distance".into()),
        ("sans-serif", 22),
    )?;
    let (upper, lower) = root.split_vertically((size.1 as f64 * 0.22) as u32);
    if let Some(tree) = &h.dendrogram {
        draw_dendrogram(&upper, tree)?;
    }

    let labels = h.labels.clone();
    let row_labels = h.labels.clone();
    let mut chart = ChartBuilder::on(&lower)
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(70)
        .build_cartesian_2d((0..n as i32).into_segmented(), (0..n as i32).into_segmented())?;
    chart
        .configure_mesh()
        .disable_mesh()
        .x_labels(n)
        .y_labels(n)
        .x_label_formatter(&|v| match v {
            SegmentValue::CenterOf(i) => labels.get(*i as usize).cloned().unwrap_or_default(),
            _ => String::new(),
        })
        .y_label_formatter(&|v| match v {
            // Row 0 is drawn at the top.
            SegmentValue::CenterOf(i) => row_labels
                .get(n.saturating_sub(1 + *i as usize))
                .cloned()
                .unwrap_or_default(),
            _ => String::new(),
        })
        .draw()?;
    chart.draw_series(h.values.iter().enumerate().flat_map(|(i, row)| {
        let y = (n - 1 - i) as i32;
        row.iter().enumerate().map(move |(j, &v)| {
            let x = j as i32;
            Rectangle::new(
                [
                    (SegmentValue::Exact(x), SegmentValue::Exact(y)),
                    (SegmentValue::Exact(x + 1), SegmentValue::Exact(y + 1)),
                ],
                rgb(h.cell_color(v)).filled(),
            )
        })
    }))?;
    root.present()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use visuo_lib::cluster::{hierarchical, DistanceMatrix, Linkage};

    #[test]
    fn layout_places_merges_between_children() {
        let points: [f64; 3] = [0.0, 4.0, 1.0];
        let matrix = DistanceMatrix::from_fn(vec!["a".into(), "b".into(), "c".into()], |i, j| {
            (points[i] - points[j]).abs()
        });
        let tree = hierarchical(&matrix, Linkage::Single);
        let nodes = dendrogram_layout(&tree);
        assert_eq!(nodes.len(), 5);
        // a and c sit at positions 0 and 1 and merge at height 1.
        assert_eq!(nodes[3], (1.0, 1.0));
        assert_eq!(nodes[4].1, 3.0);
    }
}
