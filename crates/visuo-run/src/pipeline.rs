//! The batch task: grouping, registration, compositing, signal path and
//! feature extraction per subject, then the tables and the run log.

use anyhow::{bail, Context, Result};
use crossbeam_channel::Sender;
use csv::WriterBuilder;
use image::RgbImage;
use log::{debug, info};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use visuo_lib::aggregate::GroupSummaryTable;
use visuo_lib::compose::{self, ColorMap, Compositor, TimeStamp};
use visuo_lib::features::{build_extractor, extract_unit, FeatureExtractor};
use visuo_lib::grouping::{scan_directory, SubjectSeries};
use visuo_lib::io::image::{load_frame, save_gif, save_rgb};
use visuo_lib::io::tables::{write_group_summary, write_raw_results};
use visuo_lib::registration::{register_series, warp, RegistrationMode};
use visuo_lib::roi::RegionSet;
use visuo_lib::signal_path::{self, FootprintMetrics, SignalPath};
use visuo_lib::{Degradation, Frame, Mask, RawResultsTable, ResultRow};

use crate::config::RunConfig;
use crate::progress::{emit, ProgressEvent};
use crate::run_log::{unix_now, write_run_log, RunLog};
use crate::session::{write_session, Session};

const GIF_DELAY_MS: u32 = 500;
const COLORBAR_WIDTH: u32 = 24;
const MAP_COLORMAP: ColorMap = ColorMap::Jet;

#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub cancelled: bool,
    pub subjects_completed: usize,
    pub artifacts: Vec<PathBuf>,
    pub log: RunLog,
}

/// Settings resolved once per run.
struct RunContext<'a> {
    config: &'a RunConfig,
    compositor: Compositor,
    extractor: Box<dyn FeatureExtractor>,
    regions: Vec<(String, u32)>,
    rois: &'a RegionSet,
    template: Option<Frame>,
    canonical_times: Vec<u32>,
    collage_dir: PathBuf,
    animation_dir: PathBuf,
    signal_path_dir: PathBuf,
}

#[derive(Default)]
struct SubjectProducts {
    rows: Vec<ResultRow>,
    metrics: Option<FootprintMetrics>,
    collage: Option<RgbImage>,
    artifacts: Vec<PathBuf>,
    degradations: Vec<Degradation>,
    cancelled: bool,
}

fn record(products: &mut SubjectProducts, event: Degradation) {
    event.log();
    products.degradations.push(event);
}

fn resolve_regions(config: &RunConfig, rois: &RegionSet) -> Result<Vec<(String, u32)>> {
    config
        .features
        .regions
        .iter()
        .map(|name| {
            rois.by_name(name)
                .map(|r| (r.name.clone(), r.id))
                .with_context(|| format!("region `{}` is not defined in the session", name))
        })
        .collect()
}

/// Run the whole batch.
///
/// `cancel` is polled between subjects and between time points. A cancelled
/// run keeps what it already wrote and still writes the tables for the
/// subjects that completed.
pub fn run(
    config: &RunConfig,
    rois: &RegionSet,
    progress: &Sender<ProgressEvent>,
    cancel: &AtomicBool,
) -> Result<RunOutcome> {
    let started = unix_now();
    fs::create_dir_all(&config.output_dir)
        .with_context(|| format!("creating output dir {}", config.output_dir.display()))?;
    let grouping = scan_directory(&config.input_dir)
        .with_context(|| format!("scanning {}", config.input_dir.display()))?;
    for event in &grouping.skipped {
        event.log();
    }

    let template = match (config.registration.mode, &config.registration.template) {
        (RegistrationMode::Template, Some(path)) => {
            Some(load_frame(path).with_context(|| format!("loading template {}", path.display()))?)
        }
        (RegistrationMode::Template, None) => bail!("template registration needs `registration.template`"),
        _ => None,
    };
    let images = !config.outputs.features_only;
    let ctx = RunContext {
        config,
        compositor: config.compositor(),
        extractor: build_extractor(config.features.mode, &config.features.classes),
        regions: resolve_regions(config, rois)?,
        rois,
        template,
        canonical_times: grouping.canonical_times(),
        collage_dir: config.output_dir.join("collages"),
        animation_dir: config.output_dir.join("animations"),
        signal_path_dir: config.output_dir.join("signal_path"),
    };
    for (enabled, dir) in [
        (images && config.outputs.collages, &ctx.collage_dir),
        (images && config.outputs.animations, &ctx.animation_dir),
        (images && config.outputs.signal_path, &ctx.signal_path_dir),
    ] {
        if enabled {
            fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
        }
    }
    info!(
        "run: {} subject(s), extractor {}, registration {:?}",
        grouping.subjects.len(),
        ctx.extractor.name(),
        config.registration.mode
    );

    let total = grouping.subjects.len();
    emit(progress, ProgressEvent::Started { subjects: total });
    let mut degradations = grouping.skipped.clone();
    let mut artifacts = Vec::new();
    let mut raw = RawResultsTable::new();
    let mut footprints: Vec<(&SubjectSeries, FootprintMetrics)> = Vec::new();
    let mut collages: BTreeMap<String, Vec<RgbImage>> = BTreeMap::new();
    let mut completed = 0;
    let mut cancelled = false;

    for (index, series) in grouping.subjects.iter().enumerate() {
        if cancel.load(Ordering::Relaxed) {
            cancelled = true;
            break;
        }
        emit(
            progress,
            ProgressEvent::SubjectStarted {
                index,
                total,
                subject: series.subject.clone(),
            },
        );
        info!("[{}/{}] {}", index + 1, total, series.subject);
        let products = process_subject(&ctx, series, cancel)?;
        degradations.extend(products.degradations);
        artifacts.extend(products.artifacts);
        if products.cancelled {
            cancelled = true;
            break;
        }
        for row in products.rows {
            raw.push(row);
        }
        if let Some(metrics) = products.metrics {
            footprints.push((series, metrics));
        }
        if let Some(collage) = products.collage {
            collages.entry(series.group.label.clone()).or_default().push(collage);
        }
        completed += 1;
        emit(
            progress,
            ProgressEvent::SubjectFinished {
                index,
                total,
                subject: series.subject.clone(),
            },
        );
    }

    if images && config.outputs.collages && !collages.is_empty() {
        for (group, rows) in &collages {
            let path = ctx.collage_dir.join(format!("{}_master_collage.png", group));
            save_rgb(&compose::vstack(rows), &path)
                .with_context(|| format!("writing {}", path.display()))?;
            artifacts.push(path);
        }
        let path = ctx.collage_dir.join("colorbar.png");
        save_rgb(&compose::colorbar(config.colormap, COLORBAR_WIDTH, 256), &path)
            .with_context(|| format!("writing {}", path.display()))?;
        artifacts.push(path);
    }

    raw.sort();
    let raw_path = config.raw_results_path();
    write_raw_results(&raw, &raw_path).with_context(|| format!("writing {}", raw_path.display()))?;
    artifacts.push(raw_path);
    let summary_path = config.group_summary_path();
    write_group_summary(&GroupSummaryTable::from_raw(&raw), &summary_path)
        .with_context(|| format!("writing {}", summary_path.display()))?;
    artifacts.push(summary_path);
    if images && config.outputs.signal_path {
        let path = config.signal_path_table();
        write_footprints(&path, &footprints)?;
        artifacts.push(path);
    }

    let session_path = config.output_dir.join("session.json");
    write_session(
        &session_path,
        &Session {
            config: config.clone(),
            rois: rois.clone(),
        },
    )?;
    artifacts.push(session_path);

    let log = RunLog {
        started_unix: started,
        finished_unix: unix_now(),
        subjects_total: total,
        subjects_completed: completed,
        cancelled,
        degradations,
        artifacts: artifacts.iter().map(|p| p.display().to_string()).collect(),
    };
    let log_path = config.output_dir.join("run_log.json");
    write_run_log(&log_path, &log)?;
    artifacts.push(log_path);

    if cancelled {
        info!("run cancelled after {} subject(s)", completed);
        emit(progress, ProgressEvent::Cancelled { completed });
    } else {
        info!("run finished: {} artifact(s)", artifacts.len());
        emit(
            progress,
            ProgressEvent::Finished {
                artifacts: artifacts.clone(),
            },
        );
    }
    Ok(RunOutcome {
        cancelled,
        subjects_completed: completed,
        artifacts,
        log,
    })
}

struct LoadedPoint {
    time: u32,
    structural: Frame,
    signal: Frame,
}

fn load_points(series: &SubjectSeries, cancel: &AtomicBool, products: &mut SubjectProducts) -> Vec<LoadedPoint> {
    let mut points: Vec<LoadedPoint> = Vec::new();
    for tp in &series.time_points {
        if cancel.load(Ordering::Relaxed) {
            products.cancelled = true;
            break;
        }
        let loaded = tp.structural.load().and_then(|s| tp.signal.load().map(|f| (s, f)));
        let (structural, signal) = match loaded {
            Ok(pair) => pair,
            Err(err) => {
                record(
                    products,
                    Degradation::ParseSkip {
                        path: tp.structural.path.display().to_string(),
                        reason: format!("unreadable time point: {}", err),
                    },
                );
                continue;
            }
        };
        let expected = points.first().map(|p| p.structural.dims()).unwrap_or(structural.dims());
        if structural.dims() != expected || signal.dims() != expected {
            record(
                products,
                Degradation::ParseSkip {
                    path: tp.signal.path.display().to_string(),
                    reason: format!("frame size differs from the series ({}x{})", expected.0, expected.1),
                },
            );
            continue;
        }
        points.push(LoadedPoint {
            time: tp.time,
            structural,
            signal,
        });
    }
    points
}

fn process_subject(ctx: &RunContext<'_>, series: &SubjectSeries, cancel: &AtomicBool) -> Result<SubjectProducts> {
    let mut products = SubjectProducts::default();
    let mut points = load_points(series, cancel, &mut products);
    if products.cancelled || points.is_empty() {
        return Ok(products);
    }

    let structural: Vec<(u32, &Frame)> = points.iter().map(|p| (p.time, &p.structural)).collect();
    let registration = register_series(
        &series.subject,
        &structural,
        ctx.config.registration.mode,
        ctx.template.as_ref(),
        &ctx.config.registration.params(),
    )?;
    products.degradations.extend(registration.fallbacks);
    for (point, transform) in points.iter_mut().zip(&registration.transforms) {
        if transform.is_identity(1e-12) {
            continue;
        }
        match (warp(&point.structural, transform), warp(&point.signal, transform)) {
            (Ok(s), Ok(f)) => {
                point.structural = s;
                point.signal = f;
            }
            (Err(err), _) | (_, Err(err)) => record(
                &mut products,
                Degradation::RegistrationFallback {
                    subject: series.subject.clone(),
                    time: point.time,
                    reason: err.to_string(),
                },
            ),
        }
    }
    debug!("{}: {} time point(s) registered", series.subject, points.len());

    extract_features(ctx, series, &points, &mut products)?;
    if ctx.config.outputs.features_only {
        return Ok(products);
    }
    if cancel.load(Ordering::Relaxed) {
        products.cancelled = true;
        return Ok(products);
    }

    let (w, h) = points[0].signal.dims();
    let rect = ctx.compositor.crop_rect(w, h);
    if ctx.config.outputs.collages || ctx.config.outputs.animations {
        let composed = compose_points(ctx, &points)?;
        if ctx.config.outputs.collages {
            let collage = build_collage(ctx, &composed);
            let path = ctx.collage_dir.join(format!("{}_collage.png", series.subject));
            save_rgb(&collage, &path).with_context(|| format!("writing {}", path.display()))?;
            products.artifacts.push(path);
            products.collage = Some(collage);
        }
        if ctx.config.outputs.animations {
            let frames: Vec<RgbImage> = composed.into_iter().map(|(_, img)| img).collect();
            let path = ctx.animation_dir.join(format!("{}.gif", series.subject));
            save_gif(&frames, GIF_DELAY_MS, &path).with_context(|| format!("writing {}", path.display()))?;
            products.artifacts.push(path);
        }
    }

    if ctx.config.outputs.signal_path {
        let structural: Vec<Frame> = points.iter().map(|p| p.structural.crop(&rect)).collect();
        let signal: Vec<Frame> = points.iter().map(|p| p.signal.crop(&rect)).collect();
        let times: Vec<u32> = points.iter().map(|p| p.time).collect();
        let s_refs: Vec<&Frame> = structural.iter().collect();
        let f_refs: Vec<&Frame> = signal.iter().collect();
        let path = signal_path::analyze(&times, &s_refs, &f_refs, &ctx.config.segmentation)?;
        let base = Frame::average(&s_refs).unwrap_or_else(|| structural[0].clone());
        products
            .artifacts
            .extend(write_signal_path_maps(ctx, &series.subject, &path, &base)?);
        products.metrics = Some(path.metrics);
    }
    Ok(products)
}

fn region_masks(ctx: &RunContext<'_>, width: usize, height: usize) -> Result<Vec<(String, Mask)>> {
    if ctx.regions.is_empty() {
        let rect = ctx.compositor.crop_rect(width, height);
        let mut mask = Mask::new(width, height);
        for y in rect.y..rect.y + rect.height {
            for x in rect.x..rect.x + rect.width {
                mask.set(x, y, true);
            }
        }
        return Ok(vec![("frame".to_string(), mask)]);
    }
    ctx.regions
        .iter()
        .map(|(name, id)| -> Result<(String, Mask)> {
            let mask = ctx
                .rois
                .rasterize(*id, width, height)
                .with_context(|| format!("rasterizing region `{}`", name))?;
            Ok((name.clone(), mask))
        })
        .collect()
}

fn extract_features(
    ctx: &RunContext<'_>,
    series: &SubjectSeries,
    points: &[LoadedPoint],
    products: &mut SubjectProducts,
) -> Result<()> {
    let (w, h) = points[0].signal.dims();
    let masks = region_masks(ctx, w, h)?;
    let prefixed = masks.len() > 1;
    for point in points {
        let mut row = ResultRow::new(series.subject.clone(), &series.group, point.time as f64);
        for (name, mask) in &masks {
            let (values, gap) = extract_unit(
                ctx.extractor.as_ref(),
                &point.signal,
                mask,
                &series.subject,
                point.time,
                name,
            );
            products.degradations.extend(gap);
            for (feature, value) in values {
                let column = if prefixed { format!("{}.{}", name, feature) } else { feature };
                row.values.insert(column, value);
            }
        }
        products.rows.push(row);
    }
    Ok(())
}

/// Composited view per loaded time point.
fn compose_points(ctx: &RunContext<'_>, points: &[LoadedPoint]) -> Result<Vec<(u32, RgbImage)>> {
    let span = ctx.canonical_times.len().saturating_sub(1).max(1) as f64;
    points
        .iter()
        .map(|p| -> Result<(u32, RgbImage)> {
            let position = ctx
                .canonical_times
                .iter()
                .position(|&t| t == p.time)
                .unwrap_or(0);
            let stamp = TimeStamp {
                minutes: p.time,
                fraction: position as f64 / span,
            };
            let img = ctx.compositor.compose(&p.structural, &p.signal, Some(stamp))?;
            Ok((p.time, img))
        })
        .collect()
}

/// One tile per canonical time, a placeholder where the subject has none.
fn build_collage(ctx: &RunContext<'_>, composed: &[(u32, RgbImage)]) -> RgbImage {
    let (tw, th) = composed
        .first()
        .map(|(_, img)| img.dimensions())
        .unwrap_or((64, 64));
    let mut tiles: Vec<RgbImage> = ctx
        .canonical_times
        .iter()
        .map(|t| match composed.iter().find(|(time, _)| time == t) {
            Some((_, img)) => img.clone(),
            None => compose::placeholder(tw, th),
        })
        .collect();
    tiles.push(compose::colorbar(ctx.config.colormap, COLORBAR_WIDTH, th));
    compose::hstack(&tiles)
}

fn write_signal_path_maps(
    ctx: &RunContext<'_>,
    subject: &str,
    path: &SignalPath,
    base: &Frame,
) -> Result<Vec<PathBuf>> {
    let outline = path.outline.as_deref();
    let with_outline = |mut img: RgbImage| {
        if let Some(o) = outline {
            signal_path::overlay_outline(&mut img, o);
        }
        img
    };
    let (w, h) = (path.persistence.width, path.persistence.height);
    let maps = [
        ("persistence", with_outline(path.persistence.render_persistence(MAP_COLORMAP))),
        ("temporal", with_outline(path.persistence.render_temporal(MAP_COLORMAP))),
        (
            "phase",
            with_outline(signal_path::render_phase_map(
                &path.segmentations,
                w,
                h,
                ctx.config.segmentation.phase_boundaries,
            )),
        ),
        (
            "contours",
            signal_path::render_contour_evolution(base, &path.segmentations, outline, MAP_COLORMAP),
        ),
    ];
    let mut written = Vec::with_capacity(maps.len());
    for (kind, img) in &maps {
        let file = ctx.signal_path_dir.join(format!("{}_{}.png", subject, kind));
        save_rgb(img, &file).with_context(|| format!("writing {}", file.display()))?;
        written.push(file);
    }
    Ok(written)
}

fn write_footprints(path: &Path, rows: &[(&SubjectSeries, FootprintMetrics)]) -> Result<()> {
    let file = fs::File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut writer = WriterBuilder::new().from_writer(file);
    let mut header = vec!["subject", "group"];
    header.extend(FootprintMetrics::COLUMNS);
    writer.write_record(&header)?;
    for (series, metrics) in rows {
        let mut record = vec![series.subject.clone(), series.group.label.clone()];
        record.extend(metrics.values().iter().map(|v| v.to_string()));
        writer.write_record(&record)?;
    }
    writer.flush()?;
    Ok(())
}
