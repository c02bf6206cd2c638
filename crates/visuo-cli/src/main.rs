use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use crossbeam_channel::unbounded;
use log::info;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::thread;

use visuo_lib::aggregate::GroupSummaryTable;
use visuo_lib::cluster::{ClusterMode, ClusterParams, Linkage};
use visuo_lib::grouping::scan_directory;
use visuo_lib::io::tables::{read_raw_results, write_group_summary};
use visuo_lib::rank::{CurveStatistic, InteractionParams, NormalizationParams, RankingMethod, SeparationParams};
use visuo_lib::roi::RegionSet;
use visuo_run::analysis::{cluster_file, plot_curves, rank_file};
use visuo_run::{read_config, read_session, run, write_config, ProgressEvent, RunConfig};

#[derive(Parser)]
#[command(
    name = "visuo",
    version,
    about = "VISUO: longitudinal paired-channel imaging pipeline"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum MethodArg {
    Separation,
    Interaction,
    Normalization,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum StatisticArg {
    Mean,
    Median,
}

impl From<StatisticArg> for CurveStatistic {
    fn from(value: StatisticArg) -> Self {
        match value {
            StatisticArg::Mean => CurveStatistic::Mean,
            StatisticArg::Median => CurveStatistic::Median,
        }
    }
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum ModeArg {
    Univariate,
    Multivariate,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum LinkageArg {
    Average,
    Complete,
    Single,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the batch over a directory of paired acquisitions
    Run {
        /// TOML run configuration
        #[arg(long, required_unless_present = "session")]
        config: Option<PathBuf>,
        /// Saved session (configuration and regions); --config overrides its configuration
        #[arg(long)]
        session: Option<PathBuf>,
        #[arg(long)]
        input: Option<PathBuf>,
        #[arg(long)]
        output: Option<PathBuf>,
        /// Write only the feature tables
        #[arg(long)]
        features_only: bool,
        /// Print progress events as JSON lines
        #[arg(long)]
        json_progress: bool,
    },
    /// List the subjects and time points found in a directory without processing them
    Inspect {
        #[arg(long)]
        input: PathBuf,
    },
    /// Rank features of a raw results table
    Rank {
        #[arg(long)]
        input: PathBuf,
        #[arg(long, default_value = "separation")]
        method: MethodArg,
        #[arg(long, default_value = "mean")]
        statistic: StatisticArg,
        #[arg(long)]
        z_normalize: bool,
        #[arg(long, default_value_t = 0)]
        permutations: usize,
        #[arg(long, default_value_t = 42)]
        seed: u64,
        #[arg(long, default_value = "time")]
        factor_a: String,
        #[arg(long, default_value = "treatment")]
        factor_b: String,
        #[arg(long)]
        control: Option<String>,
        #[arg(long)]
        treated: Option<String>,
        #[arg(long)]
        out: PathBuf,
    },
    /// Aggregate a raw results table into per-group, per-time statistics
    Summarize {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        out: PathBuf,
    },
    /// Cluster groups by DTW distance between their feature curves
    Cluster {
        /// Group summary table
        #[arg(long)]
        input: PathBuf,
        #[arg(long, default_value = "univariate")]
        mode: ModeArg,
        #[arg(long, default_value = "average")]
        linkage: LinkageArg,
        #[arg(long, default_value = "mean")]
        statistic: StatisticArg,
        /// Restrict to these features; repeatable
        #[arg(long)]
        feature: Vec<String>,
        #[arg(long)]
        out: PathBuf,
    },
    /// Plot one feature's group curves from a summary table
    Curves {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        feature: String,
        #[arg(long, default_value = "mean")]
        statistic: StatisticArg,
        #[arg(long)]
        out: PathBuf,
    },
    /// Write a configuration file with every default filled in
    InitConfig {
        #[arg(long)]
        out: PathBuf,
    },
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    match cli.command {
        Commands::Run {
            config,
            session,
            input,
            output,
            features_only,
            json_progress,
        } => cmd_run(
            config.as_deref(),
            session.as_deref(),
            input,
            output,
            features_only,
            json_progress,
        )?,
        Commands::Inspect { input } => cmd_inspect(&input)?,
        Commands::Rank {
            input,
            method,
            statistic,
            z_normalize,
            permutations,
            seed,
            factor_a,
            factor_b,
            control,
            treated,
            out,
        } => {
            let method = match method {
                MethodArg::Separation => RankingMethod::Separation(SeparationParams {
                    statistic: statistic.into(),
                    z_normalize,
                    permutations,
                    seed,
                }),
                MethodArg::Interaction => RankingMethod::Interaction(InteractionParams { factor_a, factor_b }),
                MethodArg::Normalization => RankingMethod::Normalization(NormalizationParams {
                    control_group: control.ok_or_else(|| anyhow!("--control is required for normalization"))?,
                    treated_group: treated.ok_or_else(|| anyhow!("--treated is required for normalization"))?,
                }),
            };
            cmd_rank(&input, &method, &out)?
        }
        Commands::Summarize { input, out } => cmd_summarize(&input, &out)?,
        Commands::Cluster {
            input,
            mode,
            linkage,
            statistic,
            feature,
            out,
        } => {
            let params = ClusterParams {
                mode: match mode {
                    ModeArg::Univariate => ClusterMode::Univariate,
                    ModeArg::Multivariate => ClusterMode::Multivariate,
                },
                linkage: match linkage {
                    LinkageArg::Average => Linkage::Average,
                    LinkageArg::Complete => Linkage::Complete,
                    LinkageArg::Single => Linkage::Single,
                },
                statistic: statistic.into(),
                features: feature,
            };
            let written = cluster_file(&input, &params, &out)?;
            println!("{}", json!({ "written": written }));
        }
        Commands::Curves {
            input,
            feature,
            statistic,
            out,
        } => {
            plot_curves(&input, &feature, statistic.into(), &out)?;
            println!("{}", json!({ "written": [out] }));
        }
        Commands::InitConfig { out } => {
            write_config(&out, &RunConfig::default())?;
            println!("{}", json!({ "written": [out] }));
        }
    }
    Ok(())
}

/// Relative paths in a config file resolve against the file's directory.
fn anchor(base: Option<&Path>, path: &Path) -> PathBuf {
    match base {
        Some(base) if path.is_relative() => base.join(path),
        _ => path.to_path_buf(),
    }
}

fn cmd_run(
    config_path: Option<&Path>,
    session_path: Option<&Path>,
    input: Option<PathBuf>,
    output: Option<PathBuf>,
    features_only: bool,
    json_progress: bool,
) -> Result<()> {
    let session = session_path.map(read_session).transpose()?;
    let (mut config, rois) = match (config_path, session) {
        (Some(path), session) => {
            let mut config = read_config(path)?;
            let base = path.parent();
            config.input_dir = anchor(base, &config.input_dir);
            config.output_dir = anchor(base, &config.output_dir);
            if let Some(template) = config.registration.template.take() {
                config.registration.template = Some(anchor(base, &template));
            }
            (config, session.map(|s| s.rois).unwrap_or_default())
        }
        (None, Some(session)) => (session.config, session.rois),
        (None, None) => bail!("either --config or --session is required"),
    };
    if let Some(input) = input {
        config.input_dir = input;
    }
    if let Some(output) = output {
        config.output_dir = output;
    }
    config.outputs.features_only |= features_only;

    let outcome = run_with_progress(&config, &rois, json_progress)?;
    let log = &outcome.log;
    let counts: serde_json::Map<String, serde_json::Value> =
        log.counts().into_iter().map(|(k, n)| (k.to_string(), json!(n))).collect();
    println!(
        "{}",
        json!({
            "cancelled": outcome.cancelled,
            "subjects_total": log.subjects_total,
            "subjects_completed": outcome.subjects_completed,
            "degradations": counts,
            "artifacts": outcome.artifacts.len(),
            "output_dir": config.output_dir,
        })
    );
    Ok(())
}

/// Run the batch on a worker thread and relay its progress events.
fn run_with_progress(config: &RunConfig, rois: &RegionSet, json_progress: bool) -> Result<visuo_run::RunOutcome> {
    let (tx, rx) = unbounded::<ProgressEvent>();
    let cancel = AtomicBool::new(false);
    thread::scope(|scope| {
        let worker = scope.spawn(move || run(config, rois, &tx, &cancel));
        for event in rx.iter() {
            if json_progress {
                if let Ok(line) = serde_json::to_string(&event) {
                    println!("{}", line);
                }
            } else if let ProgressEvent::SubjectFinished { index, total, subject } = &event {
                info!("finished {}/{}: {}", index + 1, total, subject);
            }
        }
        worker
            .join()
            .map_err(|_| anyhow!("run thread panicked"))?
    })
}

fn cmd_inspect(input: &Path) -> Result<()> {
    let grouping = scan_directory(input).with_context(|| format!("scanning {}", input.display()))?;
    let subjects: Vec<_> = grouping
        .subjects
        .iter()
        .map(|s| {
            json!({
                "subject": s.subject,
                "group": s.group.label,
                "animal": s.animal,
                "times": s.times(),
            })
        })
        .collect();
    let skipped: Vec<String> = grouping.skipped.iter().map(|d| d.to_string()).collect();
    let doc = json!({
        "subjects": subjects,
        "canonical_times": grouping.canonical_times(),
        "skipped": skipped,
    });
    println!("{}", serde_json::to_string_pretty(&doc)?);
    Ok(())
}

fn cmd_rank(input: &Path, method: &RankingMethod, out: &Path) -> Result<()> {
    let (result, written) = rank_file(input, method, out)?;
    let top: Vec<&str> = result.entries.iter().take(10).map(|e| e.feature.as_str()).collect();
    println!(
        "{}",
        json!({
            "method": result.method,
            "ranked": result.entries.len(),
            "failures": result.failures.len(),
            "top": top,
            "written": written,
        })
    );
    Ok(())
}

fn cmd_summarize(input: &Path, out: &Path) -> Result<()> {
    let raw = read_raw_results(input).with_context(|| format!("reading raw results {}", input.display()))?;
    let summary = GroupSummaryTable::from_raw(&raw);
    write_group_summary(&summary, out).with_context(|| format!("writing {}", out.display()))?;
    println!("{}", json!({ "rows": summary.rows.len(), "written": [out] }));
    Ok(())
}
