//! zdist - drone Z-distance estimation from monocular frames
//!
//! `zdist run` processes frames and prints one report per frame.
//! `zdist calibrate` fits the relative-to-metric scale against known distances.

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use drone_zdistance::{
    write_report, AffineCalibration, Frame, FrameSource, OutputFormat, ScaleFit, Session,
    ZdistConfig,
};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Input: `stub://...` or a local image / directory of images.
    #[arg(long, global = true, env = "ZDIST_INPUT")]
    input: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Estimate distances frame by frame.
    Run {
        /// Stop after this many frames (synthetic sources default to 1).
        #[arg(long)]
        frames: Option<u64>,
        /// Output format: json or text.
        #[arg(long, default_value = "text")]
        format: String,
        /// Keep pulling synthetic frames until Ctrl-C.
        #[arg(long)]
        follow: bool,
    },
    /// Fit the depth scale against ground-truth distances.
    Calibrate {
        /// Comma-separated distances in meters, one per frame.
        #[arg(long, value_delimiter = ',', required = true)]
        distances: Vec<f64>,
        /// Fit scale and offset instead of scale only.
        #[arg(long)]
        affine: bool,
        /// Write the fitted parameters as TOML.
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut cfg = ZdistConfig::load()?;
    if let Some(input) = args.input {
        cfg.input = input;
    }

    match args.command {
        Command::Run {
            frames,
            format,
            follow,
        } => run(&cfg, frames, format.parse()?, follow),
        Command::Calibrate {
            distances,
            affine,
            out,
        } => calibrate(&cfg, &distances, affine, out),
    }
}

fn open_session(cfg: &ZdistConfig, first: &Frame) -> Result<Session> {
    Session::open(
        cfg.backends.build_detector()?,
        cfg.backends.build_depth_estimator()?,
        cfg.session_options(first.width(), first.height()),
    )
}

fn run(cfg: &ZdistConfig, frames: Option<u64>, format: OutputFormat, follow: bool) -> Result<()> {
    let mut source = FrameSource::open(cfg.source_config())?;
    if follow && !source.is_unbounded() {
        return Err(anyhow!("--follow only applies to stub:// sources"));
    }
    let limit = match (frames, follow, source.is_unbounded()) {
        (Some(n), _, _) => Some(n),
        (None, true, _) => None,
        (None, false, true) => Some(1),
        (None, false, false) => None,
    };

    let stop = Arc::new(AtomicBool::new(false));
    if follow {
        let flag = Arc::clone(&stop);
        ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst))
            .context("error setting Ctrl-C handler")?;
        log::info!("zdist running until Ctrl-C...");
    }

    if limit == Some(0) {
        return Ok(());
    }
    let mut failed_frames = 0u64;
    let Some(first) = source.next_readable_frame() else {
        log::warn!("input {} produced no frames", cfg.input);
        return Ok(());
    };
    let first = cfg.attach_intrinsics(first);
    let mut session = open_session(cfg, &first)?;
    log::info!("calibration in force: {:?}", session.calibrator().params());

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let mut pending = Some(first);

    while !stop.load(Ordering::SeqCst) {
        let frame = match pending.take() {
            Some(frame) => frame,
            None => {
                if limit.is_some_and(|n| source.frames_read() >= n) {
                    break;
                }
                match source.next_readable_frame() {
                    Some(frame) => cfg.attach_intrinsics(frame),
                    None => break,
                }
            }
        };
        match session.process_frame(&frame) {
            Ok(report) => {
                write_report(&mut out, &report, format)?;
                out.flush()?;
            }
            Err(err) if err.is_frame_fatal() => {
                failed_frames += 1;
                log::error!("frame {} dropped: {}", source.frames_read() - 1, err);
            }
            Err(err) => {
                log::warn!("frame {}: {}", source.frames_read() - 1, err);
            }
        }
    }

    session.close();
    let unprocessed = failed_frames + source.frames_skipped();
    if unprocessed > 0 {
        log::warn!("{} frame(s) could not be processed", unprocessed);
    }
    Ok(())
}

fn calibrate(
    cfg: &ZdistConfig,
    distances: &[f64],
    affine: bool,
    out: Option<PathBuf>,
) -> Result<()> {
    let mut source = FrameSource::open(cfg.source_config())?;
    let mut frames = Vec::with_capacity(distances.len());
    while frames.len() < distances.len() {
        match source.next_readable_frame() {
            Some(frame) => frames.push(cfg.attach_intrinsics(frame)),
            None => break,
        }
    }
    if frames.len() < distances.len() {
        return Err(anyhow!(
            "calibration needs {} frames, input produced {} ({} unreadable)",
            distances.len(),
            frames.len(),
            source.frames_skipped()
        ));
    }
    let first = frames
        .first()
        .ok_or_else(|| anyhow!("calibration input produced no frames"))?;
    let mut session = open_session(cfg, first)?;
    let fit = if affine {
        ScaleFit::Affine
    } else {
        ScaleFit::ThroughOrigin
    };
    let model = session.calibrate_from_ground_truth(&frames, distances, fit)?;
    session.close();

    let rendered = render_calibration(&model)?;
    match out {
        Some(path) => {
            std::fs::write(&path, &rendered)
                .with_context(|| format!("writing calibration to {}", path.display()))?;
            log::info!("calibration written to {}", path.display());
        }
        None => print!("{}", rendered),
    }
    Ok(())
}

/// Calibration section ready to paste into a config file.
fn render_calibration(model: &AffineCalibration) -> Result<String> {
    #[derive(serde::Serialize)]
    struct CalibrationSection<'a> {
        calibration: CalibrationBody<'a>,
    }
    #[derive(serde::Serialize)]
    struct CalibrationBody<'a> {
        mode: &'a str,
        scale: f64,
        offset: f64,
    }
    Ok(toml::to_string(&CalibrationSection {
        calibration: CalibrationBody {
            mode: "affine",
            scale: model.scale,
            offset: model.offset,
        },
    })?)
}
