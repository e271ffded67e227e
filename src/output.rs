//! Rendering of per-frame reports.

use std::fmt::Write as _;
use std::io::Write;
use std::str::FromStr;

use anyhow::{anyhow, Result};

use crate::fusion::{Aggregate, RegionKind, UncertaintyMeasure};
use crate::session::FrameReport;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    /// One JSON object per line.
    Json,
    Text,
}

impl FromStr for OutputFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" | "jsonl" => Ok(Self::Json),
            "text" | "txt" => Ok(Self::Text),
            other => Err(anyhow!("unknown output format '{}'", other)),
        }
    }
}

pub fn write_report<W: Write>(
    out: &mut W,
    report: &FrameReport,
    format: OutputFormat,
) -> Result<()> {
    match format {
        OutputFormat::Json => {
            serde_json::to_writer(&mut *out, report)?;
            writeln!(out)?;
        }
        OutputFormat::Text => out.write_all(render_text(report).as_bytes())?,
    }
    Ok(())
}

/// Human-readable summary, one line per detection.
pub fn render_text(report: &FrameReport) -> String {
    let mut s = String::new();
    let _ = writeln!(
        s,
        "frame {} ({}x{}) scale={:.4} offset={:.4}: {} estimate(s), {} skipped",
        report.frame_index,
        report.width,
        report.height,
        report.calibration.scale,
        report.calibration.offset,
        report.estimates.len(),
        report.skipped.len()
    );
    for est in &report.estimates {
        let aggregate = match est.method.aggregate {
            Aggregate::Median => "median".to_string(),
            Aggregate::TrimmedMean { fraction } => format!("trimmed-mean {:.2}", fraction),
        };
        let spread = match est.method.uncertainty {
            UncertaintyMeasure::InterquartileRange => "iqr",
            UncertaintyMeasure::StdDev => "std",
        };
        let region = match est.method.region {
            RegionKind::Eroded => "eroded",
            RegionKind::FullBox => "full-box",
        };
        let _ = write!(
            s,
            "  [{}] {} conf={:.2} Z={:.3} m {}={:.3} ({}, {}, {} px)",
            est.index,
            est.detection.label,
            est.detection.confidence,
            est.z_m,
            spread,
            est.uncertainty_m,
            aggregate,
            region,
            est.sample_count
        );
        if let Some(p) = est.position {
            let _ = write!(
                s,
                " xyz=({:.3}, {:.3}, {:.3}) range={:.3} m",
                p.x,
                p.y,
                p.z,
                p.range_m()
            );
        }
        s.push('\n');
    }
    for skipped in &report.skipped {
        let _ = writeln!(
            s,
            "  [{}] {} skipped: {}",
            skipped.index, skipped.detection.label, skipped.reason
        );
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::AffineCalibration;
    use crate::detect::{BoundingBox, Detection};
    use crate::fusion::{DistanceEstimate, SamplingMethod, SkippedDetection};

    fn report() -> FrameReport {
        let det = Detection::new(BoundingBox::new(0.0, 0.0, 4.0, 4.0), "drone", 0.8);
        FrameReport {
            frame_index: 3,
            width: 8,
            height: 8,
            detector: "fixed".into(),
            depth_backend: "gradient".into(),
            calibration: AffineCalibration {
                scale: 2.0,
                offset: 0.0,
            },
            estimates: vec![DistanceEstimate {
                index: 0,
                detection: det.clone(),
                z_m: 12.5,
                uncertainty_m: 0.25,
                method: SamplingMethod {
                    aggregate: Aggregate::Median,
                    uncertainty: UncertaintyMeasure::InterquartileRange,
                    region: RegionKind::Eroded,
                },
                sample_count: 9,
                position: None,
            }],
            skipped: vec![SkippedDetection {
                index: 1,
                detection: det,
                reason: "empty".into(),
            }],
            elapsed_ms: 1.0,
        }
    }

    #[test]
    fn json_output_is_one_line_per_report() {
        let mut buf = Vec::new();
        write_report(&mut buf, &report(), OutputFormat::Json).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert_eq!(text.lines().count(), 1);
        let value: serde_json::Value = serde_json::from_str(text.trim()).unwrap();
        assert_eq!(value["estimates"][0]["z_m"], 12.5);
        assert_eq!(value["estimates"][0]["method"]["aggregate"]["kind"], "median");
    }

    #[test]
    fn text_output_mentions_estimates_and_skips() {
        let text = render_text(&report());
        assert!(text.contains("Z=12.500 m iqr=0.250"));
        assert!(text.contains("[1] drone skipped: empty"));
        assert_eq!("jsonl".parse::<OutputFormat>().unwrap(), OutputFormat::Json);
    }
}
