//! External analysis boundary.
//!
//! Waveform metrics and power spectral densities are computed by an external
//! command. It is invoked as
//!
//! ```text
//! COMMAND ARGS... metrics --start ISO --end ISO FILE...
//! COMMAND ARGS... spectra --start ISO --end ISO --min-period P --max-period P FILE...
//! ```
//!
//! and prints a single JSON record on stdout. For `spectra` the station
//! response document is written to its stdin. This module runs the command
//! and reshapes its records into stored documents.

use std::path::PathBuf;
use std::process::Stdio;

use anyhow::{bail, Context, Result};
use base64::Engine;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde::Deserialize;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, error};

use wfcollector_core::identity::FileIdentity;
use wfcollector_core::models::{
    ActivityFlags, DataQualityFlags, IoFlags, MetricsDocument, SpectrumDocument, TimingQuality,
};

use crate::config::{AnalysisConfig, SpectraConfig};

/// Number of spectral segments in one day.
pub const SEGMENTS_PER_DAY: usize = 48;
/// Step between consecutive segment start times.
pub const SEGMENT_STEP_MINUTES: i64 = 30;
/// Length of a single segment.
pub const SEGMENT_LENGTH_MINUTES: i64 = 60;

/// Runs the configured analysis command.
#[derive(Debug, Clone)]
pub struct Analyzer {
    command: PathBuf,
    args: Vec<String>,
}

impl Analyzer {
    pub fn new(command: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
        }
    }

    /// `None` when no command is configured.
    pub fn from_config(config: &AnalysisConfig) -> Option<Self> {
        config
            .command
            .as_ref()
            .map(|command| Self::new(command, config.args.clone()))
    }

    /// Daily metrics over `[start, end)` of `identity`, read from `files`
    /// (the neighbour window).
    pub async fn metrics(
        &self,
        identity: &FileIdentity,
        files: &[PathBuf],
    ) -> Result<MetricsRecord> {
        let args = window_args(identity.start(), identity.end());
        let stdout = self.invoke("metrics", &args, files, None).await?;
        serde_json::from_slice(&stdout)
            .with_context(|| format!("Malformed metrics record for {}", identity))
    }

    /// Spectral segments over `[start, spectra_end)`.
    pub async fn spectra(
        &self,
        identity: &FileIdentity,
        files: &[PathBuf],
        response: &str,
        periods: &SpectraConfig,
    ) -> Result<SpectraRecord> {
        let mut args = window_args(identity.start(), identity.spectra_end());
        args.extend([
            "--min-period".to_string(),
            periods.min_period.to_string(),
            "--max-period".to_string(),
            periods.max_period.to_string(),
        ]);
        let stdout = self
            .invoke("spectra", &args, files, Some(response.as_bytes()))
            .await?;
        serde_json::from_slice(&stdout)
            .with_context(|| format!("Malformed spectra record for {}", identity))
    }

    async fn invoke(
        &self,
        mode: &str,
        args: &[String],
        files: &[PathBuf],
        input: Option<&[u8]>,
    ) -> Result<Vec<u8>> {
        let mut cmd = Command::new(&self.command);
        cmd.args(&self.args)
            .arg(mode)
            .args(args)
            .args(files)
            .stdin(if input.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!("Running {} {}", self.command.display(), mode);

        let mut child = cmd.spawn().with_context(|| {
            format!(
                "Failed to execute analysis command '{}'",
                self.command.display()
            )
        })?;

        // Feed stdin while stdout and stderr are drained, so neither side
        // blocks on a full pipe.
        let stdin = child.stdin.take();
        let feed = async move {
            if let (Some(input), Some(mut stdin)) = (input, stdin) {
                stdin.write_all(input).await?;
                stdin.shutdown().await?;
            }
            Ok::<_, std::io::Error>(())
        };
        let (fed, output) = tokio::join!(feed, child.wait_with_output());
        let output = output.context("Failed to wait for analysis command")?;
        if let Err(err) = fed {
            // Exiting without reading stdin is the command's choice; its
            // status decides the outcome.
            debug!("Analysis command did not consume its input: {}", err);
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("analysis {} failed ({}): {}", mode, output.status, stderr.trim());
        }

        Ok(output.stdout)
    }
}

fn window_args(start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<String> {
    vec![
        "--start".to_string(),
        start.to_rfc3339_opts(SecondsFormat::Secs, true),
        "--end".to_string(),
        end.to_rfc3339_opts(SecondsFormat::Secs, true),
    ]
}

/// Metrics record printed by `COMMAND metrics`.
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsRecord {
    #[serde(default)]
    pub files: Vec<String>,
    #[serde(default)]
    pub warnings: u64,
    #[serde(default)]
    pub c_segments: Vec<serde_json::Value>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub encoding: Option<String>,
    pub sample_rate: Option<f64>,
    pub record_length: Option<u64>,
    pub num_records: Option<u64>,
    pub num_samples: u64,
    pub sample_min: f64,
    pub sample_max: f64,
    pub sample_mean: f64,
    pub sample_median: f64,
    pub sample_upper_quartile: f64,
    pub sample_lower_quartile: f64,
    pub sample_rms: f64,
    pub sample_stdev: f64,
    pub num_gaps: u64,
    pub sum_gaps: f64,
    pub num_overlaps: u64,
    pub sum_overlaps: f64,
    pub max_gap: Option<f64>,
    pub max_overlap: Option<f64>,
    pub percent_availability: f64,
    pub start_gap: Option<f64>,
    pub end_gap: Option<f64>,
    pub miniseed_header_percentages: HeaderPercentages,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HeaderPercentages {
    pub timing_correction: f64,
    pub timing_quality_min: Option<f64>,
    pub timing_quality_max: Option<f64>,
    pub timing_quality_mean: Option<f64>,
    pub timing_quality_median: Option<f64>,
    pub timing_quality_upper_quartile: Option<f64>,
    pub timing_quality_lower_quartile: Option<f64>,
    pub io_and_clock_flags: IoAndClockFlagsRecord,
    pub data_quality_flags: DataQualityFlagsRecord,
    pub activity_flags: ActivityFlagsRecord,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IoAndClockFlagsRecord {
    pub station_volume: f64,
    pub long_record_read: f64,
    pub short_record_read: f64,
    pub start_time_series: f64,
    pub end_time_series: f64,
    pub clock_locked: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DataQualityFlagsRecord {
    pub amplifier_saturation: f64,
    pub digitizer_clipping: f64,
    pub spikes: f64,
    pub glitches: f64,
    pub missing_padded_data: f64,
    pub telemetry_sync_error: f64,
    pub digital_filter_charging: f64,
    pub suspect_time_tag: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ActivityFlagsRecord {
    pub calibration_signal: f64,
    pub time_correction_applied: f64,
    pub event_begin: f64,
    pub event_end: f64,
    pub event_in_progress: f64,
    pub positive_leap: f64,
    pub negative_leap: f64,
}

/// Spectra record printed by `COMMAND spectra`.
#[derive(Debug, Clone, Deserialize)]
pub struct SpectraRecord {
    #[serde(default)]
    pub warnings: u64,
    /// Which frequency bins carry valid values.
    pub valid: Vec<bool>,
    /// Binned PSD amplitudes (dB), one row per segment.
    pub segments: Vec<Vec<f64>>,
}

/// Reshape a metrics record into the stored document.
pub fn metrics_document(
    collector: &str,
    identity: &FileIdentity,
    record: MetricsRecord,
) -> MetricsDocument {
    let header = record.miniseed_header_percentages;
    let timing = if header.timing_quality_min.is_none() {
        TimingQuality {
            tcorr: header.timing_correction,
            ..TimingQuality::default()
        }
    } else {
        TimingQuality {
            tcorr: header.timing_correction,
            tqmin: header.timing_quality_min,
            tqmax: header.timing_quality_max,
            tqmean: header.timing_quality_mean,
            tqmedian: header.timing_quality_median,
            tqupper: header.timing_quality_upper_quartile,
            tqlower: header.timing_quality_lower_quartile,
        }
    };

    let io = header.io_and_clock_flags;
    let dq = header.data_quality_flags;
    let ac = header.activity_flags;

    MetricsDocument {
        created: Utc::now(),
        digital_objects: record.files,
        filename: identity.filename(),
        collector: collector.to_string(),
        warnings: record.warnings,
        status: "open".to_string(),
        format: "miniSEED".to_string(),
        data_type: "seismic waveform".to_string(),
        nseg: record.c_segments.len() as u64,
        cont: record.num_gaps == 0,
        net: identity.network().to_string(),
        sta: identity.station().to_string(),
        cha: identity.channel().to_string(),
        loc: identity.location().to_string(),
        qlt: identity.quality().to_string(),
        ts: record.start_time,
        te: record.end_time,
        enc: record.encoding,
        srate: record.sample_rate,
        rlen: record.record_length,
        nrec: record.num_records,
        nsam: record.num_samples,
        smin: record.sample_min as i64,
        smax: record.sample_max as i64,
        smean: record.sample_mean,
        smedian: record.sample_median,
        supper: record.sample_upper_quartile,
        slower: record.sample_lower_quartile,
        rms: record.sample_rms,
        stdev: record.sample_stdev,
        ngaps: record.num_gaps,
        glen: record.sum_gaps,
        nover: record.num_overlaps,
        olen: record.sum_overlaps,
        gmax: record.max_gap,
        omax: record.max_overlap,
        avail: record.percent_availability,
        sgap: record.start_gap.is_some(),
        egap: record.end_gap.is_some(),
        timing,
        io_flags: IoFlags {
            svo: io.station_volume,
            lrr: io.long_record_read,
            srr: io.short_record_read,
            sts: io.start_time_series,
            ets: io.end_time_series,
            clo: io.clock_locked,
        },
        dq_flags: DataQualityFlags {
            asa: dq.amplifier_saturation,
            dic: dq.digitizer_clipping,
            spi: dq.spikes,
            gli: dq.glitches,
            mpd: dq.missing_padded_data,
            tse: dq.telemetry_sync_error,
            dfc: dq.digital_filter_charging,
            stt: dq.suspect_time_tag,
        },
        ac_flags: ActivityFlags {
            cas: ac.calibration_signal,
            tca: ac.time_correction_applied,
            evb: ac.event_begin,
            eve: ac.event_end,
            eip: ac.event_in_progress,
            pol: ac.positive_leap,
            nel: ac.negative_leap,
        },
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum PackError {
    #[error("no valid frequency bin")]
    NoValidBin,
    #[error("offset {0} does not fit in a byte")]
    OffsetOutOfRange(i64),
    #[error("amplitude {0} is not a finite number")]
    NonFinite(f64),
}

/// Map a dB amplitude onto `0..=255`. Values outside `-255..=0` saturate
/// to 255; `None` for NaN and infinities.
pub fn reduce(amplitude: f64) -> Option<u8> {
    if !amplitude.is_finite() {
        return None;
    }
    let x = amplitude.trunc();
    if (-255.0..=0.0).contains(&x) {
        Some((x as i64 + 255) as u8)
    } else {
        Some(255)
    }
}

/// Pack one segment as `[offset, reduce(v)...]`, where offset is the index
/// of the first valid frequency bin minus one.
pub fn pack_segment(segment: &[f64], valid: &[bool]) -> Result<Vec<u8>, PackError> {
    let first = valid
        .iter()
        .position(|v| *v)
        .ok_or(PackError::NoValidBin)?;
    let offset = first as i64 - 1;
    let offset = u8::try_from(offset).map_err(|_| PackError::OffsetOutOfRange(offset))?;

    let mut packed = Vec::with_capacity(segment.len() + 1);
    packed.push(offset);
    for v in segment {
        packed.push(reduce(*v).ok_or(PackError::NonFinite(*v))?);
    }
    Ok(packed)
}

/// Start times of the daily segments.
pub fn segment_times(start: DateTime<Utc>) -> impl Iterator<Item = DateTime<Utc>> {
    (0..SEGMENTS_PER_DAY as i64).map(move |i| start + Duration::minutes(SEGMENT_STEP_MINUTES * i))
}

/// Reshape a spectra record into one document per packable segment.
pub fn spectra_documents(
    collector: &str,
    identity: &FileIdentity,
    record: &SpectraRecord,
) -> Vec<SpectrumDocument> {
    let engine = base64::engine::general_purpose::STANDARD;
    let created = Utc::now();
    let mut documents = Vec::new();

    for (segment, ts) in record.segments.iter().zip(segment_times(identity.start())) {
        let packed = match pack_segment(segment, &record.valid) {
            Ok(packed) => packed,
            Err(err) => {
                error!("Could not compress spectra for {}: {}", identity, err);
                continue;
            }
        };
        documents.push(SpectrumDocument {
            created,
            collector: collector.to_string(),
            filename: identity.filename(),
            net: identity.network().to_string(),
            sta: identity.station().to_string(),
            loc: identity.location().to_string(),
            cha: identity.channel().to_string(),
            warnings: record.warnings,
            ts,
            te: ts + Duration::minutes(SEGMENT_LENGTH_MINUTES),
            binary: engine.encode(&packed),
        });
    }

    documents
}
