//! Document types persisted by the collector.
//!
//! Every document is keyed by the archive filename it was derived from.
//! A collection holds at most one current generation of documents per key;
//! writers replace, they never accumulate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::identity::{FileIdentity, FileStat};

/// Logical document collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Collection {
    /// One record per archived file, carrying its fingerprint.
    FileObject,
    /// Daily waveform quality metrics.
    Metrics,
    /// Power spectral density segments.
    Spectra,
}

impl Collection {
    pub const ALL: [Collection; 3] = [
        Collection::FileObject,
        Collection::Metrics,
        Collection::Spectra,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::FileObject => "fileObject",
            Collection::Metrics => "metrics",
            Collection::Spectra => "spectra",
        }
    }
}

impl std::fmt::Display for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stored document: key, optional content fingerprint, JSON body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultDocument {
    pub key: String,
    pub fingerprint: Option<String>,
    pub body: serde_json::Value,
}

impl ResultDocument {
    pub fn new(key: impl Into<String>, body: serde_json::Value) -> Self {
        Self {
            key: key.into(),
            fingerprint: None,
            body,
        }
    }

    pub fn with_fingerprint(mut self, fingerprint: impl Into<String>) -> Self {
        self.fingerprint = Some(fingerprint.into());
        self
    }
}

/// Description of one archived file, stored in [`Collection::FileObject`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileObject {
    pub collector: String,
    pub created: DateTime<Utc>,
    pub filename: String,
    pub size: u64,
    pub hash: String,
    pub modified: DateTime<Utc>,
    pub date: DateTime<Utc>,
    pub network: String,
    pub station: String,
    pub location: String,
    pub channel: String,
}

impl FileObject {
    pub fn new(collector: &str, identity: &FileIdentity, stat: FileStat, hash: &str) -> Self {
        Self {
            collector: collector.to_string(),
            created: Utc::now(),
            filename: identity.filename(),
            size: stat.size,
            hash: hash.to_string(),
            modified: stat.modified,
            date: identity.start(),
            network: identity.network().to_string(),
            station: identity.station().to_string(),
            location: identity.location().to_string(),
            channel: identity.channel().to_string(),
        }
    }

    pub fn into_document(self) -> serde_json::Result<ResultDocument> {
        let key = self.filename.clone();
        let hash = self.hash.clone();
        Ok(ResultDocument::new(key, serde_json::to_value(self)?).with_fingerprint(hash))
    }
}

/// Timing quality summary; all `None` when the records carry no timing
/// quality blockettes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimingQuality {
    pub tcorr: f64,
    pub tqmin: Option<f64>,
    pub tqmax: Option<f64>,
    pub tqmean: Option<f64>,
    pub tqmedian: Option<f64>,
    pub tqupper: Option<f64>,
    pub tqlower: Option<f64>,
}

/// I/O and clock header flag percentages.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IoFlags {
    pub svo: f64,
    pub lrr: f64,
    pub srr: f64,
    pub sts: f64,
    pub ets: f64,
    pub clo: f64,
}

/// Data quality header flag percentages.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataQualityFlags {
    pub asa: f64,
    pub dic: f64,
    pub spi: f64,
    pub gli: f64,
    pub mpd: f64,
    pub tse: f64,
    pub dfc: f64,
    pub stt: f64,
}

/// Activity header flag percentages.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActivityFlags {
    pub cas: f64,
    pub tca: f64,
    pub evb: f64,
    pub eve: f64,
    pub eip: f64,
    pub pol: f64,
    pub nel: f64,
}

/// Daily waveform metrics, stored in [`Collection::Metrics`].
///
/// Keys are kept short because one document is written per stream per day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsDocument {
    pub created: DateTime<Utc>,
    #[serde(rename = "digitalObjects")]
    pub digital_objects: Vec<String>,
    pub filename: String,
    pub collector: String,
    pub warnings: u64,
    pub status: String,
    pub format: String,
    #[serde(rename = "dataType")]
    pub data_type: String,
    pub nseg: u64,
    pub cont: bool,
    pub net: String,
    pub sta: String,
    pub cha: String,
    pub loc: String,
    pub qlt: String,
    pub ts: DateTime<Utc>,
    pub te: DateTime<Utc>,
    pub enc: Option<String>,
    pub srate: Option<f64>,
    pub rlen: Option<u64>,
    pub nrec: Option<u64>,
    pub nsam: u64,
    pub smin: i64,
    pub smax: i64,
    pub smean: f64,
    pub smedian: f64,
    pub supper: f64,
    pub slower: f64,
    pub rms: f64,
    pub stdev: f64,
    pub ngaps: u64,
    pub glen: f64,
    pub nover: u64,
    pub olen: f64,
    pub gmax: Option<f64>,
    pub omax: Option<f64>,
    pub avail: f64,
    pub sgap: bool,
    pub egap: bool,
    #[serde(flatten)]
    pub timing: TimingQuality,
    pub io_flags: IoFlags,
    pub dq_flags: DataQualityFlags,
    pub ac_flags: ActivityFlags,
}

impl MetricsDocument {
    pub fn into_document(self) -> serde_json::Result<ResultDocument> {
        let key = self.filename.clone();
        Ok(ResultDocument::new(key, serde_json::to_value(self)?))
    }
}

/// One packed power spectral density segment, stored in
/// [`Collection::Spectra`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpectrumDocument {
    pub created: DateTime<Utc>,
    pub collector: String,
    pub filename: String,
    pub net: String,
    pub sta: String,
    pub loc: String,
    pub cha: String,
    pub warnings: u64,
    pub ts: DateTime<Utc>,
    pub te: DateTime<Utc>,
    /// Base64 of `[offset, amplitude...]`, one byte each.
    pub binary: String,
}

impl SpectrumDocument {
    pub fn into_document(self) -> serde_json::Result<ResultDocument> {
        let key = self.filename.clone();
        Ok(ResultDocument::new(key, serde_json::to_value(self)?))
    }
}
