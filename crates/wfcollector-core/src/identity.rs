//! SDS archive file identities.
//!
//! Every file in an SDS archive is named
//! `NETWORK.STATION.LOCATION.CHANNEL.QUALITY.YEAR.DAYOFYEAR` and lives under
//! `ROOT/YEAR/NETWORK/STATION/CHANNEL.QUALITY/`. A [`FileIdentity`] is the
//! parsed form of such a name. All path and time values are derived from the
//! seven fields; the only cached state is the content fingerprint.

use std::fmt;
use std::fs::File;
use std::hash::{Hash, Hasher};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::OnceLock;

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, Utc};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Read size used when streaming a file through the digest.
pub const BLOCK_SIZE: usize = 1 << 16;

/// Padding added past the end of the day for spectral windows.
pub const SPECTRA_PADDING_MINUTES: i64 = 30;

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("input filename {filename} is not a valid SDS filename: {reason}")]
    InvalidIdentifier { filename: String, reason: String },

    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl IdentityError {
    fn invalid(filename: &str, reason: impl Into<String>) -> Self {
        IdentityError::InvalidIdentifier {
            filename: filename.to_string(),
            reason: reason.into(),
        }
    }
}

/// Day shift used by [`FileIdentity::neighbor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Previous,
    Next,
}

/// Kind of data carried by a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    Seismic,
    Infrasound,
}

impl DataType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::Seismic => "seismic",
            DataType::Infrasound => "infrasound",
        }
    }
}

/// Size and modification time of an archived file.
#[derive(Debug, Clone, Copy)]
pub struct FileStat {
    pub size: u64,
    pub modified: DateTime<Utc>,
}

/// One archived day file, e.g. `GB.PGB1..HHN.D.2014.295`.
///
/// Equality, ordering and hashing consider the seven name fields only; the
/// memoized fingerprint never takes part.
#[derive(Debug, Clone)]
pub struct FileIdentity {
    network: String,
    station: String,
    location: String,
    channel: String,
    quality: String,
    date: NaiveDate,
    fingerprint: OnceLock<String>,
}

impl FileIdentity {
    /// Parse an SDS filename.
    pub fn parse(filename: &str) -> Result<Self, IdentityError> {
        let fields: Vec<&str> = filename.split('.').collect();
        if fields.len() != 7 {
            return Err(IdentityError::invalid(
                filename,
                format!("expected 7 dot-separated fields, found {}", fields.len()),
            ));
        }

        let (year, day) = (fields[5], fields[6]);
        if year.len() != 4 || !year.bytes().all(|b| b.is_ascii_digit()) {
            return Err(IdentityError::invalid(filename, "year must be 4 digits"));
        }
        if day.len() != 3 || !day.bytes().all(|b| b.is_ascii_digit()) {
            return Err(IdentityError::invalid(
                filename,
                "day of year must be 3 digits",
            ));
        }

        let year: i32 = year
            .parse()
            .map_err(|_| IdentityError::invalid(filename, "year is not a number"))?;
        let day: u32 = day
            .parse()
            .map_err(|_| IdentityError::invalid(filename, "day of year is not a number"))?;
        let date = NaiveDate::from_yo_opt(year, day).ok_or_else(|| {
            IdentityError::invalid(
                filename,
                format!("day {:03} does not exist in {}", day, year),
            )
        })?;

        for (name, value) in [
            ("network", fields[0]),
            ("station", fields[1]),
            ("channel", fields[3]),
            ("quality", fields[4]),
        ] {
            if value.is_empty() {
                return Err(IdentityError::invalid(
                    filename,
                    format!("{} is empty", name),
                ));
            }
        }
        if fields[..5]
            .iter()
            .any(|f| f.contains(|c: char| c == '/' || c == '\\' || c.is_whitespace()))
        {
            return Err(IdentityError::invalid(
                filename,
                "fields may not contain separators or whitespace",
            ));
        }

        Ok(Self {
            network: fields[0].to_string(),
            station: fields[1].to_string(),
            location: fields[2].to_string(),
            channel: fields[3].to_string(),
            quality: fields[4].to_string(),
            date,
            fingerprint: OnceLock::new(),
        })
    }

    pub fn network(&self) -> &str {
        &self.network
    }

    pub fn station(&self) -> &str {
        &self.station
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn quality(&self) -> &str {
        &self.quality
    }

    /// Four-digit year.
    pub fn year(&self) -> String {
        format!("{:04}", self.date.year())
    }

    /// Zero-padded day of year.
    pub fn day(&self) -> String {
        format!("{:03}", self.date.ordinal())
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    /// Canonical filename; identical to the `Display` output.
    pub fn filename(&self) -> String {
        self.to_string()
    }

    /// Stream identifier `NET.STA.LOC.CHA`.
    pub fn stream_id(&self) -> String {
        format!(
            "{}.{}.{}.{}",
            self.network, self.station, self.location, self.channel
        )
    }

    pub fn channel_directory(&self) -> String {
        format!("{}.{}", self.channel, self.quality)
    }

    pub fn data_type(&self) -> DataType {
        if self.channel.ends_with("DF") {
            DataType::Infrasound
        } else {
            DataType::Seismic
        }
    }

    /// `ROOT/YEAR/NET/STA/CHA.QUALITY`
    pub fn directory(&self, root: &Path) -> PathBuf {
        root.join(self.year())
            .join(&self.network)
            .join(&self.station)
            .join(self.channel_directory())
    }

    /// Full path of the file inside the archive. Does not touch the disk.
    pub fn archive_path(&self, root: &Path) -> PathBuf {
        self.directory(root).join(self.filename())
    }

    pub fn exists(&self, root: &Path) -> bool {
        self.archive_path(root).is_file()
    }

    /// Inclusive start of the day covered by this file.
    pub fn start(&self) -> DateTime<Utc> {
        self.date.and_time(NaiveTime::MIN).and_utc()
    }

    /// Exclusive end of the day covered by this file.
    pub fn end(&self) -> DateTime<Utc> {
        self.start() + Duration::days(1)
    }

    /// End of the padded window used for spectral estimates.
    pub fn spectra_end(&self) -> DateTime<Utc> {
        self.end() + Duration::minutes(SPECTRA_PADDING_MINUTES)
    }

    /// The same stream shifted by one day.
    ///
    /// Returns `None` only when the shift would leave the four-digit year
    /// range.
    pub fn neighbor(&self, direction: Direction) -> Option<FileIdentity> {
        let date = match direction {
            Direction::Previous => self.date.pred_opt()?,
            Direction::Next => self.date.succ_opt()?,
        };
        if !(0..=9999).contains(&date.year()) {
            return None;
        }
        Some(Self {
            network: self.network.clone(),
            station: self.station.clone(),
            location: self.location.clone(),
            channel: self.channel.clone(),
            quality: self.quality.clone(),
            date,
            fingerprint: OnceLock::new(),
        })
    }

    /// Previous, self and next day, keeping only files present on disk.
    ///
    /// The order is significant: windowed reads expect previous → self → next.
    pub fn neighbors(&self, root: &Path) -> Vec<FileIdentity> {
        [
            self.neighbor(Direction::Previous),
            Some(self.clone()),
            self.neighbor(Direction::Next),
        ]
        .into_iter()
        .flatten()
        .filter(|id| id.exists(root))
        .collect()
    }

    pub fn neighbor_filenames(&self, root: &Path) -> Vec<String> {
        self.neighbors(root).iter().map(|n| n.filename()).collect()
    }

    pub fn neighbor_paths(&self, root: &Path) -> Vec<PathBuf> {
        self.neighbors(root)
            .iter()
            .map(|n| n.archive_path(root))
            .collect()
    }

    /// SHA-256 hex digest of the file bytes, computed once per instance.
    pub fn fingerprint(&self, root: &Path) -> Result<&str, IdentityError> {
        if let Some(hash) = self.fingerprint.get() {
            return Ok(hash);
        }
        let path = self.archive_path(root);
        let hash = File::open(&path)
            .and_then(sha256_reader)
            .map_err(|source| IdentityError::Io {
                path: path.clone(),
                source,
            })?;
        Ok(self.fingerprint.get_or_init(|| hash))
    }

    /// Whether the fingerprint has already been computed for this instance.
    pub fn has_fingerprint(&self) -> bool {
        self.fingerprint.get().is_some()
    }

    pub fn stat(&self, root: &Path) -> Result<FileStat, IdentityError> {
        let path = self.archive_path(root);
        let metadata = std::fs::metadata(&path).map_err(|source| IdentityError::Io {
            path: path.clone(),
            source,
        })?;
        let modified = metadata
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| DateTime::<Utc>::from(std::time::UNIX_EPOCH));
        Ok(FileStat {
            size: metadata.len(),
            modified,
        })
    }

    /// FDSN station request for the instrument response covering this day.
    ///
    /// An empty location code is sent as `--`, which is what FDSN services
    /// expect.
    pub fn response_query(&self, base_url: &str) -> String {
        let location = if self.location.is_empty() {
            "--"
        } else {
            self.location.as_str()
        };
        format!(
            "{}?network={}&station={}&location={}&channel={}&start={}&end={}&level=response",
            base_url,
            self.network,
            self.station,
            location,
            self.channel,
            self.start().format("%Y-%m-%dT%H:%M:%S"),
            self.end().format("%Y-%m-%dT%H:%M:%S"),
        )
    }

    fn key(&self) -> (&str, &str, &str, &str, &str, NaiveDate) {
        (
            &self.network,
            &self.station,
            &self.location,
            &self.channel,
            &self.quality,
            self.date,
        )
    }
}

/// Stream a reader through SHA-256 in [`BLOCK_SIZE`] blocks.
pub fn sha256_reader<R: Read>(mut reader: R) -> io::Result<String> {
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; BLOCK_SIZE];
    loop {
        let n = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        hasher.update(&buffer[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

impl fmt::Display for FileIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}.{}.{}.{:04}.{:03}",
            self.network,
            self.station,
            self.location,
            self.channel,
            self.quality,
            self.date.year(),
            self.date.ordinal()
        )
    }
}

impl FromStr for FileIdentity {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl PartialEq for FileIdentity {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for FileIdentity {}

impl Hash for FileIdentity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

impl PartialOrd for FileIdentity {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FileIdentity {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.key().cmp(&other.key())
    }
}
