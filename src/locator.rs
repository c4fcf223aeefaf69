//! Candidate file resolution.
//!
//! Turns exactly one selection mode (single file, directory, explicit list,
//! date range, relative preset, or glob) into a sorted, duplicate-free list
//! of [`FileIdentity`] values, then applies the configured filter chain.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use chrono::{Datelike, NaiveDate, Utc};
use globset::GlobBuilder;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use wfcollector_core::filter::{FilterChain, FilterDecision};
use wfcollector_core::identity::FileIdentity;

use crate::error::CollectorError;

/// Named windows counted back from today.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum PastPreset {
    Today,
    Yesterday,
    Week,
    Fortnight,
    Month,
}

impl PastPreset {
    /// Signed day count handed to the date-range scan.
    pub fn window(&self) -> i64 {
        match self {
            PastPreset::Today => -1,
            PastPreset::Yesterday => -2,
            PastPreset::Week => -8,
            PastPreset::Fortnight => -15,
            PastPreset::Month => -32,
        }
    }
}

/// One resolved selection mode.
#[derive(Debug, Clone, PartialEq)]
pub enum Selection {
    File(String),
    Directory(PathBuf),
    List(Vec<String>),
    /// `days` days starting at `date`; negative counts go backward.
    DateRange { date: NaiveDate, days: i64 },
    Past(PastPreset),
    Glob(String),
}

/// Raw selection inputs as they arrive from the command line.
#[derive(Debug, Clone, Default)]
pub struct SelectionOptions {
    pub file: Option<String>,
    pub dir: Option<PathBuf>,
    pub glob: Option<String>,
    pub list: Option<String>,
    pub date: Option<String>,
    pub range: Option<i64>,
    pub past: Option<PastPreset>,
}

impl SelectionOptions {
    pub fn into_selection(self) -> Result<Selection, CollectorError> {
        let given: Vec<&str> = [
            ("--file", self.file.is_some()),
            ("--dir", self.dir.is_some()),
            ("--glob", self.glob.is_some()),
            ("--list", self.list.is_some()),
            ("--date", self.date.is_some()),
            ("--past", self.past.is_some()),
        ]
        .into_iter()
        .filter(|(_, set)| *set)
        .map(|(name, _)| name)
        .collect();

        if given.len() > 1 {
            return Err(CollectorError::AmbiguousSelection(given.join(", ")));
        }

        if let Some(file) = self.file {
            return Ok(Selection::File(file));
        }
        if let Some(dir) = self.dir {
            return Ok(Selection::Directory(dir));
        }
        if let Some(glob) = self.glob {
            return Ok(Selection::Glob(glob));
        }
        if let Some(list) = self.list {
            let names: Vec<String> = serde_json::from_str(&list).map_err(|e| {
                CollectorError::InvalidSelection(format!(
                    "--list must be a JSON array of filenames: {}",
                    e
                ))
            })?;
            return Ok(Selection::List(names));
        }
        if let Some(date) = self.date {
            let date = NaiveDate::parse_from_str(&date, "%Y-%m-%d").map_err(|e| {
                CollectorError::InvalidSelection(format!("--date must be YYYY-MM-DD: {}", e))
            })?;
            return Ok(Selection::DateRange {
                date,
                days: self.range.unwrap_or(1),
            });
        }
        if let Some(past) = self.past {
            return Ok(Selection::Past(past));
        }

        Err(CollectorError::NoSelection)
    }
}

/// Resolves selections against one archive root.
pub struct ArchiveLocator {
    root: PathBuf,
    filter: Option<FilterChain>,
    today: NaiveDate,
}

impl ArchiveLocator {
    pub fn new(root: impl Into<PathBuf>, filter: Option<FilterChain>) -> Self {
        Self {
            root: root.into(),
            filter,
            today: Utc::now().date_naive(),
        }
    }

    /// Override the reference date used by [`Selection::Past`].
    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = today;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn locate(&self, selection: &Selection) -> Result<Vec<FileIdentity>, CollectorError> {
        let found = match selection {
            Selection::File(name) => self.from_filename(name)?,
            Selection::Directory(dir) => self.from_directory(dir)?,
            Selection::List(names) => self.from_list(names),
            Selection::DateRange { date, days } => self.from_date_range(*date, *days)?,
            Selection::Past(preset) => {
                let found = self.from_date_range(self.today, preset.window())?;
                info!(
                    "Collected {} file(s) from the past ({:?})",
                    found.len(),
                    preset
                );
                found
            }
            Selection::Glob(pattern) => self.from_glob(pattern)?,
        };

        let unique: BTreeSet<FileIdentity> = found.into_iter().collect();
        Ok(self.apply_filter(unique.into_iter().collect()))
    }

    fn from_filename(&self, name: &str) -> Result<Vec<FileIdentity>, CollectorError> {
        let identity = FileIdentity::parse(name)?;
        let path = identity.archive_path(&self.root);
        if !path.is_file() {
            return Err(CollectorError::NotFound(path));
        }
        info!("Collected 1 file {}", identity);
        Ok(vec![identity])
    }

    fn from_directory(&self, dir: &Path) -> Result<Vec<FileIdentity>, CollectorError> {
        if !dir.is_dir() {
            return Err(CollectorError::NotFound(dir.to_path_buf()));
        }

        let mut found = Vec::new();
        for entry in WalkDir::new(dir).into_iter().filter_map(|e| match e {
            Ok(entry) => Some(entry),
            Err(err) => {
                warn!("Skipping unreadable directory entry: {}", err);
                None
            }
        }) {
            if !entry.file_type().is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy();
            match FileIdentity::parse(&name) {
                Ok(identity) if identity.exists(&self.root) => found.push(identity),
                Ok(identity) => debug!("{} is not inside the archive root; skipped", identity),
                Err(err) => debug!("Skipping {}: {}", entry.path().display(), err),
            }
        }

        info!(
            "Collected {} file(s) from directory {}",
            found.len(),
            dir.display()
        );
        Ok(found)
    }

    fn from_list(&self, names: &[String]) -> Vec<FileIdentity> {
        let found: Vec<FileIdentity> = names
            .iter()
            .filter_map(|name| match FileIdentity::parse(name) {
                Ok(identity) => Some(identity),
                Err(err) => {
                    warn!("Dropping list entry: {}", err);
                    None
                }
            })
            .collect();
        info!("Collected {} file(s) from input list", found.len());
        found
    }

    fn from_date_range(
        &self,
        date: NaiveDate,
        days: i64,
    ) -> Result<Vec<FileIdentity>, CollectorError> {
        if !self.root.is_dir() {
            return Err(CollectorError::NotFound(self.root.clone()));
        }

        // Archive years are four digits, so the walk ends at the first day
        // outside 0000..=9999 whatever the requested count.
        let mut wanted: BTreeMap<i32, BTreeSet<u32>> = BTreeMap::new();
        let mut walked = 0u64;
        let mut next = Some(date);
        while walked < days.unsigned_abs() {
            let Some(day) = next.filter(|d| (0..=9999).contains(&d.year())) else {
                break;
            };
            wanted.entry(day.year()).or_default().insert(day.ordinal());
            walked += 1;
            next = if days >= 0 { day.succ_opt() } else { day.pred_opt() };
        }

        let mut found = Vec::new();
        for (year, ordinals) in &wanted {
            let year_dir = self.root.join(format!("{:04}", year));
            if !year_dir.is_dir() {
                debug!("No archive directory for {}", year);
                continue;
            }
            for entry in WalkDir::new(&year_dir).into_iter().filter_map(Result::ok) {
                if !entry.file_type().is_file() {
                    continue;
                }
                let name = entry.file_name().to_string_lossy();
                let Ok(identity) = FileIdentity::parse(&name) else {
                    continue;
                };
                if ordinals.contains(&identity.date().ordinal())
                    && identity.date().year() == *year
                    && identity.exists(&self.root)
                {
                    found.push(identity);
                }
            }
        }

        info!(
            "Collected a total of {} file(s) from {} day(s)",
            found.len(),
            walked
        );
        Ok(found)
    }

    fn from_glob(&self, pattern: &str) -> Result<Vec<FileIdentity>, CollectorError> {
        let fields: Vec<&str> = pattern.split('.').collect();
        if fields.len() != 7 || fields.iter().any(|f| f.contains('/')) {
            return Err(CollectorError::InvalidSelection(
                "the glob expression must be of the form NETWORK.STATION.LOCATION.CHANNEL.QUALITY.YEAR.JDAY"
                    .to_string(),
            ));
        }

        // Same layout as FileIdentity::archive_path, with wildcards intact.
        let components = [
            fields[5].to_string(),
            fields[0].to_string(),
            fields[1].to_string(),
            format!("{}.{}", fields[3], fields[4]),
            pattern.to_string(),
        ];
        let relative_pattern = components.join("/");
        debug!("Using glob expression: '{}'", relative_pattern);

        let matcher = GlobBuilder::new(&relative_pattern)
            .literal_separator(true)
            .build()
            .map_err(|e| CollectorError::InvalidSelection(e.to_string()))?
            .compile_matcher();

        // Walk only below the longest wildcard-free prefix.
        let literal = components
            .iter()
            .take_while(|c| !c.contains(&['*', '?', '[', '{'][..]))
            .count();
        let base = components[..literal]
            .iter()
            .fold(self.root.clone(), |acc, c| acc.join(c));
        if !base.exists() {
            info!("Collected 0 files using a glob expression");
            return Ok(Vec::new());
        }

        let mut found = Vec::new();
        for entry in WalkDir::new(&base)
            .max_depth(components.len() - literal)
            .into_iter()
            .filter_map(Result::ok)
        {
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(relative) = entry.path().strip_prefix(&self.root) else {
                continue;
            };
            if !matcher.is_match(relative) {
                continue;
            }
            match FileIdentity::parse(&entry.file_name().to_string_lossy()) {
                Ok(identity) => found.push(identity),
                Err(err) => debug!("Skipping {}: {}", entry.path().display(), err),
            }
        }

        info!("Collected {} file(s) using a glob expression", found.len());
        Ok(found)
    }

    fn apply_filter(&self, files: Vec<FileIdentity>) -> Vec<FileIdentity> {
        let Some(filter) = &self.filter else {
            return files;
        };
        files
            .into_iter()
            .filter(|identity| {
                let name = identity.filename();
                match filter.evaluate(&name) {
                    FilterDecision::Accepted { .. } => true,
                    FilterDecision::Denied { deny, .. } => {
                        debug!("Filtering file {} following rule {}", name, deny);
                        false
                    }
                    FilterDecision::Unmatched => false,
                }
            })
            .collect()
    }
}
