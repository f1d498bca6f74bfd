//! The variable catalog of a dataset and its cache.
//!
//! Scanning a dataset's files for their variables is slow, so the unified
//! catalog for a (pattern, window) is cached process-wide and refreshed
//! per file only when that file's modification time advances.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use regex::Regex;

use crate::nc3::NcType;

/// Catalog entry for one exported variable, unified over the scanned files.
#[derive(Debug, Clone, PartialEq)]
pub struct VariableInfo {
    /// The variable's name inside the files, which differs from the
    /// exported name when a `short_name` attribute is present.
    pub nc_name: String,
    /// Unified shape without the time dimension's length: the time axis
    /// reports 0, other axes the maximum length seen across files.
    pub shape: Vec<usize>,
    /// Dimension names, aligned with `shape`.
    pub dimnames: Vec<String>,
    /// Element type, from the first file that carried the variable.
    pub dtype: NcType,
    /// The `units` attribute, newest file wins.
    pub units: Option<String>,
    /// The `long_name` attribute, newest file wins.
    pub long_name: Option<String>,
    /// Axis index of the time dimension.
    pub time_index: usize,
    /// ISFS site suffix parsed from the variable name, if any.
    pub site: Option<String>,
}

/// What a scan learned about a dataset's files as a whole.
#[derive(Debug, Clone, Default)]
pub struct DatasetInfo {
    /// Modification time of each file at its last scan; gates re-opens.
    pub file_mod_times: HashMap<PathBuf, SystemTime>,
    /// Name of a scalar epoch-seconds variable, used when time units fail
    /// to decode.
    pub base_time: Option<String>,
    /// Name of the time dimension.
    pub time_dim: Option<String>,
    /// Name of the time variable.
    pub time_name: Option<String>,
    /// Maximum station-dimension length seen.
    pub nstations: usize,
    /// Name of the station dimension, when any file carries one.
    pub station_dim: Option<String>,
    /// Station names, from a character variable or synthesized ordinals.
    pub station_names: Vec<String>,
    /// Whether any cataloged variable actually uses the station dimension.
    pub has_station_variables: bool,
    /// Short site name to long site name.
    pub sites: HashMap<String, String>,
    /// Exported variable name to catalog entry.
    pub variables: HashMap<String, VariableInfo>,
}

/// Process-lifetime cache of scanned catalogs, keyed by path pattern and
/// query window. `get` hands out a copy; the caller refreshes it against
/// current file mtimes and saves it back.
#[derive(Debug, Default)]
pub struct SchemaCache {
    entries: Mutex<HashMap<(String, DateTime<Utc>, DateTime<Utc>), DatasetInfo>>,
}

impl SchemaCache {
    /// Create an empty cache behind an `Arc` for sharing.
    pub fn new() -> Arc<SchemaCache> {
        Arc::new(SchemaCache::default())
    }

    /// A copy of the cached catalog for this pattern and window, if any.
    pub fn get(
        &self,
        pattern: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Option<DatasetInfo> {
        let entries = match self.entries.lock() {
            Ok(entries) => entries,
            Err(poisoned) => poisoned.into_inner(),
        };
        entries.get(&(pattern.to_string(), start, end)).cloned()
    }

    /// Store the catalog for this pattern and window, replacing any
    /// previous entry. Racing writers are tolerated, last one wins.
    pub fn save(&self, pattern: &str, start: DateTime<Utc>, end: DateTime<Utc>, info: DatasetInfo) {
        let mut entries = match self.entries.lock() {
            Ok(entries) => entries,
            Err(poisoned) => poisoned.into_inner(),
        };
        entries.insert((pattern.to_string(), start, end), info);
    }

    /// Drop the entry for this pattern and window.
    pub fn invalidate(&self, pattern: &str, start: DateTime<Utc>, end: DateTime<Utc>) {
        let mut entries = match self.entries.lock() {
            Ok(entries) => entries,
            Err(poisoned) => poisoned.into_inner(),
        };
        entries.remove(&(pattern.to_string(), start, end));
    }
}

lazy_static! {
    // a height suffix like "25m", "2m" or "10cm"
    static ref HEIGHT_RE: Regex = Regex::new(r"^[0-9]+\.?[0-9]*c?m$").expect("height regex");
}

/// The ISFS site suffix of a variable name, if it carries one.
///
/// ISFS names look like `var[.sensor][.height][.site]`; the site is the
/// last dot-separated token, provided that token is not itself a height.
/// `T.25m` has no site; `T.25m.tower` is at site `tower`.
pub fn isfs_site(name: &str) -> Option<&str> {
    let (_, last) = name.rsplit_once('.')?;
    if last.is_empty() || HEIGHT_RE.is_match(last) {
        None
    } else {
        Some(last)
    }
}

#[cfg(test)]
mod unit {
    use super::*;

    use chrono::TimeZone;

    #[test]
    fn site_suffix_extraction() {
        assert_eq!(isfs_site("T.25m.tower"), Some("tower"));
        assert_eq!(isfs_site("T.25m"), None);
        assert_eq!(isfs_site("T.2.5m"), None);
        assert_eq!(isfs_site("Rsw.in.10cm.south"), Some("south"));
        assert_eq!(isfs_site("T"), None);
        assert_eq!(isfs_site("h2o.hygrometer.5m"), None);
        assert_eq!(isfs_site("T."), None);
    }

    #[test]
    fn cache_is_keyed_by_pattern_and_window() {
        let cache = SchemaCache::new();
        let t0 = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).single().unwrap();
        let t1 = Utc.with_ymd_and_hms(2020, 1, 2, 0, 0, 0).single().unwrap();

        let mut info = DatasetInfo::default();
        info.time_dim = Some("time".to_string());
        cache.save("a_%Y%m%d.nc", t0, t1, info);

        assert!(cache.get("a_%Y%m%d.nc", t0, t1).is_some());
        assert!(cache.get("b_%Y%m%d.nc", t0, t1).is_none());
        assert!(cache.get("a_%Y%m%d.nc", t0, t0).is_none());

        cache.invalidate("a_%Y%m%d.nc", t0, t1);
        assert!(cache.get("a_%Y%m%d.nc", t0, t1).is_none());
    }

    #[test]
    fn get_returns_an_independent_copy() {
        let cache = SchemaCache::new();
        let t0 = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).single().unwrap();
        let t1 = Utc.with_ymd_and_hms(2020, 1, 2, 0, 0, 0).single().unwrap();

        cache.save("p", t0, t1, DatasetInfo::default());
        let mut copy = cache.get("p", t0, t1).unwrap();
        copy.nstations = 5;

        assert_eq!(cache.get("p", t0, t1).unwrap().nstations, 0);
    }
}
