//! A dataset: the files matching one path pattern, their unified variable
//! catalog, and time-series reads against them.

mod read;
mod scan;

pub use self::read::ReadRequest;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{error, warn};

use crate::errors::NcSeriesErr;
use crate::fileset::{DirCache, FileSet, MatchedFile};
use crate::nc3::NcFile;
use crate::schema::{DatasetInfo, SchemaCache};

/// Variable names tried, in order, for the time coordinate.
pub(crate) const DEFAULT_TIME_NAMES: [&str; 3] = ["time", "Time", "time_offset"];

/// Dimension names tried, in order, for the time dimension.
pub(crate) const TIME_DIM_NAMES: [&str; 2] = ["time", "Time"];

/// Upper bound on files opened by a catalog scan; larger candidate sets are
/// subsampled evenly, newest first.
pub(crate) const MAX_NUM_FILES_TO_PRESCAN: usize = 50;

/// Attempts at opening a file before giving up on it.
pub(crate) const OPEN_TRIES: u32 = 3;

/// Default byte budget for one read.
pub const DEFAULT_SIZE_LIMIT: usize = 1_000_000_000;

/// The files matching one path pattern over one time window.
///
/// Directory listings and the scanned variable catalog are held in the two
/// injected caches, which outlive any one `NetcdfDataset` and are shared by
/// all of them.
#[derive(Debug)]
pub struct NetcdfDataset {
    pattern: String,
    fileset: FileSet,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    dir_cache: Arc<DirCache>,
    schema_cache: Arc<SchemaCache>,
}

impl NetcdfDataset {
    /// Create a dataset for `pattern` over `[start, end)`.
    pub fn new(
        pattern: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        dir_cache: &Arc<DirCache>,
        schema_cache: &Arc<SchemaCache>,
    ) -> Result<NetcdfDataset, NcSeriesErr> {
        let fileset = FileSet::new(pattern, dir_cache)?;
        Ok(NetcdfDataset {
            pattern: pattern.to_string(),
            fileset,
            start,
            end,
            dir_cache: Arc::clone(dir_cache),
            schema_cache: Arc::clone(schema_cache),
        })
    }

    /// The path pattern this dataset was built from.
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Start of the dataset's window.
    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    /// End of the dataset's window, exclusive.
    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    /// The files currently covering the window, sorted by time, including
    /// the one file preceding the window start.
    pub fn get_files(&self) -> Result<Vec<MatchedFile>, NcSeriesErr> {
        self.fileset.scan(self.start, self.end, &self.dir_cache)
    }

    /// Paths of the files covering the window.
    pub fn get_filepaths(&self) -> Result<Vec<PathBuf>, NcSeriesErr> {
        Ok(self.get_files()?.into_iter().map(|f| f.path).collect())
    }

    /// The cached catalog for this dataset's pattern and window, or an
    /// empty one.
    pub(crate) fn info(&self) -> DatasetInfo {
        self.schema_cache
            .get(&self.pattern, self.start, self.end)
            .unwrap_or_default()
    }

    pub(crate) fn save_info(&self, info: DatasetInfo) {
        self.schema_cache
            .save(&self.pattern, self.start, self.end, info);
    }

    /// Open a file, retrying transient I/O failures with increasing
    /// backoff. Returns `None` when the file stays unreadable or is not
    /// valid NetCDF; the caller moves on to the next file.
    pub(crate) fn open_with_retry(&self, path: &Path) -> Option<NcFile> {
        for itry in 1..=OPEN_TRIES {
            match NcFile::open(path) {
                Ok(nc) => return Some(nc),
                Err(NcSeriesErr::IO(err)) => {
                    if itry < OPEN_TRIES {
                        warn!("open {:?} attempt {}: {}, retrying", path, itry, err);
                        thread::sleep(Duration::from_secs(itry as u64));
                    } else {
                        error!("open {:?} failed after {} attempts: {}", path, OPEN_TRIES, err);
                    }
                }
                Err(err) => {
                    error!("skipping {:?}: {}", path, err);
                    return None;
                }
            }
        }
        None
    }
}
