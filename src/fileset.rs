//! Sets of time-stamped files named by a path pattern.
//!
//! A `FileSet` turns a pattern like `/data/acme/%Y/xxx_%Y%m%d.nc` into the
//! list of concrete files covering a time window. Directory listings are
//! expensive over NFS, so every directory visited is cached process-wide in a
//! [`DirCache`] and only re-listed when its modification time advances.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use log::{debug, warn};

use crate::errors::NcSeriesErr;
use crate::pattern::{glob_match, globify_time_descriptors, parse_path_time};

/// A directory that sat unmodified this long after its recorded mtime gets
/// one forced re-listing, in case a writer and the reader clock disagree.
const DOUBLE_CHECK_SECS: u64 = 10;

/// A concrete file matched by a pattern, with the UTC time parsed from its
/// name.
#[derive(Debug, Clone)]
pub struct MatchedFile {
    /// Path of the matched file.
    pub path: PathBuf,
    /// The pattern it was matched against.
    pub pattern: String,
    /// Time parsed from the path, UTC.
    pub time: DateTime<Utc>,
}

impl MatchedFile {
    fn new(path: PathBuf, pattern: &str) -> Result<MatchedFile, NcSeriesErr> {
        let path_str = path.to_string_lossy();
        let time = parse_path_time(&path_str, pattern)?;
        Ok(MatchedFile {
            path,
            pattern: pattern.to_string(),
            time,
        })
    }
}

/// Snapshot of one listed directory.
#[derive(Debug, Default)]
struct DirState {
    /// Directory mtime at the last listing.
    modtime: Option<SystemTime>,
    /// Whether the post-quiet-period re-listing has been done.
    double_checked: bool,
    files: Vec<MatchedFile>,
    subdirs: Vec<Arc<DirNode>>,
}

/// One directory in a file set hierarchy, cached with the pattern components
/// remaining below it.
#[derive(Debug)]
pub struct DirNode {
    path: PathBuf,
    /// Pattern components below this directory, first one names our children.
    rem: Vec<String>,
    /// The full original pattern, used to parse file times.
    pattern: String,
    state: Mutex<DirState>,
}

impl DirNode {
    /// Return the matched files under this directory, re-listing only when
    /// the directory mtime has advanced (or once more after the quiet
    /// period, to sidestep NFS attribute-cache staleness).
    ///
    /// A missing directory is an error here; callers above the root of the
    /// recursion treat a vanished subdirectory as skippable.
    fn scan(&self, cache: &DirCache) -> Result<Vec<MatchedFile>, NcSeriesErr> {
        let modtime = fs::metadata(&self.path)?.modified()?;

        let (files, subdirs) = {
            let mut state = self.state.lock().map_err(|_| {
                NcSeriesErr::LogicError("poisoned directory cache lock")
            })?;

            let changed = state.modtime != Some(modtime);
            let quiet = SystemTime::now() > modtime + Duration::from_secs(DOUBLE_CHECK_SECS);
            if changed || (!state.double_checked && quiet) {
                let (files, subdirs) = self.list(cache)?;
                state.modtime = Some(modtime);
                // an mtime-driven re-list leaves the double-check pending
                state.double_checked = !changed && quiet;
                state.files = files;
                state.subdirs = subdirs;
            }

            (state.files.clone(), state.subdirs.clone())
        };

        let mut all = files;
        for sub in subdirs.iter() {
            match sub.scan(cache) {
                Ok(mut sub_files) => all.append(&mut sub_files),
                // a subdirectory that vanished between listings
                Err(NcSeriesErr::IO(err)) => {
                    warn!("skipping {:?}: {}", sub.path, err);
                }
                Err(err) => return Err(err),
            }
        }

        Ok(all)
    }

    /// Read the directory once and partition matching children into files
    /// and cached subdirectory nodes.
    fn list(&self, cache: &DirCache) -> Result<(Vec<MatchedFile>, Vec<Arc<DirNode>>), NcSeriesErr> {
        cache.listings.fetch_add(1, Ordering::Relaxed);

        let glob = globify_time_descriptors(&self.rem[0]);
        let want_dirs = self.rem.len() > 1;

        let mut files = vec![];
        let mut subdirs = vec![];

        for entry in fs::read_dir(&self.path)? {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    warn!("unreadable entry in {:?}: {}", self.path, err);
                    continue;
                }
            };
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if !glob_match(&name, &glob) {
                continue;
            }

            let is_dir = match entry.file_type() {
                Ok(ft) => ft.is_dir(),
                Err(err) => {
                    warn!("cannot stat {:?}: {}", entry.path(), err);
                    continue;
                }
            };

            if want_dirs {
                if is_dir {
                    subdirs.push(cache.node(entry.path(), &self.rem[1..], &self.pattern));
                }
            } else if !is_dir {
                match MatchedFile::new(entry.path(), &self.pattern) {
                    Ok(mf) => files.push(mf),
                    Err(err) => debug!("discarding {:?}: {}", entry.path(), err),
                }
            }
        }

        Ok((files, subdirs))
    }
}

/// Process-lifetime cache of directory nodes.
///
/// Shared by every `FileSet` the caller builds with it; each node carries
/// its own lock so unrelated directories never contend. The listing counter
/// is observable so tests can assert that unchanged directories are not
/// re-listed.
#[derive(Debug, Default)]
pub struct DirCache {
    nodes: Mutex<HashMap<(PathBuf, String), Arc<DirNode>>>,
    listings: AtomicU64,
}

impl DirCache {
    /// Create an empty cache behind an `Arc` for sharing.
    pub fn new() -> Arc<DirCache> {
        Arc::new(DirCache::default())
    }

    /// Total number of directory listings performed through this cache.
    pub fn listing_count(&self) -> u64 {
        self.listings.load(Ordering::Relaxed)
    }

    /// Fetch or create the node for `path` with `rem` still to match below
    /// it. Two patterns sharing a directory share the node only when their
    /// remainders agree.
    fn node(&self, path: PathBuf, rem: &[String], pattern: &str) -> Arc<DirNode> {
        let key = (path.clone(), rem.join("/"));
        let mut nodes = match self.nodes.lock() {
            Ok(nodes) => nodes,
            Err(poisoned) => poisoned.into_inner(),
        };
        Arc::clone(nodes.entry(key).or_insert_with(|| {
            Arc::new(DirNode {
                path,
                rem: rem.to_vec(),
                pattern: pattern.to_string(),
                state: Mutex::new(DirState::default()),
            })
        }))
    }
}

/// The set of files named by one path pattern.
#[derive(Debug, Clone)]
pub struct FileSet {
    pattern: String,
    root: Arc<DirNode>,
}

impl FileSet {
    /// Build a file set for `pattern`, rooted at the longest leading portion
    /// of the pattern containing no time descriptors.
    pub fn new(pattern: &str, cache: &Arc<DirCache>) -> Result<FileSet, NcSeriesErr> {
        let absolute = pattern.starts_with('/');
        let comps: Vec<&str> = pattern
            .split('/')
            .filter(|c| !c.is_empty() && *c != ".")
            .collect();
        if comps.is_empty() {
            return Err(NcSeriesErr::PathParse(format!("empty pattern '{}'", pattern)));
        }

        // everything from the first descriptor-bearing component on is
        // matched by listing; at minimum the file name component is
        let split = comps
            .iter()
            .position(|c| c.contains('%'))
            .unwrap_or(comps.len() - 1);

        let mut root_path = PathBuf::from(if absolute { "/" } else { "." });
        for comp in &comps[..split] {
            root_path.push(comp);
        }
        let rem: Vec<String> = comps[split..].iter().map(|c| c.to_string()).collect();

        // listed children carry the root path as a prefix (relative
        // patterns list as "./name"), so times are parsed against the
        // pattern joined the same way
        let mut joined = root_path.clone();
        for comp in rem.iter() {
            joined.push(comp);
        }
        let parse_pattern = joined.to_string_lossy().into_owned();

        let root = cache.node(root_path, &rem, &parse_pattern);
        Ok(FileSet {
            pattern: pattern.to_string(),
            root,
        })
    }

    /// The pattern this set was built from.
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// All files currently matching the pattern, sorted by time, trimmed to
    /// the window `[start, end)` plus the one file preceding `start` (its
    /// tail may still cover the start of the window).
    pub fn scan(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        cache: &DirCache,
    ) -> Result<Vec<MatchedFile>, NcSeriesErr> {
        let files = self.root.scan(cache)?;
        Ok(trim_window(files, start, end))
    }
}

/// Trim a candidate list to the query window.
///
/// Files at or past `end` are dropped, then everything before the last file
/// preceding `start`. A set of fewer than two candidates is returned whole:
/// with a single file there is no basis for deciding what part of the window
/// it covers without opening it.
pub(crate) fn trim_window(
    mut files: Vec<MatchedFile>,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Vec<MatchedFile> {
    files.sort_by_key(|f| f.time);
    if files.len() < 2 {
        return files;
    }

    files.retain(|f| f.time < end);
    let i = files
        .iter()
        .position(|f| f.time >= start)
        .unwrap_or(files.len());
    files.drain(..i.saturating_sub(1));
    files
}

#[cfg(test)]
mod unit {
    use super::*;

    use std::fs::File;
    use std::io::Write;
    use std::path::Path;

    use chrono::TimeZone;
    use tempdir::TempDir;

    fn utc_ymd_h(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).single().unwrap()
    }

    fn touch(path: &Path) {
        let mut f = File::create(path).unwrap();
        f.write_all(b"x").unwrap();
    }

    fn mf(y: i32, m: u32, d: u32) -> MatchedFile {
        MatchedFile {
            path: PathBuf::from(format!("data_{:04}{:02}{:02}.dat", y, m, d)),
            pattern: "data_%Y%m%d.dat".to_string(),
            time: utc_ymd_h(y, m, d, 0),
        }
    }

    #[test]
    fn window_keeps_one_preceding_file() {
        // files at T1 < T2 < T3, window [T2, T4)
        let files = vec![mf(2020, 1, 1), mf(2020, 1, 2), mf(2020, 1, 3)];
        let kept = trim_window(files, utc_ymd_h(2020, 1, 2, 0), utc_ymd_h(2020, 1, 4, 0));
        let days: Vec<u32> = kept.iter().map(|f| f.time.format("%d").to_string().parse().unwrap()).collect();
        assert_eq!(days, vec![1, 2, 3]);
    }

    #[test]
    fn window_drops_files_at_or_past_end() {
        let files = vec![mf(2020, 1, 1), mf(2020, 1, 2), mf(2020, 1, 3), mf(2020, 1, 4)];
        let kept = trim_window(files, utc_ymd_h(2020, 1, 1, 0), utc_ymd_h(2020, 1, 3, 0));
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].time, utc_ymd_h(2020, 1, 1, 0));
        assert_eq!(kept[1].time, utc_ymd_h(2020, 1, 2, 0));
    }

    #[test]
    fn window_daily_files_mid_day_boundaries() {
        let files = vec![
            mf(2020, 1, 1),
            mf(2020, 1, 2),
            mf(2020, 1, 3),
            mf(2020, 1, 4),
            mf(2020, 1, 5),
        ];
        // [Jan 2 12:00, Jan 4 06:00): Jan 2's file starts before the window
        // but is the preceding candidate once Jan 3 is the first at/after start
        let kept = trim_window(files, utc_ymd_h(2020, 1, 2, 12), utc_ymd_h(2020, 1, 4, 6));
        let days: Vec<String> = kept.iter().map(|f| f.time.format("%m%d").to_string()).collect();
        assert_eq!(days, vec!["0102", "0103", "0104"]);
    }

    #[test]
    fn small_sets_skip_the_window_trim() {
        let files = vec![mf(2020, 1, 1)];
        let kept = trim_window(files, utc_ymd_h(2020, 6, 1, 0), utc_ymd_h(2020, 6, 2, 0));
        assert_eq!(kept.len(), 1);
    }

    #[test]
    fn all_files_before_start_keeps_only_the_last() {
        let files = vec![mf(2020, 1, 1), mf(2020, 1, 2), mf(2020, 1, 3)];
        let kept = trim_window(files, utc_ymd_h(2020, 6, 1, 0), utc_ymd_h(2020, 6, 2, 0));
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].time, utc_ymd_h(2020, 1, 3, 0));
    }

    #[test]
    fn scan_finds_files_in_nested_year_dirs() {
        let tmp = TempDir::new("fileset").unwrap();
        let root = tmp.path();

        fs::create_dir(root.join("2019")).unwrap();
        fs::create_dir(root.join("2020")).unwrap();
        touch(&root.join("2019").join("x_20191231.nc"));
        touch(&root.join("2020").join("x_20200101.nc"));
        touch(&root.join("2020").join("x_20200102.nc"));
        touch(&root.join("2020").join("ignore_me.txt"));

        let pattern = format!("{}/%Y/x_%Y%m%d.nc", root.display());
        let cache = DirCache::new();
        let fset = FileSet::new(&pattern, &cache).unwrap();

        let files = fset
            .scan(utc_ymd_h(2019, 1, 1, 0), utc_ymd_h(2021, 1, 1, 0), &cache)
            .unwrap();
        let times: Vec<DateTime<Utc>> = files.iter().map(|f| f.time).collect();
        assert_eq!(
            times,
            vec![
                utc_ymd_h(2019, 12, 31, 0),
                utc_ymd_h(2020, 1, 1, 0),
                utc_ymd_h(2020, 1, 2, 0),
            ]
        );
    }

    #[test]
    fn unchanged_directories_are_not_relisted() {
        let tmp = TempDir::new("fileset").unwrap();
        let root = tmp.path();
        touch(&root.join("x_20200101.nc"));
        touch(&root.join("x_20200102.nc"));

        let pattern = format!("{}/x_%Y%m%d.nc", root.display());
        let cache = DirCache::new();
        let fset = FileSet::new(&pattern, &cache).unwrap();

        let start = utc_ymd_h(2020, 1, 1, 0);
        let end = utc_ymd_h(2020, 2, 1, 0);

        let files = fset.scan(start, end, &cache).unwrap();
        assert_eq!(files.len(), 2);
        let listed_once = cache.listing_count();
        assert_eq!(listed_once, 1);

        // nothing changed, the snapshot is reused
        let files = fset.scan(start, end, &cache).unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(cache.listing_count(), listed_once);

        // a new file advances the directory mtime and forces one re-listing
        touch(&root.join("x_20200103.nc"));
        let files = fset.scan(start, end, &cache).unwrap();
        assert_eq!(files.len(), 3);
        assert_eq!(cache.listing_count(), listed_once + 1);
    }

    fn backdate(path: &Path, secs: u64) {
        let f = File::open(path).unwrap();
        f.set_modified(SystemTime::now() - Duration::from_secs(secs))
            .unwrap();
    }

    #[test]
    fn quiet_directories_get_one_forced_relisting() {
        let tmp = TempDir::new("fileset").unwrap();
        let root = tmp.path();
        touch(&root.join("x_20200101.nc"));

        let pattern = format!("{}/x_%Y%m%d.nc", root.display());
        let cache = DirCache::new();
        let fset = FileSet::new(&pattern, &cache).unwrap();
        let start = utc_ymd_h(2020, 1, 1, 0);
        let end = utc_ymd_h(2020, 2, 1, 0);

        fset.scan(start, end, &cache).unwrap();
        assert_eq!(cache.listing_count(), 1);

        // a moved mtime forces a re-list and leaves the double-check pending
        backdate(root, 60);
        fset.scan(start, end, &cache).unwrap();
        assert_eq!(cache.listing_count(), 2);

        // unchanged and past the quiet period: the one forced re-list
        fset.scan(start, end, &cache).unwrap();
        assert_eq!(cache.listing_count(), 3);

        // after the double-check the snapshot is stable
        fset.scan(start, end, &cache).unwrap();
        assert_eq!(cache.listing_count(), 3);
    }

    #[test]
    fn relative_patterns_scan_from_the_working_directory() {
        let tmp = TempDir::new("fileset").unwrap();
        std::env::set_current_dir(tmp.path()).unwrap();
        touch(Path::new("x_20200101.nc"));

        let cache = DirCache::new();
        let fset = FileSet::new("x_%Y%m%d.nc", &cache).unwrap();
        let files = fset
            .scan(utc_ymd_h(2020, 1, 1, 0), utc_ymd_h(2020, 2, 1, 0), &cache)
            .unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].time, utc_ymd_h(2020, 1, 1, 0));
    }

    #[test]
    fn vanished_root_directory_is_an_error() {
        let cache = DirCache::new();
        let fset = FileSet::new("/no/such/dir/x_%Y%m%d.nc", &cache).unwrap();
        let res = fset.scan(utc_ymd_h(2020, 1, 1, 0), utc_ymd_h(2020, 2, 1, 0), &cache);
        assert!(matches!(res, Err(NcSeriesErr::IO(_))));
    }

    #[test]
    fn two_filesets_share_cached_nodes() {
        let tmp = TempDir::new("fileset").unwrap();
        let root = tmp.path();
        touch(&root.join("x_20200101.nc"));

        let pattern = format!("{}/x_%Y%m%d.nc", root.display());
        let cache = DirCache::new();
        let a = FileSet::new(&pattern, &cache).unwrap();
        let b = FileSet::new(&pattern, &cache).unwrap();

        let start = utc_ymd_h(2020, 1, 1, 0);
        let end = utc_ymd_h(2020, 2, 1, 0);
        a.scan(start, end, &cache).unwrap();
        b.scan(start, end, &cache).unwrap();
        assert_eq!(cache.listing_count(), 1);
    }
}
