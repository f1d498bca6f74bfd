//! Building the variable catalog by scanning a dataset's files.
//!
//! Headers from every file in the window are unified into one catalog.
//! Files disagree in practice: a dimension grows between deployments, a
//! variable gains or loses a dimension, attributes get edited. The
//! reconciliation rules here widen where that is safe and drop the
//! variable where it is not.

use std::collections::{HashMap, HashSet};
use std::fs;

use log::{debug, error, info, warn};

use super::{NetcdfDataset, DEFAULT_TIME_NAMES, MAX_NUM_FILES_TO_PRESCAN, TIME_DIM_NAMES};
use crate::errors::NcSeriesErr;
use crate::fileset::MatchedFile;
use crate::nc3::{AttrValue, NcFile, NcType};
use crate::schema::{isfs_site, DatasetInfo, VariableInfo};

impl NetcdfDataset {
    /// The unified variable catalog, exported name to entry.
    pub fn get_variables(&self) -> Result<HashMap<String, VariableInfo>, NcSeriesErr> {
        Ok(self.scan_files()?.variables)
    }

    /// Station names, synthesized ordinals when the files name none.
    pub fn get_station_names(&self) -> Result<Vec<String>, NcSeriesErr> {
        Ok(self.scan_files()?.station_names)
    }

    /// Short site name to long site name, from the `sites` and
    /// `site_long_name` variables when present.
    pub fn get_sites(&self) -> Result<HashMap<String, String>, NcSeriesErr> {
        Ok(self.scan_files()?.sites)
    }

    pub(crate) fn scan_files(&self) -> Result<DatasetInfo, NcSeriesErr> {
        self.scan_files_with(&DEFAULT_TIME_NAMES)
    }

    /// Scan the window's files, refreshing the cached catalog. Files whose
    /// modification time is unchanged since the last scan are not re-opened
    /// but still count as read.
    pub(crate) fn scan_files_with(&self, time_names: &[&str]) -> Result<DatasetInfo, NcSeriesErr> {
        let all = self.get_files()?;
        let mut candidates: Vec<MatchedFile> = all
            .iter()
            .filter(|f| f.time >= self.start && f.time < self.end)
            .cloned()
            .collect();
        if candidates.is_empty() {
            // only the file preceding the window matched
            candidates = all;
        }

        // newest first, so the newest file's attributes win reconciliation
        candidates.reverse();
        let picked: Vec<&MatchedFile> = if candidates.len() > MAX_NUM_FILES_TO_PRESCAN {
            let skip = candidates.len() as f64 / MAX_NUM_FILES_TO_PRESCAN as f64;
            (0..MAX_NUM_FILES_TO_PRESCAN)
                .map(|k| &candidates[(k as f64 * skip) as usize])
                .collect()
        } else {
            candidates.iter().collect()
        };

        let mut local = self.info();
        let mut dropped: HashSet<String> = HashSet::new();
        let mut n_files_read = 0_usize;

        for mf in picked {
            let modtime = match fs::metadata(&mf.path).and_then(|m| m.modified()) {
                Ok(t) => t,
                Err(err) => {
                    warn!("cannot stat {:?}: {}", mf.path, err);
                    continue;
                }
            };
            if local.file_mod_times.get(&mf.path) == Some(&modtime) {
                n_files_read += 1;
                continue;
            }

            let mut nc = match self.open_with_retry(&mf.path) {
                Some(nc) => nc,
                None => continue,
            };
            n_files_read += 1;
            local.file_mod_times.insert(mf.path.clone(), modtime);

            scan_one(&mut nc, &mut local, &mut dropped, time_names);
        }

        if n_files_read == 0 {
            return Err(NcSeriesErr::NoData(format!(
                "no variables found for {}",
                self.pattern
            )));
        }

        local.has_station_variables = match local.station_dim.as_deref() {
            Some(sd) => local
                .variables
                .values()
                .any(|v| v.dimnames.iter().any(|d| d == sd)),
            None => false,
        };
        if !local.has_station_variables {
            local.station_dim = None;
            local.station_names.clear();
            local.nstations = 0;
        } else if local.station_names.len() < local.nstations {
            // files without a name variable get ordinal station names
            for i in local.station_names.len()..local.nstations {
                local.station_names.push(format!("S{}", i + 1));
            }
        }

        self.save_info(local.clone());
        Ok(local)
    }
}

fn scan_one(nc: &mut NcFile, info: &mut DatasetInfo, dropped: &mut HashSet<String>, time_names: &[&str]) {
    let time_dim = match TIME_DIM_NAMES.iter().find(|&&d| nc.dimension(d).is_some()) {
        Some(d) => d.to_string(),
        None => {
            warn!("file has no time dimension, skipping its variables");
            return;
        }
    };
    if info.time_dim.is_none() {
        info.time_dim = Some(time_dim.clone());
    }

    if info.base_time.is_none() {
        if let Some(var) = nc.variable("base_time") {
            if var.dimids.is_empty() {
                info.base_time = Some("base_time".to_string());
            }
        }
    }

    if info.time_name.is_none() {
        info.time_name = time_names
            .iter()
            .find(|&&n| {
                nc.variable(n)
                    .map_or(false, |v| nc.dim_names(v).contains(&time_dim))
            })
            .map(|n| n.to_string());
    }

    if let Some(dim) = nc.dimension("station") {
        if info.nstations != 0 && info.nstations != dim.len {
            warn!(
                "station dimension length changed across files: {} vs {}",
                info.nstations, dim.len
            );
        }
        info.nstations = info.nstations.max(dim.len);
        info.station_dim = Some("station".to_string());
    }

    scan_char_variables(nc, info);

    let vars: Vec<_> = nc.variables().to_vec();
    for var in vars {
        if var.vtype == NcType::Char {
            debug!("not cataloging character variable '{}'", var.name);
            continue;
        }
        if var.name == "base_time" || time_names.contains(&var.name.as_str()) {
            continue;
        }

        let dimnames = nc.dim_names(&var);
        let time_index = match dimnames.iter().position(|d| *d == time_dim) {
            Some(i) => i,
            None => continue,
        };

        let exported = var
            .attr("short_name")
            .and_then(AttrValue::as_text)
            .map(|s| s.trim().to_string())
            .unwrap_or_else(|| var.name.clone());
        if dropped.contains(&exported) {
            continue;
        }

        let mut shape = nc.shape_of(&var);
        shape[time_index] = 0;

        let entry = VariableInfo {
            nc_name: var.name.clone(),
            shape,
            dimnames,
            dtype: var.vtype,
            units: var
                .attr("units")
                .and_then(AttrValue::as_text)
                .map(|s| s.trim().to_string()),
            long_name: var
                .attr("long_name")
                .and_then(AttrValue::as_text)
                .map(|s| s.trim().to_string()),
            time_index,
            site: isfs_site(&exported).map(str::to_string),
        };

        match info.variables.get_mut(&exported) {
            None => {
                info.variables.insert(exported, entry);
            }
            Some(existing) => {
                if !reconcile(&exported, existing, &entry) {
                    info.variables.remove(&exported);
                    dropped.insert(exported);
                }
            }
        }
    }
}

/// Fold an older file's view of a variable into the existing catalog
/// entry. Returns false when the views cannot be unified and the variable
/// must be dropped.
fn reconcile(name: &str, existing: &mut VariableInfo, older: &VariableInfo) -> bool {
    if existing.dimnames.len() != older.dimnames.len() {
        error!(
            "variable '{}' changes rank across files ({} vs {}), dropping it",
            name,
            existing.dimnames.len(),
            older.dimnames.len()
        );
        return false;
    }
    if existing.time_index != older.time_index {
        error!("variable '{}' moves its time dimension across files, dropping it", name);
        return false;
    }

    let last = existing.shape.len() - 1;
    for i in 0..existing.shape.len() {
        if i == existing.time_index {
            continue;
        }
        if existing.dimnames[i] != older.dimnames[i] {
            error!(
                "variable '{}' changes dimension '{}' to '{}' across files, dropping it",
                name, existing.dimnames[i], older.dimnames[i]
            );
            return false;
        }
        if existing.shape[i] != older.shape[i] {
            if i == last {
                // a grown trailing dimension is readable everywhere, with
                // sentinel padding for the narrower files
                existing.shape[i] = existing.shape[i].max(older.shape[i]);
            } else {
                error!(
                    "variable '{}' changes interior dimension '{}' length across files, dropping it",
                    name, existing.dimnames[i]
                );
                return false;
            }
        }
    }

    if existing.dtype != older.dtype {
        warn!(
            "variable '{}' changes type across files ({} vs {}), keeping {}",
            name, existing.dtype, older.dtype, existing.dtype
        );
    }
    if existing.units != older.units {
        info!(
            "variable '{}' units changed across files, keeping the newest ({:?})",
            name, existing.units
        );
    }
    if existing.long_name != older.long_name {
        info!("variable '{}' long_name changed across files, keeping the newest", name);
    }

    true
}

/// Pull station and site names out of the file's character variables.
fn scan_char_variables(nc: &mut NcFile, info: &mut DatasetInfo) {
    let station_dim = match info.station_dim.clone() {
        Some(sd) => sd,
        None => return,
    };

    let char_vars: Vec<String> = nc
        .variables()
        .iter()
        .filter(|v| v.vtype == NcType::Char)
        .map(|v| v.name.clone())
        .collect();

    for name in char_vars {
        let first_dim = nc
            .variable(&name)
            .map(|v| nc.dim_names(v))
            .and_then(|d| d.first().cloned());
        if first_dim.as_deref() != Some(station_dim.as_str()) {
            continue;
        }

        match name.as_str() {
            "sites" | "site_long_name" => {}
            _ => {
                if info.station_names.is_empty() {
                    match nc.read_strings(&name) {
                        Ok(names) => info.station_names = names,
                        Err(err) => warn!("cannot read station names from '{}': {}", name, err),
                    }
                }
            }
        }
    }

    if info.sites.is_empty() {
        let shorts = nc
            .variable("sites")
            .is_some()
            .then(|| nc.read_strings("sites"));
        let longs = nc
            .variable("site_long_name")
            .is_some()
            .then(|| nc.read_strings("site_long_name"));
        if let (Some(Ok(shorts)), Some(Ok(longs))) = (shorts, longs) {
            info.sites = shorts.into_iter().zip(longs).collect();
        }
    }
}
