//! Reading time series across a dataset's files.
//!
//! Each file contributes the slice of its samples falling in the query
//! window; slices are concatenated along the time axis in file order. A
//! file that lacks a requested variable contributes a sentinel-filled block
//! of the catalog shape instead, so every variable stays aligned with the
//! shared timestamps.

use std::collections::{BTreeMap, HashMap};
use std::ops::Range;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use log::{debug, warn};

use super::{NetcdfDataset, DEFAULT_SIZE_LIMIT};
use crate::errors::NcSeriesErr;
use crate::nc3::{AttrValue, NcFile};
use crate::schema::{DatasetInfo, VariableInfo};
use crate::timeseries::{DataArray, Dim2, SeriesData};

/// A time-series read: which variables, over what window, with optional
/// dimension sub-setting and series bucketing.
#[derive(Debug, Clone)]
pub struct ReadRequest {
    /// Exported names of the variables to read.
    pub variables: Vec<String>,
    /// Start of the window, inclusive.
    pub start: DateTime<Utc>,
    /// End of the window, exclusive.
    pub end: DateTime<Utc>,
    /// Indices to keep per dimension name; an empty index list skips every
    /// variable using that dimension.
    pub selectdim: HashMap<String, Vec<usize>>,
    /// Byte budget; exceeding it aborts the whole read.
    pub size_limit: usize,
    /// When set, only series with these names are read.
    pub series: Option<Vec<String>>,
    /// strftime format applied to each file's time to name its series;
    /// unset puts everything in one series named "".
    pub series_name_fmt: Option<String>,
}

impl ReadRequest {
    /// A request for `variables` over `[start, end)` with defaults for the
    /// rest.
    pub fn new(variables: &[&str], start: DateTime<Utc>, end: DateTime<Utc>) -> ReadRequest {
        ReadRequest {
            variables: variables.iter().map(|s| s.to_string()).collect(),
            start,
            end,
            selectdim: HashMap::new(),
            size_limit: DEFAULT_SIZE_LIMIT,
            series: None,
            series_name_fmt: None,
        }
    }
}

/// The per-file slice shape of one variable after sub-setting, time axis
/// excluded.
#[derive(Debug, Clone)]
struct ResolvedShape {
    shape: Vec<usize>,
    /// Names of the kept non-time axes, aligned with `shape`.
    dimnames: Vec<String>,
    /// Where the time axis sits in the final arrays.
    time_index: usize,
}

impl NetcdfDataset {
    /// Read the requested variables over the request window, grouped into
    /// named series.
    ///
    /// Returns `NoData` when no timestamps fall in the window at all, and
    /// `TooMuchData` (with nothing else) when the running size estimate
    /// exceeds the request's byte budget.
    pub fn read_time_series(
        &self,
        request: &ReadRequest,
    ) -> Result<BTreeMap<String, SeriesData>, NcSeriesErr> {
        let info = self.scan_files()?;

        let mut resolved: HashMap<String, ResolvedShape> = HashMap::new();
        for name in request.variables.iter() {
            match info.variables.get(name) {
                Some(vinfo) => match resolve(vinfo, &request.selectdim) {
                    Some(res) => {
                        resolved.insert(name.clone(), res);
                    }
                    None => debug!("empty selection for '{}', skipping it", name),
                },
                None => warn!("requested variable '{}' is not in the dataset", name),
            }
        }

        let files = self.get_files()?;
        let mut out: BTreeMap<String, SeriesData> = BTreeMap::new();
        let mut total_bytes = 0_usize;

        for mf in files {
            let series_name = match &request.series_name_fmt {
                Some(fmt) => mf.time.format(fmt).to_string(),
                None => String::new(),
            };
            if let Some(filter) = &request.series {
                if !filter.iter().any(|s| *s == series_name) {
                    continue;
                }
            }

            let mut nc = match self.open_with_retry(&mf.path) {
                Some(nc) => nc,
                None => continue,
            };

            let (times, trange) = match read_times(&mut nc, &info, request.start, request.end)? {
                Some(x) => x,
                None => continue,
            };
            let ntimes = times.len();

            if total_bytes + ntimes * 8 > request.size_limit {
                return Err(over_budget(request));
            }
            total_bytes += ntimes * 8;

            let entry = out.entry(series_name).or_insert_with(SeriesData::default);
            entry.time.extend_from_slice(&times);

            for name in request.variables.iter() {
                let vinfo = match info.variables.get(name) {
                    Some(vinfo) => vinfo,
                    None => continue,
                };
                let res = match resolved.get(name) {
                    Some(res) => res,
                    None => continue,
                };

                let slice_bytes =
                    ntimes * res.shape.iter().product::<usize>() * vinfo.dtype.itemsize();
                if total_bytes + slice_bytes > request.size_limit {
                    return Err(over_budget(request));
                }

                let arr = read_one_variable(&mut nc, vinfo, res, &trange, ntimes, request);

                match entry.vmap.get(name).copied() {
                    Some(idx) => entry.data[idx].append(arr, res.time_index)?,
                    None => {
                        entry.vmap.insert(name.clone(), entry.data.len());
                        entry.data.push(arr);
                        describe_dimensions(entry, name, vinfo, res, &info, request);
                    }
                }
                total_bytes += slice_bytes;
            }
        }

        out.retain(|_, s| !s.time.is_empty());
        if out.is_empty() {
            return Err(NcSeriesErr::NoData(format!(
                "no data found between {} and {}",
                request.start, request.end
            )));
        }
        Ok(out)
    }
}

fn over_budget(request: &ReadRequest) -> NcSeriesErr {
    NcSeriesErr::TooMuchData(format!(
        "read of {:?} exceeds the size limit of {} bytes",
        request.variables, request.size_limit
    ))
}

/// Work out the per-file slice shape of `vinfo` under the request's
/// selectors. The "sample" dimension collapses to its first element, kept
/// axes of length one are squeezed out, and an empty selector excludes the
/// variable entirely (`None`).
fn resolve(vinfo: &VariableInfo, selectdim: &HashMap<String, Vec<usize>>) -> Option<ResolvedShape> {
    let mut shape = vec![];
    let mut dimnames = vec![];
    let mut time_index = 0;

    for (i, (dim, &len)) in vinfo.dimnames.iter().zip(vinfo.shape.iter()).enumerate() {
        if i == vinfo.time_index {
            time_index = shape.len();
            continue;
        }
        if dim == "sample" {
            continue;
        }
        let len = match selectdim.get(dim) {
            Some(sel) if sel.is_empty() => return None,
            Some(sel) => sel.len(),
            None => len,
        };
        if len == 1 {
            continue;
        }
        shape.push(len);
        dimnames.push(dim.clone());
    }

    Some(ResolvedShape {
        shape,
        dimnames,
        time_index,
    })
}

/// The sentinel block standing in for a variable a file does not carry.
fn filled(vinfo: &VariableInfo, res: &ResolvedShape, ntimes: usize) -> DataArray {
    let mut shape = res.shape.clone();
    shape.insert(res.time_index, ntimes);
    DataArray::fill(vinfo.dtype, &shape)
}

/// Read one variable's window slice from an open file, falling back to a
/// sentinel fill when the file lacks the variable or disagrees with the
/// catalog about its layout.
fn read_one_variable(
    nc: &mut NcFile,
    vinfo: &VariableInfo,
    res: &ResolvedShape,
    trange: &Range<usize>,
    ntimes: usize,
    request: &ReadRequest,
) -> DataArray {
    let missing = match nc.variable(&vinfo.nc_name) {
        Some(var) if nc.dim_names(var) == vinfo.dimnames => var
            .attr("missing_value")
            .or_else(|| var.attr("_FillValue"))
            .and_then(AttrValue::as_f64),
        Some(_) => {
            warn!(
                "variable '{}' has unexpected dimensions in this file, filling",
                vinfo.nc_name
            );
            return filled(vinfo, res, ntimes);
        }
        None => return filled(vinfo, res, ntimes),
    };

    let raw = match nc.read_values(&vinfo.nc_name) {
        Ok(raw) => raw,
        Err(err) => {
            warn!("cannot read '{}': {}, filling", vinfo.nc_name, err);
            return filled(vinfo, res, ntimes);
        }
    };

    // narrower trailing dimensions were widened in the catalog
    let raw = if vinfo.shape.len() > 1 && vinfo.time_index != vinfo.shape.len() - 1 {
        raw.pad_last_dim(vinfo.shape[vinfo.shape.len() - 1])
    } else {
        raw
    };

    let mut arr = slice_file_array(raw, vinfo, trange, &request.selectdim);
    if let Some(mv) = missing {
        arr.replace_missing(mv);
    }
    let arr = arr.cast_to(vinfo.dtype);

    let mut want = res.shape.clone();
    want.insert(res.time_index, ntimes);
    if arr.shape() != want.as_slice() {
        warn!(
            "variable '{}' sliced to {:?} instead of {:?}, filling",
            vinfo.nc_name,
            arr.shape(),
            want
        );
        return filled(vinfo, res, ntimes);
    }
    arr
}

/// Apply the window slice and dimension sub-setting to a whole-variable
/// array. Axes are processed from last to first so earlier indices stay
/// valid as axes drop out.
fn slice_file_array(
    mut arr: DataArray,
    vinfo: &VariableInfo,
    trange: &Range<usize>,
    selectdim: &HashMap<String, Vec<usize>>,
) -> DataArray {
    let mut time_axis = vinfo.time_index;

    for axis in (0..vinfo.dimnames.len()).rev() {
        if axis == vinfo.time_index {
            arr = arr.slice_axis(axis, trange.clone());
            continue;
        }
        let dim = &vinfo.dimnames[axis];
        if dim == "sample" {
            arr = arr.index_axis(axis, 0);
            if axis < time_axis {
                time_axis -= 1;
            }
            continue;
        }
        if let Some(sel) = selectdim.get(dim) {
            let dimlen = arr.shape()[axis];
            let sel: Vec<usize> = sel.iter().copied().filter(|&i| i < dimlen).collect();
            arr = arr.select(axis, &sel);
        }
    }

    // squeeze non-time axes of length one
    for axis in (0..arr.ndim()).rev() {
        if axis == time_axis || arr.shape()[axis] != 1 {
            continue;
        }
        arr = arr.index_axis(axis, 0);
        if axis < time_axis {
            time_axis -= 1;
        }
    }

    arr
}

/// Record the station names and secondary-dimension descriptor for a
/// variable the first time it lands in a series.
fn describe_dimensions(
    entry: &mut SeriesData,
    name: &str,
    vinfo: &VariableInfo,
    res: &ResolvedShape,
    info: &DatasetInfo,
    request: &ReadRequest,
) {
    let station_dim = info
        .station_dim
        .as_deref()
        .filter(|sd| vinfo.dimnames.iter().any(|d| d == sd));

    match station_dim {
        Some(sd) => {
            let sel = request.selectdim.get(sd);
            let names: Vec<String> = match sel {
                Some(sel) => sel
                    .iter()
                    .filter_map(|&i| info.station_names.get(i).cloned())
                    .collect(),
                None => info.station_names.clone(),
            };
            let numbers: Vec<f64> = match sel {
                Some(sel) => sel.iter().map(|&i| (i + 1) as f64).collect(),
                None => (1..=info.nstations).map(|i| i as f64).collect(),
            };
            entry.stations.insert(name.to_string(), names);
            if res.dimnames.iter().any(|d| d == sd) {
                entry.dim2.insert(
                    name.to_string(),
                    Dim2 {
                        name: sd.to_string(),
                        units: String::new(),
                        data: numbers,
                    },
                );
            }
        }
        None => {
            entry.stations.insert(name.to_string(), vec![String::new()]);
            if let (Some(dname), Some(&len)) = (res.dimnames.first(), res.shape.first()) {
                entry.dim2.insert(
                    name.to_string(),
                    Dim2 {
                        name: dname.clone(),
                        units: String::new(),
                        data: (0..len).map(|i| i as f64).collect(),
                    },
                );
            }
        }
    }
}

/// Decode the time variable and locate the window's index range.
///
/// Returns the absolute times (UTC epoch seconds) of the in-window samples
/// along with their index range, or `None` when this file contributes
/// nothing: no decodable time variable, nothing in the window, or times
/// out of order.
fn read_times(
    nc: &mut NcFile,
    info: &DatasetInfo,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<Option<(Vec<f64>, Range<usize>)>, NcSeriesErr> {
    let time_name = match &info.time_name {
        Some(name) => name.clone(),
        None => {
            warn!("dataset has no time variable");
            return Ok(None);
        }
    };
    let units = match nc.variable(&time_name) {
        Some(var) => var.attr("units").and_then(AttrValue::as_text).map(str::to_string),
        None => {
            warn!("file has no '{}' variable", time_name);
            return Ok(None);
        }
    };

    let raw = nc.read_values(&time_name)?.to_f64_vec();

    let decoded = units.as_deref().and_then(decode_time_units);
    let (base, mult) = match decoded {
        Some(bm) => bm,
        None => match base_time_of(nc, info) {
            Some(base) => (base, 1.0),
            None => {
                warn!(
                    "cannot decode time units {:?}, treating values as epoch seconds",
                    units
                );
                (0.0, 1.0)
            }
        },
    };
    let times: Vec<f64> = raw.iter().map(|&r| base + r * mult).collect();

    let start_e = start.timestamp() as f64;
    let end_e = end.timestamp() as f64;

    let istart = match times.iter().position(|&t| t >= start_e) {
        Some(i) => i,
        None => return Ok(None),
    };
    let iend = match times.iter().rposition(|&t| t < end_e) {
        Some(i) => i + 1,
        None => return Ok(None),
    };
    if iend <= istart {
        debug!("no samples in the window");
        return Ok(None);
    }

    let slice = &times[istart..iend];
    if slice.windows(2).any(|w| w[1] < w[0]) {
        warn!("time values are not monotonic, ignoring this file");
        return Ok(None);
    }

    Ok(Some((slice.to_vec(), istart..iend)))
}

/// The scalar base_time value, when the dataset has one and this file
/// carries it.
fn base_time_of(nc: &mut NcFile, info: &DatasetInfo) -> Option<f64> {
    let name = info.base_time.as_deref()?;
    nc.variable(name)?;
    nc.read_values(name).ok()?.to_f64_vec().first().copied()
}

/// Parse a "unit since base" time-units string into the base as UTC epoch
/// seconds and the multiplier to seconds.
///
/// The unit token and timezone suffix match case-insensitively, but the
/// base keeps its original case so an ISO `T` separator still parses.
fn decode_time_units(units: &str) -> Option<(f64, f64)> {
    let trimmed = units.trim();
    let lower = trimmed.to_ascii_lowercase();
    let idx = lower.find(" since ")?;

    let mult = match &lower[..idx] {
        u if u.starts_with("second") || u == "s" => 1.0,
        u if u.starts_with("minute") || u == "min" => 60.0,
        u if u.starts_with("hour") || u == "h" => 3600.0,
        u if u.starts_with("day") || u == "d" => 86400.0,
        _ => return None,
    };

    let mut base = trimmed[idx + " since ".len()..].trim();
    for suffix in [" utc", "z", "+00:00", "-00:00", " 00:00"] {
        let cut = base.len().wrapping_sub(suffix.len());
        let matched = base
            .get(cut..)
            .map_or(false, |tail| tail.eq_ignore_ascii_case(suffix));
        if matched {
            base = base[..cut].trim_end();
            break;
        }
    }

    const FORMATS: [&str; 4] = [
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M",
        "%Y-%m-%d %H",
    ];
    for fmt in FORMATS.iter() {
        if let Ok(ndt) = NaiveDateTime::parse_from_str(base, fmt) {
            return Some((ndt.and_utc().timestamp() as f64, mult));
        }
    }
    if let Ok(nd) = NaiveDate::parse_from_str(base, "%Y-%m-%d") {
        let ndt = nd.and_hms_opt(0, 0, 0)?;
        return Some((ndt.and_utc().timestamp() as f64, mult));
    }
    None
}

#[cfg(test)]
mod unit {
    use super::*;

    use tempdir::TempDir;

    use crate::fileset::DirCache;
    use crate::nc3::{NcType, NcValues, NcWriter};
    use crate::schema::SchemaCache;
    use crate::test_support::{epoch, utc, write_ts_file, TsVar};

    /// Five daily files of 24 hourly samples, variable "temp" carrying
    /// day*100 + hour.
    fn daily_archive(dir: &std::path::Path) {
        for day in 1..=5 {
            let times: Vec<f64> = (0..24).map(|h| (h * 3600) as f64).collect();
            let values: Vec<f64> = (0..24).map(|h| (day * 100 + h) as f64).collect();
            write_ts_file(
                &dir.join(format!("data_202001{:02}.dat", day)),
                &times,
                &format!("seconds since 2020-01-{:02} 00:00:00", day),
                vec![TsVar::new("temp", NcType::Double, NcValues::Double(values))],
            );
        }
    }

    fn dataset(dir: &TempDir, fmt: &str, start: DateTime<Utc>, end: DateTime<Utc>) -> NetcdfDataset {
        let pattern = format!("{}/{}", dir.path().display(), fmt);
        NetcdfDataset::new(&pattern, start, end, &DirCache::new(), &SchemaCache::new()).unwrap()
    }

    #[test]
    fn daily_files_with_mid_day_boundaries() {
        let tmp = TempDir::new("read").unwrap();
        daily_archive(tmp.path());

        let start = utc(2020, 1, 2, 12, 0, 0);
        let end = utc(2020, 1, 4, 6, 0, 0);
        let ds = dataset(&tmp, "data_%Y%m%d.dat", start, end);

        let out = ds
            .read_time_series(&ReadRequest::new(&["temp"], start, end))
            .unwrap();
        assert_eq!(out.len(), 1);
        let series = &out[""];

        // 12 from Jan 2, 24 from Jan 3, 6 from Jan 4
        assert_eq!(series.time.len(), 42);
        assert_eq!(series.time[0], epoch(2020, 1, 2, 12, 0, 0));
        assert_eq!(series.time[41], epoch(2020, 1, 4, 5, 0, 0));
        assert!(series.time.windows(2).all(|w| w[1] == w[0] + 3600.0));

        let temp = &series.data[series.vmap["temp"]];
        assert_eq!(temp.shape(), &[42]);
        let v = temp.to_f64_vec();
        assert_eq!(v[0], 212.0);
        assert_eq!(v[11], 223.0);
        assert_eq!(v[12], 300.0);
        assert_eq!(v[41], 405.0);
    }

    #[test]
    fn absent_variable_is_sentinel_filled() {
        let tmp = TempDir::new("read").unwrap();
        write_ts_file(
            &tmp.path().join("x_20200101.nc"),
            &[0.0, 3600.0],
            "seconds since 2020-01-01 00:00:00",
            vec![
                TsVar::new("a", NcType::Double, NcValues::Double(vec![1.0, 2.0])),
                TsVar::new("b", NcType::Float, NcValues::Float(vec![10.0, 20.0])),
            ],
        );
        write_ts_file(
            &tmp.path().join("x_20200102.nc"),
            &[0.0, 3600.0],
            "seconds since 2020-01-02 00:00:00",
            vec![TsVar::new("a", NcType::Double, NcValues::Double(vec![3.0, 4.0]))],
        );

        let start = utc(2020, 1, 1, 0, 0, 0);
        let end = utc(2020, 1, 3, 0, 0, 0);
        let ds = dataset(&tmp, "x_%Y%m%d.nc", start, end);

        let out = ds
            .read_time_series(&ReadRequest::new(&["a", "b"], start, end))
            .unwrap();
        let series = &out[""];
        assert_eq!(series.time.len(), 4);

        let a = series.data[series.vmap["a"]].to_f64_vec();
        assert_eq!(a, vec![1.0, 2.0, 3.0, 4.0]);

        let b = series.data[series.vmap["b"]].to_f64_vec();
        assert_eq!(b.len(), 4);
        assert_eq!(&b[..2], &[10.0, 20.0]);
        assert!(b[2].is_nan() && b[3].is_nan());
    }

    #[test]
    fn budget_overrun_returns_nothing() {
        let tmp = TempDir::new("read").unwrap();
        daily_archive(tmp.path());

        let start = utc(2020, 1, 1, 0, 0, 0);
        let end = utc(2020, 1, 6, 0, 0, 0);
        let ds = dataset(&tmp, "data_%Y%m%d.dat", start, end);

        let mut request = ReadRequest::new(&["temp"], start, end);
        request.size_limit = 100;
        let res = ds.read_time_series(&request);
        assert!(matches!(res, Err(NcSeriesErr::TooMuchData(_))));
    }

    #[test]
    fn series_buckets_by_file_time() {
        let tmp = TempDir::new("read").unwrap();
        daily_archive(tmp.path());

        let start = utc(2020, 1, 1, 0, 0, 0);
        let end = utc(2020, 1, 3, 0, 0, 0);
        let ds = dataset(&tmp, "data_%Y%m%d.dat", start, end);

        let mut request = ReadRequest::new(&["temp"], start, end);
        request.series_name_fmt = Some("%Y%m%d".to_string());
        let out = ds.read_time_series(&request).unwrap();

        let names: Vec<&String> = out.keys().collect();
        assert_eq!(names, vec!["20200101", "20200102"]);
        assert_eq!(out["20200101"].time.len(), 24);
        assert_eq!(out["20200102"].time.len(), 24);

        // an explicit series list restricts the buckets
        request.series = Some(vec!["20200102".to_string()]);
        let out = ds.read_time_series(&request).unwrap();
        assert_eq!(out.len(), 1);
        assert!(out.contains_key("20200102"));
    }

    #[test]
    fn station_selection_subsets_in_selector_order() {
        let tmp = TempDir::new("read").unwrap();
        let path = tmp.path().join("x_20200101.nc");

        let mut w = NcWriter::new();
        let t = w.add_record_dimension("time");
        let s = w.add_dimension("station", 3);
        let tv = w.add_variable("time", NcType::Double, &[t]);
        w.add_var_attr(
            tv,
            "units",
            AttrValue::Text("seconds since 2020-01-01 00:00:00".to_string()),
        );
        w.put_values(tv, NcValues::Double(vec![0.0, 3600.0]));
        let v = w.add_variable("counts", NcType::Int, &[t, s]);
        w.put_values(v, NcValues::Int(vec![1, 2, 3, 4, 5, 6]));
        w.write(&path).unwrap();

        let start = utc(2020, 1, 1, 0, 0, 0);
        let end = utc(2020, 1, 2, 0, 0, 0);
        let ds = dataset(&tmp, "x_%Y%m%d.nc", start, end);

        let mut request = ReadRequest::new(&["counts"], start, end);
        request
            .selectdim
            .insert("station".to_string(), vec![2, 0]);
        let out = ds.read_time_series(&request).unwrap();
        let series = &out[""];

        let counts = &series.data[series.vmap["counts"]];
        assert_eq!(counts.shape(), &[2, 2]);
        assert_eq!(counts.to_f64_vec(), vec![3.0, 1.0, 6.0, 4.0]);

        assert_eq!(series.stations["counts"], vec!["S3", "S1"]);
        let dim2 = &series.dim2["counts"];
        assert_eq!(dim2.name, "station");
        assert_eq!(dim2.data, vec![3.0, 1.0]);
    }

    #[test]
    fn empty_selection_skips_the_variable() {
        let tmp = TempDir::new("read").unwrap();
        write_ts_file(
            &tmp.path().join("x_20200101.nc"),
            &[0.0],
            "seconds since 2020-01-01 00:00:00",
            vec![
                TsVar::new("spec", NcType::Float, NcValues::Float(vec![1.0, 2.0])).dim("bin", 2),
                TsVar::new("a", NcType::Double, NcValues::Double(vec![7.0])),
            ],
        );

        let start = utc(2020, 1, 1, 0, 0, 0);
        let end = utc(2020, 1, 2, 0, 0, 0);
        let ds = dataset(&tmp, "x_%Y%m%d.nc", start, end);

        let mut request = ReadRequest::new(&["spec", "a"], start, end);
        request.selectdim.insert("bin".to_string(), vec![]);
        let out = ds.read_time_series(&request).unwrap();
        let series = &out[""];
        assert!(!series.vmap.contains_key("spec"));
        assert!(series.vmap.contains_key("a"));
    }

    #[test]
    fn sample_dimension_collapses_to_the_first_sample() {
        let tmp = TempDir::new("read").unwrap();
        write_ts_file(
            &tmp.path().join("x_20200101.nc"),
            &[0.0, 3600.0],
            "seconds since 2020-01-01 00:00:00",
            vec![TsVar::new(
                "fast",
                NcType::Double,
                NcValues::Double(vec![1.0, 1.1, 1.2, 2.0, 2.1, 2.2]),
            )
            .dim("sample", 3)],
        );

        let start = utc(2020, 1, 1, 0, 0, 0);
        let end = utc(2020, 1, 2, 0, 0, 0);
        let ds = dataset(&tmp, "x_%Y%m%d.nc", start, end);

        let out = ds
            .read_time_series(&ReadRequest::new(&["fast"], start, end))
            .unwrap();
        let series = &out[""];
        let fast = &series.data[series.vmap["fast"]];
        assert_eq!(fast.shape(), &[2]);
        assert_eq!(fast.to_f64_vec(), vec![1.0, 2.0]);
    }

    #[test]
    fn base_time_backs_up_undecodable_units() {
        let tmp = TempDir::new("read").unwrap();
        let path = tmp.path().join("x_20200101.nc");

        let bt = epoch(2020, 1, 1, 0, 0, 0);
        let mut w = NcWriter::new();
        let t = w.add_record_dimension("time");
        let btv = w.add_variable("base_time", NcType::Int, &[]);
        w.put_values(btv, NcValues::Int(vec![bt as i32]));
        let tv = w.add_variable("time", NcType::Double, &[t]);
        w.add_var_attr(tv, "units", AttrValue::Text("fortnights since then".to_string()));
        w.put_values(tv, NcValues::Double(vec![0.0, 60.0]));
        let v = w.add_variable("a", NcType::Double, &[t]);
        w.put_values(v, NcValues::Double(vec![1.0, 2.0]));
        w.write(&path).unwrap();

        let start = utc(2020, 1, 1, 0, 0, 0);
        let end = utc(2020, 1, 2, 0, 0, 0);
        let ds = dataset(&tmp, "x_%Y%m%d.nc", start, end);

        let out = ds
            .read_time_series(&ReadRequest::new(&["a"], start, end))
            .unwrap();
        let series = &out[""];
        assert_eq!(series.time, vec![bt, bt + 60.0]);
    }

    #[test]
    fn iso_time_units_decode_to_absolute_times() {
        let tmp = TempDir::new("read").unwrap();
        write_ts_file(
            &tmp.path().join("x_20200101.nc"),
            &[0.0, 1.0, 2.0],
            "hours since 2020-01-01T00:00:00",
            vec![TsVar::new("a", NcType::Double, NcValues::Double(vec![1.0, 2.0, 3.0]))],
        );

        let start = utc(2020, 1, 1, 0, 0, 0);
        let end = utc(2020, 1, 2, 0, 0, 0);
        let ds = dataset(&tmp, "x_%Y%m%d.nc", start, end);

        let out = ds
            .read_time_series(&ReadRequest::new(&["a"], start, end))
            .unwrap();
        let series = &out[""];
        let base = epoch(2020, 1, 1, 0, 0, 0);
        assert_eq!(series.time, vec![base, base + 3600.0, base + 7200.0]);
    }

    #[test]
    fn missing_values_become_nan() {
        let tmp = TempDir::new("read").unwrap();
        write_ts_file(
            &tmp.path().join("x_20200101.nc"),
            &[0.0, 3600.0],
            "seconds since 2020-01-01 00:00:00",
            vec![TsVar::new("a", NcType::Double, NcValues::Double(vec![1.0, -9999.0]))
                .attr("missing_value", AttrValue::Double(vec![-9999.0]))],
        );

        let start = utc(2020, 1, 1, 0, 0, 0);
        let end = utc(2020, 1, 2, 0, 0, 0);
        let ds = dataset(&tmp, "x_%Y%m%d.nc", start, end);

        let out = ds
            .read_time_series(&ReadRequest::new(&["a"], start, end))
            .unwrap();
        let a = out[""].data[0].to_f64_vec();
        assert_eq!(a[0], 1.0);
        assert!(a[1].is_nan());
    }

    #[test]
    fn unordered_times_drop_the_file() {
        let tmp = TempDir::new("read").unwrap();
        write_ts_file(
            &tmp.path().join("x_20200101.nc"),
            &[0.0, 7200.0, 3600.0],
            "seconds since 2020-01-01 00:00:00",
            vec![TsVar::new("a", NcType::Double, NcValues::Double(vec![1.0, 2.0, 3.0]))],
        );

        let start = utc(2020, 1, 1, 0, 0, 0);
        let end = utc(2020, 1, 2, 0, 0, 0);
        let ds = dataset(&tmp, "x_%Y%m%d.nc", start, end);

        let res = ds.read_time_series(&ReadRequest::new(&["a"], start, end));
        assert!(matches!(res, Err(NcSeriesErr::NoData(_))));
    }

    #[test]
    fn window_outside_the_data_is_no_data() {
        let tmp = TempDir::new("read").unwrap();
        write_ts_file(
            &tmp.path().join("x_20200101.nc"),
            &[0.0, 3600.0],
            "seconds since 2020-01-01 00:00:00",
            vec![TsVar::new("a", NcType::Double, NcValues::Double(vec![1.0, 2.0]))],
        );

        // the file matches the window trim as the lone candidate, but none
        // of its samples fall inside the window
        let start = utc(2020, 6, 1, 0, 0, 0);
        let end = utc(2020, 6, 2, 0, 0, 0);
        let ds = dataset(&tmp, "x_%Y%m%d.nc", start, end);

        let res = ds.read_time_series(&ReadRequest::new(&["a"], start, end));
        assert!(matches!(res, Err(NcSeriesErr::NoData(_))));
    }

    #[test]
    fn time_units_decode_variants() {
        let cases = [
            ("seconds since 2020-01-02 03:04:05", 1.0),
            ("minutes since 2020-01-02 03:04:05", 60.0),
            ("hours since 2020-01-02T03:04:05", 3600.0),
            ("Hours since 2020-01-02T03:04:05 UTC", 3600.0),
            ("days since 2020-01-02 03:04:05 UTC", 86400.0),
            ("seconds since 2020-01-02 03:04:05Z", 1.0),
        ];
        let want = epoch(2020, 1, 2, 3, 4, 5);
        for (units, mult) in cases.iter() {
            let (base, m) = decode_time_units(units).unwrap();
            assert_eq!(base, want, "units {}", units);
            assert_eq!(m, *mult, "units {}", units);
        }

        let (base, _) = decode_time_units("seconds since 2020-01-02").unwrap();
        assert_eq!(base, epoch(2020, 1, 2, 0, 0, 0));

        assert!(decode_time_units("furlongs since breakfast").is_none());
        assert!(decode_time_units("seconds").is_none());
    }
}
