//! Reading time series from a relational table.
//!
//! Aircraft ground stations push their samples into a SQLite table, one row
//! per timestamp, instead of writing files. This reader exposes the same
//! contract as the file-backed dataset: a variable list, timestamps in a
//! window, and window reads under a byte budget. Connection and query
//! failures all surface to the caller as the "no data" condition; budget
//! overruns surface as "too much data".

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use chrono::{DateTime, TimeZone, Utc};
use log::warn;
use ndarray::{ArrayD, IxDyn};
use rusqlite::types::Value;
use rusqlite::{params, Connection, OpenFlags};

use crate::errors::NcSeriesErr;
use crate::timeseries::{DataArray, Dim2, SeriesData};

/// A variable from the `variable_list` table.
#[derive(Debug, Clone)]
pub struct DbVariable {
    /// The `units` column.
    pub units: Option<String>,
    /// The `long_name` column.
    pub long_name: Option<String>,
    /// Declared per-sample shape, from the `dims` JSON column.
    pub shape: Vec<usize>,
    /// Values equal to this read back as NaN.
    pub missing_value: Option<f64>,
}

/// One data table of time-stamped samples, with its companion
/// `variable_list` table describing the columns.
#[derive(Debug)]
pub struct DatabaseSeries {
    conn: Connection,
    table: String,
}

impl DatabaseSeries {
    /// Open the database read-only and bind to `table`.
    pub fn connect(path: &Path, table: &str) -> Result<DatabaseSeries, NcSeriesErr> {
        check_identifier(table)?;
        let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)
            .map_err(no_data)?;
        Ok(DatabaseSeries {
            conn,
            table: table.to_string(),
        })
    }

    /// The variables this table carries, from `variable_list`.
    pub fn get_variables(&self) -> Result<HashMap<String, DbVariable>, NcSeriesErr> {
        let mut stmt = self
            .conn
            .prepare("SELECT name, units, long_name, dims, missing_value FROM variable_list")
            .map_err(no_data)?;

        let rows = stmt
            .query_map(params![], |row| {
                let name: String = row.get(0)?;
                let units: Option<String> = row.get(1)?;
                let long_name: Option<String> = row.get(2)?;
                let dims: Option<String> = row.get(3)?;
                let missing_value: Option<f64> = row.get(4)?;
                Ok((name, units, long_name, dims, missing_value))
            })
            .map_err(no_data)?;

        let mut vars = HashMap::new();
        for row in rows {
            let (name, units, long_name, dims, missing_value) = row.map_err(no_data)?;
            let shape = match dims.as_deref() {
                Some(json) => serde_json::from_str::<Vec<usize>>(json).unwrap_or_else(|err| {
                    warn!("bad dims for '{}': {}", name, err);
                    vec![1]
                }),
                None => vec![1],
            };
            vars.insert(
                name,
                DbVariable {
                    units,
                    long_name,
                    shape,
                    missing_value,
                },
            );
        }
        Ok(vars)
    }

    /// Timestamps in `[start, end)`, as UTC epoch seconds.
    pub fn read_times(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<f64>, NcSeriesErr> {
        let sql = format!(
            r#"SELECT datetime FROM "{}" WHERE datetime >= ?1 AND datetime < ?2 ORDER BY datetime"#,
            self.table
        );
        let mut stmt = self.conn.prepare(&sql).map_err(no_data)?;
        let rows = stmt
            .query_map(params![start.timestamp(), end.timestamp()], |row| {
                row.get::<_, i64>(0)
            })
            .map_err(no_data)?;

        let mut times = vec![];
        for row in rows {
            times.push(row.map_err(no_data)? as f64);
        }
        Ok(times)
    }

    /// The earliest timestamp in the table.
    pub fn get_start_time(&self) -> Result<DateTime<Utc>, NcSeriesErr> {
        let sql = format!(
            r#"SELECT datetime FROM "{}" ORDER BY datetime LIMIT 1"#,
            self.table
        );
        let epoch: i64 = self
            .conn
            .query_row(&sql, params![], |row| row.get(0))
            .map_err(no_data)?;
        Utc.timestamp_opt(epoch, 0).single().ok_or_else(|| {
            NcSeriesErr::NoData(format!("bad timestamp {} in table {}", epoch, self.table))
        })
    }

    /// Read `variables` over `[start, end)` as one series named "".
    ///
    /// Scalar columns come back as `[ntimes]` double arrays; columns holding
    /// JSON arrays come back as `[ntimes, width]` with a "bin" secondary
    /// dimension, the width probed from the first row when the declared
    /// dims disagree with the data.
    pub fn read_time_series(
        &self,
        variables: &[&str],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        size_limit: usize,
    ) -> Result<BTreeMap<String, SeriesData>, NcSeriesErr> {
        let meta = self.get_variables()?;

        let times = self.read_times(start, end)?;
        let ntimes = times.len();
        if ntimes == 0 {
            return Err(NcSeriesErr::NoData(format!(
                "no data between {} and {}",
                start, end
            )));
        }
        let mut total_bytes = ntimes * 8;
        if total_bytes > size_limit {
            return Err(over_budget(size_limit));
        }

        let mut series = SeriesData {
            time: times,
            ..SeriesData::default()
        };

        for &vname in variables {
            check_identifier(vname)?;
            let vmeta = match meta.get(vname) {
                Some(vmeta) => vmeta,
                None => {
                    warn!("requested variable '{}' is not in variable_list", vname);
                    continue;
                }
            };

            let sql = format!(
                r#"SELECT "{}" FROM "{}" WHERE datetime >= ?1 AND datetime < ?2 ORDER BY datetime"#,
                vname, self.table
            );
            let mut stmt = self.conn.prepare(&sql).map_err(no_data)?;
            let rows = stmt
                .query_map(params![start.timestamp(), end.timestamp()], |row| {
                    row.get::<_, Value>(0)
                })
                .map_err(no_data)?;

            let mut width = 0_usize;
            let mut values: Vec<f64> = vec![];
            for row in rows {
                let cell = decode_cell(&row.map_err(no_data)?, vname)?;
                if width == 0 {
                    width = cell.len().max(1);
                    let declared: usize = vmeta.shape.iter().product();
                    if declared != width {
                        warn!(
                            "'{}' declares {} values per sample but carries {}",
                            vname, declared, width
                        );
                    }
                }
                let mut cell = cell;
                cell.resize(width, f64::NAN);
                values.extend_from_slice(&cell);
            }
            values.resize(ntimes * width.max(1), f64::NAN);

            if let Some(mv) = vmeta.missing_value {
                for v in values.iter_mut() {
                    if *v == mv {
                        *v = f64::NAN;
                    }
                }
            }

            total_bytes += values.len() * 8;
            if total_bytes > size_limit {
                return Err(over_budget(size_limit));
            }

            let shape: Vec<usize> = if width > 1 {
                vec![ntimes, width]
            } else {
                vec![ntimes]
            };
            let arr = DataArray::Double(
                ArrayD::from_shape_vec(IxDyn(&shape), values)?,
            );

            series.vmap.insert(vname.to_string(), series.data.len());
            series.data.push(arr);
            series.stations.insert(vname.to_string(), vec![String::new()]);
            if width > 1 {
                series.dim2.insert(
                    vname.to_string(),
                    Dim2 {
                        name: "bin".to_string(),
                        units: String::new(),
                        data: (0..width).map(|i| i as f64).collect(),
                    },
                );
            }
        }

        let mut out = BTreeMap::new();
        out.insert(String::new(), series);
        Ok(out)
    }
}

fn no_data(err: rusqlite::Error) -> NcSeriesErr {
    NcSeriesErr::NoData(err.to_string())
}

fn over_budget(size_limit: usize) -> NcSeriesErr {
    NcSeriesErr::TooMuchData(format!("read exceeds the size limit of {} bytes", size_limit))
}

/// Only plain identifiers go into SQL text; everything else is bound.
fn check_identifier(name: &str) -> Result<(), NcSeriesErr> {
    if !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
    {
        Ok(())
    } else {
        Err(NcSeriesErr::NoData(format!("bad identifier '{}'", name)))
    }
}

/// One cell's values: a scalar number, or a JSON array for multi-column
/// variables. NULL and unparseable cells read as missing.
fn decode_cell(cell: &Value, vname: &str) -> Result<Vec<f64>, NcSeriesErr> {
    match cell {
        Value::Null => Ok(vec![f64::NAN]),
        Value::Integer(i) => Ok(vec![*i as f64]),
        Value::Real(r) => Ok(vec![*r]),
        Value::Text(json) => match serde_json::from_str::<Vec<f64>>(json) {
            Ok(vals) => Ok(vals),
            Err(err) => {
                warn!("bad value for '{}': {}", vname, err);
                Ok(vec![f64::NAN])
            }
        },
        Value::Blob(_) => Err(NcSeriesErr::NoData(format!(
            "variable '{}' holds blob data",
            vname
        ))),
    }
}
