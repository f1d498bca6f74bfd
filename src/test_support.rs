//! Helpers for building time-series files in tests.

use std::collections::HashMap;
use std::path::Path;

use chrono::{DateTime, TimeZone, Utc};

use crate::nc3::{AttrValue, NcType, NcValues, NcWriter};

/// One variable for [`write_ts_file`], dimensioned `[time, extra dims...]`.
pub(crate) struct TsVar {
    name: String,
    vtype: NcType,
    extra_dims: Vec<(String, usize)>,
    values: NcValues,
    atts: Vec<(String, AttrValue)>,
}

impl TsVar {
    pub(crate) fn new(name: &str, vtype: NcType, values: NcValues) -> TsVar {
        TsVar {
            name: name.to_string(),
            vtype,
            extra_dims: vec![],
            values,
            atts: vec![],
        }
    }

    pub(crate) fn dim(mut self, name: &str, len: usize) -> TsVar {
        self.extra_dims.push((name.to_string(), len));
        self
    }

    pub(crate) fn attr(mut self, name: &str, value: AttrValue) -> TsVar {
        self.atts.push((name.to_string(), value));
        self
    }
}

/// Write a file with a record `time` dimension, a double `time` variable
/// carrying `time_units`, and the given record variables. Extra dimensions
/// are shared across variables by name.
pub(crate) fn write_ts_file(path: &Path, times: &[f64], time_units: &str, vars: Vec<TsVar>) {
    let mut w = NcWriter::new();
    let t = w.add_record_dimension("time");

    let tv = w.add_variable("time", NcType::Double, &[t]);
    w.add_var_attr(tv, "units", AttrValue::Text(time_units.to_string()));
    w.put_values(tv, NcValues::Double(times.to_vec()));

    let mut dim_ids: HashMap<String, usize> = HashMap::new();
    for var in vars {
        let mut dimids = vec![t];
        for (dname, dlen) in var.extra_dims.iter() {
            let id = *dim_ids
                .entry(dname.clone())
                .or_insert_with(|| w.add_dimension(dname, *dlen));
            dimids.push(id);
        }
        let v = w.add_variable(&var.name, var.vtype, &dimids);
        for (aname, aval) in var.atts {
            w.add_var_attr(v, &aname, aval);
        }
        w.put_values(v, var.values);
    }

    w.write(path).unwrap();
}

pub(crate) fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, mo, d, h, mi, s).single().unwrap()
}

pub(crate) fn epoch(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> f64 {
    utc(y, mo, d, h, mi, s).timestamp() as f64
}
