//! Writing classic-format files.
//!
//! Used by archive tooling and the test suite. Always emits the 64-bit
//! offset variant (CDF-2).

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use byteorder::{BigEndian, WriteBytesExt};

use super::{pad4, AttrValue, NcType, TAG_ATTRIBUTE, TAG_DIMENSION, TAG_VARIABLE};
use crate::errors::NcSeriesErr;

/// Values to store in a variable. `Strings` is for character variables
/// whose last dimension is the string width; each string is NUL-padded (or
/// truncated) to that width.
#[derive(Debug, Clone)]
pub enum NcValues {
    /// 8-bit signed integers.
    Byte(Vec<i8>),
    /// 16-bit signed integers.
    Short(Vec<i16>),
    /// 32-bit signed integers.
    Int(Vec<i32>),
    /// 32-bit floats.
    Float(Vec<f32>),
    /// 64-bit floats.
    Double(Vec<f64>),
    /// Rows of a character variable.
    Strings(Vec<String>),
}

#[derive(Debug)]
struct WVar {
    name: String,
    vtype: NcType,
    dimids: Vec<usize>,
    atts: Vec<(String, AttrValue)>,
    values: Option<NcValues>,
}

/// Builder for a classic-format file: declare dimensions, attributes, and
/// variables, store values, then write everything at once.
#[derive(Debug, Default)]
pub struct NcWriter {
    dims: Vec<(String, usize)>,
    record_dim: Option<usize>,
    gatts: Vec<(String, AttrValue)>,
    vars: Vec<WVar>,
}

impl NcWriter {
    /// An empty file definition.
    pub fn new() -> NcWriter {
        NcWriter::default()
    }

    /// Declare a fixed dimension, returning its id.
    pub fn add_dimension(&mut self, name: &str, len: usize) -> usize {
        self.dims.push((name.to_string(), len));
        self.dims.len() - 1
    }

    /// Declare the unlimited dimension, returning its id. Its length is
    /// determined by the record variables' values.
    pub fn add_record_dimension(&mut self, name: &str) -> usize {
        let id = self.add_dimension(name, 0);
        self.record_dim = Some(id);
        id
    }

    /// Add a global attribute.
    pub fn add_attr(&mut self, name: &str, value: AttrValue) {
        self.gatts.push((name.to_string(), value));
    }

    /// Declare a variable over the given dimension ids (slowest-varying
    /// first, the record dimension only first), returning its id.
    pub fn add_variable(&mut self, name: &str, vtype: NcType, dimids: &[usize]) -> usize {
        self.vars.push(WVar {
            name: name.to_string(),
            vtype,
            dimids: dimids.to_vec(),
            atts: vec![],
            values: None,
        });
        self.vars.len() - 1
    }

    /// Add an attribute to a declared variable.
    pub fn add_var_attr(&mut self, varid: usize, name: &str, value: AttrValue) {
        self.vars[varid].atts.push((name.to_string(), value));
    }

    /// Store the values for a declared variable, in row-major order.
    pub fn put_values(&mut self, varid: usize, values: NcValues) {
        self.vars[varid].values = Some(values);
    }

    /// Serialize the whole definition to `path`.
    pub fn write(&self, path: &Path) -> Result<(), NcSeriesErr> {
        // serialize every variable's payload up front; slab extraction below
        // is then plain byte arithmetic
        let mut payloads: Vec<Vec<u8>> = Vec::with_capacity(self.vars.len());
        for var in self.vars.iter() {
            payloads.push(self.serialize_values(var)?);
        }

        let record_vars: Vec<usize> = (0..self.vars.len())
            .filter(|&i| self.is_record(&self.vars[i]))
            .collect();

        // record count from the stored values
        let mut numrecs = 0_usize;
        for &i in record_vars.iter() {
            let raw = self.slab_bytes(&self.vars[i]);
            if raw > 0 {
                numrecs = numrecs.max((payloads[i].len() + raw - 1) / raw);
            }
        }

        // stored vsize is the padded slab, except for a lone record variable
        // whose records pack at the unpadded size
        let vsizes: Vec<usize> = self
            .vars
            .iter()
            .enumerate()
            .map(|(i, var)| {
                let raw = self.slab_bytes(var);
                if record_vars.len() == 1 && record_vars[0] == i {
                    raw
                } else {
                    pad4(raw)
                }
            })
            .collect();

        let header_len = self.header_len();
        let mut begins = vec![0_u64; self.vars.len()];
        let mut offset = header_len as u64;
        for (i, var) in self.vars.iter().enumerate() {
            if !self.is_record(var) {
                begins[i] = offset;
                offset += vsizes[i] as u64;
            }
        }
        for &i in record_vars.iter() {
            begins[i] = offset;
            offset += vsizes[i] as u64;
        }

        let file = File::create(path)?;
        let mut out = BufWriter::new(file);

        out.write_all(b"CDF\x02")?;
        out.write_i32::<BigEndian>(numrecs as i32)?;

        self.write_dim_list(&mut out)?;
        write_att_list(&mut out, &self.gatts)?;

        write_list_header(&mut out, TAG_VARIABLE, self.vars.len())?;
        for (i, var) in self.vars.iter().enumerate() {
            write_name(&mut out, &var.name)?;
            out.write_i32::<BigEndian>(var.dimids.len() as i32)?;
            for &id in var.dimids.iter() {
                out.write_i32::<BigEndian>(id as i32)?;
            }
            write_att_list(&mut out, &var.atts)?;
            out.write_i32::<BigEndian>(var.vtype.code())?;
            out.write_u32::<BigEndian>(vsizes[i] as u32)?;
            out.write_u64::<BigEndian>(begins[i])?;
        }

        // fixed variables, then the interleaved record section
        for (i, var) in self.vars.iter().enumerate() {
            if !self.is_record(var) {
                write_padded(&mut out, &payloads[i], vsizes[i])?;
            }
        }
        for rec in 0..numrecs {
            for &i in record_vars.iter() {
                let raw = self.slab_bytes(&self.vars[i]);
                let lo = (rec * raw).min(payloads[i].len());
                let hi = ((rec + 1) * raw).min(payloads[i].len());
                let mut slab = payloads[i][lo..hi].to_vec();
                slab.resize(raw, 0);
                write_padded(&mut out, &slab, vsizes[i])?;
            }
        }

        out.flush()?;
        Ok(())
    }

    fn is_record(&self, var: &WVar) -> bool {
        match self.record_dim {
            Some(rd) => var.dimids.first() == Some(&rd),
            None => false,
        }
    }

    /// Bytes in one slab: a whole record for record variables, the entire
    /// payload otherwise.
    fn slab_bytes(&self, var: &WVar) -> usize {
        let skip = if self.is_record(var) { 1 } else { 0 };
        let elems: usize = var.dimids[skip..]
            .iter()
            .map(|&id| self.dims[id].1)
            .product();
        elems * var.vtype.itemsize()
    }

    fn serialize_values(&self, var: &WVar) -> Result<Vec<u8>, NcSeriesErr> {
        let values = match &var.values {
            Some(values) => values,
            None => return Ok(vec![]),
        };

        macro_rules! check {
            ($want:pat) => {
                if !matches!(var.vtype, $want) {
                    return Err(NcSeriesErr::LogicError("values do not match variable type"));
                }
            };
        }

        let mut buf = vec![];
        match values {
            NcValues::Byte(vals) => {
                check!(NcType::Byte);
                for &v in vals {
                    buf.write_i8(v)?;
                }
            }
            NcValues::Short(vals) => {
                check!(NcType::Short);
                for &v in vals {
                    buf.write_i16::<BigEndian>(v)?;
                }
            }
            NcValues::Int(vals) => {
                check!(NcType::Int);
                for &v in vals {
                    buf.write_i32::<BigEndian>(v)?;
                }
            }
            NcValues::Float(vals) => {
                check!(NcType::Float);
                for &v in vals {
                    buf.write_f32::<BigEndian>(v)?;
                }
            }
            NcValues::Double(vals) => {
                check!(NcType::Double);
                for &v in vals {
                    buf.write_f64::<BigEndian>(v)?;
                }
            }
            NcValues::Strings(rows) => {
                check!(NcType::Char);
                let width = var
                    .dimids
                    .last()
                    .map(|&id| self.dims[id].1)
                    .ok_or(NcSeriesErr::LogicError("character variable with no width"))?;
                for row in rows {
                    let mut bytes = row.as_bytes().to_vec();
                    bytes.resize(width, 0);
                    buf.extend_from_slice(&bytes[..width]);
                }
            }
        }
        Ok(buf)
    }

    fn write_dim_list(&self, out: &mut impl Write) -> Result<(), NcSeriesErr> {
        write_list_header(out, TAG_DIMENSION, self.dims.len())?;
        for (i, (name, len)) in self.dims.iter().enumerate() {
            write_name(out, name)?;
            let len = if self.record_dim == Some(i) { 0 } else { *len };
            out.write_i32::<BigEndian>(len as i32)?;
        }
        Ok(())
    }

    fn header_len(&self) -> usize {
        let dim_list = 8
            + self
                .dims
                .iter()
                .map(|(name, _)| name_len(name) + 4)
                .sum::<usize>();
        let var_list = 8
            + self
                .vars
                .iter()
                .map(|v| {
                    name_len(&v.name) + 4 + 4 * v.dimids.len() + att_list_len(&v.atts) + 4 + 4 + 8
                })
                .sum::<usize>();
        8 + dim_list + att_list_len(&self.gatts) + var_list
    }
}

fn name_len(name: &str) -> usize {
    4 + pad4(name.len())
}

fn att_payload_len(value: &AttrValue) -> usize {
    match value {
        AttrValue::Text(s) => s.len(),
        AttrValue::Byte(v) => v.len(),
        AttrValue::Short(v) => v.len() * 2,
        AttrValue::Int(v) => v.len() * 4,
        AttrValue::Float(v) => v.len() * 4,
        AttrValue::Double(v) => v.len() * 8,
    }
}

fn att_list_len(atts: &[(String, AttrValue)]) -> usize {
    8 + atts
        .iter()
        .map(|(name, value)| name_len(name) + 8 + pad4(att_payload_len(value)))
        .sum::<usize>()
}

fn write_list_header(out: &mut impl Write, tag: i32, n: usize) -> Result<(), NcSeriesErr> {
    // an empty list is written as ABSENT: zero tag, zero count
    out.write_i32::<BigEndian>(if n == 0 { 0 } else { tag })?;
    out.write_i32::<BigEndian>(n as i32)?;
    Ok(())
}

fn write_name(out: &mut impl Write, name: &str) -> Result<(), NcSeriesErr> {
    out.write_i32::<BigEndian>(name.len() as i32)?;
    write_padded(out, name.as_bytes(), pad4(name.len()))
}

fn write_padded(out: &mut impl Write, bytes: &[u8], to: usize) -> Result<(), NcSeriesErr> {
    out.write_all(bytes)?;
    if to > bytes.len() {
        out.write_all(&vec![0_u8; to - bytes.len()])?;
    }
    Ok(())
}

fn write_att_list(out: &mut impl Write, atts: &[(String, AttrValue)]) -> Result<(), NcSeriesErr> {
    write_list_header(out, TAG_ATTRIBUTE, atts.len())?;
    for (name, value) in atts.iter() {
        write_name(out, name)?;

        let (vtype, nelems) = match value {
            AttrValue::Text(s) => (NcType::Char, s.len()),
            AttrValue::Byte(v) => (NcType::Byte, v.len()),
            AttrValue::Short(v) => (NcType::Short, v.len()),
            AttrValue::Int(v) => (NcType::Int, v.len()),
            AttrValue::Float(v) => (NcType::Float, v.len()),
            AttrValue::Double(v) => (NcType::Double, v.len()),
        };
        out.write_i32::<BigEndian>(vtype.code())?;
        out.write_i32::<BigEndian>(nelems as i32)?;

        let mut buf = vec![];
        match value {
            AttrValue::Text(s) => buf.extend_from_slice(s.as_bytes()),
            AttrValue::Byte(v) => {
                for &x in v {
                    buf.write_i8(x)?;
                }
            }
            AttrValue::Short(v) => {
                for &x in v {
                    buf.write_i16::<BigEndian>(x)?;
                }
            }
            AttrValue::Int(v) => {
                for &x in v {
                    buf.write_i32::<BigEndian>(x)?;
                }
            }
            AttrValue::Float(v) => {
                for &x in v {
                    buf.write_f32::<BigEndian>(x)?;
                }
            }
            AttrValue::Double(v) => {
                for &x in v {
                    buf.write_f64::<BigEndian>(x)?;
                }
            }
        }
        let padded = pad4(buf.len());
        write_padded(out, &buf, padded)?;
    }
    Ok(())
}
