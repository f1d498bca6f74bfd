//! Reader and writer for NetCDF classic format (CDF-1 and CDF-2).
//!
//! Only the classic binary format is handled, which is what time-series
//! archive writers produce. Everything is big-endian; names and values are
//! padded to four-byte boundaries; variables along the unlimited dimension
//! are stored interleaved record by record.

mod write;

pub use self::write::{NcValues, NcWriter};

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use byteorder::{BigEndian, ReadBytesExt};
use ndarray::{ArrayD, IxDyn};
use strum_macros::{Display, EnumString};

use crate::errors::NcSeriesErr;
use crate::timeseries::DataArray;

const TAG_DIMENSION: i32 = 0x0A;
const TAG_VARIABLE: i32 = 0x0B;
const TAG_ATTRIBUTE: i32 = 0x0C;

/// The six external data types of the classic format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum NcType {
    /// 8-bit signed integer.
    Byte,
    /// 8-bit character.
    Char,
    /// 16-bit signed integer.
    Short,
    /// 32-bit signed integer.
    Int,
    /// 32-bit IEEE float.
    Float,
    /// 64-bit IEEE float.
    Double,
}

impl NcType {
    /// The on-disk type code.
    pub fn code(self) -> i32 {
        match self {
            NcType::Byte => 1,
            NcType::Char => 2,
            NcType::Short => 3,
            NcType::Int => 4,
            NcType::Float => 5,
            NcType::Double => 6,
        }
    }

    /// Decode an on-disk type code.
    pub fn from_code(code: i32) -> Result<NcType, NcSeriesErr> {
        match code {
            1 => Ok(NcType::Byte),
            2 => Ok(NcType::Char),
            3 => Ok(NcType::Short),
            4 => Ok(NcType::Int),
            5 => Ok(NcType::Float),
            6 => Ok(NcType::Double),
            _ => Err(NcSeriesErr::BadFormat(format!("unknown type code {}", code))),
        }
    }

    /// Bytes per element.
    pub fn itemsize(self) -> usize {
        match self {
            NcType::Byte | NcType::Char => 1,
            NcType::Short => 2,
            NcType::Int | NcType::Float => 4,
            NcType::Double => 8,
        }
    }

    /// Whether the dropout sentinel is 0 rather than NaN.
    pub fn is_integer(self) -> bool {
        matches!(self, NcType::Byte | NcType::Char | NcType::Short | NcType::Int)
    }
}

/// An attribute value, global or per-variable.
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    /// A character-array attribute, decoded as text.
    Text(String),
    /// 8-bit integer values.
    Byte(Vec<i8>),
    /// 16-bit integer values.
    Short(Vec<i16>),
    /// 32-bit integer values.
    Int(Vec<i32>),
    /// 32-bit float values.
    Float(Vec<f32>),
    /// 64-bit float values.
    Double(Vec<f64>),
}

impl AttrValue {
    /// The text of a character attribute.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            AttrValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// The first element of a numeric attribute, widened to f64.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            AttrValue::Text(_) => None,
            AttrValue::Byte(v) => v.first().map(|&x| x as f64),
            AttrValue::Short(v) => v.first().map(|&x| x as f64),
            AttrValue::Int(v) => v.first().map(|&x| x as f64),
            AttrValue::Float(v) => v.first().map(|&x| x as f64),
            AttrValue::Double(v) => v.first().copied(),
        }
    }
}

/// A named dimension. The record dimension reports the current number of
/// records as its length.
#[derive(Debug, Clone)]
pub struct Dimension {
    /// Dimension name.
    pub name: String,
    /// Length; for the record dimension, the number of records in the file.
    pub len: usize,
    /// Whether this is the unlimited dimension.
    pub is_record: bool,
}

/// A variable from the file header.
#[derive(Debug, Clone)]
pub struct Variable {
    /// Variable name.
    pub name: String,
    /// Indices into the file's dimension list, slowest-varying first.
    pub dimids: Vec<usize>,
    /// Element type.
    pub vtype: NcType,
    /// Per-variable attributes.
    pub atts: HashMap<String, AttrValue>,
    /// Whether the first dimension is the record dimension.
    pub is_record: bool,
    vsize: u64,
    begin: u64,
}

impl Variable {
    /// Look up one of this variable's attributes.
    pub fn attr(&self, name: &str) -> Option<&AttrValue> {
        self.atts.get(name)
    }
}

/// An open classic-format file: parsed header plus a seekable reader for
/// the data section.
#[derive(Debug)]
pub struct NcFile {
    reader: BufReader<File>,
    numrecs: usize,
    recsize: u64,
    dims: Vec<Dimension>,
    gatts: HashMap<String, AttrValue>,
    vars: Vec<Variable>,
}

impl NcFile {
    /// Open `path` and parse its header.
    pub fn open(path: &Path) -> Result<NcFile, NcSeriesErr> {
        let file = File::open(path)?;
        let mut reader = BufReader::new(file);

        let mut magic = [0_u8; 4];
        reader.read_exact(&mut magic)?;
        if &magic[..3] != b"CDF" || !(magic[3] == 1 || magic[3] == 2) {
            return Err(NcSeriesErr::BadFormat(format!(
                "{:?} is not a NetCDF classic file",
                path
            )));
        }
        let version = magic[3];

        let numrecs = reader.read_i32::<BigEndian>()?;
        if numrecs < 0 {
            return Err(NcSeriesErr::BadFormat(
                "streaming record count not supported".to_string(),
            ));
        }
        let numrecs = numrecs as usize;

        let mut dims = read_dim_list(&mut reader)?;
        for dim in dims.iter_mut() {
            if dim.is_record {
                dim.len = numrecs;
            }
        }
        let gatts = read_att_list(&mut reader)?;
        let vars = read_var_list(&mut reader, &dims, version)?;

        // one slab per record variable per record; the single-record-variable
        // layout packs records at the variable's own (possibly unpadded) vsize
        let recsize = vars
            .iter()
            .filter(|v| v.is_record)
            .map(|v| v.vsize)
            .sum();

        Ok(NcFile {
            reader,
            numrecs,
            recsize,
            dims,
            gatts,
            vars,
        })
    }

    /// Number of records along the unlimited dimension.
    pub fn num_records(&self) -> usize {
        self.numrecs
    }

    /// All dimensions, in header order.
    pub fn dimensions(&self) -> &[Dimension] {
        &self.dims
    }

    /// Look up a dimension by name.
    pub fn dimension(&self, name: &str) -> Option<&Dimension> {
        self.dims.iter().find(|d| d.name == name)
    }

    /// Length of a named dimension, if present.
    pub fn dim_len(&self, name: &str) -> Option<usize> {
        self.dimension(name).map(|d| d.len)
    }

    /// All variables, in header order.
    pub fn variables(&self) -> &[Variable] {
        &self.vars
    }

    /// Look up a variable by its NetCDF name.
    pub fn variable(&self, name: &str) -> Option<&Variable> {
        self.vars.iter().find(|v| v.name == name)
    }

    /// Look up a global attribute.
    pub fn global_attr(&self, name: &str) -> Option<&AttrValue> {
        self.gatts.get(name)
    }

    /// The shape of a variable, record dimension expressed as the current
    /// record count.
    pub fn shape_of(&self, var: &Variable) -> Vec<usize> {
        var.dimids.iter().map(|&id| self.dims[id].len).collect()
    }

    /// The dimension names of a variable, slowest-varying first.
    pub fn dim_names(&self, var: &Variable) -> Vec<String> {
        var.dimids
            .iter()
            .map(|&id| self.dims[id].name.clone())
            .collect()
    }

    /// Read an entire numeric variable into a [`DataArray`].
    ///
    /// Character variables have no numeric form; read them with
    /// [`read_strings`](NcFile::read_strings).
    pub fn read_values(&mut self, name: &str) -> Result<DataArray, NcSeriesErr> {
        let var = self
            .variable(name)
            .cloned()
            .ok_or_else(|| NcSeriesErr::BadFormat(format!("no variable '{}'", name)))?;
        let shape = self.shape_of(&var);

        macro_rules! read_into {
            ($ty:ty, $read:ident, $variant:ident) => {{
                let buf: Vec<$ty> = self.read_slabs(&var, &shape, |reader, chunk| {
                    reader.$read::<BigEndian>(chunk)
                })?;
                Ok(DataArray::$variant(ArrayD::from_shape_vec(
                    IxDyn(&shape),
                    buf,
                )?))
            }};
        }

        match var.vtype {
            NcType::Char => Err(NcSeriesErr::BadFormat(format!(
                "variable '{}' is character data",
                name
            ))),
            NcType::Byte => {
                let buf: Vec<i8> =
                    self.read_slabs(&var, &shape, |reader, chunk| reader.read_i8_into(chunk))?;
                Ok(DataArray::Byte(ArrayD::from_shape_vec(IxDyn(&shape), buf)?))
            }
            NcType::Short => read_into!(i16, read_i16_into, Short),
            NcType::Int => read_into!(i32, read_i32_into, Int),
            NcType::Float => read_into!(f32, read_f32_into, Float),
            NcType::Double => read_into!(f64, read_f64_into, Double),
        }
    }

    /// Read a character variable as strings, one per row of its leading
    /// dimension (a 1-D char variable yields a single string). Trailing NUL
    /// bytes and whitespace are trimmed.
    pub fn read_strings(&mut self, name: &str) -> Result<Vec<String>, NcSeriesErr> {
        let var = self
            .variable(name)
            .cloned()
            .ok_or_else(|| NcSeriesErr::BadFormat(format!("no variable '{}'", name)))?;
        if var.vtype != NcType::Char {
            return Err(NcSeriesErr::BadFormat(format!(
                "variable '{}' is not character data",
                name
            )));
        }

        let shape = self.shape_of(&var);
        let buf: Vec<u8> = self.read_slabs(&var, &shape, |reader, chunk| {
            reader.read_exact(chunk)
        })?;

        let width = *shape.last().unwrap_or(&0);
        if width == 0 {
            return Ok(vec![]);
        }
        Ok(buf
            .chunks(width)
            .map(|row| {
                let end = row.iter().position(|&b| b == 0).unwrap_or(row.len());
                String::from_utf8_lossy(&row[..end]).trim_end().to_string()
            })
            .collect())
    }

    /// Read a variable's elements, honoring the record interleaving: one
    /// contiguous run for fixed variables, one slab per record at `recsize`
    /// stride for record variables.
    fn read_slabs<T: Default + Clone>(
        &mut self,
        var: &Variable,
        shape: &[usize],
        read: impl Fn(&mut BufReader<File>, &mut [T]) -> std::io::Result<()>,
    ) -> Result<Vec<T>, NcSeriesErr> {
        let total: usize = shape.iter().product();
        let mut buf = vec![T::default(); total];

        if var.is_record {
            let per_rec: usize = shape.iter().skip(1).product();
            for rec in 0..self.numrecs {
                let offset = var.begin + rec as u64 * self.recsize;
                self.reader.seek(SeekFrom::Start(offset))?;
                read(&mut self.reader, &mut buf[rec * per_rec..(rec + 1) * per_rec])?;
            }
        } else {
            self.reader.seek(SeekFrom::Start(var.begin))?;
            read(&mut self.reader, &mut buf)?;
        }

        Ok(buf)
    }
}

fn pad4(n: usize) -> usize {
    (n + 3) & !3
}

fn read_name(reader: &mut impl Read) -> Result<String, NcSeriesErr> {
    let len = reader.read_i32::<BigEndian>()?;
    if len < 0 {
        return Err(NcSeriesErr::BadFormat("negative name length".to_string()));
    }
    let len = len as usize;
    let mut buf = vec![0_u8; pad4(len)];
    reader.read_exact(&mut buf)?;
    Ok(String::from_utf8_lossy(&buf[..len]).into_owned())
}

fn read_dim_list(reader: &mut impl Read) -> Result<Vec<Dimension>, NcSeriesErr> {
    let tag = reader.read_i32::<BigEndian>()?;
    let nelems = reader.read_i32::<BigEndian>()?;
    if nelems > 0 && tag != TAG_DIMENSION {
        return Err(NcSeriesErr::BadFormat("malformed dimension list".to_string()));
    }

    let mut dims = Vec::with_capacity(nelems.max(0) as usize);
    for _ in 0..nelems {
        let name = read_name(reader)?;
        let len = reader.read_i32::<BigEndian>()?;
        if len < 0 {
            return Err(NcSeriesErr::BadFormat(format!(
                "negative length for dimension '{}'",
                name
            )));
        }
        dims.push(Dimension {
            name,
            len: len as usize,
            is_record: len == 0,
        });
    }
    Ok(dims)
}

fn read_att_list(reader: &mut impl Read) -> Result<HashMap<String, AttrValue>, NcSeriesErr> {
    let tag = reader.read_i32::<BigEndian>()?;
    let nelems = reader.read_i32::<BigEndian>()?;
    if nelems > 0 && tag != TAG_ATTRIBUTE {
        return Err(NcSeriesErr::BadFormat("malformed attribute list".to_string()));
    }

    let mut atts = HashMap::new();
    for _ in 0..nelems {
        let name = read_name(reader)?;
        let vtype = NcType::from_code(reader.read_i32::<BigEndian>()?)?;
        let n = reader.read_i32::<BigEndian>()?;
        if n < 0 {
            return Err(NcSeriesErr::BadFormat(format!(
                "negative count for attribute '{}'",
                name
            )));
        }
        let n = n as usize;

        macro_rules! read_vals {
            ($ty:ty, $read:ident) => {{
                let mut vals = vec![<$ty>::default(); n];
                reader.$read::<BigEndian>(&mut vals)?;
                vals
            }};
        }

        let value = match vtype {
            NcType::Char => {
                let mut buf = vec![0_u8; n];
                reader.read_exact(&mut buf)?;
                let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
                AttrValue::Text(String::from_utf8_lossy(&buf[..end]).into_owned())
            }
            NcType::Byte => {
                let mut vals = vec![0_i8; n];
                reader.read_i8_into(&mut vals)?;
                AttrValue::Byte(vals)
            }
            NcType::Short => AttrValue::Short(read_vals!(i16, read_i16_into)),
            NcType::Int => AttrValue::Int(read_vals!(i32, read_i32_into)),
            NcType::Float => AttrValue::Float(read_vals!(f32, read_f32_into)),
            NcType::Double => AttrValue::Double(read_vals!(f64, read_f64_into)),
        };

        let pad = pad4(n * vtype.itemsize()) - n * vtype.itemsize();
        if pad > 0 {
            let mut skip = [0_u8; 4];
            reader.read_exact(&mut skip[..pad])?;
        }

        atts.insert(name, value);
    }
    Ok(atts)
}

fn read_var_list(
    reader: &mut impl Read,
    dims: &[Dimension],
    version: u8,
) -> Result<Vec<Variable>, NcSeriesErr> {
    let tag = reader.read_i32::<BigEndian>()?;
    let nelems = reader.read_i32::<BigEndian>()?;
    if nelems > 0 && tag != TAG_VARIABLE {
        return Err(NcSeriesErr::BadFormat("malformed variable list".to_string()));
    }

    let mut vars = Vec::with_capacity(nelems.max(0) as usize);
    for _ in 0..nelems {
        let name = read_name(reader)?;
        let ndims = reader.read_i32::<BigEndian>()?;
        if ndims < 0 {
            return Err(NcSeriesErr::BadFormat(format!(
                "negative rank for variable '{}'",
                name
            )));
        }
        let mut dimids = Vec::with_capacity(ndims as usize);
        for _ in 0..ndims {
            let id = reader.read_i32::<BigEndian>()?;
            if id < 0 || id as usize >= dims.len() {
                return Err(NcSeriesErr::BadFormat(format!(
                    "bad dimension id for variable '{}'",
                    name
                )));
            }
            dimids.push(id as usize);
        }
        let atts = read_att_list(reader)?;
        let vtype = NcType::from_code(reader.read_i32::<BigEndian>()?)?;
        let vsize = reader.read_u32::<BigEndian>()? as u64;
        let begin = if version == 1 {
            reader.read_u32::<BigEndian>()? as u64
        } else {
            reader.read_u64::<BigEndian>()?
        };
        let is_record = dimids.first().map_or(false, |&id| dims[id].is_record);

        vars.push(Variable {
            name,
            dimids,
            vtype,
            atts,
            is_record,
            vsize,
            begin,
        });
    }
    Ok(vars)
}
