//! In-memory representation of extracted time series.
//!
//! Data read from files keeps its native numeric type end to end, so a
//! [`DataArray`] is an enum over `ndarray` arrays of the five numeric
//! NetCDF types. Slicing, sub-setting, concatenation and sentinel fills all
//! operate through it without the caller naming a concrete element type.

use std::collections::HashMap;

use ndarray::{concatenate, ArrayD, Axis, Slice};
use serde::Serialize;

use crate::errors::NcSeriesErr;
use crate::nc3::NcType;

/// Run the same expression against whichever variant is live, for results
/// that do not depend on the element type.
macro_rules! each_variant {
    ($self:expr, $arr:ident => $body:expr) => {
        match $self {
            DataArray::Byte($arr) => $body,
            DataArray::Short($arr) => $body,
            DataArray::Int($arr) => $body,
            DataArray::Float($arr) => $body,
            DataArray::Double($arr) => $body,
        }
    };
}

/// Run an array-to-array expression against the live variant, rewrapping
/// the result in the same variant.
macro_rules! map_variant {
    ($self:expr, $arr:ident => $body:expr) => {
        match $self {
            DataArray::Byte($arr) => DataArray::Byte($body),
            DataArray::Short($arr) => DataArray::Short($body),
            DataArray::Int($arr) => DataArray::Int($body),
            DataArray::Float($arr) => DataArray::Float($body),
            DataArray::Double($arr) => DataArray::Double($body),
        }
    };
}

/// A dynamically-shaped array of one of the numeric NetCDF types.
///
/// Dropout sentinels are 0 for the integer types and NaN for the float
/// types; every fill, pad, and missing-value replacement uses them.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum DataArray {
    /// 8-bit signed integers.
    Byte(ArrayD<i8>),
    /// 16-bit signed integers.
    Short(ArrayD<i16>),
    /// 32-bit signed integers.
    Int(ArrayD<i32>),
    /// 32-bit floats.
    Float(ArrayD<f32>),
    /// 64-bit floats.
    Double(ArrayD<f64>),
}

impl DataArray {
    /// A sentinel-filled array of the given type and shape, standing in for
    /// data a file does not carry. `Char` has no numeric array form and
    /// fills as `Byte`.
    pub fn fill(vtype: NcType, shape: &[usize]) -> DataArray {
        match vtype {
            NcType::Byte | NcType::Char => DataArray::Byte(ArrayD::from_elem(shape, 0)),
            NcType::Short => DataArray::Short(ArrayD::from_elem(shape, 0)),
            NcType::Int => DataArray::Int(ArrayD::from_elem(shape, 0)),
            NcType::Float => DataArray::Float(ArrayD::from_elem(shape, f32::NAN)),
            NcType::Double => DataArray::Double(ArrayD::from_elem(shape, f64::NAN)),
        }
    }

    /// The NetCDF type of the elements.
    pub fn dtype(&self) -> NcType {
        match self {
            DataArray::Byte(_) => NcType::Byte,
            DataArray::Short(_) => NcType::Short,
            DataArray::Int(_) => NcType::Int,
            DataArray::Float(_) => NcType::Float,
            DataArray::Double(_) => NcType::Double,
        }
    }

    /// Shape of the array.
    pub fn shape(&self) -> &[usize] {
        each_variant!(self, arr => arr.shape())
    }

    /// Number of axes.
    pub fn ndim(&self) -> usize {
        each_variant!(self, arr => arr.ndim())
    }

    /// Total number of elements.
    pub fn len(&self) -> usize {
        each_variant!(self, arr => arr.len())
    }

    /// Whether the array holds no elements.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bytes of element storage, the unit the size budget is charged in.
    pub fn nbytes(&self) -> usize {
        self.len() * self.dtype().itemsize()
    }

    /// Convert to another element type. Integer targets truncate.
    pub fn cast_to(self, vtype: NcType) -> DataArray {
        if self.dtype() == vtype {
            return self;
        }
        let as_f64: ArrayD<f64> = each_variant!(&self, arr => arr.mapv(|v| v as f64));
        match vtype {
            NcType::Byte | NcType::Char => DataArray::Byte(as_f64.mapv(|v| v as i8)),
            NcType::Short => DataArray::Short(as_f64.mapv(|v| v as i16)),
            NcType::Int => DataArray::Int(as_f64.mapv(|v| v as i32)),
            NcType::Float => DataArray::Float(as_f64.mapv(|v| v as f32)),
            NcType::Double => DataArray::Double(as_f64),
        }
    }

    /// An owned copy of the elements in `range` along `axis`.
    pub fn slice_axis(&self, axis: usize, range: std::ops::Range<usize>) -> DataArray {
        map_variant!(self, arr => arr
            .slice_axis(Axis(axis), Slice::from(range.clone()))
            .to_owned())
    }

    /// An owned copy of the hyperplane at `index` along `axis`; drops the
    /// axis from the shape.
    pub fn index_axis(&self, axis: usize, index: usize) -> DataArray {
        map_variant!(self, arr => arr.index_axis(Axis(axis), index).to_owned())
    }

    /// An owned copy of the given indices along `axis`, in selector order.
    pub fn select(&self, axis: usize, indices: &[usize]) -> DataArray {
        map_variant!(self, arr => arr.select(Axis(axis), indices))
    }

    /// Grow the last axis to `want` elements, filling the extension with
    /// sentinels. Used when one file's trailing dimension is narrower than
    /// the widened catalog shape.
    pub fn pad_last_dim(self, want: usize) -> DataArray {
        let ndim = self.ndim();
        if ndim == 0 {
            return self;
        }
        let last = ndim - 1;
        let have = self.shape()[last];
        if have >= want {
            return self;
        }

        let mut shape = self.shape().to_vec();
        shape[last] = want;
        let mut out = DataArray::fill(self.dtype(), &shape);
        macro_rules! assign {
            ($out:ident, $arr:ident) => {
                $out.slice_axis_mut(Axis(last), Slice::from(..have)).assign($arr)
            };
        }
        match (&mut out, &self) {
            (DataArray::Byte(out), DataArray::Byte(arr)) => assign!(out, arr),
            (DataArray::Short(out), DataArray::Short(arr)) => assign!(out, arr),
            (DataArray::Int(out), DataArray::Int(arr)) => assign!(out, arr),
            (DataArray::Float(out), DataArray::Float(arr)) => assign!(out, arr),
            (DataArray::Double(out), DataArray::Double(arr)) => assign!(out, arr),
            _ => unreachable!("fill preserves the variant"),
        }
        out
    }

    /// Concatenate `other` onto `self` along `axis`, coercing `other` to
    /// this array's element type first.
    pub fn append(&mut self, other: DataArray, axis: usize) -> Result<(), NcSeriesErr> {
        let other = other.cast_to(self.dtype());
        macro_rules! cat {
            ($a:ident, $b:ident) => {
                *$a = concatenate(Axis(axis), &[$a.view(), $b.view()])?
            };
        }
        match (self, other) {
            (DataArray::Byte(a), DataArray::Byte(b)) => cat!(a, b),
            (DataArray::Short(a), DataArray::Short(b)) => cat!(a, b),
            (DataArray::Int(a), DataArray::Int(b)) => cat!(a, b),
            (DataArray::Float(a), DataArray::Float(b)) => cat!(a, b),
            (DataArray::Double(a), DataArray::Double(b)) => cat!(a, b),
            _ => return Err(NcSeriesErr::LogicError("append after cast changed variant")),
        }
        Ok(())
    }

    /// Replace elements equal to `missing` with the dropout sentinel.
    pub fn replace_missing(&mut self, missing: f64) {
        match self {
            DataArray::Byte(arr) => arr.mapv_inplace(|v| if v as f64 == missing { 0 } else { v }),
            DataArray::Short(arr) => arr.mapv_inplace(|v| if v as f64 == missing { 0 } else { v }),
            DataArray::Int(arr) => arr.mapv_inplace(|v| if v as f64 == missing { 0 } else { v }),
            DataArray::Float(arr) => {
                arr.mapv_inplace(|v| if v as f64 == missing { f32::NAN } else { v })
            }
            DataArray::Double(arr) => {
                arr.mapv_inplace(|v| if v == missing { f64::NAN } else { v })
            }
        }
    }

    /// The elements widened to f64 in row-major order.
    pub fn to_f64_vec(&self) -> Vec<f64> {
        each_variant!(self, arr => arr.iter().map(|&v| v as f64).collect())
    }
}

/// A secondary (non-time, non-station) dimension of a returned variable,
/// described by name and coordinate values.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Dim2 {
    /// Dimension name.
    pub name: String,
    /// Units of the coordinate values, often empty.
    pub units: String,
    /// Coordinate values, index numbers when the file carries none.
    pub data: Vec<f64>,
}

/// One named series of extracted data: shared timestamps plus one array per
/// requested variable.
#[derive(Debug, Default, Serialize)]
pub struct SeriesData {
    /// Sample times, UTC epoch seconds.
    pub time: Vec<f64>,
    /// One array per variable, time as the first axis, in request order.
    pub data: Vec<DataArray>,
    /// Variable name to index in `data`.
    pub vmap: HashMap<String, usize>,
    /// Secondary-dimension descriptors by variable name.
    pub dim2: HashMap<String, Dim2>,
    /// Station names by variable, in selector order. A lone empty string
    /// marks a variable without a station dimension.
    pub stations: HashMap<String, Vec<String>>,
}

impl SeriesData {
    /// Running size in bytes, for budget checks.
    pub fn nbytes(&self) -> usize {
        self.time.len() * std::mem::size_of::<f64>()
            + self.data.iter().map(DataArray::nbytes).sum::<usize>()
    }
}
