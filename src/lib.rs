//! Extract time series from archives of NetCDF files.
//!
//! Field projects write their measurements into directories of NetCDF
//! (classic format) files whose names carry strftime-style time
//! descriptors, such as `/data/acme/%Y/xxx_%Y%m%d.nc`. This crate turns
//! such a pattern plus a UTC time window into the matching files, a
//! unified catalog of the variables they carry, and the concatenated data
//! slices covering the window:
//!
//! - [`FileSet`] expands the pattern and finds the files for a window,
//!   with directory listings cached in a shared [`DirCache`].
//! - [`NetcdfDataset`] scans the files into a variable catalog (cached in
//!   a shared [`SchemaCache`]) and reads time series out of them with
//!   [`NetcdfDataset::read_time_series`].
//! - [`DatabaseSeries`] reads the same kind of series from a SQLite table
//!   instead of files.
//!
//! Files in an active archive are appended to, replaced, and occasionally
//! malformed while they are being read. The readers here treat per-file
//! trouble as skippable (logged through the `log` facade) and reserve hard
//! errors for the two conditions a caller must handle: nothing matched the
//! query ([`NcSeriesErr::NoData`]) and the requested slice exceeds the
//! byte budget ([`NcSeriesErr::TooMuchData`]).

#![deny(missing_docs)]

pub use crate::database::{DatabaseSeries, DbVariable};
pub use crate::dataset::{NetcdfDataset, ReadRequest, DEFAULT_SIZE_LIMIT};
pub use crate::errors::NcSeriesErr;
pub use crate::fileset::{DirCache, FileSet, MatchedFile};
pub use crate::nc3::{AttrValue, Dimension, NcFile, NcType, NcValues, NcWriter, Variable};
pub use crate::pattern::{globify_time_descriptors, parse_path_time};
pub use crate::schema::{isfs_site, DatasetInfo, SchemaCache, VariableInfo};
pub use crate::timeseries::{DataArray, Dim2, SeriesData};

mod database;
mod dataset;
mod errors;
mod fileset;
mod nc3;
mod pattern;
mod schema;
#[cfg(test)]
mod test_support;
mod timeseries;
