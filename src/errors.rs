//! Module for errors.
use std::{error::Error, fmt::Display};

/// Error from the time-series reading interface.
#[derive(Debug)]
pub enum NcSeriesErr {
    // Caller facing conditions
    /// Nothing matched the query: no files in the window, no time values
    /// accumulated, or the backing store was unreachable.
    NoData(String),
    /// The accumulated size estimate exceeded the caller's byte budget.
    /// The read is aborted and no partial results are returned.
    TooMuchData(String),

    // Inherited errors from std
    /// Error forwarded from std
    IO(::std::io::Error),

    // Other forwarded errors
    /// Array shape error forwarded from ndarray
    Shape(::ndarray::ShapeError),

    // My own errors from this crate
    /// A candidate path could not be parsed against its time pattern,
    /// even after duplicate-descriptor reduction.
    PathParse(String),
    /// A file is not in NetCDF classic format, or its header is corrupt.
    BadFormat(String),
    /// There was an internal logic error.
    LogicError(&'static str),
}

impl Display for NcSeriesErr {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> Result<(), std::fmt::Error> {
        use crate::errors::NcSeriesErr::*;

        match self {
            NoData(msg) => write!(f, "no data found: {}", msg),
            TooMuchData(msg) => write!(f, "too much data requested: {}", msg),

            IO(err) => write!(f, "std lib io error: {}", err),

            Shape(err) => write!(f, "array shape error: {}", err),

            PathParse(msg) => write!(f, "cannot parse time from path: {}", msg),
            BadFormat(msg) => write!(f, "bad file format: {}", msg),
            LogicError(msg) => write!(f, "internal logic error: {}", msg),
        }
    }
}

impl Error for NcSeriesErr {}

impl From<::std::io::Error> for NcSeriesErr {
    fn from(err: ::std::io::Error) -> NcSeriesErr {
        NcSeriesErr::IO(err)
    }
}

impl From<::ndarray::ShapeError> for NcSeriesErr {
    fn from(err: ::ndarray::ShapeError) -> NcSeriesErr {
        NcSeriesErr::Shape(err)
    }
}

impl NcSeriesErr {
    /// Is this the caller-facing "nothing matched the query" condition?
    pub fn is_no_data(&self) -> bool {
        matches!(self, NcSeriesErr::NoData(_))
    }

    /// Is this the caller-facing "byte budget exceeded" condition?
    pub fn is_too_much_data(&self) -> bool {
        matches!(self, NcSeriesErr::TooMuchData(_))
    }
}
