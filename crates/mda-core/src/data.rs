//! Acquired data: n-dimensional sample arrays with labelled coordinates.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A labelled axis of a [`DataArray`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    /// Dimension name, e.g. `"wavelength"`.
    pub name: String,
    /// Unit of the coordinate values, e.g. `"nm"`.
    pub units: String,
    /// Coordinate value per sample along this dimension.
    pub values: Vec<f64>,
}

impl Coordinate {
    /// Create a coordinate axis.
    pub fn new(name: impl Into<String>, units: impl Into<String>, values: Vec<f64>) -> Self {
        Self {
            name: name.into(),
            units: units.into(),
            values,
        }
    }

    /// Number of samples along this axis.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// True for an axis without samples.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Data does not fill the shape given by the coordinates.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("data length {len} does not match coordinate shape {shape:?}")]
pub struct ShapeMismatch {
    /// Number of data values supplied.
    pub len: usize,
    /// Shape implied by the coordinates.
    pub shape: Vec<usize>,
}

/// Result of a detector acquisition.
///
/// An n-dimensional array of samples with one [`Coordinate`] per dimension.
/// Data is stored row-major (last coordinate varies fastest). A
/// zero-dimensional array holds exactly one sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataArray {
    /// Short variable name, e.g. `"spectrum"`.
    pub name: String,
    /// Human-readable name.
    pub long_name: String,
    /// Unit of the data values.
    pub units: String,
    /// One coordinate per dimension, outermost first.
    pub coords: Vec<Coordinate>,
    data: Vec<f64>,
}

impl DataArray {
    /// Build an array, checking that `data` fills the coordinate shape exactly.
    pub fn new(
        name: impl Into<String>,
        long_name: impl Into<String>,
        units: impl Into<String>,
        coords: Vec<Coordinate>,
        data: Vec<f64>,
    ) -> Result<Self, ShapeMismatch> {
        let shape: Vec<usize> = coords.iter().map(Coordinate::len).collect();
        let expected: usize = shape.iter().product();
        if expected != data.len() {
            return Err(ShapeMismatch {
                len: data.len(),
                shape,
            });
        }
        Ok(Self {
            name: name.into(),
            long_name: long_name.into(),
            units: units.into(),
            coords,
            data,
        })
    }

    /// A zero-dimensional array holding one sample.
    pub fn scalar(
        name: impl Into<String>,
        long_name: impl Into<String>,
        units: impl Into<String>,
        value: f64,
    ) -> Self {
        Self {
            name: name.into(),
            long_name: long_name.into(),
            units: units.into(),
            coords: Vec::new(),
            data: vec![value],
        }
    }

    /// Number of dimensions.
    pub fn ndim(&self) -> usize {
        self.coords.len()
    }

    /// Length of every coordinate, outermost first.
    pub fn shape(&self) -> Vec<usize> {
        self.coords.iter().map(Coordinate::len).collect()
    }

    /// Samples in row-major order.
    pub fn data(&self) -> &[f64] {
        &self.data
    }

    /// Take the samples out of the array.
    pub fn into_data(self) -> Vec<f64> {
        self.data
    }

    /// Sample at a multi-dimensional index, `None` if out of bounds.
    pub fn get(&self, index: &[usize]) -> Option<f64> {
        if index.len() != self.coords.len() {
            return None;
        }
        let mut flat = 0usize;
        for (i, coord) in index.iter().zip(&self.coords) {
            if *i >= coord.len() {
                return None;
            }
            flat = flat * coord.len() + i;
        }
        self.data.get(flat).copied()
    }

    /// Look up a coordinate by dimension name.
    pub fn coord(&self, name: &str) -> Option<&Coordinate> {
        self.coords.iter().find(|c| c.name == name)
    }
}
