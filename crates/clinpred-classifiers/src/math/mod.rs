//! Small ndarray-like types used throughout the crate.
//!
//! Provides `Array2` (2D, row-major) and `Array1` (1D) lightweight containers
//! with the handful of operations the estimators and the explainer need.
pub mod matrix;
pub mod vector;

pub use matrix::{Array2, ShapeError};
pub use vector::{argmax, Array1};
