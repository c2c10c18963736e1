#![forbid(unsafe_code)]

//! Errors of the observable layer.

use std::fmt;

/// Failure reading or writing an observable field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldError {
    /// The source type declares no field of that name.
    UnknownField {
        source_type: &'static str,
        field: String,
    },
    /// The field holds a value of another type.
    TypeMismatch {
        field: &'static str,
        expected: &'static str,
        found: &'static str,
    },
    /// The observer was declared for another source type.
    SourceMismatch {
        expected: &'static str,
        found: &'static str,
    },
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownField { source_type, field } => {
                write!(f, "{source_type} has no observable field `{field}`")
            }
            Self::TypeMismatch {
                field,
                expected,
                found,
            } => write!(f, "field `{field}` holds {found}, not {expected}"),
            Self::SourceMismatch { expected, found } => {
                write!(f, "observer expects a {expected} source, got {found}")
            }
        }
    }
}

impl std::error::Error for FieldError {}

/// Invalid position or range on an observable list. Nothing is mutated and
/// nothing is emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionError {
    IndexOutOfBounds { index: usize, len: usize },
    RangeOutOfBounds { start: usize, end: usize, len: usize },
    LengthMismatch { expected: usize, found: usize },
}

impl fmt::Display for CollectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IndexOutOfBounds { index, len } => {
                write!(f, "index {index} out of bounds for length {len}")
            }
            Self::RangeOutOfBounds { start, end, len } => {
                write!(f, "range {start}..{end} out of bounds for length {len}")
            }
            Self::LengthMismatch { expected, found } => {
                write!(f, "replacement has {found} items, range spans {expected}")
            }
        }
    }
}

impl std::error::Error for CollectionError {}
