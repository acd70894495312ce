use std::fmt;

use crate::models::HouseholdCategory;

#[derive(Debug)]
pub enum AllocatorError {
    /// A record field holds a value the allocation cannot use.
    InvalidField {
        record: String,
        field: String,
        value: String,
    },
    MissingProfile {
        kind: String,
        category: HouseholdCategory,
    },
    /// A profile row does not have the fixed number of slots downstream files expect.
    ShapeMismatch {
        building_id: String,
        kind: String,
        expected: usize,
        found: usize,
    },
}

impl fmt::Display for AllocatorError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            AllocatorError::InvalidField {
                record,
                field,
                value,
            } => write!(f, "Invalid value \"{}\" for {} in {}", value, field, record),
            AllocatorError::MissingProfile { kind, category } => write!(
                f,
                "No {} profile table for household category {}",
                kind,
                category.code()
            ),
            AllocatorError::ShapeMismatch {
                building_id,
                kind,
                expected,
                found,
            } => write!(
                f,
                "Building {}: {} profile has {} values instead of {}",
                building_id, kind, found, expected
            ),
        }
    }
}

impl std::error::Error for AllocatorError {}
