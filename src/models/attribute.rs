//! # Searchable Attribute Model
//!
//! Attributes are the queryable metadata fields extracted from stored imaging
//! instances. Operators can define new attributes after data has already been
//! stored; the reindex operation then backfills index rows for every existing
//! instance, and the attribute-delete operation retires an attribute by
//! removing its derived index data and finally its metadata row.
//!
//! The lifecycle split mirrors the store's two levels of bookkeeping: the
//! attribute row itself carries a coarse [`AttributeStatus`], while each
//! reindex run tracks a per-attribute [`AttributeOperationStatus`] keyed by
//! operation id. The engine re-reads the `Processing` set every cycle, so a
//! concurrent actor can pause or complete an attribute without any in-process
//! coordination.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Value representation of an indexed attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeValueType {
    String,
    Long,
    Double,
    Date,
    PersonName,
}

impl fmt::Display for AttributeValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String => write!(f, "string"),
            Self::Long => write!(f, "long"),
            Self::Double => write!(f, "double"),
            Self::Date => write!(f, "date"),
            Self::PersonName => write!(f, "person_name"),
        }
    }
}

impl std::str::FromStr for AttributeValueType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "string" => Ok(Self::String),
            "long" => Ok(Self::Long),
            "double" => Ok(Self::Double),
            "date" => Ok(Self::Date),
            "person_name" => Ok(Self::PersonName),
            _ => Err(format!("Invalid attribute value type: {s}")),
        }
    }
}

/// Coarse lifecycle of an attribute row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeStatus {
    /// Defined but not yet fully indexed across existing data.
    Adding,
    /// Fully indexed and usable in queries.
    Ready,
    /// Being retired; index rows are being deleted.
    Deleting,
}

impl fmt::Display for AttributeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Adding => write!(f, "adding"),
            Self::Ready => write!(f, "ready"),
            Self::Deleting => write!(f, "deleting"),
        }
    }
}

impl std::str::FromStr for AttributeStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "adding" => Ok(Self::Adding),
            "ready" => Ok(Self::Ready),
            "deleting" => Ok(Self::Deleting),
            _ => Err(format!("Invalid attribute status: {s}")),
        }
    }
}

/// Per-run status of an attribute inside one reindex operation.
///
/// Only attributes still `Processing` for the run's operation id are handed
/// to the batch source each cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeOperationStatus {
    Processing,
    Paused,
    Completed,
}

impl fmt::Display for AttributeOperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Processing => write!(f, "processing"),
            Self::Paused => write!(f, "paused"),
            Self::Completed => write!(f, "completed"),
        }
    }
}

/// Caller-supplied definition of a new searchable attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeDefinition {
    /// Tag path identifying the attribute, e.g. `"00100020"`.
    pub path: String,
    pub value_type: AttributeValueType,
}

impl AttributeDefinition {
    pub fn new(path: impl Into<String>, value_type: AttributeValueType) -> Self {
        Self {
            path: path.into(),
            value_type,
        }
    }
}

/// A registered searchable attribute as stored in the attribute metadata
/// table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchableAttribute {
    pub attribute_id: i64,
    pub path: String,
    pub value_type: AttributeValueType,
    pub status: AttributeStatus,
}

/// Join row tying an attribute to a specific reindex run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeOperation {
    pub attribute_id: i64,
    pub operation_id: Uuid,
    pub status: AttributeOperationStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attribute_status_round_trips_through_str() {
        for status in [
            AttributeStatus::Adding,
            AttributeStatus::Ready,
            AttributeStatus::Deleting,
        ] {
            let parsed: AttributeStatus = status.to_string().parse().unwrap();
            assert_eq!(parsed, status);
        }
    }

    #[test]
    fn value_type_serializes_snake_case() {
        let json = serde_json::to_string(&AttributeValueType::PersonName).unwrap();
        assert_eq!(json, "\"person_name\"");
    }
}
