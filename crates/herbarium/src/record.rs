//! Observation records and their custom field values.
//!
//! The API has carried field values under two keys over time: `ofvs` (v1)
//! and `observation_field_values` (older payloads). Records are normalized
//! on ingestion: whichever key is present becomes [`Observation::field_values`]
//! and the record re-serializes under `ofvs` only, so every reader sees one
//! canonical shape.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Canonical key for the field-value collection.
pub const FIELD_VALUES_KEY: &str = "ofvs";

/// Key used by older payloads; read on ingestion, never written.
pub const LEGACY_FIELD_VALUES_KEY: &str = "observation_field_values";

/// One custom metadata field on an observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldValue {
    /// Field name (e.g. "Herbarium Catalog Number").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Raw value; strings, numbers, or null depending on the field datatype.
    #[serde(default)]
    pub value: Value,
    /// Everything else the API sent (field_id, uuid, datatype, ...).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl FieldValue {
    /// Convenience constructor for a named string field.
    pub fn text(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            value: Value::String(value.into()),
            extra: Map::new(),
        }
    }

    /// The value as text, or `None` when it is null.
    pub fn value_text(&self) -> Option<String> {
        match &self.value {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }
}

/// A single observation, immutable once fetched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawObservation")]
pub struct Observation {
    pub id: u64,
    #[serde(rename = "ofvs")]
    pub field_values: Vec<FieldValue>,
    /// Remaining payload, preserved verbatim in the cache.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Wire shape accepting either field-value key.
#[derive(Deserialize)]
struct RawObservation {
    id: u64,
    #[serde(default)]
    ofvs: Option<Vec<FieldValue>>,
    #[serde(default)]
    observation_field_values: Option<Vec<FieldValue>>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

impl From<RawObservation> for Observation {
    fn from(raw: RawObservation) -> Self {
        let field_values = match (raw.ofvs, raw.observation_field_values) {
            (Some(ofvs), _) if !ofvs.is_empty() => ofvs,
            (_, Some(legacy)) => legacy,
            (ofvs, None) => ofvs.unwrap_or_default(),
        };
        Self {
            id: raw.id,
            field_values,
            extra: raw.extra,
        }
    }
}

impl Observation {
    pub fn new(id: u64, field_values: Vec<FieldValue>) -> Self {
        Self {
            id,
            field_values,
            extra: Map::new(),
        }
    }

    /// Value of the first field named exactly `field_name`, as text.
    ///
    /// Returns `None` when no field has that name or its value is null.
    pub fn field_value(&self, field_name: &str) -> Option<String> {
        self.field_values
            .iter()
            .find(|f| f.name.as_deref() == Some(field_name))
            .and_then(FieldValue::value_text)
    }
}

/// Records addressable by a numeric id, for cursor pagination.
pub trait HasId {
    fn id(&self) -> u64;
}

impl HasId for Observation {
    fn id(&self) -> u64 {
        self.id
    }
}

/// A project membership link as embedded in an observation payload.
///
/// Removing an observation from a project goes through this link's `id`,
/// not the observation id.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ProjectObservation {
    pub id: u64,
    #[serde(default)]
    pub project_id: Option<u64>,
    #[serde(default)]
    pub project: Option<ProjectRef>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ProjectRef {
    pub id: u64,
}

impl ProjectObservation {
    pub fn project_id(&self) -> Option<u64> {
        self.project_id.or(self.project.as_ref().map(|p| p.id))
    }
}

/// The slice of an observation needed to list project members.
#[derive(Debug, Clone, Deserialize)]
pub struct MemberObservation {
    pub id: u64,
    #[serde(default)]
    pub project_observations: Vec<ProjectObservation>,
}

impl MemberObservation {
    /// Membership-link id for `project_id`, if the payload carries one.
    pub fn link_for(&self, project_id: u64) -> Option<u64> {
        self.project_observations
            .iter()
            .find(|po| po.project_id() == Some(project_id))
            .map(|po| po.id)
    }
}

impl HasId for MemberObservation {
    fn id(&self) -> u64 {
        self.id
    }
}

/// One page of a list endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct ResultsPage<T> {
    #[serde(default)]
    pub total_results: Option<u64>,
    #[serde(default = "Vec::new")]
    pub results: Vec<T>,
}
