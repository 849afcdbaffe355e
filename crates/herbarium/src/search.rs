//! Substring search over cached observations.

use crate::record::Observation;

/// A cached observation whose field value contains the search substring.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchHit {
    pub id: u64,
    pub value: String,
}

/// Observations whose `field_name` value contains `substring`, in cache order.
pub fn find_matching(records: &[Observation], field_name: &str, substring: &str) -> Vec<SearchHit> {
    records
        .iter()
        .filter_map(|obs| {
            obs.field_value(field_name)
                .filter(|value| value.contains(substring))
                .map(|value| SearchHit { id: obs.id, value })
        })
        .collect()
}
