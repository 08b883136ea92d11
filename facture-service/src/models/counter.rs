use serde::{Deserialize, Serialize};

/// Highest `seq` issued for a calendar year.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceCounter {
    #[serde(rename = "_id")]
    pub year: i32,
    pub seq: i64,
}
