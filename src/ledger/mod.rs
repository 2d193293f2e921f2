//! Append-only, hash-chained audit ledger
//!
//! Every consequential action on a complaint is recorded as an immutable
//! [`Block`]. Each block commits to its predecessor's hash, so rewriting any
//! stored block breaks every link after it and is caught by
//! [`LedgerStore::verify`].
//!
//! Payloads are encoded exactly once on write. On read they are always
//! decoded into [`BlockPayload`], including rows written by older tooling
//! that double-encoded the JSON or stored ids as strings.

mod hash;
mod store;

pub use hash::{block_hash, GENESIS_PREVIOUS_HASH};
pub use store::LedgerStore;

use crate::complaints::{Complaint, ComplaintStatus, GeoPoint};
use crate::department::Department;
use crate::error::{CivicError, Result};
use chrono::{DateTime, Utc};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Kind of action a block records
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Action {
    Genesis,
    /// Complaint filed with a heuristically certain department
    Filed,
    /// Ambiguous complaint confirmed by the classifier
    Verified,
    /// Ambiguous complaint recorded with its heuristic department after the
    /// classifier failed; provisional
    Fallback,
    /// Classifier moved a complaint to a different department
    Reassigned,
    StatusUpdate,
    DeptAssigned,
    Deleted,
    /// Backfilled by reconciliation
    LegacySync,
    /// Action name this build does not know
    Unrecognized(String),
}

impl Action {
    pub fn as_str(&self) -> &str {
        match self {
            Action::Genesis => "GENESIS",
            Action::Filed => "FILED",
            Action::Verified => "VERIFIED",
            Action::Fallback => "FALLBACK",
            Action::Reassigned => "REASSIGNED",
            Action::StatusUpdate => "STATUS_UPDATE",
            Action::DeptAssigned => "DEPT_ASSIGNED",
            Action::Deleted => "DELETED",
            Action::LegacySync => "LEGACY_SYNC",
            Action::Unrecognized(name) => name,
        }
    }

    /// Parse an action name, accepting the names older writers used
    pub fn parse(name: &str) -> Self {
        match name {
            "GENESIS" => Action::Genesis,
            "FILED" | "COMPLAINT_FILED" => Action::Filed,
            "VERIFIED" | "COMPLAINT_VERIFIED_AI" => Action::Verified,
            "FALLBACK" | "COMPLAINT_FILED_FALLBACK" | "COMPLAINT_FILED_ERROR" => Action::Fallback,
            "REASSIGNED" | "DEPT_REASSIGNED_AI" => Action::Reassigned,
            "STATUS_UPDATE" => Action::StatusUpdate,
            "DEPT_ASSIGNED" => Action::DeptAssigned,
            "DELETED" | "COMPLAINT_DELETED" => Action::Deleted,
            "LEGACY_SYNC" => Action::LegacySync,
            other => Action::Unrecognized(other.to_string()),
        }
    }
}

impl Default for Action {
    fn default() -> Self {
        Action::Unrecognized(String::new())
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for Action {
    fn from(name: String) -> Self {
        Action::parse(&name)
    }
}

impl From<Action> for String {
    fn from(action: Action) -> Self {
        action.as_str().to_string()
    }
}

/// Structured block payload. Absent fields are omitted from the stored JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockPayload {
    #[serde(default)]
    pub action: Action,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "de_loose_id"
    )]
    pub complaint_id: Option<i64>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "de_loose_text"
    )]
    pub user_id: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub department: Option<Department>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_dept: Option<Department>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ComplaintStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_status: Option<ComplaintStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_status: Option<ComplaintStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_tags: Option<String>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "de_loose_location"
    )]
    pub location: Option<GeoPoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "de_loose_timestamp"
    )]
    pub timestamp: Option<DateTime<Utc>>,
}

impl BlockPayload {
    /// Empty payload for `action`, stamped now
    pub fn new(action: Action) -> Self {
        Self {
            action,
            complaint_id: None,
            user_id: None,
            category: None,
            description: None,
            department: None,
            previous_dept: None,
            status: None,
            previous_status: None,
            new_status: None,
            ai_tags: None,
            location: None,
            reason: None,
            message: None,
            timestamp: Some(Utc::now()),
        }
    }

    /// Payload describing `complaint` as it currently stands
    pub fn for_complaint(action: Action, complaint: &Complaint) -> Self {
        Self {
            complaint_id: Some(complaint.id),
            category: Some(complaint.category.clone()),
            description: Some(complaint.description.clone()),
            department: complaint.assigned_dept.clone(),
            location: complaint.location,
            ..Self::new(action)
        }
    }

    pub fn genesis() -> Self {
        Self {
            message: Some("Genesis Block".to_string()),
            ..Self::new(Action::Genesis)
        }
    }

    pub fn by(mut self, actor_id: impl Into<String>) -> Self {
        self.user_id = Some(actor_id.into());
        self
    }

    pub fn department(mut self, department: Department) -> Self {
        self.department = Some(department);
        self
    }

    /// Department label recorded on the block row
    pub fn department_label(&self) -> &str {
        self.department
            .as_ref()
            .map(Department::label)
            .unwrap_or(crate::department::GENERAL_LABEL)
    }

    /// Serialize once, deterministically (field order is declaration order)
    pub fn encode(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| CivicError::Json {
            source: e,
            context: "Failed to encode block payload".to_string(),
        })
    }

    /// Decode stored payload text into canonical form.
    ///
    /// Accepts a JSON object, or a JSON string whose contents are a JSON
    /// object (double-encoded rows).
    pub fn decode(text: &str) -> Result<Self> {
        let mut value: serde_json::Value =
            serde_json::from_str(text).map_err(|e| CivicError::Json {
                source: e,
                context: "Failed to parse block payload".to_string(),
            })?;

        if let serde_json::Value::String(inner) = &value {
            value = serde_json::from_str(inner).map_err(|e| CivicError::Json {
                source: e,
                context: "Failed to parse double-encoded block payload".to_string(),
            })?;
        }

        serde_json::from_value(value).map_err(|e| CivicError::Json {
            source: e,
            context: "Block payload has unexpected shape".to_string(),
        })
    }
}

/// An immutable ledger entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub index: i64,
    pub timestamp: DateTime<Utc>,
    pub payload: BlockPayload,
    pub hash: String,
    pub previous_hash: String,
    pub department: String,
}

/// Result of a successful append
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppendReceipt {
    pub index: i64,
    pub hash: String,
}

/// Result of a successful chain verification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainReport {
    pub blocks_checked: usize,
    pub tip_hash: Option<String>,
}

/// Read order for block listings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Order {
    #[default]
    Ascending,
    /// Most recent first
    Descending,
}

/// Filtered block listing
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerQuery {
    /// Only blocks filed under this department label
    #[serde(default)]
    pub department: Option<String>,
    /// Only blocks about this complaint
    #[serde(default)]
    pub complaint_id: Option<i64>,
    #[serde(default)]
    pub limit: Option<usize>,
    /// Oldest first instead of newest first
    #[serde(default)]
    pub ascending: bool,
}

impl LedgerQuery {
    pub fn order(&self) -> Order {
        if self.ascending {
            Order::Ascending
        } else {
            Order::Descending
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum LooseScalar {
    Int(i64),
    Float(f64),
    Text(String),
}

impl LooseScalar {
    fn as_f64(&self) -> Option<f64> {
        match self {
            LooseScalar::Int(n) => Some(*n as f64),
            LooseScalar::Float(f) => Some(*f),
            LooseScalar::Text(s) => s.trim().parse().ok(),
        }
    }
}

fn de_loose_id<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Option<i64>, D::Error> {
    match Option::<LooseScalar>::deserialize(d)? {
        None => Ok(None),
        Some(LooseScalar::Int(n)) => Ok(Some(n)),
        Some(LooseScalar::Float(f)) if f.fract() == 0.0 => Ok(Some(f as i64)),
        Some(LooseScalar::Float(f)) => Err(D::Error::custom(format!("non-integer id {}", f))),
        Some(LooseScalar::Text(s)) => s
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| D::Error::custom(format!("non-numeric id {:?}", s))),
    }
}

fn de_loose_text<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Option<String>, D::Error> {
    Ok(Option::<LooseScalar>::deserialize(d)?.map(|v| match v {
        LooseScalar::Int(n) => n.to_string(),
        LooseScalar::Float(f) => f.to_string(),
        LooseScalar::Text(s) => s,
    }))
}

#[derive(Deserialize)]
struct LooseLocation {
    #[serde(default)]
    lat: Option<LooseScalar>,
    #[serde(default)]
    lng: Option<LooseScalar>,
}

/// Older rows carry `{lat: null, lng: null}` or coordinates as strings;
/// anything short of two numbers is no location.
fn de_loose_location<'de, D: Deserializer<'de>>(
    d: D,
) -> std::result::Result<Option<GeoPoint>, D::Error> {
    let Some(loose) = Option::<LooseLocation>::deserialize(d)? else {
        return Ok(None);
    };
    let lat = loose.lat.as_ref().and_then(LooseScalar::as_f64);
    let lng = loose.lng.as_ref().and_then(LooseScalar::as_f64);
    Ok(match (lat, lng) {
        (Some(lat), Some(lng)) => GeoPoint::new(lat, lng).ok(),
        _ => None,
    })
}

fn de_loose_timestamp<'de, D: Deserializer<'de>>(
    d: D,
) -> std::result::Result<Option<DateTime<Utc>>, D::Error> {
    Ok(Option::<String>::deserialize(d)?
        .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|dt| dt.with_timezone(&Utc)))
}
