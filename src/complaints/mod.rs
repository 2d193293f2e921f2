//! Complaint data model
//!
//! Complaints are the mutable side of the system. They are created on
//! submission, updated by status and routing changes, and may be deleted;
//! none of that touches the ledger's history.

mod store;

pub use store::ComplaintStore;

use crate::department::Department;
use crate::error::{CivicError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle status of a complaint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComplaintStatus {
    Pending,
    InProgress,
    Reviewed,
    Rejected,
    Completed,
}

impl ComplaintStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ComplaintStatus::Pending => "pending",
            ComplaintStatus::InProgress => "in_progress",
            ComplaintStatus::Reviewed => "reviewed",
            ComplaintStatus::Rejected => "rejected",
            ComplaintStatus::Completed => "completed",
        }
    }
}

impl fmt::Display for ComplaintStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ComplaintStatus {
    type Err = CivicError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "pending" => Ok(ComplaintStatus::Pending),
            "in_progress" | "in-progress" => Ok(ComplaintStatus::InProgress),
            "reviewed" => Ok(ComplaintStatus::Reviewed),
            "rejected" => Ok(ComplaintStatus::Rejected),
            "completed" => Ok(ComplaintStatus::Completed),
            other => Err(CivicError::InvalidInput(format!(
                "Unknown complaint status: {}",
                other
            ))),
        }
    }
}

/// Complaint priority as assigned by the classifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Priority {
    High,
    Medium,
    Low,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::High => "High",
            Priority::Medium => "Medium",
            Priority::Low => "Low",
        }
    }

    /// Lenient parse used for collaborator output; unknown values are `None`
    pub fn parse_lenient(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "high" => Some(Priority::High),
            "medium" => Some(Priority::Medium),
            "low" => Some(Priority::Low),
            _ => None,
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Geographic point in decimal degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lng: f64) -> Result<Self> {
        if !lat.is_finite() || !(-90.0..=90.0).contains(&lat) {
            return Err(CivicError::InvalidInput(format!(
                "Latitude out of range: {}",
                lat
            )));
        }
        if !lng.is_finite() || !(-180.0..=180.0).contains(&lng) {
            return Err(CivicError::InvalidInput(format!(
                "Longitude out of range: {}",
                lng
            )));
        }
        Ok(Self { lat, lng })
    }

    /// Build an optional point from separately supplied coordinates.
    /// Both must be present or both absent.
    pub fn from_parts(lat: Option<f64>, lng: Option<f64>) -> Result<Option<Self>> {
        match (lat, lng) {
            (Some(lat), Some(lng)) => Ok(Some(Self::new(lat, lng)?)),
            (None, None) => Ok(None),
            _ => Err(CivicError::InvalidInput(
                "Latitude and longitude must be supplied together".to_string(),
            )),
        }
    }
}

/// Who performed an action. Authentication happens elsewhere; this is only
/// what gets written into the audit trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

impl Actor {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role: None,
        }
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }

    /// Actor recorded for automated reassignments
    pub fn system_ai() -> Self {
        Self::new("SYSTEM_AI")
    }
}

/// Submission input
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewComplaint {
    pub category: String,
    pub description: String,
    #[serde(default)]
    pub location: Option<GeoPoint>,
    #[serde(default)]
    pub tags: Option<String>,
}

impl NewComplaint {
    pub fn new(category: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            description: description.into(),
            location: None,
            tags: None,
        }
    }

    pub fn at(mut self, location: GeoPoint) -> Self {
        self.location = Some(location);
        self
    }
}

/// A persisted complaint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Complaint {
    pub id: i64,
    pub user_id: String,
    pub category: String,
    pub description: String,
    pub location: Option<GeoPoint>,
    pub assigned_dept: Option<Department>,
    pub status: ComplaintStatus,
    pub priority: Option<Priority>,
    pub tags: Option<String>,
    pub ai_tags: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
