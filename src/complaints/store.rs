//! SQLite-backed complaint store

use super::{Complaint, ComplaintStatus, GeoPoint, NewComplaint, Priority};
use crate::department::Department;
use crate::error::{CivicError, Result};
use crate::storage::{format_timestamp, parse_timestamp, DbPool};
use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};

const COLUMNS: &str = "id, user_id, type, description, latitude, longitude, assigned_dept, \
                       status, priority, tags, ai_tags, created_at, updated_at";

/// Keyed CRUD over complaints
#[derive(Clone)]
pub struct ComplaintStore {
    pool: DbPool,
}

impl ComplaintStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Persist a new complaint with its initial department
    pub fn insert(
        &self,
        user_id: &str,
        complaint: &NewComplaint,
        department: &Department,
    ) -> Result<Complaint> {
        let conn = self.pool.get()?;
        let now = format_timestamp(&Utc::now());

        conn.execute(
            "INSERT INTO complaints (user_id, type, description, latitude, longitude,
                                     assigned_dept, tags, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
            params![
                user_id,
                &complaint.category,
                &complaint.description,
                complaint.location.map(|p| p.lat),
                complaint.location.map(|p| p.lng),
                department.label(),
                complaint.tags.as_deref(),
                &now,
            ],
        )?;

        let id = conn.last_insert_rowid();
        tracing::debug!("Stored complaint #{} ({})", id, complaint.category);

        conn.query_row(
            &format!("SELECT {} FROM complaints WHERE id = ?1", COLUMNS),
            params![id],
            map_complaint,
        )
        .map_err(CivicError::from)
    }

    /// Look up a complaint by id
    pub fn get(&self, id: i64) -> Result<Option<Complaint>> {
        let conn = self.pool.get()?;
        let complaint = conn
            .query_row(
                &format!("SELECT {} FROM complaints WHERE id = ?1", COLUMNS),
                params![id],
                map_complaint,
            )
            .optional()?;
        Ok(complaint)
    }

    /// Look up a complaint that must exist
    pub fn require(&self, id: i64) -> Result<Complaint> {
        self.get(id)?.ok_or(CivicError::ComplaintNotFound { id })
    }

    /// All complaints, newest first
    pub fn list(&self) -> Result<Vec<Complaint>> {
        self.query_many(
            &format!(
                "SELECT {} FROM complaints ORDER BY created_at DESC, id DESC",
                COLUMNS
            ),
            params![],
        )
    }

    /// Complaints that carry a location, newest first
    pub fn list_located(&self) -> Result<Vec<Complaint>> {
        self.query_many(
            &format!(
                "SELECT {} FROM complaints WHERE latitude IS NOT NULL AND longitude IS NOT NULL
                 ORDER BY created_at DESC, id DESC",
                COLUMNS
            ),
            params![],
        )
    }

    /// Complaints routed to one department, newest first
    pub fn list_by_department(&self, department: &Department) -> Result<Vec<Complaint>> {
        self.query_many(
            &format!(
                "SELECT {} FROM complaints WHERE assigned_dept = ?1
                 ORDER BY created_at DESC, id DESC",
                COLUMNS
            ),
            params![department.label()],
        )
    }

    /// Change lifecycle status; returns the previous status and the updated row
    pub fn update_status(
        &self,
        id: i64,
        status: ComplaintStatus,
    ) -> Result<(ComplaintStatus, Complaint)> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;

        let previous = tx
            .query_row(
                &format!("SELECT {} FROM complaints WHERE id = ?1", COLUMNS),
                params![id],
                map_complaint,
            )
            .optional()?
            .ok_or(CivicError::ComplaintNotFound { id })?;

        tx.execute(
            "UPDATE complaints SET status = ?1, updated_at = ?2 WHERE id = ?3",
            params![status.as_str(), format_timestamp(&Utc::now()), id],
        )?;

        let updated = tx.query_row(
            &format!("SELECT {} FROM complaints WHERE id = ?1", COLUMNS),
            params![id],
            map_complaint,
        )?;
        tx.commit()?;

        Ok((previous.status, updated))
    }

    /// Route a complaint to a department; returns the previous department
    /// and the updated row
    pub fn assign_department(
        &self,
        id: i64,
        department: &Department,
    ) -> Result<(Option<Department>, Complaint)> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;

        let previous = tx
            .query_row(
                &format!("SELECT {} FROM complaints WHERE id = ?1", COLUMNS),
                params![id],
                map_complaint,
            )
            .optional()?
            .ok_or(CivicError::ComplaintNotFound { id })?;

        tx.execute(
            "UPDATE complaints SET assigned_dept = ?1, updated_at = ?2 WHERE id = ?3",
            params![department.label(), format_timestamp(&Utc::now()), id],
        )?;

        let updated = tx.query_row(
            &format!("SELECT {} FROM complaints WHERE id = ?1", COLUMNS),
            params![id],
            map_complaint,
        )?;
        tx.commit()?;

        Ok((previous.assigned_dept, updated))
    }

    /// Store the classifier's department, priority and tags
    pub fn apply_classification(
        &self,
        id: i64,
        department: &Department,
        priority: Priority,
        ai_tags: &str,
    ) -> Result<()> {
        let conn = self.pool.get()?;
        let changed = conn.execute(
            "UPDATE complaints
             SET assigned_dept = ?1, priority = ?2, ai_tags = ?3, updated_at = ?4
             WHERE id = ?5",
            params![
                department.label(),
                priority.as_str(),
                ai_tags,
                format_timestamp(&Utc::now()),
                id
            ],
        )?;

        if changed == 0 {
            return Err(CivicError::ComplaintNotFound { id });
        }
        Ok(())
    }

    /// Remove a complaint, returning what was deleted
    pub fn delete(&self, id: i64) -> Result<Complaint> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;

        let existing = tx
            .query_row(
                &format!("SELECT {} FROM complaints WHERE id = ?1", COLUMNS),
                params![id],
                map_complaint,
            )
            .optional()?
            .ok_or(CivicError::ComplaintNotFound { id })?;

        tx.execute("DELETE FROM complaints WHERE id = ?1", params![id])?;
        tx.commit()?;

        Ok(existing)
    }

    fn query_many<P: rusqlite::Params>(&self, sql: &str, params: P) -> Result<Vec<Complaint>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params, map_complaint)?;

        let mut complaints = Vec::new();
        for row in rows {
            complaints.push(row?);
        }
        Ok(complaints)
    }
}

fn map_complaint(row: &Row<'_>) -> std::result::Result<Complaint, rusqlite::Error> {
    let latitude: Option<f64> = row.get(4)?;
    let longitude: Option<f64> = row.get(5)?;
    let location = match (latitude, longitude) {
        (Some(lat), Some(lng)) => Some(GeoPoint { lat, lng }),
        _ => None,
    };

    let status_text: String = row.get(7)?;
    let status = status_text.parse::<ComplaintStatus>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(7, rusqlite::types::Type::Text, Box::new(e))
    })?;

    let priority: Option<String> = row.get(8)?;
    let created_at: String = row.get(11)?;
    let updated_at: String = row.get(12)?;

    Ok(Complaint {
        id: row.get(0)?,
        user_id: row.get(1)?,
        category: row.get(2)?,
        description: row.get(3)?,
        location,
        assigned_dept: row
            .get::<_, Option<String>>(6)?
            .map(|label| Department::from_label(&label)),
        status,
        priority: priority.as_deref().and_then(Priority::parse_lenient),
        tags: row.get(9)?,
        ai_tags: row.get(10)?,
        created_at: parse_timestamp(11, &created_at)?,
        updated_at: parse_timestamp(12, &updated_at)?,
    })
}
