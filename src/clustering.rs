//! Hotspot grouping
//!
//! Complaints are grouped against an anchor: walking the input in order,
//! each complaint not yet grouped becomes an anchor and collects every later
//! ungrouped complaint within `threshold` degrees on both axes. Membership is
//! not transitive, so the result depends on input order. A group's center is
//! the mean of its members' locations, not the anchor's.

use crate::complaints::{Complaint, GeoPoint};
use ahash::AHashSet;
use serde::{Deserialize, Serialize};

/// Default grouping distance, about 10 m at the equator
pub const HOTSPOT_THRESHOLD_DEGREES: f64 = 0.0001;

/// A cluster of nearby complaints
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Group {
    pub id: String,
    /// Mean location of the members
    pub center: GeoPoint,
    pub count: usize,
    pub complaints: Vec<Complaint>,
    pub is_group: bool,
}

/// Group located complaints; complaints without a location are skipped
pub fn group(complaints: &[Complaint], threshold: f64) -> Vec<Group> {
    let located: Vec<(&Complaint, GeoPoint)> = complaints
        .iter()
        .filter_map(|c| c.location.map(|point| (c, point)))
        .collect();

    let mut processed = AHashSet::with_capacity(located.len());
    let mut groups = Vec::new();

    for (i, (anchor, anchor_point)) in located.iter().enumerate() {
        if !processed.insert(anchor.id) {
            continue;
        }

        let mut members = vec![(*anchor).clone()];
        let (mut lat_sum, mut lng_sum) = (anchor_point.lat, anchor_point.lng);
        for (candidate, point) in &located[i + 1..] {
            if processed.contains(&candidate.id) {
                continue;
            }
            if (point.lat - anchor_point.lat).abs() <= threshold
                && (point.lng - anchor_point.lng).abs() <= threshold
            {
                processed.insert(candidate.id);
                members.push((*candidate).clone());
                lat_sum += point.lat;
                lng_sum += point.lng;
            }
        }

        let n = members.len() as f64;
        groups.push(Group {
            id: format!("group_{}", i),
            center: GeoPoint {
                lat: lat_sum / n,
                lng: lng_sum / n,
            },
            count: members.len(),
            is_group: members.len() > 1,
            complaints: members,
        });
    }

    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::complaints::ComplaintStatus;
    use chrono::Utc;

    fn complaint(id: i64, location: Option<(f64, f64)>) -> Complaint {
        let now = Utc::now();
        Complaint {
            id,
            user_id: "1".to_string(),
            category: "Garbage".to_string(),
            description: format!("complaint {}", id),
            location: location.map(|(lat, lng)| GeoPoint { lat, lng }),
            assigned_dept: None,
            status: ComplaintStatus::Pending,
            priority: None,
            tags: None,
            ai_tags: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_identical_points_group() {
        let complaints = vec![
            complaint(1, Some((8.5241, 76.9366))),
            complaint(2, Some((8.5241, 76.9366))),
            complaint(3, Some((9.9312, 76.2673))),
        ];

        let groups = group(&complaints, HOTSPOT_THRESHOLD_DEGREES);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].count, 2);
        assert!(groups[0].is_group);
        assert_eq!(groups[0].id, "group_0");
        assert_eq!(groups[1].count, 1);
        assert!(!groups[1].is_group);
        assert_eq!(groups[1].id, "group_2");
    }

    #[test]
    fn test_center_is_member_mean() {
        let complaints = vec![
            complaint(1, Some((10.0, 20.0))),
            complaint(2, Some((10.00008, 20.00006))),
        ];

        let groups = group(&complaints, HOTSPOT_THRESHOLD_DEGREES);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].count, 2);
        assert!((groups[0].center.lat - 10.00004).abs() < 1e-9);
        assert!((groups[0].center.lng - 20.00003).abs() < 1e-9);
    }

    #[test]
    fn test_single_member_center_is_its_location() {
        let groups = group(&[complaint(7, Some((8.5, 76.9)))], HOTSPOT_THRESHOLD_DEGREES);
        assert_eq!(groups[0].center, GeoPoint { lat: 8.5, lng: 76.9 });
    }

    #[test]
    fn test_unlocated_skipped() {
        let complaints = vec![complaint(1, None), complaint(2, Some((1.0, 1.0)))];
        let groups = group(&complaints, HOTSPOT_THRESHOLD_DEGREES);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].complaints[0].id, 2);
        assert_eq!(groups[0].id, "group_0");
    }

    #[test]
    fn test_anchor_grouping_is_not_transitive() {
        // B is near both A and C, but A and C are too far apart.
        let a = complaint(1, Some((10.0, 10.0)));
        let b = complaint(2, Some((10.00008, 10.0)));
        let c = complaint(3, Some((10.00016, 10.0)));

        let groups = group(&[a.clone(), b.clone(), c.clone()], HOTSPOT_THRESHOLD_DEGREES);
        let sizes: Vec<_> = groups.iter().map(|g| g.count).collect();
        assert_eq!(sizes, vec![2, 1]);

        // With B first it absorbs both neighbours.
        let groups = group(&[b, a, c], HOTSPOT_THRESHOLD_DEGREES);
        let sizes: Vec<_> = groups.iter().map(|g| g.count).collect();
        assert_eq!(sizes, vec![3]);
    }

    #[test]
    fn test_empty_input() {
        assert!(group(&[], HOTSPOT_THRESHOLD_DEGREES).is_empty());
    }
}
