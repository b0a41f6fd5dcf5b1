// src/models/delivery.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

/// Represents the 'groups' table: a cohort of takers.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Group {
    pub id: i64,
    pub code: String,
    pub name: String,
    pub last_taker_code: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub const GROUP_COLUMNS: &str = "id, code, name, last_taker_code, created_at, updated_at";

#[derive(Debug, FromRow, Serialize)]
pub struct GroupSummary {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub group: Group,
    pub taker_count: i64,
    pub delivery_count: i64,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateGroupRequest {
    /// Generated when absent.
    #[validate(length(min = 1, max = 20))]
    pub code: Option<String>,
    #[validate(length(min = 1, max = 150))]
    pub name: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateGroupRequest {
    #[validate(length(min = 1, max = 20))]
    pub code: Option<String>,
    #[validate(length(min = 1, max = 150))]
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct GroupTakersRequest {
    pub taker_ids: Vec<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Scheduled,
    InProgress,
    Completed,
}

/// Represents the 'deliveries' table: an exam scheduled for a group.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Delivery {
    pub id: i64,
    pub exam_id: i64,
    pub group_id: Option<i64>,
    pub name: String,
    pub display_name: Option<String>,
    /// Takers may start whenever they like; `scheduled_at` is ignored.
    pub is_anytime: bool,
    pub scheduled_at: Option<DateTime<Utc>>,
    /// Time allowed per attempt, in minutes.
    pub duration: i32,
    pub automatic_start: bool,
    pub is_finished: bool,
    pub ended_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub const DELIVERY_COLUMNS: &str = "id, exam_id, group_id, name, display_name, is_anytime, \
                                    scheduled_at, duration, automatic_start, is_finished, \
                                    ended_at, created_at, updated_at";

impl Delivery {
    pub fn status(&self, now: DateTime<Utc>) -> DeliveryStatus {
        if self.is_finished || self.ended_at.is_some_and(|end| end < now) {
            return DeliveryStatus::Completed;
        }
        if !self.is_anytime && self.scheduled_at.is_some_and(|start| start > now) {
            return DeliveryStatus::Scheduled;
        }
        DeliveryStatus::InProgress
    }

    /// Why a new attempt cannot start right now, if it cannot.
    pub fn start_blocker(&self, now: DateTime<Utc>) -> Option<&'static str> {
        match self.status(now) {
            DeliveryStatus::Completed => Some("This delivery has ended"),
            DeliveryStatus::Scheduled => Some("This delivery has not started yet"),
            DeliveryStatus::InProgress => None,
        }
    }
}

/// Delivery row for listings.
#[derive(Debug, FromRow, Serialize)]
pub struct DeliverySummary {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub delivery: Delivery,
    pub exam_name: String,
    pub group_name: Option<String>,
    pub attempt_count: i64,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateDeliveryRequest {
    pub exam_id: i64,
    pub group_id: Option<i64>,
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    #[validate(length(max = 200))]
    pub display_name: Option<String>,
    pub is_anytime: Option<bool>,
    pub scheduled_at: Option<DateTime<Utc>>,
    #[validate(range(min = 1, max = 1440))]
    pub duration: Option<i32>,
    pub automatic_start: Option<bool>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateDeliveryRequest {
    pub exam_id: Option<i64>,
    pub group_id: Option<i64>,
    #[validate(length(min = 1, max = 200))]
    pub name: Option<String>,
    #[validate(length(max = 200))]
    pub display_name: Option<String>,
    pub is_anytime: Option<bool>,
    pub scheduled_at: Option<DateTime<Utc>>,
    #[validate(range(min = 1, max = 1440))]
    pub duration: Option<i32>,
    pub automatic_start: Option<bool>,
    pub is_finished: Option<bool>,
    pub ended_at: Option<DateTime<Utc>>,
}

/// A taker's access row for a delivery.
#[derive(Debug, FromRow, Serialize)]
pub struct DeliveryTakerToken {
    pub taker_id: i64,
    pub reg: String,
    pub name: String,
    pub token: String,
    pub is_login: bool,
}

/// A delivery as seen by one of its takers, with their attempt if any.
#[derive(Debug, FromRow, Serialize)]
pub struct TakerDelivery {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub delivery: Delivery,
    pub exam_name: String,
    pub token: String,
    pub is_login: bool,
    pub attempt_id: Option<i64>,
    pub attempt_started_at: Option<DateTime<Utc>>,
    pub attempt_ended_at: Option<DateTime<Utc>>,
    pub attempt_scored: Option<bool>,
    pub attempt_score: Option<i32>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn delivery(now: DateTime<Utc>) -> Delivery {
        Delivery {
            id: 1,
            exam_id: 1,
            group_id: None,
            name: "Batch 1".into(),
            display_name: None,
            is_anytime: false,
            scheduled_at: Some(now - Duration::hours(1)),
            duration: 120,
            automatic_start: true,
            is_finished: false,
            ended_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn running_delivery_is_in_progress() {
        let now = Utc::now();
        let d = delivery(now);
        assert_eq!(d.status(now), DeliveryStatus::InProgress);
        assert!(d.start_blocker(now).is_none());
    }

    #[test]
    fn future_schedule_blocks_unless_anytime() {
        let now = Utc::now();
        let mut d = delivery(now);
        d.scheduled_at = Some(now + Duration::hours(2));
        assert_eq!(d.status(now), DeliveryStatus::Scheduled);
        assert!(d.start_blocker(now).is_some());

        d.is_anytime = true;
        assert_eq!(d.status(now), DeliveryStatus::InProgress);
    }

    #[test]
    fn finished_or_past_end_is_completed() {
        let now = Utc::now();
        let mut d = delivery(now);
        d.ended_at = Some(now - Duration::minutes(1));
        assert_eq!(d.status(now), DeliveryStatus::Completed);

        let mut d = delivery(now);
        d.is_finished = true;
        assert_eq!(d.status(now), DeliveryStatus::Completed);

        let mut d = delivery(now);
        d.ended_at = Some(now + Duration::minutes(30));
        assert_eq!(d.status(now), DeliveryStatus::InProgress);
    }
}
