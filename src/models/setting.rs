// src/models/setting.rs

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::config::DEFAULT_PASSING_SCORE;

/// Represents one row of the 'settings' key/value table.
#[derive(Debug, Clone, FromRow)]
pub struct SettingRow {
    pub key: String,
    pub value: String,
    /// 'string', 'number' or 'boolean'.
    #[sqlx(rename = "type")]
    pub value_type: String,
}

/// Site-wide settings with their defaults applied.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteSettings {
    pub site_name: String,
    pub site_description: String,
    pub passing_score: i64,
    pub max_attempts: i64,
    pub exam_duration: i64,
    pub show_results_immediately: bool,
    pub allow_review: bool,
    pub email_notifications: bool,
    pub maintenance_mode: bool,
}

impl Default for SiteSettings {
    fn default() -> Self {
        Self {
            site_name: "MedXamion".to_string(),
            site_description: "Professional Medical Examination System".to_string(),
            passing_score: DEFAULT_PASSING_SCORE,
            max_attempts: 3,
            exam_duration: 120,
            show_results_immediately: true,
            allow_review: false,
            email_notifications: true,
            maintenance_mode: false,
        }
    }
}

impl SiteSettings {
    /// Builds settings from stored rows. Unknown keys and unparsable values
    /// fall back to the defaults.
    pub fn from_rows(rows: &[SettingRow]) -> Self {
        let mut settings = Self::default();

        for row in rows {
            let int = || row.value.trim().parse::<i64>().ok();
            let flag = || match row.value.trim() {
                "true" => Some(true),
                "false" => Some(false),
                _ => None,
            };

            match row.key.as_str() {
                "siteName" => settings.site_name = row.value.clone(),
                "siteDescription" => settings.site_description = row.value.clone(),
                "passingScore" => set(&mut settings.passing_score, int()),
                "maxAttempts" => set(&mut settings.max_attempts, int()),
                "examDuration" => set(&mut settings.exam_duration, int()),
                "showResultsImmediately" => set(&mut settings.show_results_immediately, flag()),
                "allowReview" => set(&mut settings.allow_review, flag()),
                "emailNotifications" => set(&mut settings.email_notifications, flag()),
                "maintenanceMode" => set(&mut settings.maintenance_mode, flag()),
                _ => {}
            }
        }

        settings
    }
}

fn set<T>(slot: &mut T, value: Option<T>) {
    if let Some(v) = value {
        *slot = v;
    }
}

/// Partial settings update; only present fields are written.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateSettingsRequest {
    pub site_name: Option<String>,
    pub site_description: Option<String>,
    pub passing_score: Option<i64>,
    pub max_attempts: Option<i64>,
    pub exam_duration: Option<i64>,
    pub show_results_immediately: Option<bool>,
    pub allow_review: Option<bool>,
    pub email_notifications: Option<bool>,
    pub maintenance_mode: Option<bool>,
}

impl UpdateSettingsRequest {
    /// `(key, value, type)` triples for the fields present.
    pub fn to_rows(&self) -> Vec<(&'static str, String, &'static str)> {
        let mut rows = Vec::new();

        let mut text = |key, v: &Option<String>| {
            if let Some(v) = v {
                rows.push((key, v.clone(), "string"));
            }
        };
        text("siteName", &self.site_name);
        text("siteDescription", &self.site_description);

        for (key, v) in [
            ("passingScore", self.passing_score),
            ("maxAttempts", self.max_attempts),
            ("examDuration", self.exam_duration),
        ] {
            if let Some(v) = v {
                rows.push((key, v.to_string(), "number"));
            }
        }

        for (key, v) in [
            ("showResultsImmediately", self.show_results_immediately),
            ("allowReview", self.allow_review),
            ("emailNotifications", self.email_notifications),
            ("maintenanceMode", self.maintenance_mode),
        ] {
            if let Some(v) = v {
                rows.push((key, v.to_string(), "boolean"));
            }
        }

        rows
    }

    pub fn validate_ranges(&self) -> Result<(), &'static str> {
        if self.passing_score.is_some_and(|s| !(0..=100).contains(&s)) {
            return Err("passingScore must be between 0 and 100");
        }
        if self.max_attempts.is_some_and(|s| s < 1) {
            return Err("maxAttempts must be at least 1");
        }
        if self.exam_duration.is_some_and(|s| s < 1) {
            return Err("examDuration must be at least 1 minute");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(key: &str, value: &str, value_type: &str) -> SettingRow {
        SettingRow {
            key: key.into(),
            value: value.into(),
            value_type: value_type.into(),
        }
    }

    #[test]
    fn defaults_when_empty() {
        let s = SiteSettings::from_rows(&[]);
        assert_eq!(s, SiteSettings::default());
        assert_eq!(s.passing_score, 70);
    }

    #[test]
    fn rows_override_defaults() {
        let s = SiteSettings::from_rows(&[
            row("passingScore", "80", "number"),
            row("allowReview", "true", "boolean"),
            row("siteName", "RSCM Exams", "string"),
            row("maxAttempts", "lots", "number"),
            row("unknown", "x", "string"),
        ]);
        assert_eq!(s.passing_score, 80);
        assert!(s.allow_review);
        assert_eq!(s.site_name, "RSCM Exams");
        assert_eq!(s.max_attempts, 3);
    }

    #[test]
    fn update_produces_typed_rows() {
        let req: UpdateSettingsRequest = serde_json::from_str(
            r#"{"siteName":"X","passingScore":75,"maintenanceMode":true}"#,
        )
        .unwrap();

        let rows = req.to_rows();
        assert_eq!(
            rows,
            vec![
                ("siteName", "X".to_string(), "string"),
                ("passingScore", "75".to_string(), "number"),
                ("maintenanceMode", "true".to_string(), "boolean"),
            ]
        );
    }

    #[test]
    fn serializes_camel_case() {
        let json = serde_json::to_value(SiteSettings::default()).unwrap();
        assert_eq!(json["passingScore"], 70);
        assert_eq!(json["showResultsImmediately"], true);
    }

    #[test]
    fn rejects_out_of_range_passing_score() {
        let req = UpdateSettingsRequest {
            passing_score: Some(120),
            ..Default::default()
        };
        assert!(req.validate_ranges().is_err());
    }
}
