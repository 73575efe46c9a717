//! Fee schedule model: what a cohort owes for a category and billing period.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Fee categories offered by the school.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeeCategory {
    Tuition,
    Transport,
    Library,
    Sports,
    Lab,
    Other,
}

impl FeeCategory {
    /// Convert from proto enum value.
    pub fn from_proto(value: i32) -> Option<Self> {
        match value {
            1 => Some(Self::Tuition),
            2 => Some(Self::Transport),
            3 => Some(Self::Library),
            4 => Some(Self::Sports),
            5 => Some(Self::Lab),
            6 => Some(Self::Other),
            _ => None,
        }
    }

    /// Convert to proto enum value.
    pub fn to_proto(self) -> i32 {
        match self {
            Self::Tuition => 1,
            Self::Transport => 2,
            Self::Library => 3,
            Self::Sports => 4,
            Self::Lab => 5,
            Self::Other => 6,
        }
    }

    /// Get string representation for database.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tuition => "tuition",
            Self::Transport => "transport",
            Self::Library => "library",
            Self::Sports => "sports",
            Self::Lab => "lab",
            Self::Other => "other",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "tuition" => Some(Self::Tuition),
            "transport" => Some(Self::Transport),
            "library" => Some(Self::Library),
            "sports" => Some(Self::Sports),
            "lab" => Some(Self::Lab),
            "other" => Some(Self::Other),
            _ => None,
        }
    }
}

impl std::fmt::Display for FeeCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How often a schedule is billed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingFrequency {
    Monthly,
    Quarterly,
    Annually,
    OneTime,
}

impl BillingFrequency {
    /// Convert from proto enum value.
    pub fn from_proto(value: i32) -> Option<Self> {
        match value {
            1 => Some(Self::Monthly),
            2 => Some(Self::Quarterly),
            3 => Some(Self::Annually),
            4 => Some(Self::OneTime),
            _ => None,
        }
    }

    /// Convert to proto enum value.
    pub fn to_proto(self) -> i32 {
        match self {
            Self::Monthly => 1,
            Self::Quarterly => 2,
            Self::Annually => 3,
            Self::OneTime => 4,
        }
    }

    /// Get string representation for database.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Monthly => "monthly",
            Self::Quarterly => "quarterly",
            Self::Annually => "annually",
            Self::OneTime => "one_time",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "monthly" => Some(Self::Monthly),
            "quarterly" => Some(Self::Quarterly),
            "annually" => Some(Self::Annually),
            "one_time" => Some(Self::OneTime),
            _ => None,
        }
    }
}

impl std::fmt::Display for BillingFrequency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Fee schedule entry.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct FeeSchedule {
    pub schedule_id: Uuid,
    pub tenant_id: Uuid,
    pub cohort_label: String,
    pub category: String,
    pub amount: Decimal,
    pub frequency: String,
    pub description: String,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
    pub archived_utc: Option<DateTime<Utc>>,
}

impl FeeSchedule {
    /// Archived schedules keep their history but accept no new payments.
    pub fn is_archived(&self) -> bool {
        self.archived_utc.is_some()
    }

    pub fn parsed_category(&self) -> Option<FeeCategory> {
        FeeCategory::parse(&self.category)
    }

    pub fn parsed_frequency(&self) -> Option<BillingFrequency> {
        BillingFrequency::parse(&self.frequency)
    }
}

/// Input for creating a fee schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateFeeSchedule {
    pub tenant_id: Uuid,
    pub cohort_label: String,
    pub category: FeeCategory,
    pub amount: Decimal,
    pub frequency: BillingFrequency,
    pub description: String,
}

/// Partial update of a fee schedule.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateFeeSchedule {
    pub amount: Option<Decimal>,
    pub description: Option<String>,
}

/// Filters for listing fee schedules.
#[derive(Debug, Clone, Default)]
pub struct ScheduleFilter {
    pub cohort_label: Option<String>,
    pub category: Option<FeeCategory>,
    pub include_archived: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_round_trips_through_database_strings() {
        for category in [
            FeeCategory::Tuition,
            FeeCategory::Transport,
            FeeCategory::Library,
            FeeCategory::Sports,
            FeeCategory::Lab,
            FeeCategory::Other,
        ] {
            assert_eq!(FeeCategory::parse(category.as_str()), Some(category));
            assert_eq!(FeeCategory::from_proto(category.to_proto()), Some(category));
        }
    }

    #[test]
    fn unspecified_proto_values_are_rejected() {
        assert_eq!(FeeCategory::from_proto(0), None);
        assert_eq!(BillingFrequency::from_proto(0), None);
        assert_eq!(BillingFrequency::from_proto(9), None);
    }

    #[test]
    fn one_time_frequency_uses_snake_case() {
        assert_eq!(BillingFrequency::OneTime.as_str(), "one_time");
        assert_eq!(
            BillingFrequency::parse("one_time"),
            Some(BillingFrequency::OneTime)
        );
    }
}
