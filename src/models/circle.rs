use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::CheckInFrequency;

/// Hours without a check-in before the recipient counts as overdue.
pub const DEFAULT_MISSED_CHECK_IN_THRESHOLD_HOURS: u32 = 26;

/// Consecutive missed intervals before an alert is escalated.
pub const DEFAULT_ESCALATION_THRESHOLD: u32 = 2;

/// Minutes in a day; `preferred_check_in_time` must be below this.
pub const MINUTES_PER_DAY: u16 = 24 * 60;

/// Monitoring configuration of a care circle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircleConfig {
    pub check_in_enabled: bool,
    pub check_in_frequency: CheckInFrequency,
    /// Hours since the last check-in before the monitor raises an alert.
    pub missed_check_in_threshold: u32,
    /// Consecutive missed intervals at which the alert is escalated.
    pub escalation_threshold: u32,
    /// Minutes from midnight the recipient prefers to check in.
    pub preferred_check_in_time: Option<u16>,
}

impl Default for CircleConfig {
    fn default() -> Self {
        Self {
            check_in_enabled: true,
            check_in_frequency: CheckInFrequency::Daily,
            missed_check_in_threshold: DEFAULT_MISSED_CHECK_IN_THRESHOLD_HOURS,
            escalation_threshold: DEFAULT_ESCALATION_THRESHOLD,
            preferred_check_in_time: None,
        }
    }
}

impl CircleConfig {
    /// Overlay the fields present in `settings`, leaving the rest untouched.
    pub fn apply(&mut self, settings: &CircleSettings) {
        if let Some(enabled) = settings.check_in_enabled {
            self.check_in_enabled = enabled;
        }
        if let Some(frequency) = settings.check_in_frequency {
            self.check_in_frequency = frequency;
        }
        if let Some(hours) = settings.missed_check_in_threshold {
            self.missed_check_in_threshold = hours;
        }
        if let Some(misses) = settings.escalation_threshold {
            self.escalation_threshold = misses;
        }
        if let Some(time) = settings.preferred_check_in_time {
            self.preferred_check_in_time = time;
        }
    }
}

/// Partial settings update. `None` leaves a field as it is; for
/// `preferred_check_in_time`, `Some(None)` clears the preference.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircleSettings {
    #[serde(default)]
    pub check_in_enabled: Option<bool>,
    #[serde(default)]
    pub check_in_frequency: Option<CheckInFrequency>,
    #[serde(default)]
    pub missed_check_in_threshold: Option<u32>,
    #[serde(default)]
    pub escalation_threshold: Option<u32>,
    #[serde(default, with = "double_option")]
    pub preferred_check_in_time: Option<Option<u16>>,
}

/// A recipient and the members who watch over them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CareCircle {
    pub id: Uuid,
    pub recipient_id: Uuid,
    /// Ordered, duplicate-free.
    pub members: Vec<Uuid>,
    #[serde(flatten)]
    pub config: CircleConfig,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl CareCircle {
    pub fn is_member(&self, user_id: &Uuid) -> bool {
        self.members.contains(user_id)
    }

    /// Members plus the recipient themself.
    pub fn is_participant(&self, user_id: &Uuid) -> bool {
        self.recipient_id == *user_id || self.is_member(user_id)
    }
}

/// Distinguishes an absent field from an explicit `null`.
mod double_option {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S, T>(value: &Option<Option<T>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
        T: Serialize,
    {
        match value {
            Some(inner) => inner.serialize(serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
    where
        D: Deserializer<'de>,
        T: Deserialize<'de>,
    {
        Option::<T>::deserialize(deserializer).map(Some)
    }
}
