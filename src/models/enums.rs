use crate::db::DatabaseError;
use serde::{Deserialize, Serialize};

/// Macro to generate enum with as_str + std::str::FromStr pattern
macro_rules! str_enum {
    ($name:ident { $($variant:ident => $s:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $s),+
                }
            }
        }

        impl std::str::FromStr for $name {
            type Err = DatabaseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($s => Ok(Self::$variant)),+,
                    _ => Err(DatabaseError::InvalidEnum {
                        field: stringify!($name).into(),
                        value: s.into(),
                    }),
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

str_enum!(CheckInFrequency {
    Daily => "daily",
    TwiceDaily => "twice_daily",
    Weekly => "weekly",
});

impl CheckInFrequency {
    /// Length of one monitoring interval in hours.
    pub fn interval_hours(&self) -> u32 {
        match self {
            Self::TwiceDaily => 12,
            Self::Daily => 24,
            Self::Weekly => 168,
        }
    }
}

impl Default for CheckInFrequency {
    fn default() -> Self {
        Self::Daily
    }
}

str_enum!(CheckInStatus {
    Okay => "okay",
    NeedSupport => "need_support",
    Emergency => "emergency",
});

str_enum!(EmergencySeverity {
    Urgent => "urgent",
    Emergency => "emergency",
});

impl Default for EmergencySeverity {
    fn default() -> Self {
        Self::Emergency
    }
}

str_enum!(ResponseStatus {
    OnWay => "on_way",
    Contacted => "contacted",
    Arrived => "arrived",
    Resolved => "resolved",
});

impl ResponseStatus {
    /// A responder on site (or declaring it handled) ends the emergency.
    pub fn ends_emergency(&self) -> bool {
        matches!(self, Self::Arrived | Self::Resolved)
    }
}

str_enum!(ResponsibilityFrequency {
    Once => "once",
    Daily => "daily",
    Weekly => "weekly",
    Biweekly => "biweekly",
    Monthly => "monthly",
});

str_enum!(NeedPriority {
    Low => "low",
    Medium => "medium",
    High => "high",
    Urgent => "urgent",
});

str_enum!(NeedStatus {
    Unmet => "unmet",
    InProgress => "in_progress",
    Met => "met",
    NoLongerNeeded => "no_longer_needed",
});

str_enum!(AlertEventKind {
    MissedCheckInCreated => "missed_check_in_created",
    MissedCheckInUpdated => "missed_check_in_updated",
    MissedCheckInEscalated => "missed_check_in_escalated",
    EmergencyTriggered => "emergency_triggered",
    EmergencyResponse => "emergency_response",
    EmergencyResolved => "emergency_resolved",
    EmergencyCancelled => "emergency_cancelled",
});

str_enum!(AlertLevel {
    Info => "info",
    Warning => "warning",
    Urgent => "urgent",
    Emergency => "emergency",
});

impl From<EmergencySeverity> for AlertLevel {
    fn from(severity: EmergencySeverity) -> Self {
        match severity {
            EmergencySeverity::Urgent => Self::Urgent,
            EmergencySeverity::Emergency => Self::Emergency,
        }
    }
}
