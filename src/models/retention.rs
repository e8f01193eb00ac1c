// Retention windows per metric class. Loaded once from config; immutable at runtime.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::MetricClass;

/// Longest accepted retention window for any tier, about a century.
pub const MAX_RETENTION_DAYS: u32 = 36_500;

/// Daily aggregate lifetime: a number of days or `"forever"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DailyRetention {
    Days(u32),
    Keep(Forever),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Forever {
    Forever,
}

impl DailyRetention {
    pub const FOREVER: DailyRetention = DailyRetention::Keep(Forever::Forever);

    pub fn days(&self) -> Option<u32> {
        match self {
            DailyRetention::Days(d) => Some(*d),
            DailyRetention::Keep(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionPolicy {
    pub raw_days: u32,
    pub hourly_days: u32,
    pub daily_days: DailyRetention,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            raw_days: 7,
            hourly_days: 30,
            daily_days: DailyRetention::Days(365),
        }
    }
}

impl RetentionPolicy {
    /// Speedtests are sparse; their daily history is never purged.
    pub fn speedtest_default() -> Self {
        Self {
            daily_days: DailyRetention::FOREVER,
            ..Self::default()
        }
    }

    pub fn raw_cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        days_before(now, self.raw_days)
    }

    pub fn hourly_cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        days_before(now, self.hourly_days)
    }

    /// None when daily aggregates are kept forever.
    pub fn daily_cutoff(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.daily_days.days().map(|d| days_before(now, d))
    }
}

/// Saturates at the earliest representable instant.
fn days_before(now: DateTime<Utc>, days: u32) -> DateTime<Utc> {
    now.checked_sub_signed(Duration::days(i64::from(days)))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// The full policy table, one entry per metric class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionPolicies {
    #[serde(default)]
    pub device_connection: RetentionPolicy,
    #[serde(default)]
    pub node_status: RetentionPolicy,
    #[serde(default)]
    pub network_summary: RetentionPolicy,
    #[serde(default = "RetentionPolicy::speedtest_default")]
    pub speedtest: RetentionPolicy,
}

impl Default for RetentionPolicies {
    fn default() -> Self {
        Self {
            device_connection: RetentionPolicy::default(),
            node_status: RetentionPolicy::default(),
            network_summary: RetentionPolicy::default(),
            speedtest: RetentionPolicy::speedtest_default(),
        }
    }
}

impl RetentionPolicies {
    /// Same policy for every class (tests, single-tier deployments).
    pub fn uniform(policy: RetentionPolicy) -> Self {
        Self {
            device_connection: policy,
            node_status: policy,
            network_summary: policy,
            speedtest: policy,
        }
    }

    pub fn for_class(&self, class: MetricClass) -> &RetentionPolicy {
        match class {
            MetricClass::DeviceConnection => &self.device_connection,
            MetricClass::NodeStatus => &self.node_status,
            MetricClass::NetworkSummary => &self.network_summary,
            MetricClass::Speedtest => &self.speedtest,
        }
    }
}
