// Raw metric samples and the per-class field schema.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use wincode::{SchemaRead, SchemaWrite};

use crate::error::Error;

/// Partition of the metric space. Each class has its own field schema and retention policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricClass {
    DeviceConnection,
    NodeStatus,
    NetworkSummary,
    Speedtest,
}

impl MetricClass {
    pub const ALL: [MetricClass; 4] = [
        MetricClass::DeviceConnection,
        MetricClass::NodeStatus,
        MetricClass::NetworkSummary,
        MetricClass::Speedtest,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricClass::DeviceConnection => "device_connection",
            MetricClass::NodeStatus => "node_status",
            MetricClass::NetworkSummary => "network_summary",
            MetricClass::Speedtest => "speedtest",
        }
    }

    /// Declared fields for this class and the reduction kind each one uses.
    pub fn schema(&self) -> &'static [FieldSpec] {
        match self {
            MetricClass::DeviceConnection => DEVICE_CONNECTION_FIELDS,
            MetricClass::NodeStatus => NODE_STATUS_FIELDS,
            MetricClass::NetworkSummary => NETWORK_SUMMARY_FIELDS,
            MetricClass::Speedtest => SPEEDTEST_FIELDS,
        }
    }

    /// Kind of a declared field, or None when the class does not declare it.
    pub fn field_kind(&self, name: &str) -> Option<FieldKind> {
        self.schema()
            .iter()
            .find(|spec| spec.name == name)
            .map(|spec| spec.kind)
    }
}

impl fmt::Display for MetricClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricClass {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MetricClass::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| Error::InvalidSample(format!("unknown metric class {s:?}")))
    }
}

/// How a field's observations reduce into a bucket summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Numeric counter or gauge: mean and max.
    Gauge,
    /// Boolean state: fraction of observations that were true.
    Flag,
    /// Categorical value: last observed.
    Status,
}

impl FieldKind {
    /// Kind implied by a value, used for fields the class schema does not declare.
    pub fn infer(value: &FieldValue) -> FieldKind {
        match value {
            FieldValue::Number(_) => FieldKind::Gauge,
            FieldValue::Flag(_) => FieldKind::Flag,
            FieldValue::Text(_) => FieldKind::Status,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
}

const fn field(name: &'static str, kind: FieldKind) -> FieldSpec {
    FieldSpec { name, kind }
}

const DEVICE_CONNECTION_FIELDS: &[FieldSpec] = &[
    field("is_connected", FieldKind::Flag),
    field("signal_strength", FieldKind::Gauge),
    field("bandwidth_down_mbps", FieldKind::Gauge),
    field("bandwidth_up_mbps", FieldKind::Gauge),
    field("connection_type", FieldKind::Status),
    field("node_id", FieldKind::Status),
    field("ip_address", FieldKind::Status),
];

const NODE_STATUS_FIELDS: &[FieldSpec] = &[
    field("status", FieldKind::Status),
    field("connected_device_count", FieldKind::Gauge),
    field("connected_wired_count", FieldKind::Gauge),
    field("connected_wireless_count", FieldKind::Gauge),
    field("uptime_seconds", FieldKind::Gauge),
    field("mesh_quality_bars", FieldKind::Gauge),
];

const NETWORK_SUMMARY_FIELDS: &[FieldSpec] = &[
    field("total_devices", FieldKind::Gauge),
    field("total_devices_online", FieldKind::Gauge),
    field("guest_network_enabled", FieldKind::Flag),
    field("wan_status", FieldKind::Status),
];

const SPEEDTEST_FIELDS: &[FieldSpec] = &[
    field("download_mbps", FieldKind::Gauge),
    field("upload_mbps", FieldKind::Gauge),
    field("latency_ms", FieldKind::Gauge),
    field("jitter_ms", FieldKind::Gauge),
    field("server_location", FieldKind::Status),
    field("isp", FieldKind::Status),
];

/// One observed field value. JSON form is the bare value (`-52`, `true`, `"wired"`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, SchemaRead, SchemaWrite)]
#[serde(untagged)]
pub enum FieldValue {
    Number(f64),
    Flag(bool),
    Text(String),
}

/// Named field as stored in the raw BLOB.
#[derive(Debug, Clone, SchemaRead, SchemaWrite)]
pub(crate) struct FieldEntry {
    pub name: String,
    pub value: FieldValue,
}

/// One raw observation from the collector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub metric_class: MetricClass,
    /// Device MAC or node id; empty for network-wide classes.
    #[serde(default)]
    pub entity_key: String,
    pub timestamp: DateTime<Utc>,
    pub fields: BTreeMap<String, FieldValue>,
}

impl MetricSample {
    pub fn new(
        metric_class: MetricClass,
        entity_key: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            metric_class,
            entity_key: entity_key.into(),
            timestamp,
            fields: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: FieldValue) -> Self {
        self.fields.insert(name.into(), value);
        self
    }

    /// Rejects samples stamped after `now` (collector clock skew guard).
    pub fn validate(&self, now: DateTime<Utc>) -> Result<(), Error> {
        if self.timestamp.timestamp() > now.timestamp() {
            return Err(Error::InvalidSample(format!(
                "{} sample for {:?} is in the future ({} > {})",
                self.metric_class, self.entity_key, self.timestamp, now
            )));
        }
        Ok(())
    }

    pub(crate) fn field_entries(&self) -> Vec<FieldEntry> {
        self.fields
            .iter()
            .map(|(name, value)| FieldEntry {
                name: name.clone(),
                value: value.clone(),
            })
            .collect()
    }
}
