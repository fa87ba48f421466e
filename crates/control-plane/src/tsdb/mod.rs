use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

pub mod influx;
pub mod memory;

pub use influx::InfluxStore;
pub use memory::MemoryStore;

/// Seam between the ingest handler and the time-series backend. Writes are
/// queued; implementations surface queue errors within a short grace
/// window so the handler can signal backpressure upstream.
#[async_trait]
pub trait MetricsStore: Send + Sync {
    async fn store_metrics(&self, node_id: &str, metrics: &Value) -> anyhow::Result<()>;
}

/// One time-series point: `(measurement, tags, timestamp)` identify it,
/// `fields` carry the values.
#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    pub measurement: String,
    pub tags: BTreeMap<String, String>,
    pub fields: BTreeMap<String, FieldValue>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Float(f64),
    Int(i64),
    UInt(u64),
    Bool(bool),
    Text(String),
}

impl FieldValue {
    /// Scalar JSON values become fields; arrays and objects are skipped.
    fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => {
                if let Some(u) = n.as_u64() {
                    Some(FieldValue::UInt(u))
                } else if let Some(i) = n.as_i64() {
                    Some(FieldValue::Int(i))
                } else {
                    n.as_f64().map(FieldValue::Float)
                }
            }
            Value::Bool(b) => Some(FieldValue::Bool(*b)),
            Value::String(s) => Some(FieldValue::Text(s.clone())),
            _ => None,
        }
    }
}

fn scalar_fields(object: &Value) -> BTreeMap<String, FieldValue> {
    object
        .as_object()
        .map(|map| {
            map.iter()
                .filter_map(|(key, value)| {
                    FieldValue::from_json(value).map(|field| (key.clone(), field))
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Splits one ingested payload into measurement points: `cpu` (one point
/// per gauge), `memory`, `disk` per mount, `network` totals, and
/// `network_interface` per interface. Tags always carry `node_id` plus
/// `hostname`/`platform` when the payload has them.
pub fn split_points(node_id: &str, metrics: &Value) -> Vec<Point> {
    let timestamp = metrics
        .get("timestamp")
        .and_then(|v| v.as_str())
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(Utc::now);

    let mut tags = BTreeMap::new();
    tags.insert("node_id".to_string(), node_id.to_string());
    for key in ["hostname", "platform"] {
        if let Some(value) = metrics.get(key).and_then(|v| v.as_str()) {
            tags.insert(key.to_string(), value.to_string());
        }
    }

    let mut points = Vec::new();

    if let Some(cpu) = metrics.get("cpu").and_then(|v| v.as_object()) {
        for (key, value) in cpu {
            if let Some(field) = FieldValue::from_json(value) {
                points.push(Point {
                    measurement: "cpu".to_string(),
                    tags: tags.clone(),
                    fields: BTreeMap::from([(key.clone(), field)]),
                    timestamp,
                });
            }
        }
    }

    if let Some(memory) = metrics.get("memory") {
        let fields = scalar_fields(memory);
        if !fields.is_empty() {
            points.push(Point {
                measurement: "memory".to_string(),
                tags: tags.clone(),
                fields,
                timestamp,
            });
        }
    }

    if let Some(disk) = metrics.get("disk").and_then(|v| v.as_object()) {
        for (mount, info) in disk {
            let fields = scalar_fields(info);
            if fields.is_empty() {
                continue;
            }
            let mut disk_tags = tags.clone();
            disk_tags.insert("mount_point".to_string(), mount.clone());
            points.push(Point {
                measurement: "disk".to_string(),
                tags: disk_tags,
                fields,
                timestamp,
            });
        }
    }

    if let Some(network) = metrics.get("network").and_then(|v| v.as_object()) {
        let totals: BTreeMap<String, FieldValue> = network
            .iter()
            .filter(|(key, _)| key.as_str() != "interfaces")
            .filter_map(|(key, value)| {
                FieldValue::from_json(value).map(|field| (key.clone(), field))
            })
            .collect();
        if !totals.is_empty() {
            points.push(Point {
                measurement: "network".to_string(),
                tags: tags.clone(),
                fields: totals,
                timestamp,
            });
        }

        if let Some(interfaces) = network.get("interfaces").and_then(|v| v.as_object()) {
            for (iface, info) in interfaces {
                let fields = scalar_fields(info);
                if fields.is_empty() {
                    continue;
                }
                let mut iface_tags = tags.clone();
                iface_tags.insert("interface".to_string(), iface.clone());
                points.push(Point {
                    measurement: "network_interface".to_string(),
                    tags: iface_tags,
                    fields,
                    timestamp,
                });
            }
        }
    }

    points
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload() -> Value {
        json!({
            "timestamp": "2026-03-01T10:00:00Z",
            "hostname": "web-1",
            "platform": "Ubuntu 24.04 x86_64",
            "cpu": {"usage": 41.5},
            "memory": {"total": 8192u64, "used": 4096u64, "used_percent": 50.0},
            "disk": {
                "/": {"total": 100u64, "used": 40u64, "used_percent": 40.0, "fstype": "ext4"},
                "/data": {"total": 500u64, "used": 100u64, "used_percent": 20.0, "fstype": "xfs"}
            },
            "network": {
                "interfaces": {
                    "eth0": {"bytes_sent": 10u64, "bytes_recv": 20u64, "upload_speed": 1u64, "download_speed": 2u64}
                },
                "total_sent": 10u64,
                "total_received": 20u64,
                "tcp_connections": 4,
                "udp_connections": 1,
                "public_ipv4": ["203.0.113.5"]
            },
            "received_at": 1_760_000_000
        })
    }

    #[test]
    fn splits_into_expected_measurements() {
        let points = split_points("node-A", &payload());
        let measurements: Vec<&str> = points.iter().map(|p| p.measurement.as_str()).collect();

        assert!(measurements.contains(&"cpu"));
        assert!(measurements.contains(&"memory"));
        assert_eq!(measurements.iter().filter(|m| **m == "disk").count(), 2);
        assert!(measurements.contains(&"network"));
        assert!(measurements.contains(&"network_interface"));
    }

    #[test]
    fn every_point_is_tagged_with_node_identity() {
        for point in split_points("node-A", &payload()) {
            assert_eq!(point.tags["node_id"], "node-A");
            assert_eq!(point.tags["hostname"], "web-1");
            assert_eq!(point.tags["platform"], "Ubuntu 24.04 x86_64");
        }
    }

    #[test]
    fn disk_and_interface_points_carry_selectors() {
        let points = split_points("node-A", &payload());

        let mounts: Vec<&str> = points
            .iter()
            .filter(|p| p.measurement == "disk")
            .map(|p| p.tags["mount_point"].as_str())
            .collect();
        assert!(mounts.contains(&"/"));
        assert!(mounts.contains(&"/data"));

        let iface = points
            .iter()
            .find(|p| p.measurement == "network_interface")
            .expect("interface point");
        assert_eq!(iface.tags["interface"], "eth0");
        assert_eq!(iface.fields["bytes_recv"], FieldValue::UInt(20));
    }

    #[test]
    fn network_totals_exclude_interfaces_and_arrays() {
        let points = split_points("node-A", &payload());
        let network = points
            .iter()
            .find(|p| p.measurement == "network")
            .expect("network point");

        assert!(network.fields.contains_key("total_sent"));
        assert!(!network.fields.contains_key("interfaces"));
        assert!(!network.fields.contains_key("public_ipv4"), "arrays are not fields");
    }

    #[test]
    fn sampled_timestamp_is_preserved() {
        let points = split_points("node-A", &payload());
        let expected = DateTime::parse_from_rfc3339("2026-03-01T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        assert!(points.iter().all(|p| p.timestamp == expected));
    }

    #[test]
    fn missing_timestamp_falls_back_to_receive_time() {
        let before = Utc::now();
        let points = split_points("node-A", &json!({"cpu": {"usage": 1.0}}));
        assert_eq!(points.len(), 1);
        assert!(points[0].timestamp >= before);
    }

    #[test]
    fn empty_payload_produces_no_points() {
        assert!(split_points("node-A", &json!({})).is_empty());
        assert!(split_points("node-A", &json!({"cpu": {}})).is_empty());
    }
}
