//! Typed snapshot of host telemetry produced by the agent sampler.
//!
//! Field names are the wire format; every tier serializes and parses this
//! schema instead of passing free-form maps around. Generic JSON survives
//! only at the ingest edges where payloads are re-stamped and split into
//! measurement points.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One full sample of host telemetry.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SystemStats {
    /// Wall-clock instant the sample was taken.
    pub timestamp: DateTime<Utc>,
    /// RFC3339 rendering of `timestamp`, kept for readability in spill files.
    pub current_time: String,
    /// Host name as reported by the OS.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub hostname: String,
    /// OS name, version, and architecture in one string.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub platform: String,
    /// Seconds since boot.
    #[serde(default)]
    pub uptime: u64,
    /// Static hardware facts.
    #[serde(default)]
    pub hardware: HardwareInfo,
    /// 1/5/15-minute load averages.
    #[serde(default)]
    pub load_avg: LoadAvgStats,
    /// CPU gauges; currently `{"usage": <percent>}`.
    #[serde(default)]
    pub cpu: HashMap<String, f64>,
    /// Physical and swap memory usage.
    #[serde(default)]
    pub memory: MemoryStats,
    /// Per-mount disk usage, keyed by mount point.
    #[serde(default)]
    pub disk: HashMap<String, DiskStats>,
    /// Interface counters, derived rates, addresses, socket counts.
    #[serde(default)]
    pub network: NetworkStats,
}

/// Static hardware description attached to every sample.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct HardwareInfo {
    /// CPU model string from the first core.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub cpu_model: String,
    /// Logical core count.
    #[serde(default)]
    pub cpu_cores: usize,
    /// Total physical memory in bytes.
    #[serde(default)]
    pub memory_total: u64,
    /// Sum of capacity across probed mounts, in bytes.
    #[serde(default)]
    pub disk_total: u64,
}

/// System load averages.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct LoadAvgStats {
    /// 1-minute load average.
    pub load1: f64,
    /// 5-minute load average.
    pub load5: f64,
    /// 15-minute load average.
    pub load15: f64,
}

/// Physical and swap memory usage in bytes / percent.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct MemoryStats {
    /// Total physical memory.
    pub total: u64,
    /// Memory in use.
    pub used: u64,
    /// Free memory.
    pub free: u64,
    /// Used percentage of physical memory.
    pub used_percent: f64,
    /// Total swap.
    pub swap_total: u64,
    /// Swap in use.
    pub swap_used: u64,
    /// Used percentage of swap.
    pub swap_percent: f64,
}

/// Usage for one probed mount point.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DiskStats {
    /// Capacity in bytes.
    pub total: u64,
    /// Bytes used.
    pub used: u64,
    /// Bytes free.
    pub free: u64,
    /// Used percentage.
    pub used_percent: f64,
    /// Filesystem type, e.g. `ext4`.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub fstype: String,
}

/// Network counters, addresses, and socket totals.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct NetworkStats {
    /// Per-interface counters and derived rates.
    #[serde(default)]
    pub interfaces: HashMap<String, InterfaceStats>,
    /// Globally routable IPv4 addresses.
    #[serde(default)]
    pub public_ipv4: Vec<String>,
    /// Globally routable IPv6 addresses.
    #[serde(default)]
    pub public_ipv6: Vec<String>,
    /// RFC1918/link-local IPv4 addresses.
    #[serde(default)]
    pub private_ipv4: Vec<String>,
    /// Unique-local/link-local IPv6 addresses.
    #[serde(default)]
    pub private_ipv6: Vec<String>,
    /// Sum of bytes sent across probed interfaces.
    #[serde(default)]
    pub total_sent: u64,
    /// Sum of bytes received across probed interfaces.
    #[serde(default)]
    pub total_received: u64,
    /// Open TCP socket count.
    #[serde(default)]
    pub tcp_connections: usize,
    /// Open UDP socket count.
    #[serde(default)]
    pub udp_connections: usize,
}

/// Counters and derived rates for one interface.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct InterfaceStats {
    /// Cumulative bytes sent.
    pub bytes_sent: u64,
    /// Cumulative bytes received.
    pub bytes_recv: u64,
    /// Bytes/second sent, derived against the previous sample.
    pub upload_speed: u64,
    /// Bytes/second received, derived against the previous sample.
    pub download_speed: u64,
}

impl SystemStats {
    /// Creates an empty snapshot stamped with `now`.
    pub fn at(now: DateTime<Utc>) -> Self {
        Self {
            timestamp: now,
            current_time: now.to_rfc3339(),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_field_names_are_stable() {
        let mut stats = SystemStats::at(Utc::now());
        stats.cpu.insert("usage".into(), 12.5);
        stats.network.interfaces.insert(
            "eth0".into(),
            InterfaceStats {
                bytes_sent: 100,
                bytes_recv: 200,
                upload_speed: 10,
                download_speed: 20,
            },
        );

        let value = serde_json::to_value(&stats).expect("serialize");
        assert!(value.get("load_avg").is_some());
        assert_eq!(
            value.pointer("/cpu/usage").and_then(|v| v.as_f64()),
            Some(12.5)
        );
        assert_eq!(
            value
                .pointer("/network/interfaces/eth0/bytes_recv")
                .and_then(|v| v.as_u64()),
            Some(200)
        );
        assert_eq!(
            value
                .pointer("/network/total_received")
                .and_then(|v| v.as_u64()),
            Some(0)
        );
    }

    #[test]
    fn roundtrips_through_json() {
        let mut stats = SystemStats::at(Utc::now());
        stats.memory.total = 8 * 1024 * 1024 * 1024;
        stats.memory.used_percent = 42.0;
        stats.disk.insert(
            "/".into(),
            DiskStats {
                total: 100,
                used: 40,
                free: 60,
                used_percent: 40.0,
                fstype: "ext4".into(),
            },
        );

        let bytes = serde_json::to_vec(&stats).expect("serialize");
        let parsed: SystemStats = serde_json::from_slice(&bytes).expect("parse");
        assert_eq!(parsed, stats);
    }
}
