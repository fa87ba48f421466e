use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sysinfo::{Disks, Networks, System};
use tracing::debug;

use syslens_common::stats::{
    DiskStats, InterfaceStats, LoadAvgStats, MemoryStats, NetworkStats, SystemStats,
};

/// Observation window for the CPU usage probe. Long enough for a stable
/// percentage, short enough to finish well inside the 500 ms default tick.
const CPU_SAMPLE_WINDOW: Duration = Duration::from_millis(250);

#[derive(Debug, thiserror::Error)]
pub enum SamplerError {
    /// Host identity could not be read; nothing useful can be reported.
    #[error("failed to read host identity")]
    Fatal,
}

#[derive(Debug, Clone)]
struct NetSnapshot {
    taken_at: DateTime<Utc>,
    /// Interface name → (bytes sent, bytes received).
    counters: HashMap<String, (u64, u64)>,
}

/// Samples host counters on demand. Holds the previous network snapshot for
/// rate derivation; callers must serialize `collect` (the report loop owns
/// the sampler).
pub struct Sampler {
    mounts: Vec<String>,
    interfaces: Vec<String>,
    last_net: Option<NetSnapshot>,
}

impl Sampler {
    pub fn new(mounts: Vec<String>, interfaces: Vec<String>) -> Self {
        Self {
            mounts,
            interfaces,
            last_net: None,
        }
    }

    /// Takes one full snapshot. Sub-probes run concurrently and fill
    /// disjoint parts of the result; the network sub-result is shared by
    /// three probes and guarded by a mutex.
    pub async fn collect(&mut self) -> Result<SystemStats, SamplerError> {
        let now = Utc::now();
        let mut stats = SystemStats::at(now);

        let hostname = System::host_name().ok_or(SamplerError::Fatal)?;
        stats.hostname = hostname;
        stats.platform = format!(
            "{} {} {}",
            System::name().unwrap_or_default(),
            System::os_version().unwrap_or_default(),
            std::env::consts::ARCH
        )
        .trim()
        .to_string();
        stats.uptime = System::uptime();

        let mounts = self.mounts.clone();
        let iface_filter = self.interfaces.clone();

        let cpu_task = tokio::task::spawn_blocking(collect_cpu);
        let mem_task = tokio::task::spawn_blocking(collect_memory);
        let disk_task = tokio::task::spawn_blocking(move || collect_disks(&mounts));
        let net_task = tokio::task::spawn_blocking(move || collect_network(&iface_filter));

        let (cpu, memory, disks, network) =
            tokio::join!(cpu_task, mem_task, disk_task, net_task);

        if let Ok((usage, load, cpu_model, cpu_cores)) = cpu {
            stats.cpu.insert("usage".to_string(), usage);
            stats.load_avg = load;
            stats.hardware.cpu_model = cpu_model;
            stats.hardware.cpu_cores = cpu_cores;
        } else {
            debug!("cpu probe failed; omitting cpu fields");
        }

        if let Ok(mem) = memory {
            stats.memory = mem;
        } else {
            debug!("memory probe failed; omitting memory fields");
        }

        if let Ok(disks) = disks {
            stats.disk = disks;
        } else {
            debug!("disk probe failed; omitting disk fields");
        }

        if let Ok(mut net) = network {
            self.derive_rates(&mut net, now);
            stats.network = net;
        } else {
            debug!("network probe failed; omitting network fields");
        }

        stats.hardware.memory_total = stats.memory.total;
        stats.hardware.disk_total = stats.disk.values().map(|d| d.total).sum();

        Ok(stats)
    }

    /// rate = (cur − prev) / Δt against the stored snapshot. Zero on first
    /// call and on counter resets.
    fn derive_rates(&mut self, network: &mut NetworkStats, now: DateTime<Utc>) {
        if let Some(prev) = &self.last_net {
            let elapsed = (now - prev.taken_at).num_milliseconds() as f64 / 1000.0;
            if elapsed > 0.0 {
                for (name, iface) in network.interfaces.iter_mut() {
                    if let Some((prev_sent, prev_recv)) = prev.counters.get(name) {
                        iface.upload_speed = rate(iface.bytes_sent, *prev_sent, elapsed);
                        iface.download_speed = rate(iface.bytes_recv, *prev_recv, elapsed);
                    }
                }
            }
        }

        self.last_net = Some(NetSnapshot {
            taken_at: now,
            counters: network
                .interfaces
                .iter()
                .map(|(name, iface)| (name.clone(), (iface.bytes_sent, iface.bytes_recv)))
                .collect(),
        });
    }
}

fn rate(cur: u64, prev: u64, elapsed_secs: f64) -> u64 {
    if cur < prev {
        // Counter reset (reboot or wraparound); report zero, not garbage.
        return 0;
    }
    ((cur - prev) as f64 / elapsed_secs) as u64
}

fn collect_cpu() -> (f64, LoadAvgStats, String, usize) {
    let mut sys = System::new();
    sys.refresh_cpu_all();
    std::thread::sleep(CPU_SAMPLE_WINDOW);
    sys.refresh_cpu_usage();

    let usage = sys.global_cpu_usage() as f64;
    let cpu_model = sys
        .cpus()
        .first()
        .map(|cpu| cpu.brand().to_string())
        .unwrap_or_default();
    let cpu_cores = sys.cpus().len();

    let load = System::load_average();
    (
        usage,
        LoadAvgStats {
            load1: load.one,
            load5: load.five,
            load15: load.fifteen,
        },
        cpu_model,
        cpu_cores,
    )
}

fn collect_memory() -> MemoryStats {
    let mut sys = System::new();
    sys.refresh_memory();

    let total = sys.total_memory();
    let used = sys.used_memory();
    let swap_total = sys.total_swap();
    let swap_used = sys.used_swap();

    MemoryStats {
        total,
        used,
        free: sys.free_memory(),
        used_percent: percent(used, total),
        swap_total,
        swap_used,
        swap_percent: percent(swap_used, swap_total),
    }
}

fn percent(used: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        used as f64 / total as f64 * 100.0
    }
}

fn collect_disks(mounts: &[String]) -> HashMap<String, DiskStats> {
    let disks = Disks::new_with_refreshed_list();
    let mut out = HashMap::new();

    for mount in mounts {
        // Mounts that are missing or unreadable are skipped silently.
        let Some(disk) = disks
            .list()
            .iter()
            .find(|d| d.mount_point().to_string_lossy() == *mount)
        else {
            continue;
        };

        let total = disk.total_space();
        let free = disk.available_space();
        let used = total.saturating_sub(free);
        out.insert(
            mount.clone(),
            DiskStats {
                total,
                used,
                free,
                used_percent: percent(used, total),
                fstype: disk.file_system().to_string_lossy().into_owned(),
            },
        );
    }

    out
}

/// Three probes (counters, addresses, socket counts) share the network
/// sub-result under one mutex.
fn collect_network(iface_filter: &[String]) -> NetworkStats {
    let shared = Mutex::new(NetworkStats::default());
    let networks = Networks::new_with_refreshed_list();

    std::thread::scope(|scope| {
        scope.spawn(|| {
            let mut total_sent = 0u64;
            let mut total_recv = 0u64;
            let mut interfaces = HashMap::new();

            for (name, data) in &networks {
                if !iface_filter.is_empty() && !iface_filter.iter().any(|i| i == name) {
                    continue;
                }
                let sent = data.total_transmitted();
                let recv = data.total_received();
                interfaces.insert(
                    name.clone(),
                    InterfaceStats {
                        bytes_sent: sent,
                        bytes_recv: recv,
                        upload_speed: 0,
                        download_speed: 0,
                    },
                );
                total_sent += sent;
                total_recv += recv;
            }

            let mut net = shared.lock().expect("network result lock");
            net.interfaces = interfaces;
            net.total_sent = total_sent;
            net.total_received = total_recv;
        });

        scope.spawn(|| {
            let mut private_v4 = Vec::new();
            let mut public_v4 = Vec::new();
            let mut private_v6 = Vec::new();
            let mut public_v6 = Vec::new();

            for (_, data) in &networks {
                for ip_net in data.ip_networks() {
                    let addr = ip_net.addr;
                    if addr.is_loopback() {
                        continue;
                    }
                    match addr {
                        IpAddr::V4(v4) => {
                            if is_private_ipv4(v4) {
                                private_v4.push(v4.to_string());
                            } else {
                                public_v4.push(v4.to_string());
                            }
                        }
                        IpAddr::V6(v6) => {
                            if is_private_ipv6(v6) {
                                private_v6.push(v6.to_string());
                            } else {
                                public_v6.push(v6.to_string());
                            }
                        }
                    }
                }
            }

            let mut net = shared.lock().expect("network result lock");
            net.private_ipv4 = private_v4;
            net.public_ipv4 = public_v4;
            net.private_ipv6 = private_v6;
            net.public_ipv6 = public_v6;
        });

        scope.spawn(|| {
            let (tcp, udp) = count_sockets();
            let mut net = shared.lock().expect("network result lock");
            net.tcp_connections = tcp;
            net.udp_connections = udp;
        });
    });

    shared.into_inner().expect("network result lock")
}

/// RFC1918 ranges plus link-local (RFC3927) and loopback (RFC1122).
fn is_private_ipv4(addr: std::net::Ipv4Addr) -> bool {
    addr.is_private() || addr.is_link_local() || addr.is_loopback()
}

/// Unique-local (fc00::/7) and link-local (fe80::/10) are private.
fn is_private_ipv6(addr: std::net::Ipv6Addr) -> bool {
    let first = addr.segments()[0];
    (first & 0xfe00) == 0xfc00 || (first & 0xffc0) == 0xfe80
}

#[cfg(target_os = "linux")]
fn count_sockets() -> (usize, usize) {
    fn entries(path: &str) -> usize {
        std::fs::read_to_string(path)
            .map(|contents| contents.lines().count().saturating_sub(1))
            .unwrap_or(0)
    }
    (
        entries("/proc/net/tcp") + entries("/proc/net/tcp6"),
        entries("/proc/net/udp") + entries("/proc/net/udp6"),
    )
}

#[cfg(not(target_os = "linux"))]
fn count_sockets() -> (usize, usize) {
    (0, 0)
}
