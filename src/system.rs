//! Host statistics for the dashboard, read through `sysinfo` so the same
//! snapshot works on every platform it supports. Readings a platform cannot
//! provide come back zeroed rather than failing.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sysinfo::{Disks, Networks, System};
use tokio::sync::Mutex;

fn percent(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        (part as f64 / whole as f64 * 1000.0).round() / 10.0
    }
}

fn round1(value: f32) -> f64 {
    if !value.is_finite() {
        return 0.0;
    }
    ((f64::from(value) * 10.0).round() / 10.0).clamp(0.0, 100.0)
}

pub fn format_uptime(seconds: u64) -> String {
    let days = seconds / 86_400;
    let hours = (seconds % 86_400) / 3_600;
    let minutes = (seconds % 3_600) / 60;
    format!("{days}d {hours}h {minutes}m")
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct MemoryUsage {
    pub used_bytes: u64,
    pub total_bytes: u64,
    pub percent: f64,
}

impl MemoryUsage {
    pub fn new(total_bytes: u64, available_bytes: u64) -> Self {
        let used_bytes = total_bytes.saturating_sub(available_bytes);
        Self {
            used_bytes,
            total_bytes,
            percent: percent(used_bytes, total_bytes),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct DiskUsage {
    pub used_bytes: u64,
    pub total_bytes: u64,
    pub percent: f64,
}

impl DiskUsage {
    pub fn new(total_bytes: u64, available_bytes: u64) -> Self {
        let used_bytes = total_bytes.saturating_sub(available_bytes);
        Self {
            used_bytes,
            total_bytes,
            percent: percent(used_bytes, total_bytes),
        }
    }
}

/// Usage of the filesystem mounted at `/`, falling back to the first listed
/// disk on hosts without one. Entries are `(mount point, total, available)`.
pub fn root_disk<'a>(disks: impl IntoIterator<Item = (&'a Path, u64, u64)>) -> DiskUsage {
    let mut first = None;
    for (mount, total, available) in disks {
        if mount == Path::new("/") {
            return DiskUsage::new(total, available);
        }
        if first.is_none() {
            first = Some(DiskUsage::new(total, available));
        }
    }
    first.unwrap_or_default()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct NetworkTotals {
    pub bytes_sent: u64,
    pub bytes_recv: u64,
}

/// Sums every interface except loopback. Entries are
/// `(interface, received, transmitted)`.
pub fn network_totals<'a>(interfaces: impl IntoIterator<Item = (&'a str, u64, u64)>) -> NetworkTotals {
    interfaces
        .into_iter()
        .filter(|(name, _, _)| *name != "lo")
        .fold(NetworkTotals::default(), |acc, (_, recv, sent)| NetworkTotals {
            bytes_recv: acc.bytes_recv + recv,
            bytes_sent: acc.bytes_sent + sent,
        })
}

#[derive(Debug, Clone, Serialize)]
pub struct StorageUsage {
    pub used_bytes: u64,
    pub quota_bytes: u64,
    pub percent: f64,
}

impl StorageUsage {
    pub fn new(used_bytes: u64, quota_bytes: u64) -> Self {
        Self {
            used_bytes,
            quota_bytes,
            percent: percent(used_bytes, quota_bytes),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Uptime {
    pub seconds: u64,
    pub display: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct HostSnapshot {
    pub hostname: String,
    pub uptime: Uptime,
    pub cpu_percent: f64,
    pub per_core: Vec<f64>,
    pub load_average: [f64; 3],
    pub memory: MemoryUsage,
    pub disk: DiskUsage,
    pub network: NetworkTotals,
    pub storage: StorageUsage,
    pub timestamp: DateTime<Utc>,
}

/// Keeps one `System` alive so each sample reports CPU usage since the
/// previous one (since startup on the first call).
pub struct HostSampler {
    system: Mutex<System>,
}

impl Default for HostSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl HostSampler {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_cpu();
        Self {
            system: Mutex::new(system),
        }
    }

    pub async fn sample(&self, storage: StorageUsage) -> HostSnapshot {
        let (cpu_percent, per_core, memory) = {
            let mut system = self.system.lock().await;
            system.refresh_cpu();
            system.refresh_memory();
            (
                round1(system.global_cpu_info().cpu_usage()),
                system.cpus().iter().map(|cpu| round1(cpu.cpu_usage())).collect(),
                MemoryUsage::new(system.total_memory(), system.available_memory()),
            )
        };

        let disks = Disks::new_with_refreshed_list();
        let disk = root_disk(
            disks
                .iter()
                .map(|d| (d.mount_point(), d.total_space(), d.available_space())),
        );
        let networks = Networks::new_with_refreshed_list();
        let network = network_totals(
            networks
                .iter()
                .map(|(name, data)| (name.as_str(), data.total_received(), data.total_transmitted())),
        );

        let load = System::load_average();
        let uptime_secs = System::uptime();
        HostSnapshot {
            hostname: System::host_name().unwrap_or_else(|| "unknown".to_string()),
            uptime: Uptime {
                seconds: uptime_secs,
                display: format_uptime(uptime_secs),
            },
            cpu_percent,
            per_core,
            load_average: [load.one, load.five, load.fifteen],
            memory,
            disk,
            network,
            storage,
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_counts_available_as_free() {
        let mem = MemoryUsage::new(1000 * 1024, 250 * 1024);
        assert_eq!(mem.used_bytes, 750 * 1024);
        assert_eq!(mem.percent, 75.0);
        assert_eq!(MemoryUsage::new(0, 0).percent, 0.0);
    }

    #[test]
    fn root_disk_prefers_slash() {
        let disks = [
            (Path::new("/boot"), 500, 400),
            (Path::new("/"), 1000, 250),
            (Path::new("/home"), 4000, 1000),
        ];
        assert_eq!(root_disk(disks), DiskUsage::new(1000, 250));
        assert_eq!(DiskUsage::new(1000, 250).percent, 75.0);
    }

    #[test]
    fn root_disk_falls_back_to_first() {
        let disks = [(Path::new("C:\\"), 200, 50), (Path::new("D:\\"), 800, 800)];
        assert_eq!(root_disk(disks).used_bytes, 150);
        assert_eq!(root_disk(std::iter::empty()), DiskUsage::default());
    }

    #[test]
    fn network_skips_loopback() {
        let ifaces = [("lo", 5000, 5000), ("eth0", 1200, 800), ("wlan0", 300, 200)];
        assert_eq!(
            network_totals(ifaces),
            NetworkTotals {
                bytes_sent: 1000,
                bytes_recv: 1500
            }
        );
    }

    #[test]
    fn uptime_formats_days_hours_minutes() {
        assert_eq!(format_uptime(93784), "1d 2h 3m");
        assert_eq!(format_uptime(0), "0d 0h 0m");
    }

    #[tokio::test]
    async fn sample_reports_bounded_percentages() {
        let sampler = HostSampler::new();
        let snap = sampler.sample(StorageUsage::new(10, 100)).await;
        assert!((0.0..=100.0).contains(&snap.cpu_percent));
        assert!(snap.per_core.iter().all(|c| (0.0..=100.0).contains(c)));
        assert!(snap.memory.percent <= 100.0);
        assert!(snap.disk.percent <= 100.0);
        assert_eq!(snap.storage.percent, 10.0);
        assert_eq!(snap.uptime.display, format_uptime(snap.uptime.seconds));
    }
}
