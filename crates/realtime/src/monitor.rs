use std::sync::Mutex;

/// How often the monitor samples.
pub const MONITOR_INTERVAL_SECS: u64 = 30;
/// RSS above this logs a leak warning.
pub const RSS_WARN_MB: f64 = 512.0;

type Gauge = (&'static str, Box<dyn Fn() -> usize + Send + Sync>);

#[derive(Debug, Clone)]
pub struct MonitorSnapshot {
    pub rss_mb: Option<f64>,
    pub gauges: Vec<(&'static str, usize)>,
}

/// Periodic memory/metrics snapshots. Subsystems register size gauges at
/// bootstrap (ownership maps, activity maps, fallback caches) so growth is
/// visible long before the process is in trouble.
#[derive(Default)]
pub struct MemoryMonitor {
    gauges: Mutex<Vec<Gauge>>,
}

impl MemoryMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&self, name: &'static str, gauge: F)
    where
        F: Fn() -> usize + Send + Sync + 'static,
    {
        if let Ok(mut gauges) = self.gauges.lock() {
            gauges.push((name, Box::new(gauge)));
        }
    }

    pub fn snapshot(&self) -> MonitorSnapshot {
        let gauges = match self.gauges.lock() {
            Ok(gauges) => gauges
                .iter()
                .map(|(name, gauge)| (*name, gauge()))
                .collect(),
            Err(_) => Vec::new(),
        };
        MonitorSnapshot {
            rss_mb: read_rss_mb(),
            gauges,
        }
    }

    /// One monitor pass: log the snapshot, warn on the RSS threshold.
    pub fn tick(&self) {
        let snapshot = self.snapshot();
        let gauges: Vec<String> = snapshot
            .gauges
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect();
        match snapshot.rss_mb {
            Some(rss) if rss > RSS_WARN_MB => {
                log::warn!(
                    "memory monitor: rss {rss:.0} MB above {RSS_WARN_MB:.0} MB threshold ({})",
                    gauges.join(", ")
                );
            }
            Some(rss) => {
                log::debug!("memory monitor: rss {rss:.0} MB ({})", gauges.join(", "));
            }
            None => log::debug!("memory monitor: ({})", gauges.join(", ")),
        }
    }
}

/// VmRSS from procfs; `None` off Linux or when unreadable.
fn read_rss_mb() -> Option<f64> {
    let status = std::fs::read_to_string("/proc/self/status").ok()?;
    let line = status.lines().find(|line| line.starts_with("VmRSS:"))?;
    let kb: f64 = line.split_whitespace().nth(1)?.parse().ok()?;
    Some(kb / 1024.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gauges_report_registered_sizes() {
        let monitor = MemoryMonitor::new();
        monitor.register("fixed", || 7);
        let snapshot = monitor.snapshot();
        assert!(snapshot.gauges.contains(&("fixed", 7)));
    }

    #[test]
    fn tick_does_not_panic_without_gauges() {
        MemoryMonitor::new().tick();
    }
}
