//! Host resource readings used by the memory check.

/// Resident memory of this process against host capacity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MemoryUsage {
    pub resident_bytes: u64,
    pub total_bytes: u64,
}

impl MemoryUsage {
    pub fn percent(&self) -> f64 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        self.resident_bytes as f64 * 100.0 / self.total_bytes as f64
    }
}

pub trait ResourceProbe: Send + Sync {
    /// `None` when the platform offers no reading.
    fn memory(&self) -> Option<MemoryUsage>;
}

/// Reads `/proc` on Linux; reports nothing elsewhere.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcProbe;

impl ResourceProbe for ProcProbe {
    fn memory(&self) -> Option<MemoryUsage> {
        let status = std::fs::read_to_string("/proc/self/status").ok()?;
        let meminfo = std::fs::read_to_string("/proc/meminfo").ok()?;
        Some(MemoryUsage {
            resident_bytes: kilobytes_field(&status, "VmRSS:")? * 1024,
            total_bytes: kilobytes_field(&meminfo, "MemTotal:")? * 1024,
        })
    }
}

/// A constant reading, for tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedProbe(pub Option<MemoryUsage>);

impl FixedProbe {
    pub fn percent(percent: u64) -> Self {
        Self(Some(MemoryUsage {
            resident_bytes: percent,
            total_bytes: 100,
        }))
    }
}

impl ResourceProbe for FixedProbe {
    fn memory(&self) -> Option<MemoryUsage> {
        self.0
    }
}

/// Parse a `Key:   1234 kB` line.
fn kilobytes_field(content: &str, key: &str) -> Option<u64> {
    content
        .lines()
        .find_map(|line| line.strip_prefix(key))
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|n| n.parse().ok())
}
