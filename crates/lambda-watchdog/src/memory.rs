//! Resident memory measurement.

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Source of the current process's resident memory usage.
pub trait MemoryProbe: Send + Sync + 'static {
    /// Resident set size in MB.
    fn resident_mb(&self) -> f64;
}

/// Measures the resident memory of the current process.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessMemory;

impl MemoryProbe for ProcessMemory {
    fn resident_mb(&self) -> f64 {
        process_resident_bytes() as f64 / BYTES_PER_MB
    }
}

#[cfg(target_os = "linux")]
fn process_resident_bytes() -> u64 {
    const PAGE_SIZE: u64 = 4096;

    std::fs::read_to_string("/proc/self/statm")
        .ok()
        .and_then(|content| {
            content
                .split_whitespace()
                .nth(1)
                .and_then(|s| s.parse::<u64>().ok())
                .map(|pages| pages * PAGE_SIZE)
        })
        .unwrap_or(0)
}

#[cfg(target_os = "macos")]
fn process_resident_bytes() -> u64 {
    use std::process::Command;

    let pid = std::process::id();
    Command::new("ps")
        .args(["-o", "rss=", "-p", &pid.to_string()])
        .output()
        .ok()
        .and_then(|output| {
            String::from_utf8(output.stdout)
                .ok()
                .and_then(|s| s.trim().parse::<u64>().ok())
                .map(|kb| kb * 1024)
        })
        .unwrap_or(0)
}

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
fn process_resident_bytes() -> u64 {
    0
}
