use std::sync::Mutex;
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};

/// Cached-stroke count above which MEDIUM pressure also advises trimming.
pub const MEDIUM_PRESSURE_STROKE_LIMIT: u64 = 10_000;

const HIGH_PRESSURE_RATIO: f64 = 0.9;
const MEDIUM_PRESSURE_RATIO: f64 = 0.7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MemoryPressure {
    Low,
    Medium,
    High,
}

impl MemoryPressure {
    pub fn from_ratio(ratio: f64) -> Self {
        if ratio > HIGH_PRESSURE_RATIO {
            Self::High
        } else if ratio > MEDIUM_PRESSURE_RATIO {
            Self::Medium
        } else {
            Self::Low
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemorySample {
    pub used_bytes: u64,
    pub total_bytes: u64,
}

impl MemorySample {
    pub fn ratio(&self) -> f64 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        self.used_bytes as f64 / self.total_bytes as f64
    }
}

/// Source of the in-use / available memory figures behind the pressure level.
pub trait MemorySampler: Send + Sync {
    fn sample(&self) -> Option<MemorySample>;
}

/// Samples this process's resident memory against the host's total memory
/// through `sysinfo`.
///
/// Falls back to host-wide used memory when the current process cannot be
/// looked up.
pub struct SystemMemorySampler {
    system: Mutex<System>,
    pid: Option<Pid>,
}

impl SystemMemorySampler {
    pub fn new() -> Self {
        let pid = match sysinfo::get_current_pid() {
            Ok(pid) => Some(pid),
            Err(err) => {
                tracing::warn!(err, "current pid unavailable, sampling host memory");
                None
            }
        };
        Self {
            system: Mutex::new(System::new()),
            pid,
        }
    }
}

impl Default for SystemMemorySampler {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySampler for SystemMemorySampler {
    fn sample(&self) -> Option<MemorySample> {
        let mut system = self.system.lock().ok()?;
        system.refresh_memory();
        let process_bytes = self.pid.and_then(|pid| {
            system.refresh_processes_specifics(
                ProcessesToUpdate::Some(&[pid]),
                false,
                ProcessRefreshKind::nothing().with_memory(),
            );
            system.process(pid).map(|process| process.memory())
        });
        Some(MemorySample {
            used_bytes: process_bytes.unwrap_or_else(|| system.used_memory()),
            total_bytes: system.total_memory(),
        })
    }
}

/// Reports a constant sample. Useful for hosts that track their own budget.
#[derive(Debug, Clone, Copy)]
pub struct FixedMemorySampler(pub MemorySample);

impl FixedMemorySampler {
    pub fn with_ratio(ratio: f64) -> Self {
        let total = 1_000_000u64;
        Self(MemorySample {
            used_bytes: (ratio.clamp(0.0, 1.0) * total as f64) as u64,
            total_bytes: total,
        })
    }
}

impl MemorySampler for FixedMemorySampler {
    fn sample(&self) -> Option<MemorySample> {
        Some(self.0)
    }
}

/// Tracks cache effectiveness and advises when the cache should shrink.
/// It never evicts anything itself.
pub struct MemoryMonitor {
    sampler: Box<dyn MemorySampler>,
    hit_count: u64,
    miss_count: u64,
    total_operations: u64,
    cached_strokes: u64,
}

impl MemoryMonitor {
    pub fn new(sampler: Box<dyn MemorySampler>) -> Self {
        Self {
            sampler,
            hit_count: 0,
            miss_count: 0,
            total_operations: 0,
            cached_strokes: 0,
        }
    }

    pub fn record_hit(&mut self) {
        self.hit_count += 1;
    }

    pub fn record_miss(&mut self) {
        self.miss_count += 1;
    }

    pub fn record_cache_op(&mut self, stroke_count: usize) {
        self.total_operations += 1;
        self.cached_strokes += stroke_count as u64;
    }

    pub fn record_removal(&mut self, stroke_count: usize) {
        self.cached_strokes = self.cached_strokes.saturating_sub(stroke_count as u64);
    }

    pub fn reset(&mut self) {
        self.hit_count = 0;
        self.miss_count = 0;
        self.total_operations = 0;
        self.cached_strokes = 0;
    }

    pub fn hit_count(&self) -> u64 {
        self.hit_count
    }

    pub fn miss_count(&self) -> u64 {
        self.miss_count
    }

    pub fn total_operations(&self) -> u64 {
        self.total_operations
    }

    pub fn cached_strokes(&self) -> u64 {
        self.cached_strokes
    }

    /// Pressure at call time. A failed sample reads as `Low`.
    pub fn pressure_level(&self) -> MemoryPressure {
        self.sampler
            .sample()
            .map(|sample| MemoryPressure::from_ratio(sample.ratio()))
            .unwrap_or(MemoryPressure::Low)
    }

    pub fn should_trim(&self) -> bool {
        match self.pressure_level() {
            MemoryPressure::High => true,
            MemoryPressure::Medium => self.cached_strokes > MEDIUM_PRESSURE_STROKE_LIMIT,
            MemoryPressure::Low => false,
        }
    }
}

impl Default for MemoryMonitor {
    fn default() -> Self {
        Self::new(Box::new(SystemMemorySampler::new()))
    }
}
