use crate::ink::memory::MemoryMonitor;
use crate::ink::model::Stroke;
use hashlink::LinkedHashMap;
use std::collections::HashSet;
use std::sync::Arc;

pub const STROKE_OVERHEAD_BYTES: u64 = 64;
pub const POINT_COST_BYTES: u64 = 32;
pub const DEFAULT_MAX_ENTRIES: usize = 10;
pub const DEFAULT_MEMORY_THRESHOLD: u64 = 50 * 1024 * 1024;

/// Shared, immutable view of one note's strokes.
pub type StrokeList = Arc<Vec<Stroke>>;

pub fn estimate_bytes(strokes: &[Stroke]) -> u64 {
    strokes
        .iter()
        .map(|stroke| STROKE_OVERHEAD_BYTES + stroke.point_count() as u64 * POINT_COST_BYTES)
        .sum()
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CacheStats {
    pub entries: usize,
    pub estimated_bytes: u64,
    pub hits: u64,
    pub misses: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

struct CacheEntry {
    strokes: StrokeList,
    estimated_bytes: u64,
}

/// LRU map from note id to its strokes, bounded by entry count and by an
/// estimated byte budget. The front of the map is the least recently used.
pub struct StrokeCache {
    entries: LinkedHashMap<String, CacheEntry>,
    max_entries: usize,
    byte_threshold: u64,
    total_bytes: u64,
    monitor: MemoryMonitor,
}

impl StrokeCache {
    pub fn new(max_entries: usize, byte_threshold: u64, monitor: MemoryMonitor) -> Self {
        Self {
            entries: LinkedHashMap::new(),
            max_entries: max_entries.max(1),
            byte_threshold,
            total_bytes: 0,
            monitor,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(
            DEFAULT_MAX_ENTRIES,
            DEFAULT_MEMORY_THRESHOLD,
            MemoryMonitor::default(),
        )
    }

    pub fn get(&mut self, note_id: &str) -> Option<StrokeList> {
        match self.entries.to_back(note_id) {
            Some(entry) => {
                let strokes = Arc::clone(&entry.strokes);
                self.monitor.record_hit();
                Some(strokes)
            }
            None => {
                self.monitor.record_miss();
                None
            }
        }
    }

    /// Non-recording lookup used by assertions and diagnostics.
    pub fn contains(&self, note_id: &str) -> bool {
        self.entries.contains_key(note_id)
    }

    /// Replaces the note's entry. Returns `false` when the payload was too
    /// large to admit; any existing entry is then left as it was.
    pub fn put(&mut self, note_id: &str, strokes: Vec<Stroke>) -> bool {
        let incoming = estimate_bytes(&strokes);
        if !self.admits(incoming) {
            tracing::debug!(
                note_id,
                estimated_bytes = incoming,
                "stroke cache rejected oversized put"
            );
            return false;
        }
        let count = strokes.len();
        self.replace_entry(note_id, Arc::new(strokes), incoming);
        self.monitor.record_cache_op(count);
        self.enforce_limits();
        true
    }

    /// Adds strokes to an already cached note. A note that is not cached
    /// stays uncached: a partial list would later read as the full note.
    ///
    /// Returns `false` only when the new strokes were rejected as oversized,
    /// in which case a cached entry for the note no longer matches the note.
    pub fn append(&mut self, note_id: &str, new_strokes: &[Stroke]) -> bool {
        if new_strokes.is_empty() {
            return true;
        }
        let incoming = estimate_bytes(new_strokes);
        if !self.admits(incoming) {
            tracing::debug!(
                note_id,
                estimated_bytes = incoming,
                "stroke cache rejected oversized append"
            );
            return false;
        }
        let Some(entry) = self.entries.to_back(note_id) else {
            return true;
        };
        Arc::make_mut(&mut entry.strokes).extend_from_slice(new_strokes);
        entry.estimated_bytes += incoming;
        self.total_bytes += incoming;
        self.monitor.record_cache_op(new_strokes.len());
        self.enforce_limits();
        true
    }

    /// Drops the given stroke ids from the note's cached list.
    pub fn remove(&mut self, note_id: &str, stroke_ids: &[String]) {
        let Some(entry) = self.entries.get_mut(note_id) else {
            return;
        };
        let ids: HashSet<&str> = stroke_ids.iter().map(String::as_str).collect();
        let before = entry.strokes.len();
        if !entry.strokes.iter().any(|s| ids.contains(s.id.as_str())) {
            return;
        }
        let kept: Vec<Stroke> = entry
            .strokes
            .iter()
            .filter(|s| !ids.contains(s.id.as_str()))
            .cloned()
            .collect();
        let removed = before - kept.len();
        let bytes = estimate_bytes(&kept);
        self.total_bytes = self.total_bytes - entry.estimated_bytes + bytes;
        entry.estimated_bytes = bytes;
        entry.strokes = Arc::new(kept);
        self.monitor.record_removal(removed);
    }

    pub fn invalidate(&mut self, note_id: &str) {
        if let Some(entry) = self.entries.remove(note_id) {
            self.total_bytes -= entry.estimated_bytes;
            self.monitor.record_removal(entry.strokes.len());
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.total_bytes = 0;
        self.monitor.reset();
    }

    /// Evicts down to half the entry cap when the memory monitor advises it.
    /// Returns the number of evicted notes.
    pub fn trim_if_advised(&mut self) -> usize {
        if !self.monitor.should_trim() {
            return 0;
        }
        let target = self.max_entries / 2;
        let mut evicted = 0;
        while self.entries.len() > target {
            if !self.evict_eldest() {
                break;
            }
            evicted += 1;
        }
        tracing::debug!(evicted, "stroke cache trimmed under memory pressure");
        evicted
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn estimated_bytes(&self) -> u64 {
        self.total_bytes
    }

    /// Note ids from least to most recently used.
    pub fn note_ids(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    pub fn monitor(&self) -> &MemoryMonitor {
        &self.monitor
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            estimated_bytes: self.total_bytes,
            hits: self.monitor.hit_count(),
            misses: self.monitor.miss_count(),
        }
    }

    fn admits(&self, incoming_bytes: u64) -> bool {
        incoming_bytes <= self.byte_threshold / 5
    }

    fn replace_entry(&mut self, note_id: &str, strokes: StrokeList, estimated_bytes: u64) {
        let previous = self.entries.insert(
            note_id.to_string(),
            CacheEntry {
                strokes,
                estimated_bytes,
            },
        );
        if let Some(previous) = previous {
            self.total_bytes -= previous.estimated_bytes;
            self.monitor.record_removal(previous.strokes.len());
        }
        self.total_bytes += estimated_bytes;
    }

    fn enforce_limits(&mut self) {
        while self.entries.len() > self.max_entries || self.total_bytes > self.byte_threshold {
            if !self.evict_eldest() {
                break;
            }
        }
    }

    fn evict_eldest(&mut self) -> bool {
        let Some((note_id, entry)) = self.entries.pop_front() else {
            return false;
        };
        self.total_bytes -= entry.estimated_bytes;
        self.monitor.record_removal(entry.strokes.len());
        tracing::debug!(note_id = %note_id, strokes = entry.strokes.len(), "stroke cache evicted note");
        true
    }
}
