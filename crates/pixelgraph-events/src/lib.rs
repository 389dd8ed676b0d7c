//! # pixelgraph-events
//!
//! A single mutex-guarded event buffer the compute engines push into and a
//! caller drains for diagnostics/benchmarking. Grounded in the original
//! implementation's `GraphEventService`
//! (`examples/original_source/include/kernel/services/graph_event_service.hpp`).

use std::sync::Mutex;

/// Named sources a [`ComputeEvent`] can come from.
pub mod source {
    pub const MEMORY_CACHE: &str = "memory_cache";
    pub const DISK_CACHE: &str = "disk_cache";
    pub const COMPUTED: &str = "computed";
    pub const HP_UPDATE: &str = "hp_update";
    pub const RT_UPDATE: &str = "rt_update";
    pub const DOWNSAMPLE: &str = "downsample";
    pub const DOWNSAMPLE_PASSTHROUGH: &str = "downsample_passthrough";
}

/// One recorded compute: which node, what produced its output, and how
/// long it took.
#[derive(Debug, Clone, PartialEq)]
pub struct ComputeEvent {
    pub id: i64,
    pub name: String,
    pub source: String,
    pub elapsed_ms: f64,
}

/// A mutex-guarded append buffer. `drain` swaps the buffer out rather than
/// cloning and clearing, so a caller gets exactly what accumulated since
/// the last drain with no events lost or double-counted.
#[derive(Default)]
pub struct EventService {
    buffer: Mutex<Vec<ComputeEvent>>,
}

impl EventService {
    pub fn new() -> Self {
        EventService { buffer: Mutex::new(Vec::new()) }
    }

    pub fn push(&self, id: i64, name: impl Into<String>, source: impl Into<String>, elapsed_ms: f64) {
        self.buffer.lock().unwrap().push(ComputeEvent {
            id,
            name: name.into(),
            source: source.into(),
            elapsed_ms,
        });
    }

    pub fn drain(&self) -> Vec<ComputeEvent> {
        let mut buffer = self.buffer.lock().unwrap();
        std::mem::take(&mut *buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drain_returns_pushed_events_in_order_and_empties_the_buffer() {
        let events = EventService::new();
        events.push(1, "blur", source::COMPUTED, 4.5);
        events.push(1, "blur", source::DISK_CACHE, 0.1);

        let drained = events.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].source, source::COMPUTED);
        assert_eq!(drained[1].source, source::DISK_CACHE);
        assert!(events.drain().is_empty());
    }
}
