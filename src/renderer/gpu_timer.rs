//! GPU Pass Timing
//!
//! Each timed pass owns a [`GpuTimer`]: a pair of timestamp queries per slot,
//! three slots deep. A frame records into the next free slot; the readback of
//! that slot is requested after submit and collected on a later frame without
//! ever waiting on the GPU. When every slot is still in flight the frame is
//! simply not timed, and [`GpuTimer::elapsed_ms`] keeps reporting the last
//! value that did arrive.
//!
//! The slot bookkeeping lives in [`TimerRing`], which has no GPU dependency
//! and is unit tested on its own.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

/// Slots per timer.
pub const TIMER_RING_SIZE: usize = 3;

/// Byte stride between slots in the resolve buffer (`resolve_query_set`
/// destination offsets must be 256-aligned).
const RESOLVE_STRIDE: wgpu::BufferAddress = 256;

/// Two `u64` timestamps.
const SLOT_BYTES: wgpu::BufferAddress = 16;

const MAP_PENDING: u8 = 0;
const MAP_OK: u8 = 1;
const MAP_FAILED: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Free,
    /// Timestamps written into a submitted (or about to be) command buffer.
    Recorded,
    /// `map_async` requested, callback outstanding.
    Mapping,
}

// ============================================================================
// TimerRing
// ============================================================================

#[derive(Debug, Clone)]
pub struct TimerRing {
    states: [SlotState; TIMER_RING_SIZE],
    next: usize,
    last_ms: Option<f32>,
}

impl Default for TimerRing {
    fn default() -> Self {
        Self::new()
    }
}

impl TimerRing {
    #[must_use]
    pub fn new() -> Self {
        Self {
            states: [SlotState::Free; TIMER_RING_SIZE],
            next: 0,
            last_ms: None,
        }
    }

    /// The slot this frame may record into, or `None` if it is still busy.
    #[must_use]
    pub fn acquire(&self) -> Option<usize> {
        (self.states[self.next] == SlotState::Free).then_some(self.next)
    }

    pub fn mark_recorded(&mut self, slot: usize) {
        self.states[slot] = SlotState::Recorded;
        self.next = (slot + 1) % TIMER_RING_SIZE;
    }

    pub fn mark_mapping(&mut self, slot: usize) {
        self.states[slot] = SlotState::Mapping;
    }

    /// Frees `slot`. A `None` result leaves the last value in place.
    pub fn complete(&mut self, slot: usize, elapsed_ms: Option<f32>) {
        if let Some(ms) = elapsed_ms {
            self.last_ms = Some(ms);
        }
        self.states[slot] = SlotState::Free;
    }

    #[must_use]
    pub fn state(&self, slot: usize) -> SlotState {
        self.states[slot]
    }

    pub fn slots_in(&self, state: SlotState) -> impl Iterator<Item = usize> + '_ {
        (0..TIMER_RING_SIZE).filter(move |&i| self.states[i] == state)
    }

    #[must_use]
    pub fn last_ms(&self) -> Option<f32> {
        self.last_ms
    }
}

// ============================================================================
// GpuTimer
// ============================================================================

struct TimerQueries {
    query_set: wgpu::QuerySet,
    resolve: wgpu::Buffer,
    readback: [wgpu::Buffer; TIMER_RING_SIZE],
    map_flags: [Arc<AtomicU8>; TIMER_RING_SIZE],
    period_ns: f32,
}

/// Token proving [`GpuTimer::begin`] wrote the start timestamp.
#[derive(Debug)]
#[must_use]
pub struct TimerScope {
    slot: usize,
}

pub struct GpuTimer {
    label: &'static str,
    queries: Option<TimerQueries>,
    ring: TimerRing,
}

impl GpuTimer {
    /// Creates a timer; it stays inert unless the device supports timestamps
    /// inside encoders.
    #[must_use]
    pub fn new(device: &wgpu::Device, queue: &wgpu::Queue, label: &'static str) -> Self {
        let needed =
            wgpu::Features::TIMESTAMP_QUERY | wgpu::Features::TIMESTAMP_QUERY_INSIDE_ENCODERS;
        let queries = device.features().contains(needed).then(|| {
            let readback = std::array::from_fn(|i| {
                device.create_buffer(&wgpu::BufferDescriptor {
                    label: Some(&format!("{label} Timer Readback {i}")),
                    size: SLOT_BYTES,
                    usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
                    mapped_at_creation: false,
                })
            });
            TimerQueries {
                query_set: device.create_query_set(&wgpu::QuerySetDescriptor {
                    label: Some(&format!("{label} Timer Queries")),
                    ty: wgpu::QueryType::Timestamp,
                    count: (TIMER_RING_SIZE * 2) as u32,
                }),
                resolve: device.create_buffer(&wgpu::BufferDescriptor {
                    label: Some(&format!("{label} Timer Resolve")),
                    size: RESOLVE_STRIDE * TIMER_RING_SIZE as wgpu::BufferAddress,
                    usage: wgpu::BufferUsages::QUERY_RESOLVE | wgpu::BufferUsages::COPY_SRC,
                    mapped_at_creation: false,
                }),
                readback,
                map_flags: std::array::from_fn(|_| Arc::new(AtomicU8::new(MAP_PENDING))),
                period_ns: queue.get_timestamp_period(),
            }
        });
        Self {
            label,
            queries,
            ring: TimerRing::new(),
        }
    }

    #[must_use]
    pub fn label(&self) -> &'static str {
        self.label
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.queries.is_some()
    }

    /// Writes the start timestamp, or skips timing this frame.
    pub fn begin(&mut self, encoder: &mut wgpu::CommandEncoder) -> Option<TimerScope> {
        let queries = self.queries.as_ref()?;
        let slot = self.ring.acquire()?;
        encoder.write_timestamp(&queries.query_set, (slot * 2) as u32);
        Some(TimerScope { slot })
    }

    /// Writes the end timestamp and copies the pair toward the slot's readback buffer.
    pub fn end(&mut self, encoder: &mut wgpu::CommandEncoder, scope: Option<TimerScope>) {
        let (Some(queries), Some(TimerScope { slot })) = (self.queries.as_ref(), scope) else {
            return;
        };
        let first = (slot * 2) as u32;
        let offset = RESOLVE_STRIDE * slot as wgpu::BufferAddress;
        encoder.write_timestamp(&queries.query_set, first + 1);
        encoder.resolve_query_set(&queries.query_set, first..first + 2, &queries.resolve, offset);
        let size: wgpu::BufferAddress = SLOT_BYTES;
        encoder.copy_buffer_to_buffer(&queries.resolve, offset, &queries.readback[slot], 0, size);
        self.ring.mark_recorded(slot);
    }

    /// Requests readback of every slot recorded in the just-submitted frame.
    pub fn after_submit(&mut self) {
        let Some(queries) = self.queries.as_ref() else {
            return;
        };
        let recorded: Vec<usize> = self.ring.slots_in(SlotState::Recorded).collect();
        for slot in recorded {
            let flag = Arc::clone(&queries.map_flags[slot]);
            flag.store(MAP_PENDING, Ordering::Release);
            queries.readback[slot]
                .slice(..)
                .map_async(wgpu::MapMode::Read, move |result| {
                    let value = if result.is_ok() { MAP_OK } else { MAP_FAILED };
                    flag.store(value, Ordering::Release);
                });
            self.ring.mark_mapping(slot);
        }
    }

    /// Collects finished readbacks. Never blocks.
    pub fn poll(&mut self) {
        let Some(queries) = self.queries.as_ref() else {
            return;
        };
        let mapping: Vec<usize> = self.ring.slots_in(SlotState::Mapping).collect();
        for slot in mapping {
            match queries.map_flags[slot].load(Ordering::Acquire) {
                MAP_OK => {
                    let buffer = &queries.readback[slot];
                    let ticks: [u64; 2] = {
                        let data = buffer.slice(..).get_mapped_range();
                        bytemuck::pod_read_unaligned(&data[..SLOT_BYTES as usize])
                    };
                    buffer.unmap();
                    let elapsed = ticks[1].saturating_sub(ticks[0]) as f64
                        * f64::from(queries.period_ns)
                        / 1_000_000.0;
                    self.ring.complete(slot, Some(elapsed as f32));
                }
                MAP_FAILED => {
                    log::debug!("timer '{}' readback failed, keeping last value", self.label);
                    self.ring.complete(slot, None);
                }
                _ => {}
            }
        }
    }

    /// Last measured duration in milliseconds (`0.0` before the first result).
    #[must_use]
    pub fn elapsed_ms(&self) -> f32 {
        self.ring.last_ms().unwrap_or(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn busy_slot_skips_recording() {
        let mut ring = TimerRing::new();
        for _ in 0..TIMER_RING_SIZE {
            let slot = ring.acquire().unwrap();
            ring.mark_recorded(slot);
            ring.mark_mapping(slot);
        }
        assert_eq!(ring.acquire(), None, "all slots in flight");

        ring.complete(0, Some(1.5));
        assert_eq!(ring.acquire(), Some(0));
    }

    #[test]
    fn missing_result_keeps_previous_value() {
        let mut ring = TimerRing::new();
        let slot = ring.acquire().unwrap();
        ring.mark_recorded(slot);
        ring.complete(slot, Some(2.0));

        let slot = ring.acquire().unwrap();
        ring.mark_recorded(slot);
        ring.complete(slot, None);
        assert_eq!(ring.last_ms(), Some(2.0));
    }

    #[test]
    fn slots_rotate() {
        let mut ring = TimerRing::new();
        let order: Vec<usize> = (0..4)
            .map(|_| {
                let slot = ring.acquire().unwrap();
                ring.mark_recorded(slot);
                ring.complete(slot, None);
                slot
            })
            .collect();
        assert_eq!(order, vec![0, 1, 2, 0]);
    }
}
