//! Shared frame scheduler.
//!
//! One interval drives every frame-aware instance. Registered instances all
//! advance within the same tick, in registration order.

use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures_util::FutureExt;
use tokio::time::Instant;

use crate::module::FrameTick;
use crate::registry::InstanceRegistry;

#[derive(Debug, Clone, PartialEq, Eq)]
struct FrameSlot {
    instance_id: String,
    cell_index: usize,
}

#[derive(Debug)]
pub struct FrameScheduler {
    interval: Duration,
    slots: Vec<FrameSlot>,
    frame: u64,
    started: Option<Instant>,
    last: Option<Instant>,
}

impl FrameScheduler {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            slots: Vec::new(),
            frame: 0,
            started: None,
            last: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn register(&mut self, instance_id: &str, cell_index: usize) {
        let slot = FrameSlot {
            instance_id: instance_id.to_string(),
            cell_index,
        };
        if !self.slots.contains(&slot) {
            self.slots.push(slot);
        }
    }

    /// Drop every registration of one instance id.
    pub fn unregister(&mut self, instance_id: &str) -> usize {
        let before = self.slots.len();
        self.slots.retain(|s| s.instance_id != instance_id);
        before - self.slots.len()
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.frame = 0;
        self.started = None;
        self.last = None;
    }

    pub fn is_idle(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Advance every registered instance by one frame.
    ///
    /// An instance whose frame callback fails, panics or no longer exists is
    /// unregistered. Returns the number of instances advanced.
    pub async fn tick(&mut self, registry: &mut InstanceRegistry) -> usize {
        if self.slots.is_empty() {
            return 0;
        }

        let now = Instant::now();
        let started = *self.started.get_or_insert(now);
        let delta = self.last.map(|last| now - last).unwrap_or_default();
        self.last = Some(now);
        self.frame += 1;

        let tick = FrameTick {
            frame: self.frame,
            elapsed_ms: (now - started).as_millis() as u64,
            delta_ms: delta.as_millis() as u64,
        };

        let mut advanced = 0;
        let mut dropped = Vec::new();
        for (position, slot) in self.slots.iter().enumerate() {
            let Some(cell) = registry.cell_mut(&slot.instance_id, slot.cell_index) else {
                dropped.push(position);
                continue;
            };
            match AssertUnwindSafe(cell.on_frame(tick)).catch_unwind().await {
                Ok(Ok(())) => advanced += 1,
                Ok(Err(e)) => {
                    tracing::warn!(
                        instance_id = %slot.instance_id,
                        cell = slot.cell_index,
                        "frame callback failed, unregistering: {e}"
                    );
                    dropped.push(position);
                }
                Err(_) => {
                    tracing::error!(
                        instance_id = %slot.instance_id,
                        cell = slot.cell_index,
                        "frame callback panicked, unregistering"
                    );
                    dropped.push(position);
                }
            }
        }

        for position in dropped.into_iter().rev() {
            self.slots.remove(position);
        }
        advanced
    }
}
