//! Delayed-window speed values.
//!
//! Every sensor entry schedules two one-shot updates carrying that frame's
//! speed. When an update fires it overwrites the tag's slot. Nothing is
//! coalesced or cancelled, so the last update to fire wins.

use pulse_core::Tag;
use std::collections::HashMap;
use std::future::poll_fn;
use std::time::Duration;
use tokio_util::time::DelayQueue;

/// Which delayed slot an update writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Window {
    /// Fires after the short delay; reported as `max_speed_120_s`.
    Short,
    /// Fires after the long delay; reported as `max_speed_180_s`.
    Long,
}

impl Window {
    pub fn field_name(&self) -> &'static str {
        match self {
            Self::Short => "max_speed_120_s",
            Self::Long => "max_speed_180_s",
        }
    }
}

/// A pending or fired slot write.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowUpdate {
    pub tag: Tag,
    pub window: Window,
    pub value: f64,
}

/// Current slot values for one tag.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct WindowValues {
    pub short: f64,
    pub long: f64,
}

/// Timer queue plus the per-tag slots it feeds.
///
/// Owned by the relay loop, which polls [`DelayedWindows::next_fired`]
/// alongside source events.
pub struct DelayedWindows {
    short_delay: Duration,
    long_delay: Duration,
    values: HashMap<Tag, WindowValues>,
    queue: DelayQueue<WindowUpdate>,
}

impl DelayedWindows {
    pub fn new(short_delay: Duration, long_delay: Duration) -> Self {
        Self {
            short_delay,
            long_delay,
            values: HashMap::new(),
            queue: DelayQueue::new(),
        }
    }

    /// Queue both slot writes for one reading.
    pub fn schedule(&mut self, tag: Tag, value: f64) {
        self.queue.insert(
            WindowUpdate {
                tag,
                window: Window::Short,
                value,
            },
            self.short_delay,
        );
        self.queue.insert(
            WindowUpdate {
                tag,
                window: Window::Long,
                value,
            },
            self.long_delay,
        );
    }

    /// Slot values for a tag; zero until a write has fired.
    pub fn get(&self, tag: Tag) -> WindowValues {
        self.values.get(&tag).copied().unwrap_or_default()
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn has_pending(&self) -> bool {
        !self.queue.is_empty()
    }

    /// Wait for the next timer and apply it.
    ///
    /// Resolves to `None` immediately when nothing is queued; callers guard
    /// on [`DelayedWindows::has_pending`].
    pub async fn next_fired(&mut self) -> Option<WindowUpdate> {
        let expired = poll_fn(|cx| self.queue.poll_expired(cx)).await?;
        let update = expired.into_inner();
        self.apply(update);
        Some(update)
    }

    /// Write a fired update into its slot.
    pub fn apply(&mut self, update: WindowUpdate) {
        let slot = self.values.entry(update.tag).or_default();
        match update.window {
            Window::Short => slot.short = update.value,
            Window::Long => slot.long = update.value,
        }
    }
}

impl Default for DelayedWindows {
    fn default() -> Self {
        Self::new(Duration::from_secs(60), Duration::from_secs(120))
    }
}
