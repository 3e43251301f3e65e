//! Shared replay schedule.
//!
//! The pseudo clock, the fetch horizon and the replay queue are read and
//! written together, so they live in one struct that the session guards with
//! a single lock. Every method here runs inside that critical section and
//! none of them block or perform I/O.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

use super::clock::PseudoClock;
use super::error::ClockError;
use super::event::ReplayEvent;
use super::queue::ReplayQueue;

/// A historical window handed to the fetcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkWindow {
    /// Inclusive window start (the horizon when the window was planned).
    pub start: DateTime<Utc>,
    /// Exclusive window end.
    pub end: DateTime<Utc>,
    /// Schedule generation the window was planned against.
    pub generation: u64,
}

impl ChunkWindow {
    /// Whether `timestamp` falls inside `[start, end)`.
    #[must_use]
    pub fn contains(&self, timestamp: DateTime<Utc>) -> bool {
        self.start <= timestamp && timestamp < self.end
    }
}

/// What the fetcher should do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchPlan {
    /// Virtual time has caught up with the live present; idle until a rebase.
    Exhausted,
    /// Fetched data already runs a full look-ahead window ahead.
    Backpressure {
        /// Real time until the horizon falls back inside the window.
        wait: Duration,
    },
    /// Fetch this window next.
    Fetch(ChunkWindow),
}

/// Result of handing a fetched chunk back to the schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    /// Events queued and the horizon advanced by one chunk.
    Committed {
        /// Number of events queued.
        queued: usize,
        /// New horizon.
        horizon: DateTime<Utc>,
    },
    /// A rebase happened while the chunk was in flight; events discarded.
    Stale {
        /// Number of events discarded.
        discarded: usize,
    },
}

/// Result of asking for the next deliverable event.
#[derive(Debug, Clone, PartialEq)]
pub enum Due {
    /// Earliest event, removed from the queue, whose time has come.
    Event(ReplayEvent),
    /// Earliest event is still in the virtual future.
    NotDue {
        /// Real time until it becomes due.
        wait: Duration,
    },
    /// Nothing queued.
    Empty,
}

/// Point-in-time view of a schedule, for logging and health reporting.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduleSnapshot {
    /// Current virtual time.
    pub virtual_now: DateTime<Utc>,
    /// Upper bound of virtual time already requested.
    pub horizon: DateTime<Utc>,
    /// Number of rebases so far.
    pub generation: u64,
    /// Events waiting for delivery.
    pub queued: usize,
    /// Current speed multiplier.
    pub scale: f64,
}

/// Clock, horizon and queue of one replay session.
#[derive(Debug)]
pub struct Schedule {
    clock: PseudoClock,
    horizon: DateTime<Utc>,
    generation: u64,
    queue: ReplayQueue,
}

impl Schedule {
    /// Create a schedule whose horizon starts at the clock origin.
    #[must_use]
    pub fn new(clock: PseudoClock) -> Self {
        Self {
            horizon: clock.virtual_origin(),
            clock,
            generation: 0,
            queue: ReplayQueue::new(),
        }
    }

    /// Decide the fetcher's next step.
    ///
    /// `wall_now` is the live present; `look_ahead` bounds how far the
    /// horizon may run ahead of virtual time.
    #[must_use]
    pub fn plan_fetch(
        &self,
        wall_now: DateTime<Utc>,
        look_ahead: TimeDelta,
        chunk_length: TimeDelta,
    ) -> FetchPlan {
        let now = self.clock.now();
        if now >= wall_now {
            return FetchPlan::Exhausted;
        }

        let resume_at = self.horizon - look_ahead;
        if now < resume_at {
            return FetchPlan::Backpressure {
                wait: self.clock.real_until(resume_at),
            };
        }

        FetchPlan::Fetch(ChunkWindow {
            start: self.horizon,
            end: self.horizon + chunk_length,
            generation: self.generation,
        })
    }

    /// Queue a fetched chunk if it is still current.
    ///
    /// A chunk is stale when a rebase bumped the generation after it was
    /// planned; its events are dropped and the horizon is left alone.
    pub fn commit_chunk(&mut self, window: ChunkWindow, events: Vec<ReplayEvent>) -> CommitOutcome {
        if window.generation != self.generation || window.start != self.horizon {
            return CommitOutcome::Stale {
                discarded: events.len(),
            };
        }

        let queued = events.len();
        self.queue.extend(events);
        self.horizon = window.end;
        CommitOutcome::Committed {
            queued,
            horizon: self.horizon,
        }
    }

    /// Remove the earliest event if the clock has reached it.
    pub fn pop_due(&mut self) -> Due {
        let Some(head) = self.queue.peek_min() else {
            return Due::Empty;
        };

        if self.clock.now() < head.timestamp {
            return Due::NotDue {
                wait: self.clock.real_until(head.timestamp),
            };
        }

        self.queue.pop_min().map_or(Due::Empty, Due::Event)
    }

    /// Drain the queue, restart the clock at `start` and reset the horizon.
    ///
    /// Returns the number of discarded events. On error nothing changes.
    ///
    /// # Errors
    ///
    /// Returns [`ClockError::InvalidScale`] if `scale` is not usable.
    pub fn rebase(&mut self, start: DateTime<Utc>, scale: f64) -> Result<usize, ClockError> {
        let clock = PseudoClock::start(start, scale)?;
        let discarded = self.queue.drain_all();
        self.clock = clock;
        self.horizon = start;
        self.generation = self.generation.wrapping_add(1);
        Ok(discarded)
    }

    /// Current virtual time.
    #[must_use]
    pub fn virtual_now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Current fetch horizon.
    #[must_use]
    pub const fn horizon(&self) -> DateTime<Utc> {
        self.horizon
    }

    /// Current speed multiplier.
    #[must_use]
    pub const fn scale(&self) -> f64 {
        self.clock.scale()
    }

    /// Current generation.
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    /// Number of queued events.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Point-in-time view.
    #[must_use]
    pub fn snapshot(&self) -> ScheduleSnapshot {
        ScheduleSnapshot {
            virtual_now: self.clock.now(),
            horizon: self.horizon,
            generation: self.generation,
            queued: self.queue.len(),
            scale: self.clock.scale(),
        }
    }
}
