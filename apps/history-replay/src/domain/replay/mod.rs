//! Replay Scheduling Domain
//!
//! Types that map real elapsed time onto a recorded timeline and keep the
//! upcoming events of that timeline in order.
//!
//! - `clock`: [`PseudoClock`], real time → virtual time under an origin and speed
//! - `event`: [`ReplayEvent`] and the raw samples it is parsed from
//! - `queue`: [`ReplayQueue`], a min-heap of pending events
//! - `schedule`: [`Schedule`], the single critical section shared by the
//!   fetcher, dispatcher and seek paths

mod clock;
mod error;
mod event;
mod queue;
mod schedule;

pub use clock::PseudoClock;
pub use error::{ClockError, SampleError};
pub use event::{RawSample, ReplayEvent, parse_timestamp};
pub use queue::ReplayQueue;
pub use schedule::{ChunkWindow, CommitOutcome, Due, FetchPlan, Schedule, ScheduleSnapshot};
