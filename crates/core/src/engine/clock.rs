use std::{
    thread,
    time::{Duration, Instant},
};

use serde::{Deserialize, Serialize};

/// Rate of the shared tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TickRate {
    #[default]
    Normal,
    PowerSave,
}

impl TickRate {
    pub fn hz(&self) -> u32 {
        match self {
            TickRate::Normal => 30,
            TickRate::PowerSave => 10,
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(1) / self.hz()
    }
}

/// Fixed-rate timer for the tick thread. Each call to [`TickLoop::wait`]
/// sleeps until the next deadline and returns the measured delta since the
/// previous call.
#[derive(Debug, Clone)]
pub struct TickLoop {
    rate: TickRate,
    last: Instant,
    deadline: Instant,
    elapsed: Duration,
}

impl TickLoop {
    pub fn new(rate: TickRate) -> Self {
        let now = Instant::now();
        Self {
            rate,
            last: now,
            deadline: now + rate.interval(),
            elapsed: Duration::ZERO,
        }
    }

    pub fn rate(&self) -> TickRate {
        self.rate
    }

    pub fn set_rate(&mut self, rate: TickRate) {
        self.rate = rate;
        self.deadline = self.last + rate.interval();
    }

    /// Total time handed out so far.
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    pub fn reset(&mut self) {
        *self = Self::new(self.rate);
    }

    pub fn wait(&mut self) -> Duration {
        let now = Instant::now();
        if self.deadline > now {
            thread::sleep(self.deadline - now);
        }
        self.advance(Instant::now())
    }

    /// Records a tick at `now` without sleeping.
    pub fn advance(&mut self, now: Instant) -> Duration {
        let delta = now.saturating_duration_since(self.last);
        self.last = now;
        self.elapsed += delta;
        let interval = self.rate.interval();
        self.deadline += interval;
        // Fell behind by more than a tick: resynchronise instead of bursting.
        if self.deadline <= now {
            self.deadline = now + interval;
        }
        delta
    }
}
