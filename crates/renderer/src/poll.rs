//! Bounded polling for the render-complete marker.
//!
//! The engine drives [`CompletionPoll`] as a small state machine: it is told
//! what the last check observed and answers with the next step (check again,
//! wait, or stop). Keeping the attempt counter and backoff here lets the
//! schedule be tested without a browser or a clock.

use std::time::Duration;

/// How often and how many times to look for the marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSchedule {
    pub max_attempts: u32,
    pub interval: Duration,
}

impl Default for PollSchedule {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            interval: Duration::from_secs(1),
        }
    }
}

/// What the engine should do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollStep {
    /// Look for the marker. `attempt` is 1-based.
    Check { attempt: u32 },
    /// Sleep before the next check.
    Wait(Duration),
    Done(PollOutcome),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    Complete { attempts: u32 },
    Exhausted { attempts: u32 },
}

#[derive(Debug)]
pub struct CompletionPoll {
    schedule: PollSchedule,
    attempts: u32,
    finished: Option<PollOutcome>,
}

impl CompletionPoll {
    pub fn new(schedule: PollSchedule) -> Self {
        Self {
            schedule,
            attempts: 0,
            finished: None,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// First step of the loop.
    pub fn start(&mut self) -> PollStep {
        if self.schedule.max_attempts == 0 {
            let outcome = PollOutcome::Exhausted { attempts: 0 };
            self.finished = Some(outcome);
            return PollStep::Done(outcome);
        }
        self.attempts = 1;
        PollStep::Check { attempt: 1 }
    }

    /// Record the result of the check just performed.
    pub fn observe(&mut self, complete: bool) -> PollStep {
        if let Some(outcome) = self.finished {
            return PollStep::Done(outcome);
        }

        if complete {
            let outcome = PollOutcome::Complete {
                attempts: self.attempts,
            };
            self.finished = Some(outcome);
            return PollStep::Done(outcome);
        }

        if self.attempts >= self.schedule.max_attempts {
            let outcome = PollOutcome::Exhausted {
                attempts: self.attempts,
            };
            self.finished = Some(outcome);
            return PollStep::Done(outcome);
        }

        PollStep::Wait(self.schedule.interval)
    }

    /// Continue after a wait.
    pub fn resume(&mut self) -> PollStep {
        if let Some(outcome) = self.finished {
            return PollStep::Done(outcome);
        }
        self.attempts += 1;
        PollStep::Check {
            attempt: self.attempts,
        }
    }
}
