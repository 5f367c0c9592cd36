// src/engine/schedule.rs

//! Fixed-interval schedules.
//!
//! A schedule fires at `start_at + k * interval` for every `k >= 0`. There
//! is no catch-up: when several slots were missed (the process was down, or
//! a run took longer than the interval) only the most recent one fires.

use std::time::{Duration, SystemTime};

use tracing::{debug, info};

use crate::dag::RunState;
use crate::engine::runtime::Runtime;
use crate::exec::ClusterLaunchAdapter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schedule {
    pub interval: Duration,
    pub start_at: SystemTime,
}

impl Schedule {
    /// `interval` must be non-zero; a zero interval is bumped to 1ms.
    pub fn new(interval: Duration, start_at: SystemTime) -> Self {
        Self {
            interval: interval.max(Duration::from_millis(1)),
            start_at,
        }
    }

    /// First slot strictly after `t`.
    pub fn next_fire_after(&self, t: SystemTime) -> SystemTime {
        match t.duration_since(self.start_at) {
            Err(_) => self.start_at,
            Ok(elapsed) => {
                let k = slots_in(elapsed, self.interval) + 1;
                self.slot(k)
            }
        }
    }

    /// Latest slot at or before `t`, or `None` if the schedule has not
    /// started yet.
    pub fn latest_fire_at_or_before(&self, t: SystemTime) -> Option<SystemTime> {
        let elapsed = t.duration_since(self.start_at).ok()?;
        Some(self.slot(slots_in(elapsed, self.interval)))
    }

    /// The slot that should fire at `now`, given the slot that fired last.
    ///
    /// Returns the latest slot at or before `now` if it is newer than
    /// `last_fired`; missed intermediate slots are dropped.
    pub fn due_at(&self, last_fired: Option<SystemTime>, now: SystemTime) -> Option<SystemTime> {
        let latest = self.latest_fire_at_or_before(now)?;
        match last_fired {
            Some(last) if latest <= last => None,
            _ => Some(latest),
        }
    }

    fn slot(&self, k: u128) -> SystemTime {
        let offset = self.interval.as_nanos().saturating_mul(k);
        let offset = Duration::from_nanos(u64::try_from(offset).unwrap_or(u64::MAX));
        self.start_at + offset
    }
}

fn slots_in(elapsed: Duration, interval: Duration) -> u128 {
    elapsed.as_nanos() / interval.as_nanos().max(1)
}

/// Run `runtime` on `schedule` until `max_runs` runs completed (forever if
/// `None`). Returns the final state of every run, oldest first.
///
/// Runs never overlap: a slot that comes due while a run is active waits for
/// it, and slots missed in the meantime collapse into one.
pub async fn run_on_schedule<A>(
    runtime: &mut Runtime<A>,
    schedule: Schedule,
    max_runs: Option<usize>,
) -> Vec<RunState>
where
    A: ClusterLaunchAdapter + ?Sized + 'static,
{
    let mut results = Vec::new();
    let mut last_fired: Option<SystemTime> = None;

    while max_runs.is_none_or(|max| results.len() < max) {
        let now = SystemTime::now();
        let Some(slot) = schedule.due_at(last_fired, now) else {
            let next = match last_fired {
                Some(last) => schedule.next_fire_after(last.max(now)),
                None => schedule.next_fire_after(now),
            };
            let wait = next.duration_since(now).unwrap_or(Duration::ZERO);
            debug!(wait_ms = wait.as_millis() as u64, "waiting for next scheduled slot");
            tokio::time::sleep(wait).await;
            continue;
        };

        info!(
            dag_id = %runtime.graph().dag_id(),
            slot = ?slot,
            "schedule slot due; starting run"
        );
        last_fired = Some(slot);
        results.push(runtime.run().await);
    }

    results
}

/// Parse a simple duration string like `"250ms"`, `"3s"`, `"30m"`, `"2h"`,
/// `"1d"`.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty duration string".to_string());
    }

    // Find the boundary between digits and suffix.
    let idx = s
        .chars()
        .position(|c| !c.is_ascii_digit())
        .ok_or_else(|| "duration missing unit suffix".to_string())?;

    let (num_part, unit_part) = s.split_at(idx);
    let value: u64 = num_part
        .parse()
        .map_err(|e| format!("invalid duration number '{num_part}': {e}"))?;
    let unit = unit_part.trim().to_lowercase();

    let secs = |mult: u64| {
        value
            .checked_mul(mult)
            .map(Duration::from_secs)
            .ok_or_else(|| format!("duration '{s}' overflows"))
    };

    match unit.as_str() {
        "ms" => Ok(Duration::from_millis(value)),
        "s" => secs(1),
        "m" => secs(60),
        "h" => secs(60 * 60),
        "d" => secs(24 * 60 * 60),
        _ => Err(format!(
            "unsupported duration unit '{unit}'; expected ms, s, m, h, or d"
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DAY: Duration = Duration::from_secs(24 * 60 * 60);

    fn daily_from_yesterday(now: SystemTime) -> Schedule {
        Schedule::new(DAY, now - DAY)
    }

    #[test]
    fn parses_supported_units() {
        assert_eq!(parse_duration("250ms"), Ok(Duration::from_millis(250)));
        assert_eq!(parse_duration("3s"), Ok(Duration::from_secs(3)));
        assert_eq!(parse_duration("30m"), Ok(Duration::from_secs(1800)));
        assert_eq!(parse_duration(" 2h "), Ok(Duration::from_secs(7200)));
        assert_eq!(parse_duration("1d"), Ok(DAY));
    }

    #[test]
    fn rejects_malformed_durations() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("10").is_err());
        assert!(parse_duration("s").is_err());
        assert!(parse_duration("5w").is_err());
    }

    #[test]
    fn schedule_that_has_not_started_fires_at_start() {
        let now = SystemTime::now();
        let s = Schedule::new(DAY, now + Duration::from_secs(60));

        assert_eq!(s.next_fire_after(now), now + Duration::from_secs(60));
        assert_eq!(s.latest_fire_at_or_before(now), None);
        assert_eq!(s.due_at(None, now), None);
    }

    #[test]
    fn daily_schedule_started_yesterday_fires_now_then_tomorrow() {
        let now = SystemTime::now();
        let s = daily_from_yesterday(now);

        // The slot at `now` itself is the latest one.
        assert_eq!(s.latest_fire_at_or_before(now), Some(now));
        assert_eq!(s.due_at(None, now), Some(now));
        assert_eq!(s.due_at(Some(now), now + Duration::from_secs(5)), None);
        assert_eq!(s.next_fire_after(now), now + DAY);
    }

    #[test]
    fn missed_slots_collapse_into_the_latest() {
        let now = SystemTime::now();
        let s = daily_from_yesterday(now);
        let last = now - DAY;
        let three_days_later = now + DAY * 2 + Duration::from_secs(10);

        assert_eq!(s.due_at(Some(last), three_days_later), Some(now + DAY * 2));
    }
}
