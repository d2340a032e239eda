//! Wall-clock timing of a question phase.
//!
//! Every timing decision is computed from the absolute timestamps stored on the phase
//! row, never from a countdown owned by a process, so any role can recompute the same
//! remaining time after a reconnect.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use uuid::Uuid;

use crate::dao::models::QuestionPhaseEntity;

/// Whole milliseconds in `duration`, saturating on overflow.
pub fn as_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Milliseconds from `earlier` to `later`, zero when `later` is not after `earlier`.
pub fn millis_between(earlier: SystemTime, later: SystemTime) -> u64 {
    later
        .duration_since(earlier)
        .map(as_millis)
        .unwrap_or_default()
}

/// Milliseconds since the Unix epoch, used on the wire so clients can do their own math.
pub fn epoch_millis(at: SystemTime) -> u64 {
    millis_between(UNIX_EPOCH, at)
}

fn shift_back(at: SystemTime, millis: u64) -> SystemTime {
    at.checked_sub(Duration::from_millis(millis))
        .unwrap_or(UNIX_EPOCH)
}

impl QuestionPhaseEntity {
    /// Build the row written when the host activates `question_index`.
    pub fn activate(
        session_id: Uuid,
        question_index: u32,
        question_id: Uuid,
        timer_ms: u64,
        now: SystemTime,
    ) -> Self {
        Self {
            session_id,
            question_index,
            question_id,
            started_at: now,
            ends_at: Some(now + Duration::from_millis(timer_ms)),
            paused: false,
            paused_remaining_ms: None,
            locked: false,
            show_results: false,
            show_leaderboard: false,
            version: 1,
        }
    }

    /// Restart the timer of a row that was written but never became current.
    pub fn reactivated(&self, question_id: Uuid, timer_ms: u64, now: SystemTime) -> Self {
        Self {
            version: self.version + 1,
            ..Self::activate(
                self.session_id,
                self.question_index,
                question_id,
                timer_ms,
                now,
            )
        }
    }

    /// Freeze the timer, keeping only the remaining time.
    pub fn paused_at(&self, now: SystemTime) -> Self {
        let remaining = self.remaining_ms(now);
        Self {
            ends_at: None,
            paused: true,
            paused_remaining_ms: Some(remaining),
            version: self.version + 1,
            ..self.clone()
        }
    }

    /// Restart the timer from the remaining-time snapshot.
    ///
    /// The start is moved forward by the time spent paused so that
    /// `elapsed = now - started_at` keeps excluding the pause for answers scored later.
    pub fn resumed_at(&self, now: SystemTime, timer_ms: u64) -> Self {
        let remaining = self.paused_remaining_ms.unwrap_or_default().min(timer_ms);
        Self {
            started_at: shift_back(now, timer_ms - remaining),
            ends_at: Some(now + Duration::from_millis(remaining)),
            paused: false,
            paused_remaining_ms: None,
            version: self.version + 1,
            ..self.clone()
        }
    }

    /// Lock the question and reveal the results in a single write.
    pub fn locked_and_revealed(&self) -> Self {
        Self {
            locked: true,
            show_results: true,
            version: self.version + 1,
            ..self.clone()
        }
    }

    /// Reveal the leaderboard on top of the results.
    pub fn with_leaderboard(&self) -> Self {
        Self {
            show_results: true,
            show_leaderboard: true,
            version: self.version + 1,
            ..self.clone()
        }
    }

    /// Remaining answer time at `now`.
    pub fn remaining_ms(&self, now: SystemTime) -> u64 {
        if self.locked {
            return 0;
        }
        if self.paused {
            return self.paused_remaining_ms.unwrap_or_default();
        }
        self.ends_at
            .map(|ends_at| millis_between(now, ends_at))
            .unwrap_or_default()
    }

    /// Whether the stored scheduled end has passed at `now` by more than `grace_ms`.
    ///
    /// A paused timer never expires.
    pub fn is_expired(&self, now: SystemTime, grace_ms: u64) -> bool {
        match self.ends_at {
            Some(ends_at) if !self.paused => now > ends_at + Duration::from_millis(grace_ms),
            _ => false,
        }
    }

    /// Milliseconds elapsed since the recorded start at `at`.
    pub fn elapsed_ms(&self, at: SystemTime) -> u64 {
        millis_between(self.started_at, at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMER_MS: u64 = 30_000;

    fn at(offset_ms: u64) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(1_700_000_000) + Duration::from_millis(offset_ms)
    }

    fn fresh() -> QuestionPhaseEntity {
        QuestionPhaseEntity::activate(Uuid::new_v4(), 0, Uuid::new_v4(), TIMER_MS, at(0))
    }

    #[test]
    fn activation_schedules_end_from_timer() {
        let phase = fresh();
        assert_eq!(phase.ends_at, Some(at(TIMER_MS)));
        assert_eq!(phase.remaining_ms(at(10_000)), 20_000);
        assert_eq!(phase.version, 1);
    }

    #[test]
    fn pause_clears_scheduled_end_and_snapshots_remaining() {
        let paused = fresh().paused_at(at(12_000));
        assert!(paused.paused);
        assert_eq!(paused.ends_at, None);
        assert_eq!(paused.paused_remaining_ms, Some(18_000));
        // Time passing while paused does not consume the timer.
        assert_eq!(paused.remaining_ms(at(50_000)), 18_000);
        assert!(!paused.is_expired(at(90_000), 0));
    }

    #[test]
    fn pause_after_expiry_keeps_zero() {
        let paused = fresh().paused_at(at(45_000));
        assert_eq!(paused.paused_remaining_ms, Some(0));
    }

    #[test]
    fn resume_preserves_remaining_and_shifts_start() {
        let resumed = fresh().paused_at(at(12_000)).resumed_at(at(40_000), TIMER_MS);

        assert!(!resumed.paused);
        assert_eq!(resumed.paused_remaining_ms, None);
        assert_eq!(resumed.ends_at, Some(at(58_000)));
        assert_eq!(resumed.started_at, at(28_000));
        // Elapsed time excludes the 28 seconds spent paused.
        assert_eq!(resumed.elapsed_ms(at(40_000)), 12_000);
    }

    #[test]
    fn immediate_pause_resume_is_identity_on_timing() {
        let phase = fresh();
        let round_trip = phase.paused_at(at(5_000)).resumed_at(at(5_000), TIMER_MS);
        assert_eq!(round_trip.ends_at, phase.ends_at);
        assert_eq!(round_trip.started_at, phase.started_at);
        assert_eq!(round_trip.version, phase.version + 2);
    }

    #[test]
    fn lock_sets_both_flags_in_one_row() {
        let locked = fresh().locked_and_revealed();
        assert!(locked.locked);
        assert!(locked.show_results);
        assert!(!locked.show_leaderboard);
        assert_eq!(locked.remaining_ms(at(1_000)), 0);
    }

    #[test]
    fn leaderboard_implies_results() {
        let row = fresh().locked_and_revealed().with_leaderboard();
        assert!(row.show_leaderboard && row.show_results && row.locked);
    }

    #[test]
    fn expiry_honours_grace() {
        let phase = fresh();
        assert!(!phase.is_expired(at(TIMER_MS), 0));
        assert!(!phase.is_expired(at(TIMER_MS + 500), 750));
        assert!(phase.is_expired(at(TIMER_MS + 800), 750));
    }

    #[test]
    fn reactivation_bumps_version_with_fresh_timing() {
        let stale = fresh();
        let question_id = Uuid::new_v4();
        let row = stale.reactivated(question_id, TIMER_MS, at(60_000));
        assert_eq!(row.version, 2);
        assert_eq!(row.question_id, question_id);
        assert_eq!(row.started_at, at(60_000));
        assert_eq!(row.ends_at, Some(at(60_000 + TIMER_MS)));
    }
}
