use crate::dao::models::AnswerEntity;

/// Points awarded for any correct answer.
pub const BASE_POINTS: i64 = 1000;
/// Upper bound of the speed bonus, reached by an answer landing at the question start.
pub const SPEED_BONUS_CAP: i64 = 500;

/// Session settings that influence scoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScoringRules {
    /// Seconds allotted to each question.
    pub timer_seconds: u32,
    /// Whether earlier correct answers earn extra points.
    pub speed_bonus: bool,
}

/// Points for one answer.
///
/// `elapsed_ms` must be measured from the question's recorded start, not from when a
/// client rendered it.
pub fn award_points(is_correct: bool, elapsed_ms: u64, rules: ScoringRules) -> i64 {
    if !is_correct {
        return 0;
    }
    if !rules.speed_bonus {
        return BASE_POINTS;
    }
    BASE_POINTS + speed_bonus(elapsed_ms, rules.timer_seconds)
}

/// `round(cap * max(0, 1 - elapsed / window))`.
fn speed_bonus(elapsed_ms: u64, timer_seconds: u32) -> i64 {
    let window_ms = f64::from(timer_seconds) * 1000.0;
    if window_ms <= 0.0 {
        return 0;
    }
    let earliness = (1.0 - elapsed_ms as f64 / window_ms).max(0.0);
    (SPEED_BONUS_CAP as f64 * earliness).round() as i64
}

/// A player's score, reconstructed from their answer log.
pub fn aggregate_score<'a>(answers: impl IntoIterator<Item = &'a AnswerEntity>) -> i64 {
    answers.into_iter().map(|answer| answer.points_awarded).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::SystemTime;
    use uuid::Uuid;

    const RULES: ScoringRules = ScoringRules {
        timer_seconds: 30,
        speed_bonus: true,
    };

    #[test]
    fn instant_correct_answer_gets_full_bonus() {
        assert_eq!(award_points(true, 0, RULES), 1500);
    }

    #[test]
    fn answer_at_deadline_gets_base_only() {
        assert_eq!(award_points(true, 30_000, RULES), 1000);
    }

    #[test]
    fn late_answer_never_goes_below_base() {
        assert_eq!(award_points(true, 45_000, RULES), 1000);
    }

    #[test]
    fn bonus_scales_linearly_and_rounds() {
        assert_eq!(award_points(true, 15_000, RULES), 1250);
        // 500 * (1 - 10/30) = 333.33
        assert_eq!(award_points(true, 10_000, RULES), 1333);
        // 500 * (1 - 1/30) = 483.33
        assert_eq!(award_points(true, 1_000, RULES), 1483);
    }

    #[test]
    fn incorrect_is_always_zero() {
        for elapsed in [0, 15_000, 30_000, 90_000] {
            assert_eq!(award_points(false, elapsed, RULES), 0);
            assert_eq!(
                award_points(
                    false,
                    elapsed,
                    ScoringRules {
                        speed_bonus: false,
                        ..RULES
                    }
                ),
                0
            );
        }
    }

    #[test]
    fn bonus_disabled_awards_base() {
        let rules = ScoringRules {
            speed_bonus: false,
            ..RULES
        };
        assert_eq!(award_points(true, 0, rules), 1000);
    }

    #[test]
    fn aggregate_sums_points() {
        let answer = |points| AnswerEntity {
            id: Uuid::new_v4(),
            session_id: Uuid::nil(),
            player_id: Uuid::nil(),
            question_id: Uuid::new_v4(),
            choice_id: Uuid::new_v4(),
            is_correct: points > 0,
            elapsed_ms: 0,
            points_awarded: points,
            submitted_at: SystemTime::now(),
        };
        let answers = vec![answer(1500), answer(0), answer(1250)];
        assert_eq!(aggregate_score(&answers), 2750);
        assert_eq!(aggregate_score(&[]), 0);
    }
}
