use thiserror::Error;

use crate::dao::models::{QuestionPhaseEntity, SessionEntity, SessionStatus};

/// High-level phases a session can be in, derived from the stored rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Players are joining; no question is active.
    Lobby,
    /// A question is current and sits in the given sub-phase.
    Playing {
        /// Index of the current question.
        index: u32,
        /// Sub-phase of the current question.
        question: QuestionPhase,
    },
    /// Terminal state.
    Finished,
}

/// Sub-phase of the question currently being asked. Never revisited once left.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuestionPhase {
    /// Timer running toward the scheduled end.
    Active,
    /// Timer frozen with a remaining-time snapshot.
    Paused,
    /// Locked with the correct answer revealed.
    ResultsShown,
    /// Leaderboard revealed on top of the results.
    LeaderboardShown,
}

/// Why a question was locked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockReason {
    /// The host locked the question explicitly.
    Host,
    /// The stored scheduled end passed and the expiry watcher wrote the lock.
    Timeout,
}

/// Indicates why the session reached the finished state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    /// The last question was advanced past.
    QuestionsExhausted,
    /// The host ended the session early.
    EndedByHost,
}

/// Events that can be applied to the state machine. All of them are host-issued,
/// except a timeout lock which the host-side expiry watcher issues on the host's behalf.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// Leave the lobby and activate the first question.
    Start,
    /// Freeze the timer of the active question.
    Pause,
    /// Restart the timer of a paused question.
    Resume,
    /// Stop accepting answers and reveal the results at once.
    LockAndReveal(LockReason),
    /// Show the leaderboard after the results.
    RevealLeaderboard,
    /// Move on to the next question, or finish when none remain.
    Advance,
    /// Finish immediately, skipping the remaining questions.
    EndNow,
}

impl SessionEvent {
    /// Events a host can issue from a control surface.
    pub const HOST_EVENTS: [SessionEvent; 7] = [
        SessionEvent::Start,
        SessionEvent::Pause,
        SessionEvent::Resume,
        SessionEvent::LockAndReveal(LockReason::Host),
        SessionEvent::RevealLeaderboard,
        SessionEvent::Advance,
        SessionEvent::EndNow,
    ];
}

/// Error returned when attempting to apply an invalid transition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid transition: {event:?} cannot be applied while in {from:?}")]
pub struct InvalidTransition {
    /// The phase the session was in when the invalid event was received.
    pub from: SessionPhase,
    /// The event that cannot be applied from this phase.
    pub event: SessionEvent,
}

/// Errors that can occur when planning a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanError {
    /// The requested transition is not valid from the current phase.
    InvalidTransition(InvalidTransition),
    /// The session cannot start because its game has no questions.
    NoQuestions,
    /// The stored rows contradict each other.
    Inconsistent(String),
}

/// A validated transition whose durable writes have not been issued yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    /// Phase the session is currently in.
    pub from: SessionPhase,
    /// Phase the session will be in once the writes land.
    pub to: SessionPhase,
    /// Event that triggered this transition.
    pub event: SessionEvent,
    /// Set when the transition finishes the session.
    pub finish: Option<FinishReason>,
}

/// Pure transition table for one session.
///
/// It holds no authority of its own: it is rebuilt from the stored session and phase
/// rows before each host operation, and the resulting writes are guarded by row versions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStateMachine {
    phase: SessionPhase,
    question_count: usize,
}

impl SessionStateMachine {
    /// Create a state machine sitting in the lobby.
    pub fn new(question_count: usize) -> Self {
        Self {
            phase: SessionPhase::Lobby,
            question_count,
        }
    }

    /// Rebuild the state machine from the stored rows.
    pub fn from_rows(
        session: &SessionEntity,
        current_phase: Option<&QuestionPhaseEntity>,
        question_count: usize,
    ) -> Result<Self, PlanError> {
        let phase = match session.status {
            SessionStatus::Lobby => {
                if session.current_index().is_some() {
                    return Err(PlanError::Inconsistent(format!(
                        "session `{}` is in the lobby but points at question {}",
                        session.id, session.current_question_index
                    )));
                }
                SessionPhase::Lobby
            }
            SessionStatus::Finished => SessionPhase::Finished,
            SessionStatus::Playing => {
                let index = session.current_index().ok_or_else(|| {
                    PlanError::Inconsistent(format!(
                        "session `{}` is playing without a current question",
                        session.id
                    ))
                })?;
                let row = current_phase
                    .filter(|row| row.question_index as usize == index)
                    .ok_or_else(|| {
                        PlanError::Inconsistent(format!(
                            "session `{}` has no phase row for question {index}",
                            session.id
                        ))
                    })?;
                SessionPhase::Playing {
                    index: row.question_index,
                    question: question_phase_of(row),
                }
            }
        };

        Ok(Self {
            phase,
            question_count,
        })
    }

    /// Inspect the current phase.
    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    /// Validate `event` against the current phase and describe the resulting transition.
    pub fn plan(&self, event: SessionEvent) -> Result<Plan, PlanError> {
        let (to, finish) = self.compute_transition(event)?;
        Ok(Plan {
            from: self.phase,
            to,
            event,
            finish,
        })
    }

    /// Apply a plan produced by [`SessionStateMachine::plan`] once its writes succeeded.
    pub fn apply(&mut self, plan: &Plan) -> Result<SessionPhase, PlanError> {
        if plan.from != self.phase {
            return Err(PlanError::Inconsistent(format!(
                "plan starts from {:?} but the session is in {:?}",
                plan.from, self.phase
            )));
        }
        self.phase = plan.to;
        Ok(self.phase)
    }

    /// Host events that are currently legal.
    pub fn available_events(&self) -> Vec<SessionEvent> {
        SessionEvent::HOST_EVENTS
            .into_iter()
            .filter(|event| self.compute_transition(*event).is_ok())
            .collect()
    }

    /// Compute a transition from an event if the transition is valid.
    fn compute_transition(
        &self,
        event: SessionEvent,
    ) -> Result<(SessionPhase, Option<FinishReason>), PlanError> {
        let invalid = || {
            PlanError::InvalidTransition(InvalidTransition {
                from: self.phase,
                event,
            })
        };

        let next = match (self.phase, event) {
            (SessionPhase::Lobby, SessionEvent::Start) => {
                if self.question_count == 0 {
                    return Err(PlanError::NoQuestions);
                }
                SessionPhase::Playing {
                    index: 0,
                    question: QuestionPhase::Active,
                }
            }
            (
                SessionPhase::Playing {
                    index,
                    question: QuestionPhase::Active,
                },
                SessionEvent::Pause,
            ) => SessionPhase::Playing {
                index,
                question: QuestionPhase::Paused,
            },
            (
                SessionPhase::Playing {
                    index,
                    question: QuestionPhase::Paused,
                },
                SessionEvent::Resume,
            ) => SessionPhase::Playing {
                index,
                question: QuestionPhase::Active,
            },
            (
                SessionPhase::Playing {
                    index,
                    question: QuestionPhase::Active,
                },
                SessionEvent::LockAndReveal(_),
            )
            | (
                SessionPhase::Playing {
                    index,
                    question: QuestionPhase::Paused,
                },
                SessionEvent::LockAndReveal(LockReason::Host),
            ) => SessionPhase::Playing {
                index,
                question: QuestionPhase::ResultsShown,
            },
            (
                SessionPhase::Playing {
                    index,
                    question: QuestionPhase::ResultsShown,
                },
                SessionEvent::RevealLeaderboard,
            ) => SessionPhase::Playing {
                index,
                question: QuestionPhase::LeaderboardShown,
            },
            (SessionPhase::Playing { index, .. }, SessionEvent::Advance) => {
                let next = index as usize + 1;
                if next < self.question_count {
                    SessionPhase::Playing {
                        index: next as u32,
                        question: QuestionPhase::Active,
                    }
                } else {
                    return Ok((SessionPhase::Finished, Some(FinishReason::QuestionsExhausted)));
                }
            }
            (SessionPhase::Playing { .. }, SessionEvent::EndNow) => {
                return Ok((SessionPhase::Finished, Some(FinishReason::EndedByHost)));
            }
            _ => return Err(invalid()),
        };

        Ok((next, None))
    }
}

/// Derive the question sub-phase from the monotone flags of a phase row.
pub fn question_phase_of(row: &QuestionPhaseEntity) -> QuestionPhase {
    if row.show_leaderboard {
        QuestionPhase::LeaderboardShown
    } else if row.locked || row.show_results {
        QuestionPhase::ResultsShown
    } else if row.paused {
        QuestionPhase::Paused
    } else {
        QuestionPhase::Active
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn apply(sm: &mut SessionStateMachine, event: SessionEvent) -> SessionPhase {
        let plan = sm.plan(event).unwrap();
        sm.apply(&plan).unwrap()
    }

    fn playing(index: u32, question: QuestionPhase) -> SessionPhase {
        SessionPhase::Playing { index, question }
    }

    #[test]
    fn initial_state_is_lobby() {
        let sm = SessionStateMachine::new(3);
        assert_eq!(sm.phase(), SessionPhase::Lobby);
    }

    #[test]
    fn full_happy_path_through_session() {
        let mut sm = SessionStateMachine::new(2);

        assert_eq!(
            apply(&mut sm, SessionEvent::Start),
            playing(0, QuestionPhase::Active)
        );
        assert_eq!(
            apply(&mut sm, SessionEvent::Pause),
            playing(0, QuestionPhase::Paused)
        );
        assert_eq!(
            apply(&mut sm, SessionEvent::Resume),
            playing(0, QuestionPhase::Active)
        );
        assert_eq!(
            apply(&mut sm, SessionEvent::LockAndReveal(LockReason::Host)),
            playing(0, QuestionPhase::ResultsShown)
        );
        assert_eq!(
            apply(&mut sm, SessionEvent::RevealLeaderboard),
            playing(0, QuestionPhase::LeaderboardShown)
        );
        assert_eq!(
            apply(&mut sm, SessionEvent::Advance),
            playing(1, QuestionPhase::Active)
        );

        let plan = sm.plan(SessionEvent::Advance).unwrap();
        assert_eq!(plan.finish, Some(FinishReason::QuestionsExhausted));
        assert_eq!(sm.apply(&plan).unwrap(), SessionPhase::Finished);
    }

    #[test]
    fn start_requires_questions() {
        let sm = SessionStateMachine::new(0);
        assert_eq!(sm.plan(SessionEvent::Start), Err(PlanError::NoQuestions));
    }

    #[test]
    fn leaderboard_requires_results() {
        let mut sm = SessionStateMachine::new(1);
        apply(&mut sm, SessionEvent::Start);

        let err = sm.plan(SessionEvent::RevealLeaderboard).unwrap_err();
        match err {
            PlanError::InvalidTransition(invalid) => {
                assert_eq!(invalid.from, playing(0, QuestionPhase::Active));
                assert_eq!(invalid.event, SessionEvent::RevealLeaderboard);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn phases_are_never_revisited() {
        let mut sm = SessionStateMachine::new(1);
        apply(&mut sm, SessionEvent::Start);
        apply(&mut sm, SessionEvent::LockAndReveal(LockReason::Host));

        assert!(sm.plan(SessionEvent::Pause).is_err());
        assert!(sm.plan(SessionEvent::Resume).is_err());
        assert!(sm.plan(SessionEvent::LockAndReveal(LockReason::Host)).is_err());
    }

    #[test]
    fn timeout_lock_requires_running_timer() {
        let mut sm = SessionStateMachine::new(1);
        apply(&mut sm, SessionEvent::Start);
        apply(&mut sm, SessionEvent::Pause);

        assert!(sm.plan(SessionEvent::LockAndReveal(LockReason::Timeout)).is_err());
        assert!(sm.plan(SessionEvent::LockAndReveal(LockReason::Host)).is_ok());
    }

    #[test]
    fn end_now_only_while_playing() {
        let mut sm = SessionStateMachine::new(3);
        assert!(sm.plan(SessionEvent::EndNow).is_err());

        apply(&mut sm, SessionEvent::Start);
        let plan = sm.plan(SessionEvent::EndNow).unwrap();
        assert_eq!(plan.to, SessionPhase::Finished);
        assert_eq!(plan.finish, Some(FinishReason::EndedByHost));
        sm.apply(&plan).unwrap();

        assert!(sm.available_events().is_empty());
    }

    #[test]
    fn advance_is_allowed_from_any_question_phase() {
        let mut sm = SessionStateMachine::new(3);
        apply(&mut sm, SessionEvent::Start);
        apply(&mut sm, SessionEvent::Pause);
        assert_eq!(
            apply(&mut sm, SessionEvent::Advance),
            playing(1, QuestionPhase::Active)
        );
    }

    #[test]
    fn available_events_follow_the_table() {
        let mut sm = SessionStateMachine::new(2);
        assert_eq!(sm.available_events(), vec![SessionEvent::Start]);

        apply(&mut sm, SessionEvent::Start);
        assert_eq!(
            sm.available_events(),
            vec![
                SessionEvent::Pause,
                SessionEvent::LockAndReveal(LockReason::Host),
                SessionEvent::Advance,
                SessionEvent::EndNow,
            ]
        );
    }

    #[test]
    fn stale_plan_is_rejected() {
        let mut sm = SessionStateMachine::new(2);
        let stale = sm.plan(SessionEvent::Start).unwrap();
        apply(&mut sm, SessionEvent::Start);
        assert!(matches!(sm.apply(&stale), Err(PlanError::Inconsistent(_))));
    }
}
