use std::time::SystemTime;

use thiserror::Error;

use crate::state::session::{Session, SessionStatus};

/// Events that move a session through its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// Host starts the round.
    Start,
    /// Countdown elapsed; the host closes the round.
    Finish,
}

/// Error returned when attempting to apply an invalid transition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid transition: {event:?} cannot be applied while {from:?}")]
pub struct InvalidTransition {
    /// Status the session was in when the event was requested.
    pub from: SessionStatus,
    /// The event that cannot be applied from this status.
    pub event: SessionEvent,
}

/// Observed snapshot that cannot follow the previously accepted one.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AnomalousSnapshot {
    /// The status moved backwards or skipped a step.
    #[error("status went from {from:?} to {to:?}")]
    IllegalStatusChange {
        from: SessionStatus,
        to: SessionStatus,
    },
    /// The start time changed or vanished once set.
    #[error("game start time changed after it was set")]
    StartTimeRewritten,
    /// A waiting session carries a start time.
    #[error("game start time present while waiting")]
    StartTimeWhileWaiting,
}

/// Compute the status reached by applying `event` to `from`.
pub fn compute_transition(
    from: SessionStatus,
    event: SessionEvent,
) -> Result<SessionStatus, InvalidTransition> {
    let next = match (from, event) {
        (SessionStatus::Waiting, SessionEvent::Start) => SessionStatus::InProgress,
        (SessionStatus::InProgress, SessionEvent::Finish) => SessionStatus::Finished,
        (from, event) => return Err(InvalidTransition { from, event }),
    };

    Ok(next)
}

/// Validate that `next` may follow `previous`, returning the lifecycle event it
/// represents, if any. The first snapshot of a session is accepted in any status.
pub fn check_observed(
    previous: Option<&Session>,
    next: &Session,
) -> Result<Option<SessionEvent>, AnomalousSnapshot> {
    if next.status == SessionStatus::Waiting && next.game_start_time.is_some() {
        return Err(AnomalousSnapshot::StartTimeWhileWaiting);
    }

    let Some(previous) = previous else {
        return Ok(None);
    };

    check_start_time(previous.game_start_time, next.game_start_time)?;

    if previous.status == next.status {
        return Ok(None);
    }
    [SessionEvent::Start, SessionEvent::Finish]
        .into_iter()
        .find(|event| compute_transition(previous.status, *event) == Ok(next.status))
        .map(Some)
        .ok_or(AnomalousSnapshot::IllegalStatusChange {
            from: previous.status,
            to: next.status,
        })
}

fn check_start_time(
    previous: Option<SystemTime>,
    next: Option<SystemTime>,
) -> Result<(), AnomalousSnapshot> {
    match (previous, next) {
        (Some(before), Some(after)) if before != after => Err(AnomalousSnapshot::StartTimeRewritten),
        (Some(_), None) => Err(AnomalousSnapshot::StartTimeRewritten),
        _ => Ok(()),
    }
}

/// Locally accepted lifecycle of the attached session.
#[derive(Debug, Clone, Default)]
pub struct SessionStateMachine {
    current: Option<Session>,
}

impl SessionStateMachine {
    /// Machine with no accepted snapshot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Last accepted session snapshot.
    pub fn current(&self) -> Option<&Session> {
        self.current.as_ref()
    }

    /// Accept `next` as the current state if it is a legal successor.
    /// Rejected snapshots leave the machine untouched.
    pub fn observe(&mut self, next: Session) -> Result<Option<SessionEvent>, AnomalousSnapshot> {
        let event = check_observed(self.current.as_ref(), &next)?;
        self.current = Some(next);
        Ok(event)
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, UNIX_EPOCH};

    use indexmap::IndexMap;

    use super::*;

    fn session(status: SessionStatus, start: Option<u64>) -> Session {
        Session {
            id: "s1".into(),
            host_id: "a1".into(),
            status,
            players: IndexMap::new(),
            question_set_id: "q".into(),
            created_at: None,
            game_start_time: start.map(|secs| UNIX_EPOCH + Duration::from_secs(secs)),
        }
    }

    fn status(sm: &SessionStateMachine) -> Option<SessionStatus> {
        sm.current().map(|session| session.status)
    }

    #[test]
    fn forward_transitions_are_valid() {
        assert_eq!(
            compute_transition(SessionStatus::Waiting, SessionEvent::Start),
            Ok(SessionStatus::InProgress)
        );
        assert_eq!(
            compute_transition(SessionStatus::InProgress, SessionEvent::Finish),
            Ok(SessionStatus::Finished)
        );
    }

    #[test]
    fn invalid_transition_returns_error() {
        let err = compute_transition(SessionStatus::Waiting, SessionEvent::Finish).unwrap_err();
        assert_eq!(err.from, SessionStatus::Waiting);
        assert_eq!(err.event, SessionEvent::Finish);

        assert!(compute_transition(SessionStatus::Finished, SessionEvent::Start).is_err());
        assert!(compute_transition(SessionStatus::InProgress, SessionEvent::Start).is_err());
    }

    #[test]
    fn first_snapshot_is_accepted_in_any_status() {
        for status in [
            SessionStatus::Waiting,
            SessionStatus::InProgress,
            SessionStatus::Finished,
        ] {
            let start = (status != SessionStatus::Waiting).then_some(10);
            assert_eq!(check_observed(None, &session(status, start)), Ok(None));
        }
    }

    #[test]
    fn full_lifecycle_is_observed_in_order() {
        let mut sm = SessionStateMachine::new();

        assert_eq!(sm.observe(session(SessionStatus::Waiting, None)), Ok(None));
        assert_eq!(
            sm.observe(session(SessionStatus::InProgress, Some(10))),
            Ok(Some(SessionEvent::Start))
        );
        assert_eq!(
            sm.observe(session(SessionStatus::InProgress, Some(10))),
            Ok(None)
        );
        assert_eq!(
            sm.observe(session(SessionStatus::Finished, Some(10))),
            Ok(Some(SessionEvent::Finish))
        );
        assert_eq!(status(&sm), Some(SessionStatus::Finished));
    }

    #[test]
    fn regressions_and_skips_are_rejected() {
        let mut sm = SessionStateMachine::new();
        sm.observe(session(SessionStatus::InProgress, Some(10))).unwrap();

        assert_eq!(
            sm.observe(session(SessionStatus::Waiting, None)),
            Err(AnomalousSnapshot::IllegalStatusChange {
                from: SessionStatus::InProgress,
                to: SessionStatus::Waiting,
            })
        );
        assert_eq!(status(&sm), Some(SessionStatus::InProgress));

        let mut waiting = SessionStateMachine::new();
        waiting.observe(session(SessionStatus::Waiting, None)).unwrap();
        assert_eq!(
            waiting.observe(session(SessionStatus::Finished, Some(10))),
            Err(AnomalousSnapshot::IllegalStatusChange {
                from: SessionStatus::Waiting,
                to: SessionStatus::Finished,
            })
        );
    }

    #[test]
    fn start_time_is_write_once() {
        let mut sm = SessionStateMachine::new();
        sm.observe(session(SessionStatus::InProgress, Some(10))).unwrap();

        assert_eq!(
            sm.observe(session(SessionStatus::InProgress, Some(11))),
            Err(AnomalousSnapshot::StartTimeRewritten)
        );
        assert_eq!(
            sm.observe(session(SessionStatus::InProgress, None)),
            Err(AnomalousSnapshot::StartTimeRewritten)
        );
        assert_eq!(
            check_observed(None, &session(SessionStatus::Waiting, Some(10))),
            Err(AnomalousSnapshot::StartTimeWhileWaiting)
        );
    }
}
