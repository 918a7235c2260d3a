//! The per-request state machine.
//!
//! A request moves `Unrequested -> Pending -> {Granted, Denied}`. Expiry is
//! an overlay that applies from any requested state, including the terminal
//! ones: a granted record keeps its label but stops conferring access.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Lifecycle state of a permission request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequestState {
    /// No record exists yet.
    Unrequested,
    /// Awaiting the owner's decision.
    Pending,
    /// The owner granted access. Terminal.
    Granted,
    /// The owner refused access. Terminal.
    Denied,
    /// Past `expires_at`, whatever the recorded status.
    Expired,
}

impl RequestState {
    /// Whether a decision has been recorded.
    pub fn is_decided(self) -> bool {
        matches!(self, RequestState::Granted | RequestState::Denied)
    }
}

/// Something that happens to a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestEvent {
    /// The requester appends the record.
    Submit,
    /// The owner grants.
    Grant,
    /// The owner denies.
    Deny,
    /// The local clock passes `expires_at`.
    Expire,
}

/// A transition the table does not allow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid transition: {event:?} from {from:?}")]
pub struct InvalidTransition {
    /// State the request was in.
    pub from: RequestState,
    /// The refused event.
    pub event: RequestEvent,
}

/// Apply `event` to `from`.
pub fn transition(
    from: RequestState,
    event: RequestEvent,
) -> Result<RequestState, InvalidTransition> {
    use RequestEvent::*;
    use RequestState::*;

    match (from, event) {
        (Unrequested, Submit) => Ok(Pending),
        (Pending, Grant) => Ok(Granted),
        (Pending, Deny) => Ok(Denied),
        (Pending | Granted | Denied | Expired, Expire) => Ok(Expired),
        _ => Err(InvalidTransition { from, event }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_happy_paths() {
        let pending = transition(RequestState::Unrequested, RequestEvent::Submit).unwrap();
        assert_eq!(pending, RequestState::Pending);
        assert_eq!(
            transition(pending, RequestEvent::Grant),
            Ok(RequestState::Granted)
        );
        assert_eq!(
            transition(pending, RequestEvent::Deny),
            Ok(RequestState::Denied)
        );
    }

    #[test]
    fn test_expiry_overlays_terminal_states() {
        for state in [
            RequestState::Pending,
            RequestState::Granted,
            RequestState::Denied,
        ] {
            assert_eq!(
                transition(state, RequestEvent::Expire),
                Ok(RequestState::Expired)
            );
        }
        assert!(transition(RequestState::Unrequested, RequestEvent::Expire).is_err());
    }

    #[test]
    fn test_decisions_are_single_shot() {
        for from in [RequestState::Granted, RequestState::Denied] {
            for event in [RequestEvent::Grant, RequestEvent::Deny, RequestEvent::Submit] {
                assert_eq!(
                    transition(from, event),
                    Err(InvalidTransition { from, event })
                );
            }
        }
    }

    fn any_state() -> impl Strategy<Value = RequestState> {
        prop_oneof![
            Just(RequestState::Unrequested),
            Just(RequestState::Pending),
            Just(RequestState::Granted),
            Just(RequestState::Denied),
            Just(RequestState::Expired),
        ]
    }

    fn any_event() -> impl Strategy<Value = RequestEvent> {
        prop_oneof![
            Just(RequestEvent::Submit),
            Just(RequestEvent::Grant),
            Just(RequestEvent::Deny),
            Just(RequestEvent::Expire),
        ]
    }

    proptest! {
        #[test]
        fn prop_decision_never_changes(events in prop::collection::vec(any_event(), 0..16)) {
            let mut state = RequestState::Unrequested;
            let mut decided: Option<RequestState> = None;
            for event in events {
                if let Ok(next) = transition(state, event) {
                    if let Some(d) = decided {
                        prop_assert!(next == d || next == RequestState::Expired);
                    }
                    if next.is_decided() {
                        decided = Some(next);
                    }
                    state = next;
                }
            }
        }

        #[test]
        fn prop_expired_is_absorbing(from in any_state(), event in any_event()) {
            if from == RequestState::Expired {
                let next = transition(from, event);
                prop_assert!(next.is_err() || next == Ok(RequestState::Expired));
            }
        }
    }
}
