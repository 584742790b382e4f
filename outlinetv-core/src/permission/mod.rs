//! VPN permission gate
//!
//! Wraps the modal, asynchronous OS permission prompt into a single-shot
//! result keyed by a [`RequestToken`]. The prompt receives a
//! [`PermissionResponder`] that is consumed when it answers and answers
//! `Failed` on its own if dropped unanswered, so every request resolves.
//!
//! The outcome stays on the gate until a waiter claims it. Claiming is
//! atomic, so exactly one waiter observes it even when waiters are cancelled
//! and recreated along with the hosting screen. Only one request may be
//! unanswered at a time.

use crate::error::PermissionError;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;
use tracing::{debug, info};

/// Result of a permission request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PermissionOutcome {
    Granted,
    Denied,
    /// The prompt could not be shown or produced no answer
    Failed(String),
}

/// Identifies one permission request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestToken(u64);

impl RequestToken {
    pub fn id(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for RequestToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The OS-level permission prompt
pub trait PermissionPrompt: Send + Sync {
    /// Show the prompt and answer through `responder`
    ///
    /// Implementations that cannot show the prompt call
    /// [`PermissionResponder::fail`]. Answering may happen on any thread,
    /// arbitrarily later.
    fn launch(&self, responder: PermissionResponder);
}

struct InFlight {
    token: RequestToken,
    outcome: Option<PermissionOutcome>,
}

#[derive(Default)]
struct GateState {
    next_token: u64,
    in_flight: Option<InFlight>,
}

enum Claim {
    Ready(PermissionOutcome),
    Waiting,
    Gone,
}

struct GateInner {
    state: Mutex<GateState>,
    answered: Notify,
}

impl GateInner {
    fn state(&self) -> MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn resolve(&self, token: RequestToken, outcome: PermissionOutcome) {
        {
            let mut state = self.state();
            let Some(in_flight) = state.in_flight.as_mut().filter(|f| f.token == token) else {
                debug!(%token, "Ignoring answer for a request that is no longer pending");
                return;
            };
            if in_flight.outcome.is_some() {
                return;
            }
            info!(%token, ?outcome, "VPN permission answered");
            in_flight.outcome = Some(outcome);
        }
        self.answered.notify_waiters();
    }

    fn claim(&self, token: RequestToken) -> Claim {
        let mut state = self.state();
        match &state.in_flight {
            Some(in_flight) if in_flight.token == token => {}
            _ => return Claim::Gone,
        }

        match state.in_flight.take() {
            Some(InFlight {
                outcome: Some(outcome),
                ..
            }) => Claim::Ready(outcome),
            unanswered => {
                state.in_flight = unanswered;
                Claim::Waiting
            }
        }
    }
}

/// Single-use answer handle given to the prompt
pub struct PermissionResponder {
    token: RequestToken,
    gate: Arc<GateInner>,
    answered: bool,
}

impl PermissionResponder {
    pub fn token(&self) -> RequestToken {
        self.token
    }

    /// Answer with a yes/no from the user
    pub fn respond(self, granted: bool) {
        self.answer(if granted {
            PermissionOutcome::Granted
        } else {
            PermissionOutcome::Denied
        });
    }

    pub fn grant(self) {
        self.answer(PermissionOutcome::Granted);
    }

    pub fn deny(self) {
        self.answer(PermissionOutcome::Denied);
    }

    /// Report that the prompt could not be shown
    pub fn fail(self, reason: impl Into<String>) {
        self.answer(PermissionOutcome::Failed(reason.into()));
    }

    fn answer(mut self, outcome: PermissionOutcome) {
        self.answered = true;
        self.gate.resolve(self.token, outcome);
    }
}

impl Drop for PermissionResponder {
    fn drop(&mut self) {
        if !self.answered {
            self.gate.resolve(
                self.token,
                PermissionOutcome::Failed("permission prompt closed without an answer".to_string()),
            );
        }
    }
}

/// Waiter for one request
pub struct PendingPermission {
    token: RequestToken,
    gate: Arc<GateInner>,
}

impl PendingPermission {
    pub fn token(&self) -> RequestToken {
        self.token
    }

    /// Wait for and claim the outcome
    ///
    /// Returns `None` if another waiter claimed it first or the request was
    /// replaced. Cancel-safe: dropping the future leaves an unclaimed outcome
    /// on the gate for [`PermissionGate::reattach`].
    pub async fn outcome(self) -> Option<PermissionOutcome> {
        loop {
            let answered = self.gate.answered.notified();
            tokio::pin!(answered);
            answered.as_mut().enable();

            match self.gate.claim(self.token) {
                Claim::Ready(outcome) => return Some(outcome),
                Claim::Gone => return None,
                Claim::Waiting => answered.await,
            }
        }
    }
}

impl std::fmt::Debug for PendingPermission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingPermission")
            .field("token", &self.token)
            .finish()
    }
}

/// Gate serializing access to the permission prompt
#[derive(Clone)]
pub struct PermissionGate {
    inner: Arc<GateInner>,
    prompt: Arc<dyn PermissionPrompt>,
}

impl PermissionGate {
    pub fn new(prompt: Arc<dyn PermissionPrompt>) -> Self {
        Self {
            inner: Arc::new(GateInner {
                state: Mutex::new(GateState::default()),
                answered: Notify::new(),
            }),
            prompt,
        }
    }

    /// Ask for VPN permission
    ///
    /// # Errors
    ///
    /// Returns `PermissionError::RequestAlreadyInFlight` while another
    /// request is unanswered. An answered request nobody claimed does not
    /// block a new one; its late answer is discarded.
    pub fn request_permission(&self) -> Result<PendingPermission, PermissionError> {
        let token = {
            let mut state = self.inner.state();
            if let Some(in_flight) = &state.in_flight {
                if in_flight.outcome.is_none() {
                    return Err(PermissionError::RequestAlreadyInFlight);
                }
                debug!(token = %in_flight.token, "Discarding unclaimed permission outcome");
            }

            state.next_token += 1;
            let token = RequestToken(state.next_token);
            state.in_flight = Some(InFlight {
                token,
                outcome: None,
            });
            token
        };
        // Wake waiters of a discarded request so they observe `Gone`
        self.inner.answered.notify_waiters();

        info!(%token, "Requesting VPN permission");
        self.prompt.launch(PermissionResponder {
            token,
            gate: Arc::clone(&self.inner),
            answered: false,
        });

        Ok(PendingPermission {
            token,
            gate: Arc::clone(&self.inner),
        })
    }

    /// Resume waiting for a request issued earlier
    ///
    /// Used when the hosting screen is recreated: the request is not
    /// re-issued, the new waiter picks up the existing one.
    pub fn reattach(&self, token: RequestToken) -> Result<PendingPermission, PermissionError> {
        match &self.inner.state().in_flight {
            Some(in_flight) if in_flight.token == token => Ok(PendingPermission {
                token,
                gate: Arc::clone(&self.inner),
            }),
            _ => Err(PermissionError::UnknownRequest { token: token.id() }),
        }
    }

    /// Token of the unanswered or unclaimed request, if any
    pub fn pending_token(&self) -> Option<RequestToken> {
        self.inner.state().in_flight.as_ref().map(|f| f.token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    /// Prompt that stores responders so the test decides when to answer
    #[derive(Default)]
    struct ManualPrompt {
        responders: Mutex<Vec<PermissionResponder>>,
    }

    impl ManualPrompt {
        fn take(&self) -> PermissionResponder {
            self.responders.lock().unwrap().pop().expect("no prompt shown")
        }
    }

    impl PermissionPrompt for ManualPrompt {
        fn launch(&self, responder: PermissionResponder) {
            self.responders.lock().unwrap().push(responder);
        }
    }

    fn gate() -> (Arc<ManualPrompt>, PermissionGate) {
        let prompt = Arc::new(ManualPrompt::default());
        (prompt.clone(), PermissionGate::new(prompt))
    }

    #[tokio::test]
    async fn test_granted_outcome_is_delivered() {
        let (prompt, gate) = gate();
        let pending = gate.request_permission().unwrap();
        prompt.take().grant();
        assert_eq!(pending.outcome().await, Some(PermissionOutcome::Granted));
        assert!(gate.pending_token().is_none());
    }

    #[tokio::test]
    async fn test_waiter_wakes_on_later_answer() {
        let (prompt, gate) = gate();
        let pending = gate.request_permission().unwrap();
        let waiter = tokio::spawn(pending.outcome());

        tokio::time::sleep(Duration::from_millis(20)).await;
        prompt.take().deny();

        assert_eq!(waiter.await.unwrap(), Some(PermissionOutcome::Denied));
    }

    #[tokio::test]
    async fn test_second_request_is_rejected_while_pending() {
        let (prompt, gate) = gate();
        let pending = gate.request_permission().unwrap();

        assert_eq!(
            gate.request_permission().unwrap_err(),
            PermissionError::RequestAlreadyInFlight
        );

        prompt.take().deny();
        assert_eq!(pending.outcome().await, Some(PermissionOutcome::Denied));

        // Free again once answered
        assert!(gate.request_permission().is_ok());
    }

    #[tokio::test]
    async fn test_dropped_responder_fails_once() {
        let (prompt, gate) = gate();
        let pending = gate.request_permission().unwrap();
        drop(prompt.take());
        assert!(matches!(
            pending.outcome().await,
            Some(PermissionOutcome::Failed(_))
        ));
    }

    #[tokio::test]
    async fn test_outcome_survives_cancelled_waiter() {
        let (prompt, gate) = gate();
        let pending = gate.request_permission().unwrap();
        let token = pending.token();

        // Screen torn down before the user answers
        let waiter = tokio::spawn(pending.outcome());
        tokio::time::sleep(Duration::from_millis(20)).await;
        waiter.abort();
        let _ = waiter.await;

        prompt.take().grant();
        assert_eq!(gate.pending_token(), Some(token));

        // Recreated screen reattaches and gets the answer exactly once
        let reattached = gate.reattach(token).unwrap();
        assert_eq!(reattached.outcome().await, Some(PermissionOutcome::Granted));
        assert!(matches!(
            gate.reattach(token),
            Err(PermissionError::UnknownRequest { .. })
        ));
    }

    #[tokio::test]
    async fn test_only_one_of_two_waiters_claims() {
        let (prompt, gate) = gate();
        let first = gate.request_permission().unwrap();
        let second = gate.reattach(first.token()).unwrap();

        prompt.take().grant();

        let a = first.outcome().await;
        let b = second.outcome().await;
        assert_eq!(a, Some(PermissionOutcome::Granted));
        assert_eq!(b, None);
    }

    #[tokio::test]
    async fn test_unclaimed_outcome_does_not_block_new_request() {
        let (prompt, gate) = gate();
        let stale = gate.request_permission().unwrap();
        prompt.take().grant();

        let fresh = gate.request_permission().unwrap();
        prompt.take().deny();

        assert_eq!(stale.outcome().await, None);
        assert_eq!(fresh.outcome().await, Some(PermissionOutcome::Denied));
    }

    #[tokio::test]
    async fn test_prompt_that_cannot_launch_fails_request() {
        struct BrokenPrompt;
        impl PermissionPrompt for BrokenPrompt {
            fn launch(&self, responder: PermissionResponder) {
                responder.fail("no display");
            }
        }

        let gate = PermissionGate::new(Arc::new(BrokenPrompt));
        let pending = gate.request_permission().unwrap();
        assert_eq!(
            pending.outcome().await,
            Some(PermissionOutcome::Failed("no display".to_string()))
        );
    }
}
