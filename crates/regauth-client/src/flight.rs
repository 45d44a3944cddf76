use async_std::channel::{self, Receiver, Sender};
use once_cell::sync::OnceCell;

use crate::cache::TokenFetch;
use crate::error::Result;

/// One in-flight token fetch that any number of callers can join.
///
/// A single "turn" circulates through a one-slot channel. Whoever receives
/// it runs their fetch. When the fetch settles, the outcome is published
/// and the channel closed, which wakes every waiter with that outcome. A
/// fetch that is cancelled (its future dropped, or it returned a
/// cancellation error) puts the turn back so that one of the waiters can
/// run its own fetch instead.
#[derive(Debug)]
pub(crate) struct Flight {
    turn_tx: Sender<()>,
    turn_rx: Receiver<()>,
    outcome: OnceCell<Result<String>>,
}

/// What a caller got out of [`Flight::join`].
#[derive(Debug)]
pub(crate) enum Landing {
    /// This caller ran the fetch that settled the flight.
    Owner(Result<String>),
    /// Someone else's fetch settled the flight first.
    Passenger(Result<String>),
    /// This caller's fetch was cancelled. Nothing was settled.
    Abandoned(crate::AuthError),
}

impl Flight {
    pub(crate) fn new() -> Self {
        let (turn_tx, turn_rx) = channel::bounded(1);
        // A fresh channel always has room for the first turn.
        let _ = turn_tx.try_send(());
        Self {
            turn_tx,
            turn_rx,
            outcome: OnceCell::new(),
        }
    }

    pub(crate) fn is_settled(&self) -> bool {
        self.outcome.get().is_some()
    }

    /// Waits for a turn and runs `fetch`, or waits for somebody else's
    /// fetch to settle. Dropping this future while waiting doesn't affect
    /// the other callers. Dropping it while fetching hands the turn on.
    pub(crate) async fn join(&self, fetch: TokenFetch<'_>) -> Landing {
        if self.turn_rx.recv().await.is_err() {
            return Landing::Passenger(self.settled_outcome());
        }

        let turn = Turn {
            flight: self,
            landed: false,
        };
        let outcome = fetch.await;
        match outcome {
            Err(err) if err.is_cancellation() => {
                tracing::trace!("token fetch was cancelled, handing the turn on");
                drop(turn);
                Landing::Abandoned(err)
            }
            outcome => {
                let _ = self.outcome.set(outcome.clone());
                turn.land();
                Landing::Owner(outcome)
            }
        }
    }

    fn settled_outcome(&self) -> Result<String> {
        // The channel is only ever closed after the outcome is set.
        self.outcome
            .get()
            .cloned()
            .unwrap_or(Err(crate::AuthError::Cancelled))
    }
}

/// Held by the caller that currently owns the turn.
struct Turn<'a> {
    flight: &'a Flight,
    landed: bool,
}

impl Turn<'_> {
    fn land(mut self) {
        self.landed = true;
        self.flight.turn_rx.close();
    }
}

impl Drop for Turn<'_> {
    fn drop(&mut self) {
        if !self.landed {
            let _ = self.flight.turn_tx.try_send(());
        }
    }
}
