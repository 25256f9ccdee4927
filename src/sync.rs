//! Rendezvous primitives shared between the pumps and user callers.

use std::{sync::Arc, time::Duration};

use tokio::sync::watch;

use crate::{Error, Result};

/// A one-shot rendezvous completed either successfully or with a stored
/// error, waking every waiter at once.
///
/// The first outcome is sticky: later completions are ignored, and waiters
/// arriving after the fact observe the stored outcome immediately.
#[derive(Debug)]
pub(crate) struct Event {
    outcome: watch::Sender<Option<Result<(), Arc<Error>>>>,
}

impl Event {
    pub fn new() -> Self {
        Self {
            outcome: watch::Sender::new(None),
        }
    }

    /// Complete successfully.
    pub fn fire(&self) {
        self.outcome.send_modify(|slot| {
            slot.get_or_insert(Ok(()));
        });
    }

    /// Complete with an error propagated to every waiter.
    pub fn fail(&self, error: Arc<Error>) {
        self.outcome.send_modify(|slot| {
            slot.get_or_insert(Err(error));
        });
    }

    /// Block until completion, for at most `timeout`.
    pub async fn wait(&self, timeout: Duration) -> Result<()> {
        let mut rx = self.outcome.subscribe();

        let outcome = tokio::time::timeout(timeout, rx.wait_for(|slot| slot.is_some()))
            .await?
            .map_err(|_| Error::Protocol("rendezvous abandoned"))?;

        match outcome
            .as_ref()
            .expect("the watch yielded an incomplete outcome")
        {
            Ok(()) => Ok(()),
            Err(cause) => Err(Error::Faulted(cause.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SOON: Duration = Duration::from_millis(100);

    #[tokio::test]
    async fn waiters_wake_on_fire() {
        let event = Arc::new(Event::new());

        let waiter = tokio::spawn({
            let event = event.clone();
            async move { event.wait(SOON).await }
        });

        event.fire();
        assert!(waiter.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn errors_propagate_to_every_waiter() {
        let event = Event::new();
        event.fail(Arc::new(Error::NoCommonKex));

        for _ in 0..2 {
            assert!(matches!(event.wait(SOON).await, Err(Error::Faulted(_))));
        }
    }

    #[tokio::test]
    async fn first_outcome_wins() {
        let event = Event::new();
        event.fire();
        event.fail(Arc::new(Error::NoCommonKex));

        assert!(event.wait(SOON).await.is_ok());
    }

    #[tokio::test]
    async fn expiry_raises_timeout() {
        let event = Event::new();

        assert!(matches!(
            event.wait(Duration::from_millis(10)).await,
            Err(Error::Timeout(_))
        ));
    }
}
