//! Per-request cancellation and deadlines
//!
//! A `QueryContext` travels with every store, reader and API call. Storage
//! I/O races against `QueryContext::done` so canceled work stops promptly.

use std::future::pending;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;
use tracing::debug;

use crate::store::StoreError;

/// Cancellation signal plus optional deadline for one request
#[derive(Debug, Clone, Default)]
pub struct QueryContext {
    cancel: Option<watch::Receiver<bool>>,
    deadline: Option<Instant>,
}

/// Handle that cancels every context derived from it
#[derive(Debug)]
pub struct Canceler {
    tx: watch::Sender<bool>,
}

impl Canceler {
    pub fn cancel(&self) {
        debug!("Canceler::cancel: called");
        // send_replace never fails, even with no receivers left
        self.tx.send_replace(true);
    }
}

impl QueryContext {
    /// Context that is never canceled and has no deadline
    pub fn background() -> Self {
        Self::default()
    }

    /// Derive a cancelable context
    pub fn with_cancel(self) -> (Self, Canceler) {
        let (tx, rx) = watch::channel(false);
        (
            Self {
                cancel: Some(rx),
                deadline: self.deadline,
            },
            Canceler { tx },
        )
    }

    /// Derive a context that expires after `timeout` (keeps any earlier deadline)
    pub fn with_timeout(self, timeout: Duration) -> Self {
        let candidate = Instant::now() + timeout;
        let deadline = match self.deadline {
            Some(existing) if existing < candidate => existing,
            _ => candidate,
        };
        Self {
            cancel: self.cancel,
            deadline: Some(deadline),
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_canceled(&self) -> bool {
        self.cancel.as_ref().map(|rx| *rx.borrow()).unwrap_or(false)
    }

    /// Fail fast if the context is already canceled or expired
    pub fn check(&self) -> Result<(), StoreError> {
        if self.is_canceled() {
            return Err(StoreError::Canceled);
        }
        if let Some(deadline) = self.deadline
            && Instant::now() >= deadline
        {
            return Err(StoreError::DeadlineExceeded);
        }
        Ok(())
    }

    /// Resolves once the context is canceled or its deadline passes
    ///
    /// Never resolves for a background context.
    pub async fn done(&self) -> StoreError {
        let canceled = async {
            match self.cancel.clone() {
                Some(mut rx) => loop {
                    if *rx.borrow_and_update() {
                        break;
                    }
                    if rx.changed().await.is_err() {
                        // Canceler dropped without canceling
                        pending::<()>().await;
                    }
                },
                None => pending::<()>().await,
            }
        };

        let expired = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => pending::<()>().await,
            }
        };

        tokio::select! {
            _ = canceled => StoreError::Canceled,
            _ = expired => StoreError::DeadlineExceeded,
        }
    }
}
