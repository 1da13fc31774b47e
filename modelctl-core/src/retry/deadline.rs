use crate::error::Error;
use std::future::{Future, pending};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

/// A clonable token. Cancelling any clone cancels them all.
#[derive(Debug, Clone)]
pub struct CancellationToken {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancellationToken {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx: Arc::new(tx),
            rx,
        }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once the token is cancelled.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        if rx.wait_for(|cancelled| *cancelled).await.is_err() {
            // The sender lives as long as any clone, so this can't happen.
            pending::<()>().await;
        }
    }
}

/// Bounds every wait of an operation: calls, reconnects and backoff sleeps.
#[derive(Debug, Clone, Default)]
pub struct Deadline {
    expires_at: Option<Instant>,
    token: CancellationToken,
}

impl Deadline {
    /// A deadline that never expires. It can still be cancelled.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn after(timeout: Duration) -> Self {
        Self::at(Instant::now() + timeout)
    }

    pub fn at(expires_at: Instant) -> Self {
        Self {
            expires_at: Some(expires_at),
            token: CancellationToken::new(),
        }
    }

    pub fn with_token(mut self, token: CancellationToken) -> Self {
        self.token = token;
        self
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn expires_at(&self) -> Option<Instant> {
        self.expires_at
    }

    /// Fails if the deadline has already passed or the token was cancelled.
    pub fn check(&self) -> Result<(), Error> {
        if self.token.is_cancelled() {
            return Err(Error::Cancelled);
        }
        match self.expires_at {
            Some(at) if Instant::now() >= at => Err(Error::DeadlineExceeded),
            _ => Ok(()),
        }
    }

    /// Runs `fut` unless the deadline passes or the token is cancelled first.
    ///
    /// `fut` is not polled at all when the deadline has already passed.
    pub async fn run<T>(&self, fut: impl Future<Output = Result<T, Error>>) -> Result<T, Error> {
        self.check()?;

        let expiry = async {
            match self.expires_at {
                Some(at) => tokio::time::sleep_until(at).await,
                None => pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(Error::Cancelled),
            _ = expiry => Err(Error::DeadlineExceeded),
            result = fut => result,
        }
    }

    /// Sleeps for `duration`, waking early with an error on expiry or cancellation.
    pub async fn sleep(&self, duration: Duration) -> Result<(), Error> {
        self.run(async {
            tokio::time::sleep(duration).await;
            Ok(())
        })
        .await
    }
}
