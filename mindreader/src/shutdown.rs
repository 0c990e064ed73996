use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;

use crate::error::Error;

/// Callback supplied at plugin construction, invoked exactly once when the
/// pipeline terminates. A `None` error is an orderly stop.
pub type OnShutdown = Box<dyn FnOnce(Option<Error>) + Send>;

struct Inner {
    triggered: bool,
    error: Option<Error>,
    callback: Option<OnShutdown>,
}

/// The single shutdown signal of a pipeline.
///
/// The plugin is the only writer; every downstream component observes the
/// token or the terminating flag. Triggering is idempotent and the first
/// error wins.
#[derive(Clone)]
pub struct Shutdown {
    token: CancellationToken,
    inner: Arc<Mutex<Inner>>,
}

impl Shutdown {
    pub fn new(callback: Option<OnShutdown>) -> Self {
        Self {
            token: CancellationToken::new(),
            inner: Arc::new(Mutex::new(Inner {
                triggered: false,
                error: None,
                callback,
            })),
        }
    }

    /// Cancels the root token and invokes the shutdown callback. Later
    /// triggers are no-ops; the first error is the one reported.
    pub fn trigger(&self, error: Option<Error>) {
        let callback = {
            let Ok(mut inner) = self.inner.lock() else {
                return;
            };
            if inner.triggered {
                return;
            }
            inner.triggered = true;
            inner.error = error.clone();
            inner.callback.take()
        };

        match &error {
            Some(err) => tracing::error!(error = %err, "pipeline shutting down"),
            None => tracing::info!("pipeline shutting down"),
        }
        self.token.cancel();
        if let Some(callback) = callback {
            callback(error);
        }
    }

    pub fn is_terminating(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Root token; tasks that only need cancellation watch this.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    pub fn error(&self) -> Option<Error> {
        self.inner.lock().ok().and_then(|inner| inner.error.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn should_invoke_callback_once_with_first_error() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::new(Mutex::new(None));
        let callback = {
            let calls = Arc::clone(&calls);
            let seen = Arc::clone(&seen);
            Box::new(move |err: Option<Error>| {
                calls.fetch_add(1, Ordering::SeqCst);
                *seen.lock().unwrap() = err;
            })
        };

        let shutdown = Shutdown::new(Some(callback));
        assert!(!shutdown.is_terminating());

        shutdown.trigger(Some(Error::Storage("boom".to_string())));
        shutdown.trigger(Some(Error::Storage("later".to_string())));
        shutdown.trigger(None);

        assert!(shutdown.is_terminating());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(shutdown.error(), Some(Error::Storage(msg)) if msg == "boom"));
        assert!(matches!(&*seen.lock().unwrap(), Some(Error::Storage(msg)) if msg == "boom"));
    }

    #[tokio::test]
    async fn should_cancel_token_on_trigger() {
        let shutdown = Shutdown::new(None);
        let token = shutdown.token();
        shutdown.trigger(None);
        token.cancelled().await;
        assert!(shutdown.error().is_none());
    }
}
