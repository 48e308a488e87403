//! Failure isolation for plugin calls.
//!
//! Every provider, action and evaluator call goes through [`isolate`]: it
//! bounds the call with a timeout and turns a panic into a value, so one
//! misbehaving plugin cannot take the turn down with it.

use futures::FutureExt;
use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

/// Why an isolated call did not produce a value.
#[derive(Debug, Clone, PartialEq)]
pub enum Isolated<E> {
    /// The call returned an error.
    Failed(E),
    /// The call did not finish within its limit.
    TimedOut(Duration),
    /// The call panicked; carries the panic message.
    Panicked(String),
}

impl<E: fmt::Display> fmt::Display for Isolated<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Isolated::Failed(e) => write!(f, "{e}"),
            Isolated::TimedOut(limit) => write!(f, "timed out after {}ms", limit.as_millis()),
            Isolated::Panicked(msg) => write!(f, "panicked: {msg}"),
        }
    }
}

/// Run `fut` with a time limit, catching panics.
pub async fn isolate<F, T, E>(limit: Duration, fut: F) -> Result<T, Isolated<E>>
where
    F: Future<Output = Result<T, E>>,
{
    match tokio::time::timeout(limit, AssertUnwindSafe(fut).catch_unwind()).await {
        Err(_) => Err(Isolated::TimedOut(limit)),
        Ok(Err(panic)) => Err(Isolated::Panicked(panic_message(panic.as_ref()))),
        Ok(Ok(Err(e))) => Err(Isolated::Failed(e)),
        Ok(Ok(Ok(value))) => Ok(value),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
