// Runtime-agnostic timeout, with futures_timer supplying the clock.

use std::error::Error;
use std::fmt;
use std::future::Future;
use std::time::Duration;

use futures_lite::FutureExt;
use futures_timer::Delay;

/// Runs `f` to completion, or gives up once `dur` has elapsed.
///
/// Giving up drops `f` wherever it was suspended.
pub(crate) async fn timeout<F, T>(dur: Duration, f: F) -> Result<T, TimeoutError>
where
    F: Future<Output = T>,
{
    let expired = async {
        Delay::new(dur).await;
        Err(TimeoutError { _private: () })
    };
    async { Ok(f.await) }.or(expired).await
}

/// An error returned when a future times out.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct TimeoutError {
    _private: (),
}

impl Error for TimeoutError {}

impl fmt::Display for TimeoutError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        "future has timed out".fmt(f)
    }
}
