use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::error::{self, Error};

pub(crate) type Shared<RW> = Arc<Mutex<State<RW>>>;

/// Connection fields shared by callers and the read loop, all behind one lock.
#[derive(Debug)]
pub(crate) struct State<RW> {
    /// Write half of the transport; `None` once hijacked or closed.
    pub(crate) io: Option<RW>,
    pub(crate) read_err: Option<Error>,
    pub(crate) write_err: Option<Error>,
    /// A response body from the latest request is still being read.
    pub(crate) body_reading: bool,
    /// The read loop has been polled at least once.
    pub(crate) started: bool,
    /// The read loop has exited.
    pub(crate) stopped: bool,
}

impl<RW> State<RW> {
    pub(crate) fn new(io: RW) -> Self {
        Self {
            io: Some(io),
            read_err: None,
            write_err: None,
            body_reading: false,
            started: false,
            stopped: false,
        }
    }

    /// The first sticky failure, in priority order.
    pub(crate) fn check(&self) -> Result<(), Error> {
        if let Some(err) = &self.read_err {
            // no point sending if read-side closed or broken
            return Err(err.clone());
        }
        if let Some(err) = &self.write_err {
            return Err(err.clone());
        }
        if self.io.is_none() {
            return Err(error::closed_by_user());
        }
        if self.stopped {
            return Err(error::read_loop_stopped());
        }
        Ok(())
    }

    // Errors never clear, and the first one on each side wins.

    pub(crate) fn set_read_err(&mut self, err: Error) {
        if self.read_err.is_none() {
            tracing::debug!("connection read side failed: {}", err);
            self.read_err = Some(err);
        }
    }

    pub(crate) fn set_write_err(&mut self, err: Error) {
        if self.write_err.is_none() {
            tracing::debug!("connection write side failed: {}", err);
            self.write_err = Some(err);
        }
    }
}

pub(crate) fn lock<RW>(state: &Shared<RW>) -> MutexGuard<'_, State<RW>> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::error::Kind;

    #[test]
    fn test_check_priority() {
        let mut state = State::new(());
        assert!(state.check().is_ok());

        state.stopped = true;
        assert_eq!(state.check().unwrap_err().kind(), &Kind::ReadLoopStopped);

        state.io = None;
        assert_eq!(state.check().unwrap_err().kind(), &Kind::ClosedByUser);

        state.set_write_err(error::persistent_connection_ending());
        assert_eq!(state.check().unwrap_err().kind(), &Kind::PersistentConnectionEnding);

        state.set_read_err(error::server_closed_connection());
        state.set_read_err(error::body_left_data());
        assert_eq!(state.check().unwrap_err().kind(), &Kind::ServerClosedConnection);
    }
}
