//! Client-wide lifecycle state.

use std::sync::atomic::{AtomicU8, Ordering};

use crate::error::{Error, Result};

/// Client lifecycle. Moves forward only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ClientState {
    /// Accepting requests.
    Initialized,
    /// `close` in progress; no new requests.
    Closing,
    /// Shut down.
    Closed,
}

impl ClientState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ClientState::Initialized,
            1 => ClientState::Closing,
            _ => ClientState::Closed,
        }
    }

    fn rejection(self) -> Option<Error> {
        match self {
            ClientState::Initialized => None,
            ClientState::Closing => Some(Error::ClientClosing),
            ClientState::Closed => Some(Error::ClientClosed),
        }
    }
}

#[derive(Debug)]
pub(crate) struct Lifecycle(AtomicU8);

impl Lifecycle {
    pub fn new() -> Self {
        Self(AtomicU8::new(ClientState::Initialized as u8))
    }

    pub fn state(&self) -> ClientState {
        ClientState::from_u8(self.0.load(Ordering::SeqCst))
    }

    /// Fail unless the client accepts new requests.
    pub fn check_accepting(&self) -> Result<()> {
        match self.state().rejection() {
            None => Ok(()),
            Some(err) => Err(err),
        }
    }

    /// `Initialized → Closing`. Fails if closing already started.
    pub fn begin_closing(&self) -> Result<()> {
        self.0
            .compare_exchange(
                ClientState::Initialized as u8,
                ClientState::Closing as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .map(|_| ())
            .map_err(|current| {
                ClientState::from_u8(current)
                    .rejection()
                    .unwrap_or(Error::ClientClosing)
            })
    }

    /// `Closing → Closed`.
    pub fn finish_closing(&self) {
        self.0.store(ClientState::Closed as u8, Ordering::SeqCst);
    }
}
