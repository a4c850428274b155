use super::connector::{Closable, Connector};
use super::error::CloseError;
use std::fmt;

/// The current identity stream: an open call together with the transport it runs on.
///
/// Each successful connect produces a handle with a higher generation number.
pub struct ManagedStream<C: Connector> {
    call: C::Call,
    transport: C::Transport,
    generation: u64,
}

impl<C: Connector> ManagedStream<C> {
    pub(crate) fn new(call: C::Call, transport: C::Transport, generation: u64) -> Self {
        Self {
            call,
            transport,
            generation,
        }
    }

    /// Connect counter value for this handle, starting at 1.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// The streaming call.
    pub fn call(&self) -> &C::Call {
        &self.call
    }

    /// The streaming call, mutably (reading from a stream usually needs `&mut`).
    pub fn call_mut(&mut self) -> &mut C::Call {
        &mut self.call
    }

    /// The underlying transport.
    pub fn transport(&self) -> &C::Transport {
        &self.transport
    }

    /// Closes the call, then the transport. Both are attempted.
    ///
    /// # Errors
    ///
    /// Returns a [`CloseError`] carrying every failure.
    pub fn close(mut self) -> Result<(), CloseError> {
        let call = self.call.close().err();
        let transport = self.transport.close().err();
        if call.is_none() && transport.is_none() {
            Ok(())
        } else {
            Err(CloseError { call, transport })
        }
    }
}

impl<C: Connector> fmt::Debug for ManagedStream<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedStream")
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}
