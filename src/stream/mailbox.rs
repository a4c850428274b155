//! Single-slot handle mailbox.
//!
//! A send overwrites any unread value, so a reader always gets the latest one.

use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Notify;

struct Shared<T> {
    state: Mutex<State<T>>,
    notify: Notify,
}

struct State<T> {
    value: Option<T>,
    closed: bool,
}

/// Writer half, owned by the stream manager.
pub(crate) struct HandleSlot<T> {
    shared: Arc<Shared<T>>,
}

/// Reader half of the handle mailbox. Clones share the same slot.
pub struct HandleReceiver<T> {
    shared: Arc<Shared<T>>,
}

pub(crate) fn channel<T>() -> (HandleSlot<T>, HandleReceiver<T>) {
    let shared = Arc::new(Shared {
        state: Mutex::new(State {
            value: None,
            closed: false,
        }),
        notify: Notify::new(),
    });
    (
        HandleSlot {
            shared: Arc::clone(&shared),
        },
        HandleReceiver { shared },
    )
}

impl<T> HandleSlot<T> {
    /// Stores `value`. Returns the unread value it displaced, or `value` itself if
    /// the mailbox is closed.
    pub(crate) fn send(&self, value: T) -> Option<T> {
        let returned = {
            let mut state = self.shared.state.lock();
            if state.closed {
                return Some(value);
            }
            state.value.replace(value)
        };
        self.shared.notify.notify_waiters();
        returned
    }

    /// Closes the mailbox and returns any unread value.
    pub(crate) fn close(&self) -> Option<T> {
        let unread = {
            let mut state = self.shared.state.lock();
            state.closed = true;
            state.value.take()
        };
        self.shared.notify.notify_waiters();
        unread
    }
}

impl<T> HandleReceiver<T> {
    /// Waits for the next handle. Returns `None` once the mailbox is closed.
    pub async fn recv(&self) -> Option<T> {
        loop {
            let notified = self.shared.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.shared.state.lock();
                if let Some(value) = state.value.take() {
                    return Some(value);
                }
                if state.closed {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Takes the pending handle without waiting.
    pub fn try_recv(&self) -> Option<T> {
        self.shared.state.lock().value.take()
    }

    /// Returns `true` once the manager has closed the mailbox.
    pub fn is_closed(&self) -> bool {
        self.shared.state.lock().closed
    }
}

impl<T> Clone for HandleReceiver<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> fmt::Debug for HandleReceiver<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("HandleReceiver")
            .field("pending", &state.value.is_some())
            .field("closed", &state.closed)
            .finish()
    }
}
