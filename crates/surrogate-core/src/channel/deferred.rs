//! Replies that were not ready when the dispatcher first polled them.
//!
//! Inside a tokio runtime the reply future becomes a task. Outside one it is
//! driven by its own waker: whoever wakes it, typically a LACO `Completion`
//! on some other thread, polls it to the end on the spot. Neither path keeps
//! the channel alive.

use super::{CallResult, ChannelInner};
use futures::future::BoxFuture;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, TryLockError, Weak};
use std::task::{Context, Poll, Wake, Waker};

/// Answer `call_id` once `pending` resolves.
pub(super) fn respond_later(
    channel: &Arc<ChannelInner>,
    call_id: u64,
    pending: BoxFuture<'static, CallResult>,
) {
    let channel = Arc::downgrade(channel);
    match tokio::runtime::Handle::try_current() {
        Ok(runtime) => {
            runtime.spawn(async move {
                let result = pending.await;
                if let Some(inner) = channel.upgrade() {
                    inner.respond(call_id, result);
                }
            });
        }
        Err(_) => {
            let reply = Arc::new(DeferredReply {
                call_id,
                channel,
                future: Mutex::new(Some(pending)),
                notified: AtomicBool::new(false),
            });
            reply.drive();
        }
    }
}

/// A reply future polled by the threads that wake it.
struct DeferredReply {
    call_id: u64,
    channel: Weak<ChannelInner>,
    /// `None` once the reply has been sent.
    future: Mutex<Option<BoxFuture<'static, CallResult>>>,
    /// Set by wakes that found another thread polling.
    notified: AtomicBool,
}

impl DeferredReply {
    fn drive(self: &Arc<Self>) {
        loop {
            let mut slot = match self.future.try_lock() {
                Ok(slot) => slot,
                Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
                // The polling thread re-checks `notified` after it lets go.
                Err(TryLockError::WouldBlock) => return,
            };
            self.notified.store(false, Ordering::SeqCst);

            let Some(future) = slot.as_mut() else {
                return;
            };
            let waker = Waker::from(Arc::clone(self));
            let mut cx = Context::from_waker(&waker);
            if let Poll::Ready(result) = future.as_mut().poll(&mut cx) {
                *slot = None;
                drop(slot);
                if let Some(inner) = self.channel.upgrade() {
                    inner.respond(self.call_id, result);
                }
                return;
            }
            drop(slot);

            if !self.notified.load(Ordering::SeqCst) {
                return;
            }
        }
    }
}

impl Wake for DeferredReply {
    fn wake(self: Arc<Self>) {
        self.wake_by_ref();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.notified.store(true, Ordering::SeqCst);
        self.drive();
    }
}
