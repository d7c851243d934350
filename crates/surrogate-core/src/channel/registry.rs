//! Table of calls this channel has sent and not yet seen answered.

use super::options::CallOptions;
use crate::protocol::Request;
use std::collections::HashMap;
use tokio::task::AbortHandle;

/// A call waiting for its response.
pub(crate) struct PendingCall {
    pub options: CallOptions,
    pub request: Request,
    /// Timer that expires the call, when the channel has a call timeout.
    pub timeout: Option<AbortHandle>,
}

impl PendingCall {
    pub fn new(request: Request, options: CallOptions) -> Self {
        Self {
            options,
            request,
            timeout: None,
        }
    }

    pub fn id(&self) -> u64 {
        self.request.call_id
    }

    /// Stop the expiry timer, if one is running.
    pub fn disarm(&mut self) {
        if let Some(timeout) = self.timeout.take() {
            timeout.abort();
        }
    }
}

/// Call-id allocator plus the pending calls keyed by id.
///
/// Ids start at 1 and are never reused within a channel.
pub(crate) struct CallRegistry {
    next_id: u64,
    calls: HashMap<u64, PendingCall>,
}

impl CallRegistry {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            calls: HashMap::new(),
        }
    }

    pub fn allocate_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    pub fn insert(&mut self, call: PendingCall) {
        self.calls.insert(call.id(), call);
    }

    /// Remove and return the call, so it can be resolved exactly once.
    pub fn take(&mut self, id: u64) -> Option<PendingCall> {
        self.calls.remove(&id)
    }

    /// Attach an expiry timer. Returns false if the call already resolved.
    pub fn attach_timeout(&mut self, id: u64, timeout: AbortHandle) -> bool {
        match self.calls.get_mut(&id) {
            Some(call) => {
                call.timeout = Some(timeout);
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn ids(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self.calls.keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}

impl Drop for CallRegistry {
    fn drop(&mut self) {
        for call in self.calls.values_mut() {
            call.disarm();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending(registry: &mut CallRegistry) -> u64 {
        let id = registry.allocate_id();
        registry.insert(PendingCall::new(
            Request::new(id, "scope", "func", vec![]),
            CallOptions::new(),
        ));
        id
    }

    #[test]
    fn test_ids_start_at_one_and_increase() {
        let mut registry = CallRegistry::new();
        assert_eq!(pending(&mut registry), 1);
        assert_eq!(pending(&mut registry), 2);
        assert_eq!(pending(&mut registry), 3);
        assert_eq!(registry.ids(), vec![1, 2, 3]);
    }

    #[test]
    fn test_take_resolves_at_most_once() {
        let mut registry = CallRegistry::new();
        let id = pending(&mut registry);

        assert!(registry.take(id).is_some());
        assert!(registry.take(id).is_none());
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn test_ids_are_not_reused_after_resolution() {
        let mut registry = CallRegistry::new();
        let first = pending(&mut registry);
        registry.take(first);
        assert_eq!(pending(&mut registry), first + 1);
    }

    #[tokio::test]
    async fn test_attach_timeout_only_to_pending_calls() {
        let mut registry = CallRegistry::new();
        let id = pending(&mut registry);
        let timer = tokio::spawn(std::future::pending::<()>());

        assert!(registry.attach_timeout(id, timer.abort_handle()));
        assert!(!registry.attach_timeout(id + 1, timer.abort_handle()));

        let mut call = registry.take(id).unwrap();
        call.disarm();
        assert!(timer.await.unwrap_err().is_cancelled());
    }
}
