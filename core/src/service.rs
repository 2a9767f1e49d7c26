//! Stateful container.
//!
//! `StatefulService<T>` owns one state value and the observers interested in
//! it. Updates run under the container's state lock; observers are notified
//! after that lock is released but before `update` returns, and notification
//! for one container is serialized so handlers see updates in apply order.
//! Unrelated containers never contend with each other.

use std::sync::Arc;

use parking_lot::{Mutex, ReentrantMutex};
use serde_json::Value;

use crate::handlers::{invoke_isolated, HandlerId, HandlerRegistry, HookHandler, UpdateHandler};
use crate::update::{JsonState, UpdateResult, ORIGIN_SERVER};


struct Inner<T> {
    state: Mutex<T>,
    update_handlers: Mutex<HandlerRegistry<UpdateHandler>>,
    hook_handlers: Mutex<HandlerRegistry<HookHandler>>,
    /// Held across apply + notify. Re-entrant so a handler may update the
    /// container that is notifying it.
    dispatch: ReentrantMutex<()>,
}


/// Shared handle to one state container. Clones refer to the same state.
pub struct StatefulService<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for StatefulService<T> {
    fn clone(&self) -> Self {
        StatefulService {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Send + 'static> StatefulService<T> {
    pub fn new(state: T) -> Self {
        StatefulService {
            inner: Arc::new(Inner {
                state: Mutex::new(state),
                update_handlers: Mutex::new(HandlerRegistry::new()),
                hook_handlers: Mutex::new(HandlerRegistry::new()),
                dispatch: ReentrantMutex::new(()),
            }),
        }
    }

    /// Run `visitor` with read-only access to the current state.
    pub fn read<R>(&self, visitor: impl FnOnce(&T) -> R) -> R {
        let state = self.inner.state.lock();
        visitor(&state)
    }

    /// Apply `updater` and propagate the outcome.
    ///
    /// Hook handlers see every result. Update handlers run only on
    /// `Changed`, in registration order, before this returns.
    pub fn update(
        &self,
        updater: impl FnOnce(&mut T) -> UpdateResult,
        origin_id: &str,
    ) -> UpdateResult {
        let _order = self.inner.dispatch.lock();
        let result = self.apply(updater);
        self.call_hook_handlers(origin_id, result);
        if result.is_changed() {
            self.call_update_handlers(origin_id);
        }
        result
    }

    /// Apply `updater` without notifying anyone, whatever the result.
    ///
    /// Used to hydrate state from storage: a load must not trigger a
    /// write-back or a broadcast.
    pub fn update_without_propagation(
        &self,
        updater: impl FnOnce(&mut T) -> UpdateResult,
    ) -> UpdateResult {
        let _order = self.inner.dispatch.lock();
        self.apply(updater)
    }

    fn apply(&self, updater: impl FnOnce(&mut T) -> UpdateResult) -> UpdateResult {
        let mut state = self.inner.state.lock();
        updater(&mut state)
    }

    /// Register an update handler. The returned id is never zero.
    pub fn add_update_handler<F>(&self, callback: F) -> HandlerId
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.add_update_handler_with(callback, true)
    }

    /// Register an update handler; with `allow_remove == false` it can never
    /// be removed.
    pub fn add_update_handler_with<F>(&self, callback: F, allow_remove: bool) -> HandlerId
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.inner
            .update_handlers
            .lock()
            .add(Arc::new(callback), allow_remove)
    }

    /// Remove an update handler. Unknown ids are ignored.
    pub fn remove_update_handler(&self, id: HandlerId) {
        self.inner.update_handlers.lock().remove(id);
    }

    pub fn add_hook_handler<F>(&self, callback: F) -> HandlerId
    where
        F: Fn(&str, UpdateResult) + Send + Sync + 'static,
    {
        self.inner
            .hook_handlers
            .lock()
            .add(Arc::new(callback), true)
    }

    pub fn remove_hook_handler(&self, id: HandlerId) {
        self.inner.hook_handlers.lock().remove(id);
    }

    /// Notify every update handler as if a `Changed` update had happened.
    pub fn call_update_handlers(&self, origin_id: &str) {
        let _order = self.inner.dispatch.lock();
        let handlers = self.inner.update_handlers.lock().snapshot();
        for handler in handlers {
            invoke_isolated("update", origin_id, || handler(origin_id));
        }
    }

    fn call_hook_handlers(&self, origin_id: &str, result: UpdateResult) {
        let hooks = self.inner.hook_handlers.lock().snapshot();
        for hook in hooks {
            invoke_isolated("hook", origin_id, || hook(origin_id, result));
        }
    }

    /// Number of live update handlers.
    pub fn handler_count(&self) -> usize {
        self.inner.update_handlers.lock().len()
    }
}


// ---------------------------------------------------------------------------
// Document access
// ---------------------------------------------------------------------------

impl<T: JsonState> StatefulService<T> {
    /// The complete document for the current state.
    pub fn read_document(&self) -> T::Document {
        self.read(|state| state.read())
    }

    /// Current state as a JSON value.
    pub fn read_json(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self.read_document())
    }

    /// Apply `doc` through the module's updater and propagate.
    pub fn update_document(&self, doc: T::Document, origin_id: &str) -> UpdateResult {
        self.update(|state| T::update(doc, state, origin_id), origin_id)
    }

    /// Apply `doc` through the module's updater without notifying.
    pub fn update_document_without_propagation(&self, doc: T::Document) -> UpdateResult {
        self.update_without_propagation(|state| T::update(doc, state, ORIGIN_SERVER))
    }

    /// Apply an untyped JSON document, as received from a transport.
    ///
    /// A document that does not fit the module's schema is rejected with
    /// `Error` without touching the state; hook handlers still see it.
    pub fn update_json(&self, value: Value, origin_id: &str) -> UpdateResult {
        match serde_json::from_value::<T::Document>(value) {
            Ok(doc) => self.update_document(doc, origin_id),
            Err(e) => {
                tracing::debug!(origin_id, error = %e, "rejected document");
                self.update(|_| UpdateResult::Error, origin_id)
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[derive(Debug, Clone, PartialEq, Default)]
    struct Counter {
        value: i64,
        label: String,
    }

    #[derive(Debug, Default, Serialize, Deserialize)]
    struct CounterDoc {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<i64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        label: Option<String>,
    }

    impl JsonState for Counter {
        type Document = CounterDoc;

        fn read(&self) -> CounterDoc {
            CounterDoc {
                value: Some(self.value),
                label: Some(self.label.clone()),
            }
        }

        fn update(doc: CounterDoc, state: &mut Counter, _origin_id: &str) -> UpdateResult {
            if doc.value.is_some_and(|v| v < 0) {
                return UpdateResult::Error;
            }
            let mut changed = false;
            if let Some(v) = doc.value {
                changed |= crate::update::assign(&mut state.value, v);
            }
            if let Some(l) = doc.label {
                changed |= crate::update::assign(&mut state.label, l);
            }
            UpdateResult::from_changed(changed)
        }
    }

    fn recorder(service: &StatefulService<Counter>) -> Arc<Mutex<Vec<String>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        service.add_update_handler(move |origin| sink.lock().push(origin.to_string()));
        seen
    }

    fn set_value(v: i64) -> impl FnOnce(&mut Counter) -> UpdateResult {
        move |c| UpdateResult::from_changed(crate::update::assign(&mut c.value, v))
    }

    #[test]
    fn read_sees_current_state() {
        let service = StatefulService::new(Counter::default());
        service.update(set_value(7), "test");
        assert_eq!(service.read(|c| c.value), 7);
    }

    #[test]
    fn changed_update_notifies_with_origin() {
        let service = StatefulService::new(Counter::default());
        let seen = recorder(&service);
        let result = service.update(set_value(1), "ws:42");
        assert_eq!(result, UpdateResult::Changed);
        assert_eq!(*seen.lock(), vec!["ws:42".to_string()]);
    }

    #[test]
    fn unchanged_update_does_not_notify() {
        let service = StatefulService::new(Counter::default());
        let seen = recorder(&service);
        let result = service.update(set_value(0), "ws:42");
        assert_eq!(result, UpdateResult::Unchanged);
        assert!(seen.lock().is_empty());
    }

    #[test]
    fn error_update_does_not_notify() {
        let service = StatefulService::new(Counter::default());
        let seen = recorder(&service);
        let result = service.update_document(
            CounterDoc {
                value: Some(-5),
                label: Some("nope".into()),
            },
            "http",
        );
        assert_eq!(result, UpdateResult::Error);
        assert!(seen.lock().is_empty());
        assert_eq!(service.read(|c| c.clone()), Counter::default());
    }

    #[test]
    fn update_without_propagation_never_notifies() {
        let service = StatefulService::new(Counter::default());
        let seen = recorder(&service);
        let hooks = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hooks);
        service.add_hook_handler(move |_, _| {
            h.fetch_add(1, Ordering::SeqCst);
        });
        let result = service.update_without_propagation(set_value(9));
        assert_eq!(result, UpdateResult::Changed);
        assert_eq!(service.read(|c| c.value), 9);
        assert!(seen.lock().is_empty());
        assert_eq!(hooks.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn handlers_run_in_registration_order() {
        let service = StatefulService::new(Counter::default());
        let order = Arc::new(Mutex::new(Vec::new()));
        for tag in ["first", "second", "third"] {
            let order = Arc::clone(&order);
            service.add_update_handler(move |_| order.lock().push(tag));
        }
        service.update(set_value(3), "test");
        assert_eq!(*order.lock(), vec!["first", "second", "third"]);
    }

    #[test]
    fn removed_handler_is_not_invoked() {
        let service = StatefulService::new(Counter::default());
        let a_calls = Arc::new(AtomicUsize::new(0));
        let b_calls = Arc::new(AtomicUsize::new(0));
        let a = Arc::clone(&a_calls);
        let id_a = service.add_update_handler(move |_| {
            a.fetch_add(1, Ordering::SeqCst);
        });
        let b = Arc::clone(&b_calls);
        service.add_update_handler(move |_| {
            b.fetch_add(1, Ordering::SeqCst);
        });

        service.remove_update_handler(id_a);
        service.update(set_value(1), "test");

        assert_eq!(a_calls.load(Ordering::SeqCst), 0);
        assert_eq!(b_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn removing_twice_is_silent() {
        let service = StatefulService::new(Counter::default());
        let id = service.add_update_handler(|_| {});
        service.remove_update_handler(id);
        service.remove_update_handler(id);
        assert_eq!(service.handler_count(), 0);
    }

    #[test]
    fn pinned_handler_survives_removal() {
        let service = StatefulService::new(Counter::default());
        let id = service.add_update_handler_with(|_| {}, false);
        service.remove_update_handler(id);
        assert_eq!(service.handler_count(), 1);
    }

    #[test]
    fn panicking_handler_does_not_stop_the_rest() {
        let service = StatefulService::new(Counter::default());
        service.add_update_handler(|_| panic!("handler failure"));
        let seen = recorder(&service);

        let result = service.update(set_value(2), "test");

        assert_eq!(result, UpdateResult::Changed);
        assert_eq!(seen.lock().len(), 1);
        assert_eq!(service.handler_count(), 2);
        // Registry still usable after the panic.
        service.update(set_value(3), "test");
        assert_eq!(seen.lock().len(), 2);
    }

    #[test]
    fn hooks_see_every_result() {
        let service = StatefulService::new(Counter::default());
        let results = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&results);
        service.add_hook_handler(move |_, r| sink.lock().push(r));

        service.update(set_value(1), "t");
        service.update(set_value(1), "t");
        service.update(|_| UpdateResult::Error, "t");

        assert_eq!(
            *results.lock(),
            vec![UpdateResult::Changed, UpdateResult::Unchanged, UpdateResult::Error]
        );
    }

    #[test]
    fn handler_may_read_the_container() {
        let service = StatefulService::new(Counter::default());
        let observed = Arc::new(Mutex::new(None));
        let probe = service.clone();
        let sink = Arc::clone(&observed);
        service.add_update_handler(move |_| {
            *sink.lock() = Some(probe.read(|c| c.value));
        });
        service.update(set_value(11), "test");
        assert_eq!(*observed.lock(), Some(11));
    }

    #[test]
    fn handler_may_remove_itself() {
        let service = StatefulService::new(Counter::default());
        let calls = Arc::new(AtomicUsize::new(0));
        let slot: Arc<Mutex<Option<HandlerId>>> = Arc::new(Mutex::new(None));
        let (svc, c, s) = (service.clone(), Arc::clone(&calls), Arc::clone(&slot));
        let id = service.add_update_handler(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
            if let Some(id) = *s.lock() {
                svc.remove_update_handler(id);
            }
        });
        *slot.lock() = Some(id);

        service.update(set_value(1), "test");
        service.update(set_value(2), "test");

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn update_json_rejects_wrong_shape() {
        let service = StatefulService::new(Counter::default());
        let seen = recorder(&service);
        let result = service.update_json(serde_json::json!({"value": "high"}), "http");
        assert_eq!(result, UpdateResult::Error);
        assert!(seen.lock().is_empty());
    }

    #[test]
    fn update_json_partial_document() {
        let service = StatefulService::new(Counter {
            value: 4,
            label: "old".into(),
        });
        let result = service.update_json(serde_json::json!({"label": "new"}), "http");
        assert_eq!(result, UpdateResult::Changed);
        assert_eq!(
            service.read(|c| c.clone()),
            Counter {
                value: 4,
                label: "new".into()
            }
        );
        assert_eq!(
            service.read_json().unwrap(),
            serde_json::json!({"value": 4, "label": "new"})
        );
    }

    #[test]
    fn concurrent_updates_are_serialized() {
        let service = StatefulService::new(Counter::default());
        let notified = Arc::new(AtomicUsize::new(0));
        let n = Arc::clone(&notified);
        service.add_update_handler(move |_| {
            n.fetch_add(1, Ordering::SeqCst);
        });

        let workers: Vec<_> = (0..8)
            .map(|i| {
                let service = service.clone();
                thread::spawn(move || {
                    let origin = format!("worker-{}", i);
                    for _ in 0..100 {
                        service.update(
                            |c| {
                                c.value += 1;
                                UpdateResult::Changed
                            },
                            &origin,
                        );
                    }
                })
            })
            .collect();
        for w in workers {
            w.join().unwrap();
        }

        assert_eq!(service.read(|c| c.value), 800);
        assert_eq!(notified.load(Ordering::SeqCst), 800);
    }

    #[test]
    fn notifications_follow_apply_order() {
        let service = StatefulService::new(Counter::default());
        let observed = Arc::new(Mutex::new(Vec::new()));
        let probe = service.clone();
        let sink = Arc::clone(&observed);
        service.add_update_handler(move |_| sink.lock().push(probe.read(|c| c.value)));

        let workers: Vec<_> = (0..4)
            .map(|_| {
                let service = service.clone();
                thread::spawn(move || {
                    for _ in 0..50 {
                        service.update(
                            |c| {
                                c.value += 1;
                                UpdateResult::Changed
                            },
                            "worker",
                        );
                    }
                })
            })
            .collect();
        for w in workers {
            w.join().unwrap();
        }

        let observed = observed.lock();
        assert_eq!(observed.len(), 200);
        assert!(observed.windows(2).all(|w| w[0] < w[1]));
    }
}
