use std::{
    panic::{AssertUnwindSafe, catch_unwind},
    sync::{Mutex, MutexGuard, PoisonError, mpsc},
};

use crate::ResultsRecord;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct ListenerError(pub String);

impl ListenerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// One-shot observer of a completed run. A registered listener receives the
/// next posted [`ResultsRecord`] and is then dropped from the registry.
pub trait ResultsListener: Send {
    fn process_results(&self, results: &ResultsRecord) -> Result<(), ListenerError>;
}

impl<F> ResultsListener for F
where
    F: Fn(&ResultsRecord) -> Result<(), ListenerError> + Send,
{
    fn process_results(&self, results: &ResultsRecord) -> Result<(), ListenerError> {
        self(results)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub notified: usize,
    pub failed: usize,
}

#[derive(Default)]
pub struct ListenerRegistry {
    listeners: Mutex<Vec<Box<dyn ResultsListener>>>,
}

impl std::fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("registered", &self.len())
            .finish()
    }
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, listener: impl ResultsListener + 'static) {
        self.register_boxed(Box::new(listener));
    }

    pub fn register_boxed(&self, listener: Box<dyn ResultsListener>) {
        self.lock().push(listener);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Take every registered listener and clear the registry in one step, then
    /// notify the taken listeners in registration order with the lock released.
    ///
    /// Listeners registered after the take wait for the next drain. A listener
    /// that fails or panics is logged and counted; the rest still run.
    pub fn drain_and_notify(&self, results: &ResultsRecord) -> DrainReport {
        let drained = std::mem::take(&mut *self.lock());
        let mut report = DrainReport::default();
        for (position, listener) in drained.into_iter().enumerate() {
            let outcome = catch_unwind(AssertUnwindSafe(|| listener.process_results(results)));
            match outcome {
                Ok(Ok(())) => report.notified += 1,
                Ok(Err(err)) => {
                    report.failed += 1;
                    tracing::warn!(position, error = %err, "results listener failed");
                }
                Err(_) => {
                    report.failed += 1;
                    tracing::warn!(position, "results listener panicked");
                }
            }
        }
        report
    }

    // The guarded vector holds no invariant a panicking holder could break.
    fn lock(&self) -> MutexGuard<'_, Vec<Box<dyn ResultsListener>>> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Forwards a copy of the record it receives to a [`mpsc::Receiver`], so a
/// launcher thread can block until the runner posts its results.
pub struct ChannelListener {
    sender: mpsc::Sender<ResultsRecord>,
}

pub fn channel_listener() -> (ChannelListener, mpsc::Receiver<ResultsRecord>) {
    let (sender, receiver) = mpsc::channel();
    (ChannelListener { sender }, receiver)
}

impl ResultsListener for ChannelListener {
    fn process_results(&self, results: &ResultsRecord) -> Result<(), ListenerError> {
        self.sender
            .send(results.clone())
            .map_err(|_| ListenerError::new("results receiver dropped"))
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            Arc, Barrier,
            atomic::{AtomicUsize, Ordering},
        },
        time::Duration,
    };

    use super::*;
    use crate::{RunSummary, TestTableSequence};

    fn sample_record(result: &str) -> ResultsRecord {
        ResultsRecord::new(
            RunSummary {
                result: result.into(),
                ..RunSummary::default()
            },
            TestTableSequence::default(),
        )
        .unwrap()
    }

    fn recording_listener(
        tag: &'static str,
        seen: &Arc<Mutex<Vec<(&'static str, String)>>>,
    ) -> impl ResultsListener + 'static {
        let seen = Arc::clone(seen);
        move |results: &ResultsRecord| -> Result<(), ListenerError> {
            seen.lock().unwrap().push((tag, results.result().to_string()));
            Ok(())
        }
    }

    #[test]
    fn drain_notifies_in_registration_order_and_empties_registry() {
        let registry = ListenerRegistry::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        registry.register(recording_listener("first", &seen));
        registry.register(recording_listener("second", &seen));
        registry.register(recording_listener("third", &seen));
        assert_eq!(registry.len(), 3);

        let report = registry.drain_and_notify(&sample_record("passed"));
        assert_eq!(
            report,
            DrainReport {
                notified: 3,
                failed: 0
            }
        );
        assert!(registry.is_empty());
        let tags: Vec<_> = seen.lock().unwrap().iter().map(|(tag, _)| *tag).collect();
        assert_eq!(tags, vec!["first", "second", "third"]);
    }

    #[test]
    fn listeners_are_notified_only_once() {
        let registry = ListenerRegistry::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        registry.register(recording_listener("only", &seen));

        registry.drain_and_notify(&sample_record("passed"));
        let second = registry.drain_and_notify(&sample_record("failed"));

        assert_eq!(second, DrainReport::default());
        assert_eq!(
            *seen.lock().unwrap(),
            vec![("only", "passed".to_string())]
        );
    }

    #[test]
    fn drain_on_empty_registry_is_a_no_op() {
        let registry = ListenerRegistry::new();
        assert_eq!(
            registry.drain_and_notify(&sample_record("passed")),
            DrainReport::default()
        );
        assert!(registry.is_empty());
    }

    #[test]
    fn failing_and_panicking_listeners_do_not_block_the_rest() {
        let registry = ListenerRegistry::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        registry.register(|_: &ResultsRecord| -> Result<(), ListenerError> {
            Err(ListenerError::new("disk full"))
        });
        registry.register(|_: &ResultsRecord| -> Result<(), ListenerError> {
            panic!("listener bug")
        });
        registry.register(recording_listener("survivor", &seen));

        let report = registry.drain_and_notify(&sample_record("passed"));

        assert_eq!(
            report,
            DrainReport {
                notified: 1,
                failed: 2
            }
        );
        assert_eq!(seen.lock().unwrap().len(), 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn listener_registered_during_drain_waits_for_next_drain() {
        let registry = Arc::new(ListenerRegistry::new());
        let late_hits = Arc::new(AtomicUsize::new(0));
        let in_listener = Arc::new(Barrier::new(2));
        let registered = Arc::new(Barrier::new(2));

        {
            let in_listener = Arc::clone(&in_listener);
            let registered = Arc::clone(&registered);
            registry.register(move |_: &ResultsRecord| -> Result<(), ListenerError> {
                in_listener.wait();
                registered.wait();
                Ok(())
            });
        }

        let drainer = {
            let registry = Arc::clone(&registry);
            std::thread::spawn(move || registry.drain_and_notify(&sample_record("passed")))
        };

        in_listener.wait();
        {
            let late_hits = Arc::clone(&late_hits);
            registry.register(move |_: &ResultsRecord| -> Result<(), ListenerError> {
                late_hits.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        }
        registered.wait();

        let first = drainer.join().expect("drain thread should join");
        assert_eq!(first.notified, 1);
        assert_eq!(late_hits.load(Ordering::SeqCst), 0);
        assert_eq!(registry.len(), 1);

        let second = registry.drain_and_notify(&sample_record("failed"));
        assert_eq!(second.notified, 1);
        assert_eq!(late_hits.load(Ordering::SeqCst), 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn concurrent_registrations_and_drains_notify_each_listener_exactly_once() {
        let registry = Arc::new(ListenerRegistry::new());
        let hits: Arc<Vec<AtomicUsize>> = Arc::new((0..200).map(|_| AtomicUsize::new(0)).collect());

        let registrar = {
            let registry = Arc::clone(&registry);
            let hits = Arc::clone(&hits);
            std::thread::spawn(move || {
                for slot in 0..hits.len() {
                    let hits = Arc::clone(&hits);
                    registry.register(move |_: &ResultsRecord| -> Result<(), ListenerError> {
                        hits[slot].fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    });
                }
            })
        };
        let drainers: Vec<_> = (0..4)
            .map(|_| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        registry.drain_and_notify(&sample_record("passed"));
                    }
                })
            })
            .collect();

        registrar.join().expect("registrar should join");
        for drainer in drainers {
            drainer.join().expect("drainer should join");
        }
        registry.drain_and_notify(&sample_record("passed"));

        assert!(registry.is_empty());
        for hit in hits.iter() {
            assert_eq!(hit.load(Ordering::SeqCst), 1);
        }
    }

    #[test]
    fn channel_listener_forwards_record() {
        let registry = ListenerRegistry::new();
        let (listener, receiver) = channel_listener();
        registry.register(listener);

        registry.drain_and_notify(&sample_record("failed"));

        let record = receiver
            .recv_timeout(Duration::from_secs(1))
            .expect("record should be forwarded");
        assert_eq!(record.result(), "failed");
        assert!(!record.result_passed());
    }

    #[test]
    fn channel_listener_reports_dropped_receiver() {
        let registry = ListenerRegistry::new();
        let (listener, receiver) = channel_listener();
        drop(receiver);
        registry.register(listener);

        let report = registry.drain_and_notify(&sample_record("passed"));
        assert_eq!(report.failed, 1);
    }
}
