//! Rebuild scheduling and publication of the conversation set
//!
//! Every trigger runs one full build on the blocking pool. Builds may
//! overlap; each one is tagged with a generation when it is scheduled and
//! only publishes if nothing newer has been published meanwhile. The
//! published set is swapped wholesale, so readers see either the previous
//! complete set or the new one.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::{Config, ResolverConfig};
use crate::error::{CallbookError, Result};
use crate::identity::Directory;
use crate::resolver::{ConferenceRegistry, ConversationResolver, ConversationSet, HistoryStore};
use crate::store::CallStore;

/// What caused a rebuild. Carries no data; every trigger rebuilds fully.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerReason {
    Startup,
    AccountsChanged,
    IncomingCall,
    CallStateChanged,
    ConferenceCreated,
    ConferenceChanged,
    ConferenceRemoved,
    ContactsChanged,
    Manual,
}

impl TriggerReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerReason::Startup => "startup",
            TriggerReason::AccountsChanged => "accounts_changed",
            TriggerReason::IncomingCall => "incoming_call",
            TriggerReason::CallStateChanged => "call_state_changed",
            TriggerReason::ConferenceCreated => "conference_created",
            TriggerReason::ConferenceChanged => "conference_changed",
            TriggerReason::ConferenceRemoved => "conference_removed",
            TriggerReason::ContactsChanged => "contacts_changed",
            TriggerReason::Manual => "manual",
        }
    }
}

/// Sent to every subscriber after a successful publish
#[derive(Debug, Clone)]
pub struct ConversationsUpdated {
    pub generation: u64,
    pub reason: TriggerReason,
    pub conversations: Arc<ConversationSet>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildOutcome {
    Published { generation: u64, conversations: usize },
    /// A newer build had already been published; this result was dropped
    Superseded { generation: u64, latest: u64 },
}

/// Collaborators a build reads from
#[derive(Clone)]
pub struct Sources {
    pub history: Arc<dyn HistoryStore>,
    pub directory: Arc<dyn Directory>,
    pub conferences: Arc<dyn ConferenceRegistry>,
}

impl Sources {
    pub fn from_store(store: Arc<CallStore>) -> Self {
        Self {
            history: store.clone(),
            directory: store.clone(),
            conferences: store,
        }
    }
}

#[derive(Clone)]
pub struct ConversationService {
    inner: Arc<ServiceInner>,
}

struct ServiceInner {
    sources: Sources,
    resolver: ResolverConfig,
    next_generation: AtomicU64,
    published_generation: Mutex<u64>,
    current_tx: watch::Sender<Arc<ConversationSet>>,
    update_tx: broadcast::Sender<ConversationsUpdated>,
}

impl ConversationService {
    pub fn new(sources: Sources, config: &Config) -> Self {
        let (current_tx, _) = watch::channel(Arc::new(ConversationSet::new()));
        let (update_tx, _) = broadcast::channel(config.service.channel_capacity.max(1));

        Self {
            inner: Arc::new(ServiceInner {
                sources,
                resolver: config.resolver.clone(),
                next_generation: AtomicU64::new(0),
                published_generation: Mutex::new(0),
                current_tx,
                update_tx,
            }),
        }
    }

    /// Schedules a rebuild and returns its generation without waiting.
    /// Must be called from within a tokio runtime; failures are logged.
    pub fn trigger(&self, reason: TriggerReason) -> u64 {
        let (generation, build) = self.schedule(reason);
        // run() already logs failures
        tokio::spawn(async move {
            let _ = build.await;
        });
        generation
    }

    /// Schedules a rebuild; the returned future reports its outcome.
    /// The generation is taken immediately, not when the future is polled.
    pub fn rebuild(
        &self,
        reason: TriggerReason,
    ) -> impl Future<Output = Result<BuildOutcome>> + Send + 'static {
        self.schedule(reason).1
    }

    fn schedule(
        &self,
        reason: TriggerReason,
    ) -> (u64, impl Future<Output = Result<BuildOutcome>> + Send + 'static) {
        let generation = self.inner.next_generation.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(generation, reason = reason.as_str(), "rebuild scheduled");
        let inner = self.inner.clone();
        (generation, async move { ServiceInner::run(inner, generation, reason).await })
    }

    /// Rebuild on every event of `events` until the sender side closes
    pub fn attach(&self, mut events: broadcast::Receiver<TriggerReason>) -> JoinHandle<()> {
        let service = self.clone();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(reason) => {
                        service.trigger(reason);
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "trigger stream lagged");
                        service.trigger(TriggerReason::Manual);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }

    /// The last published set
    pub fn current(&self) -> Arc<ConversationSet> {
        self.inner.current_tx.borrow().clone()
    }

    pub fn current_stream(&self) -> watch::Receiver<Arc<ConversationSet>> {
        self.inner.current_tx.subscribe()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConversationsUpdated> {
        self.inner.update_tx.subscribe()
    }

    pub fn published_generation(&self) -> u64 {
        *self
            .inner
            .published_generation
            .lock()
            .unwrap_or_else(|p| p.into_inner())
    }
}

impl ServiceInner {
    async fn run(
        inner: Arc<ServiceInner>,
        generation: u64,
        reason: TriggerReason,
    ) -> Result<BuildOutcome> {
        let worker = inner.clone();
        let built = match tokio::task::spawn_blocking(move || worker.build()).await {
            Ok(built) => built,
            Err(e) => Err(CallbookError::Worker(e.to_string())),
        };

        match built {
            Ok(set) => Ok(inner.publish(generation, reason, set)),
            Err(e) => {
                error!(generation, reason = reason.as_str(), error = %e, "build aborted, keeping previous conversations");
                Err(e)
            }
        }
    }

    fn build(&self) -> Result<ConversationSet> {
        let resolver = ConversationResolver::new(self.sources.directory.as_ref(), self.resolver.clone());
        resolver.load_and_build(
            self.sources.history.as_ref(),
            self.sources.conferences.as_ref(),
        )
    }

    /// Single point of mutation of the shared set
    fn publish(&self, generation: u64, reason: TriggerReason, set: ConversationSet) -> BuildOutcome {
        let started = Instant::now();
        let mut latest = self
            .published_generation
            .lock()
            .unwrap_or_else(|p| p.into_inner());
        if generation <= *latest {
            debug!(generation, latest = *latest, "discarding stale build");
            return BuildOutcome::Superseded {
                generation,
                latest: *latest,
            };
        }
        *latest = generation;

        let count = set.len();
        let set = Arc::new(set);
        self.current_tx.send_replace(set.clone());
        // No subscribers is not an error
        let _ = self.update_tx.send(ConversationsUpdated {
            generation,
            reason,
            conversations: set,
        });

        info!(
            generation,
            reason = reason.as_str(),
            conversations = count,
            publish_us = started.elapsed().as_micros() as u64,
            "conversations published"
        );
        BuildOutcome::Published {
            generation,
            conversations: count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::tests::FakeDirectory;
    use crate::model::{HistoryCallRecord, LiveConference, UNKNOWN_ID};
    use chrono::{Duration, TimeZone, Utc};
    use std::collections::BTreeMap;
    use std::sync::atomic::AtomicBool;
    use std::sync::mpsc;

    fn call(id: &str, number: &str) -> HistoryCallRecord {
        let start = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        HistoryCallRecord {
            call_id: id.to_string(),
            account_id: "acc".to_string(),
            peer_number: number.to_string(),
            contact_id: UNKNOWN_ID,
            call_start: start,
            call_end: start + Duration::seconds(5),
            incoming: true,
            missed: false,
        }
    }

    #[derive(Default)]
    struct FakeHistory {
        calls: Mutex<Vec<HistoryCallRecord>>,
        fail: AtomicBool,
        panic: AtomicBool,
        gate: Mutex<Option<(mpsc::SyncSender<()>, mpsc::Receiver<()>)>>,
    }

    impl HistoryStore for FakeHistory {
        fn all_calls(&self) -> Result<Vec<HistoryCallRecord>> {
            let gate = self.gate.lock().unwrap().take();
            if let Some((entered, release)) = gate {
                let _ = entered.send(());
                let _ = release.recv();
            }
            if self.panic.load(Ordering::SeqCst) {
                panic!("history backend crashed");
            }
            if self.fail.load(Ordering::SeqCst) {
                return Err(CallbookError::Io(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "history unavailable",
                )));
            }
            Ok(self.calls.lock().unwrap().clone())
        }
    }

    struct NoConferences;

    impl ConferenceRegistry for NoConferences {
        fn conferences(&self) -> Result<BTreeMap<String, LiveConference>> {
            Ok(BTreeMap::new())
        }
    }

    fn service(history: Arc<FakeHistory>) -> ConversationService {
        let sources = Sources {
            history,
            directory: Arc::new(FakeDirectory::default()),
            conferences: Arc::new(NoConferences),
        };
        ConversationService::new(sources, &Config::default())
    }

    #[tokio::test]
    async fn test_rebuild_publishes_full_set() {
        let history = Arc::new(FakeHistory::default());
        history.calls.lock().unwrap().extend([call("1", "+1"), call("2", "+2")]);
        let service = service(history);
        let mut updates = service.subscribe();

        let outcome = service.rebuild(TriggerReason::Startup).await.unwrap();
        assert_eq!(
            outcome,
            BuildOutcome::Published {
                generation: 1,
                conversations: 2
            }
        );

        let update = updates.recv().await.unwrap();
        assert_eq!(update.generation, 1);
        assert_eq!(update.reason, TriggerReason::Startup);
        assert_eq!(update.conversations.len(), 2);
        assert!(Arc::ptr_eq(&update.conversations, &service.current()));
    }

    #[tokio::test]
    async fn test_failed_build_keeps_previous_set() {
        let history = Arc::new(FakeHistory::default());
        history.calls.lock().unwrap().push(call("1", "+1"));
        let service = service(history.clone());
        service.rebuild(TriggerReason::Startup).await.unwrap();
        let before = service.current();

        history.fail.store(true, Ordering::SeqCst);
        history.calls.lock().unwrap().push(call("2", "+2"));
        assert!(service.rebuild(TriggerReason::IncomingCall).await.is_err());

        assert!(Arc::ptr_eq(&before, &service.current()));
        assert_eq!(service.published_generation(), 1);
    }

    #[tokio::test]
    async fn test_panicking_build_is_reported_and_keeps_previous_set() {
        let history = Arc::new(FakeHistory::default());
        history.calls.lock().unwrap().push(call("1", "+1"));
        let service = service(history.clone());
        service.rebuild(TriggerReason::Startup).await.unwrap();
        let before = service.current();

        history.panic.store(true, Ordering::SeqCst);
        let err = service.rebuild(TriggerReason::ContactsChanged).await.unwrap_err();
        assert!(matches!(err, CallbookError::Worker(_)));
        assert!(Arc::ptr_eq(&before, &service.current()));
        assert_eq!(service.published_generation(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_stale_build_does_not_overwrite_newer() {
        let (entered_tx, entered_rx) = mpsc::sync_channel(1);
        let (release_tx, release_rx) = mpsc::channel();
        let history = Arc::new(FakeHistory::default());
        history.calls.lock().unwrap().push(call("1", "+1"));
        *history.gate.lock().unwrap() = Some((entered_tx, release_rx));
        let service = service(history);

        let slow = tokio::spawn(service.rebuild(TriggerReason::IncomingCall));
        tokio::task::spawn_blocking(move || entered_rx.recv())
            .await
            .unwrap()
            .unwrap();

        let fast = service.rebuild(TriggerReason::CallStateChanged).await.unwrap();
        assert_eq!(
            fast,
            BuildOutcome::Published {
                generation: 2,
                conversations: 1
            }
        );

        release_tx.send(()).unwrap();
        let slow = slow.await.unwrap().unwrap();
        assert_eq!(
            slow,
            BuildOutcome::Superseded {
                generation: 1,
                latest: 2
            }
        );
        assert_eq!(service.published_generation(), 2);
    }

    #[tokio::test]
    async fn test_attached_trigger_stream_rebuilds() {
        let history = Arc::new(FakeHistory::default());
        history.calls.lock().unwrap().push(call("1", "sip:zoe@example.org"));
        let service = service(history);
        let mut updates = service.subscribe();

        let (events_tx, events_rx) = broadcast::channel(4);
        let listener = service.attach(events_rx);
        events_tx.send(TriggerReason::ConferenceCreated).unwrap();

        let update = tokio::time::timeout(std::time::Duration::from_secs(5), updates.recv())
            .await
            .expect("update before timeout")
            .unwrap();
        assert_eq!(update.reason, TriggerReason::ConferenceCreated);
        assert!(update.conversations.contains_key("zoe@example.org"));

        drop(events_tx);
        listener.await.unwrap();
    }
}
