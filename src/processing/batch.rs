//! Sequential batch classification
//!
//! Items are classified one at a time in input order. Counters are written
//! to the user's session after every item, and a stop signal is honored
//! between items without undoing anything already recorded.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use super::SessionManager;
use crate::classifier::{Classifier, VerdictSource};
use crate::input::extract_items;
use crate::models::{ProcessingResult, ProcessingSession};
use crate::persistence::{PersistenceError, Store};

#[derive(Error, Debug)]
pub enum BatchError {
    #[error("Please enter items to process")]
    NoItems,

    #[error("Storage error: {0}")]
    Storage(#[from] PersistenceError),
}

/// Cooperative cancellation flag shared with whoever may stop a run
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    flag: Arc<AtomicBool>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Everything a run produced
#[derive(Debug, Clone)]
pub struct BatchReport {
    /// One entry per processed item, in input order
    pub results: Vec<ProcessingResult>,
    /// Session state after the run, already inactive
    pub session: ProcessingSession,
    pub cancelled: bool,
    /// Items decided by the offline check instead of the remote endpoint
    pub offline_items: usize,
}

impl BatchReport {
    pub fn approved(&self) -> usize {
        self.results.iter().filter(|r| r.approved).count()
    }

    pub fn rejected(&self) -> usize {
        self.results.len() - self.approved()
    }
}

struct RunOutcome {
    results: Vec<ProcessingResult>,
    cancelled: bool,
    offline_items: usize,
}

pub struct BatchProcessor<C: Classifier> {
    classifier: C,
    sessions: SessionManager,
    pacing: Duration,
}

impl<C: Classifier> BatchProcessor<C> {
    pub fn new(classifier: C, store: Arc<dyn Store>, pacing: Duration) -> Self {
        BatchProcessor {
            classifier,
            sessions: SessionManager::new(store),
            pacing,
        }
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    /// Classify every non-blank line of `raw_input` for `user_id`
    ///
    /// `on_result` sees each result as soon as it is recorded. The session
    /// is marked inactive when the run ends, whether it completed, was
    /// stopped or failed on storage.
    pub async fn run<F>(
        &self,
        user_id: &str,
        raw_input: &str,
        stop: &StopSignal,
        mut on_result: F,
    ) -> Result<BatchReport, BatchError>
    where
        F: FnMut(usize, &ProcessingResult),
    {
        let items = extract_items(raw_input);
        if items.is_empty() {
            return Err(BatchError::NoItems);
        }

        let mut session = self.sessions.load_or_create(user_id)?;
        self.sessions.begin_run(&mut session, items.len() as u64)?;
        log::info!("Starting processing of {} items", items.len());

        let outcome = self.drive(&items, &mut session, stop, &mut on_result).await;
        let finished = self.sessions.finish(&mut session);
        let outcome = outcome?;
        finished?;

        if outcome.cancelled {
            log::warn!(
                "Processing stopped by user after {} of {} items",
                outcome.results.len(),
                items.len()
            );
        }
        let report = BatchReport {
            results: outcome.results,
            session,
            cancelled: outcome.cancelled,
            offline_items: outcome.offline_items,
        };
        log::info!(
            "Processing complete: {} approved, {} rejected",
            report.approved(),
            report.rejected()
        );
        Ok(report)
    }

    async fn drive<F>(
        &self,
        items: &[String],
        session: &mut ProcessingSession,
        stop: &StopSignal,
        on_result: &mut F,
    ) -> Result<RunOutcome, BatchError>
    where
        F: FnMut(usize, &ProcessingResult),
    {
        let mut outcome = RunOutcome {
            results: Vec::with_capacity(items.len()),
            cancelled: false,
            offline_items: 0,
        };

        for (index, item) in items.iter().enumerate() {
            if stop.is_stopped() {
                outcome.cancelled = true;
                break;
            }

            let result = match self.classifier.classify(item).await {
                Ok(verdict) => {
                    if verdict.source == VerdictSource::Heuristic {
                        if outcome.offline_items == 0 {
                            log::warn!("API unavailable - using offline mode");
                        }
                        outcome.offline_items += 1;
                    }
                    ProcessingResult {
                        input: item.clone(),
                        approved: verdict.approved,
                        message: verdict.message,
                    }
                }
                Err(e) => {
                    log::error!("Processing error for {:?}: {}", item, e);
                    ProcessingResult {
                        input: item.clone(),
                        approved: false,
                        message: e.to_string(),
                    }
                }
            };
            log::debug!("[{}/{}] {} -> {}", index + 1, items.len(), item, result.approved);

            self.sessions.record(session, result.approved)?;
            on_result(index, &result);
            outcome.results.push(result);

            let is_last = index + 1 == items.len();
            if !is_last && !self.pacing.is_zero() {
                tokio::time::sleep(self.pacing).await;
            }
        }

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::{
        ClassifyError, HeuristicClassifier, ItemClassifier, RemoteClassifier, Verdict,
    };
    use crate::persistence::SqliteStore;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;
    use tokio::net::TcpListener;

    fn create_store() -> Arc<SqliteStore> {
        Arc::new(SqliteStore::in_memory().unwrap())
    }

    async fn unreachable_endpoint() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        format!("http://{}/api/check", addr)
    }

    /// Remote stub: answers items containing "remote", fails otherwise,
    /// with varying latency, and tracks overlapping calls.
    struct FlakyRemote {
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl FlakyRemote {
        fn new() -> Self {
            FlakyRemote {
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Classifier for Arc<FlakyRemote> {
        async fn classify(&self, text: &str) -> Result<Verdict, ClassifyError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            let delay = if text.len() % 2 == 0 { 15 } else { 1 };
            tokio::time::sleep(Duration::from_millis(delay)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if text.contains("remote") {
                Ok(Verdict {
                    approved: true,
                    message: "Aprovada".to_string(),
                    source: VerdictSource::Remote,
                })
            } else {
                Err(ClassifyError::Status(500))
            }
        }
    }

    struct AlwaysFails;

    #[async_trait]
    impl Classifier for AlwaysFails {
        async fn classify(&self, _text: &str) -> Result<Verdict, ClassifyError> {
            Err(ClassifyError::Decode("boom".to_string()))
        }
    }

    fn offline_processor(store: &Arc<SqliteStore>) -> BatchProcessor<HeuristicClassifier> {
        BatchProcessor::new(HeuristicClassifier::new(), store.clone(), Duration::ZERO)
    }

    #[tokio::test]
    async fn test_unreachable_remote_uses_offline_check() {
        let store = create_store();
        let remote = RemoteClassifier::new(&unreachable_endpoint().await, 2).unwrap();
        let processor = BatchProcessor::new(
            ItemClassifier::with_remote(Box::new(remote)),
            store.clone(),
            Duration::ZERO,
        );

        let report = processor
            .run("user-1", "a@b.com\nnot-an-email\nx@y.org", &StopSignal::new(), |_, _| {})
            .await
            .unwrap();

        let approved: Vec<bool> = report.results.iter().map(|r| r.approved).collect();
        assert_eq!(approved, vec![true, false, true]);
        assert_eq!(report.offline_items, 3);
        assert!(!report.cancelled);

        let session = store.find_session_for_user("user-1").unwrap().unwrap();
        assert_eq!(session.tested_count, 3);
        assert_eq!(session.approved_count, 2);
        assert_eq!(session.rejected_count, 1);
        assert_eq!(session.loaded_count, 3);
        assert!(!session.is_active);
    }

    #[tokio::test]
    async fn test_order_preserved_across_fallbacks() {
        let store = create_store();
        let remote = Arc::new(FlakyRemote::new());
        let processor = BatchProcessor::new(
            ItemClassifier::with_remote(Box::new(remote.clone())),
            store,
            Duration::ZERO,
        );
        let input = "remote-1\na@b.com\n  \nremote-22\nbad\nremote-333\nx@y.net\n";

        let report = processor
            .run("user-1", input, &StopSignal::new(), |_, _| {})
            .await
            .unwrap();

        let inputs: Vec<&str> = report.results.iter().map(|r| r.input.as_str()).collect();
        assert_eq!(
            inputs,
            vec!["remote-1", "a@b.com", "remote-22", "bad", "remote-333", "x@y.net"]
        );
        let messages: Vec<&str> = report.results.iter().map(|r| r.message.as_str()).collect();
        assert_eq!(messages[0], "Aprovada");
        assert_eq!(messages[1], "Valid email format");
        assert_eq!(messages[3], "Invalid format or domain");
        assert_eq!(report.offline_items, 3);
        assert_eq!(remote.max_in_flight.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancellation_mid_batch() {
        let store = create_store();
        let processor = offline_processor(&store);
        let stop = StopSignal::new();
        let seen = Mutex::new(Vec::new());

        let report = processor
            .run("user-1", "a@b.com\nb@c.com\nc@d.com\nd@e.com\ne@f.com", &stop, |index, result| {
                seen.lock().unwrap().push(result.input.clone());
                if index == 1 {
                    stop.stop();
                }
            })
            .await
            .unwrap();

        assert!(report.cancelled);
        assert_eq!(report.results.len(), 2);
        assert_eq!(seen.lock().unwrap().len(), 2);

        let session = store.find_session_for_user("user-1").unwrap().unwrap();
        assert_eq!(session.tested_count, 2);
        assert_eq!(session.loaded_count, 5);
        assert!(!session.is_active);
    }

    #[tokio::test]
    async fn test_stop_before_start() {
        let store = create_store();
        let processor = offline_processor(&store);
        let stop = StopSignal::new();
        stop.stop();

        let report = processor.run("user-1", "a@b.com", &stop, |_, _| {}).await.unwrap();
        assert!(report.cancelled);
        assert!(report.results.is_empty());
        assert!(!report.session.is_active);
    }

    #[tokio::test]
    async fn test_classifier_errors_become_rejections() {
        let store = create_store();
        let processor = BatchProcessor::new(AlwaysFails, store.clone(), Duration::ZERO);

        let report = processor
            .run("user-1", "a@b.com\nx@y.org", &StopSignal::new(), |_, _| {})
            .await
            .unwrap();

        assert_eq!(report.results.len(), 2);
        assert!(report.results.iter().all(|r| !r.approved));
        assert!(report.results[0].message.contains("boom"));
        assert_eq!(report.session.rejected_count, 2);
        assert_eq!(report.session.tested_count, 2);
    }

    #[tokio::test]
    async fn test_empty_input() {
        let store = create_store();
        let processor = offline_processor(&store);

        let err = processor
            .run("user-1", "\n   \n", &StopSignal::new(), |_, _| {})
            .await
            .unwrap_err();
        assert!(matches!(err, BatchError::NoItems));
        assert!(store.find_session_for_user("user-1").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_rerun_resets_counters() {
        let store = create_store();
        let processor = offline_processor(&store);
        let stop = StopSignal::new();

        processor.run("user-1", "a@b.com\nb@c.com", &stop, |_, _| {}).await.unwrap();
        let report = processor.run("user-1", "bad", &stop, |_, _| {}).await.unwrap();

        assert_eq!(report.session.tested_count, 1);
        assert_eq!(report.session.rejected_count, 1);
        assert_eq!(report.session.approved_count, 0);
    }

    #[tokio::test]
    async fn test_pacing_between_items() {
        let store = create_store();
        let processor = BatchProcessor::new(
            HeuristicClassifier::new(),
            store,
            Duration::from_millis(20),
        );

        let started = std::time::Instant::now();
        processor
            .run("user-1", "a@b.com\nb@c.com\nc@d.com", &StopSignal::new(), |_, _| {})
            .await
            .unwrap();
        assert!(started.elapsed() >= Duration::from_millis(40));
    }
}
