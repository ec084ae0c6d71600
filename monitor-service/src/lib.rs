use chrono::{Local, TimeZone};
use monitor_core::{Config, CoreError, FloorSource, KeywordFilter, LatestFloor, Notifier};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Result of a single poll cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// The thread had no usable posts this cycle.
    NotFound,
    /// The newest floor matches the last one we notified about.
    Unchanged,
    /// A new floor appeared. `notified` is false when the keyword filter
    /// suppressed the notification.
    New { pid: u64, notified: bool },
}

/// Watches one thread for new floors and pushes a notification per change.
///
/// The last-seen pid lives here, not in a global; it is compared and
/// updated only by the poll loop, so no locking is involved. State is lost
/// on restart, which means the first successful poll after startup always
/// counts as a change.
pub struct ThreadMonitor<S, N> {
    source: S,
    notifier: N,
    thread_id: u64,
    keywords: KeywordFilter,
    interval: Duration,
    last_seen_pid: Option<u64>,
}

impl<S: FloorSource, N: Notifier> ThreadMonitor<S, N> {
    pub fn new(source: S, notifier: N, config: &Config) -> Self {
        Self {
            source,
            notifier,
            thread_id: config.thread_id,
            keywords: config.keywords.clone(),
            interval: config.poll_interval,
            last_seen_pid: None,
        }
    }

    pub fn last_seen_pid(&self) -> Option<u64> {
        self.last_seen_pid
    }

    /// One iteration of the watch loop: resolve the newest floor, compare
    /// against the last seen pid, and notify on change. A notification for
    /// a given pid is attempted at most once per process run.
    pub async fn poll_once(&mut self) -> Result<PollOutcome, CoreError> {
        let Some(floor) = self.source.latest_floor(self.thread_id).await? else {
            info!("No usable posts in thread {} this cycle", self.thread_id);
            return Ok(PollOutcome::NotFound);
        };

        debug!(
            "Latest floor in thread {}: pid={}, author_id={}",
            self.thread_id, floor.pid, floor.author_id
        );

        if self.last_seen_pid == Some(floor.pid) {
            debug!("Floor {} unchanged, nothing to do", floor.pid);
            return Ok(PollOutcome::Unchanged);
        }

        info!("New floor detected: pid={}", floor.pid);
        // Updated before any send attempt, so a failed delivery is not
        // redelivered on the next cycle.
        self.last_seen_pid = Some(floor.pid);

        if !self.keywords.matches(&floor.content) {
            debug!(
                "Floor {} matched none of {} keyword(s), suppressing notification",
                floor.pid,
                self.keywords.keywords().len()
            );
            return Ok(PollOutcome::New {
                pid: floor.pid,
                notified: false,
            });
        }

        let message = format_message(&floor);
        info!("Sending notification for floor {}", floor.pid);
        if let Err(e) = self.notifier.send(&message).await {
            error!("Failed to send notification for floor {}: {}", floor.pid, e);
        }

        Ok(PollOutcome::New {
            pid: floor.pid,
            notified: true,
        })
    }

    /// Poll until the token is cancelled. Iteration errors are logged and
    /// the loop keeps going; only cancellation stops it.
    pub async fn run(&mut self, cancel: CancellationToken) {
        info!(
            "Watching thread {} every {:?}",
            self.thread_id, self.interval
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    info!("Shutdown requested, stopping watch loop");
                    break;
                }

                _ = ticker.tick() => {
                    if let Err(e) = self.poll_once().await {
                        error!("Poll failed: {}", e);
                    }
                }
            }
        }
    }
}

/// Resolve the newest floor once and push it out unconditionally, keyword
/// filter and change detection not involved. This is the `once` subcommand.
pub async fn notify_once<S: FloorSource, N: Notifier>(
    source: &S,
    notifier: &N,
    thread_id: u64,
) -> Result<bool, CoreError> {
    let Some(floor) = source.latest_floor(thread_id).await? else {
        info!("No usable posts in thread {}", thread_id);
        return Ok(false);
    };

    let message = format_message(&floor);
    info!("Latest floor in thread {}:\n{}", thread_id, message);
    notifier.send(&message).await?;
    Ok(true)
}

/// Notification body: post content first, then author, IP label, local
/// creation time and a Markdown deep link.
pub fn format_message(floor: &LatestFloor) -> String {
    let time = Local
        .timestamp_opt(floor.created_at, 0)
        .single()
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| floor.created_at.to_string());

    format!(
        "{}\n\n\n👩‍💻 Author: {}\n🌏 IP: {}\n🕔 Time: {}\n🔗 Link: [open post]({})",
        floor.content, floor.author_name, floor.author_ip, time, floor.link
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use monitor_core::floor_link;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    /// Poll a condition until it holds, bailing out after a deadline far
    /// beyond anything a healthy loop needs.
    async fn wait_for(condition: impl Fn() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    fn floor(pid: u64, content: &str) -> LatestFloor {
        LatestFloor {
            pid,
            content: content.to_string(),
            author_id: 98765,
            author_name: "Someone".to_string(),
            author_ip: "上海".to_string(),
            created_at: 1714294800,
            link: floor_link(123, pid),
        }
    }

    fn config(keywords: Option<&str>) -> Config {
        Config {
            bduss: "test-bduss".to_string(),
            thread_id: 123,
            telegram_token: "123:abc".to_string(),
            telegram_chat_id: "42".to_string(),
            keywords: KeywordFilter::parse(keywords),
            poll_interval: Duration::from_secs(30),
        }
    }

    struct ScriptedSource {
        responses: Mutex<VecDeque<Result<Option<LatestFloor>, CoreError>>>,
    }

    impl ScriptedSource {
        fn new(
            responses: impl IntoIterator<Item = Result<Option<LatestFloor>, CoreError>>,
        ) -> Self {
            Self {
                responses: Mutex::new(responses.into_iter().collect()),
            }
        }
    }

    #[async_trait]
    impl FloorSource for ScriptedSource {
        async fn latest_floor(&self, _thread_id: u64) -> Result<Option<LatestFloor>, CoreError> {
            // Once the script runs out, behave like an empty thread.
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Ok(None))
        }
    }

    #[derive(Clone)]
    struct RecordingNotifier {
        sent: Arc<Mutex<Vec<String>>>,
        fail: bool,
    }

    impl RecordingNotifier {
        fn new() -> Self {
            Self {
                sent: Arc::new(Mutex::new(Vec::new())),
                fail: false,
            }
        }

        fn failing() -> Self {
            Self {
                sent: Arc::new(Mutex::new(Vec::new())),
                fail: true,
            }
        }

        fn sent(&self) -> Vec<String> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn send(&self, text: &str) -> Result<(), CoreError> {
            if self.fail {
                return Err(CoreError::Internal {
                    message: "notifier down".to_string(),
                });
            }
            self.sent.lock().unwrap().push(text.to_string());
            Ok(())
        }
    }

    #[tokio::test]
    async fn notifies_once_per_new_floor() {
        let source = ScriptedSource::new([
            Ok(Some(floor(100, "hello"))),
            Ok(Some(floor(100, "hello"))),
            Ok(Some(floor(101, "world"))),
        ]);
        let notifier = RecordingNotifier::new();
        let mut monitor = ThreadMonitor::new(source, notifier.clone(), &config(None));

        assert_eq!(
            monitor.poll_once().await.unwrap(),
            PollOutcome::New {
                pid: 100,
                notified: true
            }
        );
        assert_eq!(monitor.last_seen_pid(), Some(100));

        assert_eq!(monitor.poll_once().await.unwrap(), PollOutcome::Unchanged);
        assert_eq!(monitor.last_seen_pid(), Some(100));

        assert_eq!(
            monitor.poll_once().await.unwrap(),
            PollOutcome::New {
                pid: 101,
                notified: true
            }
        );
        assert_eq!(monitor.last_seen_pid(), Some(101));

        let sent = notifier.sent();
        assert_eq!(sent.len(), 2);
        assert!(sent[0].contains("hello"));
        assert!(sent[1].contains("world"));
    }

    #[tokio::test]
    async fn not_found_leaves_state_untouched() {
        let source = ScriptedSource::new([Ok(Some(floor(100, "hello"))), Ok(None)]);
        let notifier = RecordingNotifier::new();
        let mut monitor = ThreadMonitor::new(source, notifier.clone(), &config(None));

        monitor.poll_once().await.unwrap();
        assert_eq!(monitor.poll_once().await.unwrap(), PollOutcome::NotFound);
        assert_eq!(monitor.last_seen_pid(), Some(100));
        assert_eq!(notifier.sent().len(), 1);
    }

    #[tokio::test]
    async fn source_errors_propagate_without_state_change() {
        let source = ScriptedSource::new([Err(CoreError::Internal {
            message: "boom".to_string(),
        })]);
        let notifier = RecordingNotifier::new();
        let mut monitor = ThreadMonitor::new(source, notifier.clone(), &config(None));

        assert!(monitor.poll_once().await.is_err());
        assert_eq!(monitor.last_seen_pid(), None);
        assert!(notifier.sent().is_empty());
    }

    #[tokio::test]
    async fn keyword_filter_suppresses_non_matching_floors() {
        let source = ScriptedSource::new([
            Ok(Some(floor(100, "nothing interesting"))),
            Ok(Some(floor(101, "the alpha release is out"))),
        ]);
        let notifier = RecordingNotifier::new();
        let mut monitor = ThreadMonitor::new(source, notifier.clone(), &config(Some("alpha")));

        assert_eq!(
            monitor.poll_once().await.unwrap(),
            PollOutcome::New {
                pid: 100,
                notified: false
            }
        );
        // The pid is still recorded; a suppressed floor is not revisited.
        assert_eq!(monitor.last_seen_pid(), Some(100));
        assert!(notifier.sent().is_empty());

        assert_eq!(
            monitor.poll_once().await.unwrap(),
            PollOutcome::New {
                pid: 101,
                notified: true
            }
        );
        assert_eq!(notifier.sent().len(), 1);
    }

    #[tokio::test]
    async fn notifier_failure_does_not_fail_the_poll() {
        let source = ScriptedSource::new([Ok(Some(floor(100, "hello")))]);
        let notifier = RecordingNotifier::failing();
        let mut monitor = ThreadMonitor::new(source, notifier, &config(None));

        let outcome = monitor.poll_once().await.unwrap();
        assert_eq!(
            outcome,
            PollOutcome::New {
                pid: 100,
                notified: true
            }
        );
        // No redelivery attempt for this pid on later cycles.
        assert_eq!(monitor.last_seen_pid(), Some(100));
    }

    #[tokio::test]
    async fn run_exits_when_already_cancelled() {
        let source = ScriptedSource::new([Ok(Some(floor(100, "hello")))]);
        let notifier = RecordingNotifier::new();
        let mut monitor = ThreadMonitor::new(source, notifier.clone(), &config(None));

        let cancel = CancellationToken::new();
        cancel.cancel();
        monitor.run(cancel).await;

        assert_eq!(monitor.last_seen_pid(), None);
        assert!(notifier.sent().is_empty());
    }

    #[tokio::test]
    async fn run_polls_until_cancelled() {
        let source = ScriptedSource::new([
            Ok(Some(floor(100, "hello"))),
            Ok(Some(floor(100, "hello"))),
            Ok(Some(floor(101, "world"))),
        ]);
        let notifier = RecordingNotifier::new();
        let mut monitor = ThreadMonitor::new(source, notifier.clone(), &{
            let mut c = config(None);
            c.poll_interval = Duration::from_millis(5);
            c
        });

        let cancel = CancellationToken::new();
        let loop_cancel = cancel.clone();
        let handle = tokio::spawn(async move {
            monitor.run(loop_cancel).await;
            monitor
        });

        // Once the script runs out the source reports an empty thread, so
        // the second notification is the loop's final observable step.
        wait_for(|| notifier.sent().len() == 2).await;
        cancel.cancel();
        let monitor = handle.await.unwrap();

        assert_eq!(monitor.last_seen_pid(), Some(101));
        assert_eq!(notifier.sent().len(), 2);
    }

    #[tokio::test]
    async fn errors_inside_run_do_not_stop_the_loop() {
        let source = ScriptedSource::new([
            Err(CoreError::Internal {
                message: "boom".to_string(),
            }),
            Ok(Some(floor(100, "hello"))),
        ]);
        let notifier = RecordingNotifier::new();
        let mut monitor = ThreadMonitor::new(source, notifier.clone(), &{
            let mut c = config(None);
            c.poll_interval = Duration::from_millis(5);
            c
        });

        let cancel = CancellationToken::new();
        let loop_cancel = cancel.clone();
        let handle = tokio::spawn(async move {
            monitor.run(loop_cancel).await;
            monitor
        });

        wait_for(|| !notifier.sent().is_empty()).await;
        cancel.cancel();
        let monitor = handle.await.unwrap();

        // The failed first cycle was logged and skipped, the second one
        // went through.
        assert_eq!(monitor.last_seen_pid(), Some(100));
        assert_eq!(notifier.sent().len(), 1);
    }

    #[tokio::test]
    async fn notify_once_sends_without_filtering() {
        let source = ScriptedSource::new([Ok(Some(floor(100, "hello")))]);
        let notifier = RecordingNotifier::new();

        assert!(notify_once(&source, &notifier, 123).await.unwrap());
        assert_eq!(notifier.sent().len(), 1);

        let empty = ScriptedSource::new([Ok(None)]);
        assert!(!notify_once(&empty, &notifier, 123).await.unwrap());
        assert_eq!(notifier.sent().len(), 1);
    }

    #[test]
    fn message_contains_floor_fields() {
        let message = format_message(&floor(456, "hello world"));
        assert!(message.starts_with("hello world\n\n\n"));
        assert!(message.contains("Someone"));
        assert!(message.contains("上海"));
        assert!(message.contains("[open post](https://tieba.baidu.com/p/123?pid=456&cid=0#456)"));
    }
}
