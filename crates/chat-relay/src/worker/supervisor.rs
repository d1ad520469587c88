use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::backoff::{Backoff, BackoffPolicy};
use super::dashboard::DashboardLauncher;
use crate::client::{ChatClient, ChatConnector, ClientError};
use crate::database::PersistenceSink;
use crate::models::chat::ReplyOutcome;
use crate::services::{MessageIngestor, ReplyDispatcher};
use crate::utils::error::RelayError;

/// Counters for one poll → dispatch → send → record cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub received: usize,
    pub replies: usize,
    pub delivered: usize,
    pub recorded: usize,
}

enum LoopState {
    Disconnected,
    Connecting { attempt: u32 },
    Connected(Arc<dyn ChatClient>),
    Polling(Arc<dyn ChatClient>),
    CoolingDown,
    Recovering,
}

impl LoopState {
    fn name(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting { .. } => "connecting",
            Self::Connected(_) => "connected",
            Self::Polling(_) => "polling",
            Self::CoolingDown => "cooling_down",
            Self::Recovering => "recovering",
        }
    }
}

/// Keeps the relay pipeline alive: connects with retry/backoff, then polls,
/// dispatches and sends until the connection breaks, then starts over.
pub struct ResilientLoop {
    connector: Arc<dyn ChatConnector>,
    ingestor: MessageIngestor,
    dispatcher: ReplyDispatcher,
    sink: Arc<dyn PersistenceSink>,
    policy: BackoffPolicy,
    listen_list: Vec<String>,
    poll_interval: Duration,
    dashboard: Option<DashboardLauncher>,
}

impl ResilientLoop {
    pub fn new(
        connector: Arc<dyn ChatConnector>,
        ingestor: MessageIngestor,
        dispatcher: ReplyDispatcher,
        sink: Arc<dyn PersistenceSink>,
        policy: BackoffPolicy,
        listen_list: Vec<String>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            connector,
            ingestor,
            dispatcher,
            sink,
            policy,
            listen_list,
            poll_interval,
            dashboard: None,
        }
    }

    pub fn with_dashboard(mut self, dashboard: DashboardLauncher) -> Self {
        self.dashboard = Some(dashboard);
        self
    }

    /// Run until `shutdown` resolves. Every other fault is absorbed.
    pub async fn run<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        info!("🎯 Relay loop started");

        tokio::select! {
            _ = self.supervise() => {}
            _ = shutdown => {
                info!("Received shutdown signal");
            }
        }

        info!("Relay loop stopped");
    }

    async fn supervise(&self) {
        let mut state = LoopState::Disconnected;
        loop {
            debug!("Supervisor state: {}", state.name());
            state = self.step(state).await;
        }
    }

    async fn step(&self, state: LoopState) -> LoopState {
        match state {
            LoopState::Disconnected => LoopState::Connecting { attempt: 1 },

            LoopState::Connecting { attempt } => match self.establish().await {
                Ok(client) => {
                    info!("✅ Chat client connected");
                    LoopState::Connected(client)
                }
                Err(e) => {
                    warn!(
                        "Login attempt {}/{} failed: {}",
                        attempt, self.policy.max_attempts, e
                    );
                    match self.policy.after_failure(attempt) {
                        Backoff::Retry { next_attempt, delay } => {
                            tokio::time::sleep(delay).await;
                            LoopState::Connecting {
                                attempt: next_attempt,
                            }
                        }
                        Backoff::CoolDown(pause) => {
                            error!(
                                "{} consecutive login failures, retrying in {:?}",
                                attempt, pause
                            );
                            LoopState::CoolingDown
                        }
                    }
                }
            },

            LoopState::CoolingDown => {
                tokio::time::sleep(self.policy.cool_down).await;
                LoopState::Disconnected
            }

            LoopState::Connected(client) => match self.register_listeners(client.as_ref()).await {
                Ok(()) => {
                    if let Some(dashboard) = &self.dashboard {
                        if dashboard.launch_once() {
                            info!("Dashboard will open at {}", dashboard.url());
                        }
                    }
                    LoopState::Polling(client)
                }
                Err(e) => {
                    error!("Failed to register listeners: {}", e);
                    LoopState::Recovering
                }
            },

            LoopState::Polling(client) => {
                match AssertUnwindSafe(self.message_layer(client.as_ref()))
                    .catch_unwind()
                    .await
                {
                    Ok(e) => error!("Message loop aborted: {}", e),
                    Err(_) => error!("Message loop panicked"),
                }
                LoopState::Recovering
            }

            LoopState::Recovering => {
                info!("Resuming in {:?}...", self.policy.recovery_pause);
                tokio::time::sleep(self.policy.recovery_pause).await;
                LoopState::Disconnected
            }
        }
    }

    /// Connect and check that the client sees at least one session
    async fn establish(&self) -> Result<Arc<dyn ChatClient>, RelayError> {
        let client = self.connector.connect().await?;

        if !client.list_sessions().await? {
            return Err(ClientError::Rejected("no chat sessions available".to_string()).into());
        }

        Ok(client)
    }

    async fn register_listeners(&self, client: &dyn ChatClient) -> Result<(), RelayError> {
        for who in &self.listen_list {
            client.add_listener(who).await?;
            info!("👂 Listening to {}", who);
        }
        Ok(())
    }

    /// Poll forever; returns only the fault that ended the session.
    async fn message_layer(&self, client: &dyn ChatClient) -> RelayError {
        loop {
            match self.run_cycle(client).await {
                Ok(report) if report.received > 0 => info!(
                    "Cycle done: received={}, replies={}, delivered={}, recorded={}",
                    report.received, report.replies, report.delivered, report.recorded
                ),
                Ok(_) => {}
                Err(e) if e.is_connection_lost() => return e,
                Err(e) => error!("Message cycle failed: {}", e),
            }

            tokio::time::sleep(self.poll_interval).await;
        }
    }

    pub async fn run_cycle(&self, client: &dyn ChatClient) -> Result<CycleReport, RelayError> {
        let messages = self.ingestor.poll(client).await?;

        let mut report = CycleReport {
            received: messages.len(),
            ..CycleReport::default()
        };
        if messages.is_empty() {
            return Ok(report);
        }

        let outcomes = self.dispatcher.dispatch(&messages).await;
        report.replies = outcomes.len();

        for outcome in &outcomes {
            if let Err(e) = client
                .send_message(&outcome.reply_text, &outcome.conversation_id)
                .await
            {
                error!("Failed to send reply to {}: {}", outcome.conversation_id, e);
                continue;
            }
            report.delivered += 1;

            if self.save(outcome).await {
                report.recorded += 1;
            }
        }

        Ok(report)
    }

    async fn save(&self, outcome: &ReplyOutcome) -> bool {
        let result = self
            .sink
            .record(
                &outcome.conversation_id,
                &outcome.conversation_id,
                &outcome.originating.content,
                &outcome.reply_text,
            )
            .await;

        match result {
            Ok(id) => {
                debug!("Saved exchange {} for {}", id, outcome.conversation_id);
                true
            }
            Err(e) => {
                error!("Failed to save message for {}: {}", outcome.conversation_id, e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{RawConversation, RawRecord, RawSnapshot};
    use crate::config::PromptsConfig;
    use crate::models::chat::ChatTurn;
    use crate::services::dispatcher::MockLlmProvider;
    use crate::services::{ContextStore, LlmProvider};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tokio::time::Instant;

    const SENTINEL: &str = "new messages follow";

    #[derive(Default)]
    struct FakeClient {
        polls: Mutex<VecDeque<Result<RawSnapshot, ClientError>>>,
        listeners: Mutex<Vec<String>>,
        sent: Mutex<Vec<(String, String)>>,
        failing_sends: Vec<String>,
    }

    impl FakeClient {
        fn with_polls(polls: Vec<Result<RawSnapshot, ClientError>>) -> Self {
            Self {
                polls: Mutex::new(polls.into()),
                ..Self::default()
            }
        }

        fn sent(&self) -> Vec<(String, String)> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ChatClient for FakeClient {
        async fn list_sessions(&self) -> Result<bool, ClientError> {
            Ok(true)
        }

        async fn add_listener(&self, conversation_id: &str) -> Result<(), ClientError> {
            self.listeners.lock().unwrap().push(conversation_id.to_string());
            Ok(())
        }

        async fn poll_new_messages(&self) -> Result<RawSnapshot, ClientError> {
            self.polls
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(RawSnapshot::default()))
        }

        async fn send_message(&self, text: &str, conversation_id: &str) -> Result<(), ClientError> {
            if self.failing_sends.iter().any(|who| who == conversation_id) {
                return Err(ClientError::Rejected("chat window not found".into()));
            }
            self.sent
                .lock()
                .unwrap()
                .push((conversation_id.to_string(), text.to_string()));
            Ok(())
        }
    }

    /// Fails the first `failures` attempts, then hands out `client`.
    struct FakeConnector {
        client: Arc<FakeClient>,
        failures: usize,
        attempts: Mutex<Vec<Instant>>,
    }

    impl FakeConnector {
        fn new(client: Arc<FakeClient>, failures: usize) -> Self {
            Self {
                client,
                failures,
                attempts: Mutex::new(Vec::new()),
            }
        }

        fn offsets(&self, start: Instant) -> Vec<Duration> {
            self.attempts
                .lock()
                .unwrap()
                .iter()
                .map(|at| at.duration_since(start))
                .collect()
        }
    }

    #[async_trait]
    impl ChatConnector for FakeConnector {
        async fn connect(&self) -> Result<Arc<dyn ChatClient>, ClientError> {
            let mut attempts = self.attempts.lock().unwrap();
            attempts.push(Instant::now());
            if attempts.len() <= self.failures {
                return Err(ClientError::Disconnected("chat client not running".into()));
            }
            Ok(self.client.clone())
        }
    }

    struct PanickingLlm;

    #[async_trait]
    impl LlmProvider for PanickingLlm {
        async fn complete(&self, _system_prompt: &str, _turns: &[ChatTurn]) -> Result<String, RelayError> {
            panic!("backend client bug");
        }
    }

    #[derive(Default)]
    struct FakeSink {
        records: Mutex<Vec<(String, String, String)>>,
        fail: bool,
    }

    #[async_trait]
    impl PersistenceSink for FakeSink {
        async fn record(
            &self,
            conversation_id: &str,
            _display_name: &str,
            original_message: &str,
            reply_text: &str,
        ) -> anyhow::Result<i64> {
            if self.fail {
                anyhow::bail!("database is locked");
            }
            let mut records = self.records.lock().unwrap();
            records.push((
                conversation_id.to_string(),
                original_message.to_string(),
                reply_text.to_string(),
            ));
            Ok(records.len() as i64)
        }
    }

    fn unread(who: &str, messages: &[&str]) -> RawSnapshot {
        let mut records = vec![
            RawRecord::new(who, "already answered", "friend"),
            RawRecord::new("SYS", SENTINEL, "sys"),
        ];
        records.extend(messages.iter().map(|m| RawRecord::new(who, *m, "friend")));
        RawSnapshot {
            conversations: vec![RawConversation {
                who: who.to_string(),
                messages: records,
            }],
        }
    }

    fn relay(
        connector: Arc<FakeConnector>,
        llm: impl LlmProvider + 'static,
        sink: Arc<FakeSink>,
    ) -> (ResilientLoop, Arc<ContextStore>) {
        let store = Arc::new(ContextStore::new(5));
        let dispatcher = ReplyDispatcher::new(store.clone(), Arc::new(llm), PromptsConfig::default(), 5);
        let relay = ResilientLoop::new(
            connector,
            MessageIngestor::new(SENTINEL),
            dispatcher,
            sink,
            BackoffPolicy::default(),
            vec!["Alice".to_string()],
            Duration::from_secs(1),
        );
        (relay, store)
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_backoff_schedule() {
        let connector = Arc::new(FakeConnector::new(Arc::new(FakeClient::default()), usize::MAX));
        let mut llm = MockLlmProvider::new();
        llm.expect_complete().never();
        let (relay, _) = relay(connector.clone(), llm, Arc::new(FakeSink::default()));

        let start = Instant::now();
        let _ = tokio::time::timeout(Duration::from_secs(311), relay.run(std::future::pending())).await;

        assert_eq!(
            connector.offsets(start),
            vec![
                Duration::from_secs(0),
                Duration::from_secs(5),
                Duration::from_secs(10),
                Duration::from_secs(310),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_end_to_end_reply() {
        let client = Arc::new(FakeClient::with_polls(vec![Ok(unread("Alice", &["hello"]))]));
        let connector = Arc::new(FakeConnector::new(client.clone(), 0));
        let mut llm = MockLlmProvider::new();
        llm.expect_complete()
            .times(1)
            .returning(|_, _| Ok("hi Alice".to_string()));
        let sink = Arc::new(FakeSink::default());
        let (relay, store) = relay(connector, llm, sink.clone());

        let _ = tokio::time::timeout(Duration::from_millis(2500), relay.run(std::future::pending())).await;

        assert_eq!(*client.listeners.lock().unwrap(), vec!["Alice".to_string()]);
        assert_eq!(
            store.snapshot("Alice", 5).await,
            vec![ChatTurn::user("hello"), ChatTurn::assistant("hi Alice")]
        );
        assert_eq!(client.sent(), vec![("Alice".to_string(), "hi Alice".to_string())]);
        assert_eq!(
            *sink.records.lock().unwrap(),
            vec![("Alice".to_string(), "hello".to_string(), "hi Alice".to_string())]
        );
    }

    #[tokio::test]
    async fn test_cycle_absorbs_send_and_persistence_faults() {
        let client = Arc::new(FakeClient {
            failing_sends: vec!["Bob".to_string()],
            ..FakeClient::default()
        });
        let connector = Arc::new(FakeConnector::new(client.clone(), 0));
        let mut llm = MockLlmProvider::new();
        llm.expect_complete()
            .times(2)
            .returning(|system, _| Ok(format!("re: {}", system)));
        let sink = Arc::new(FakeSink {
            fail: true,
            ..FakeSink::default()
        });
        let (relay, _) = relay(connector, llm, sink);

        let mut snapshot = unread("Alice", &["hello"]);
        snapshot.conversations.extend(unread("Bob", &["yo"]).conversations);
        *client.polls.lock().unwrap() = VecDeque::from(vec![Ok(snapshot)]);

        let report = relay.run_cycle(client.as_ref()).await.unwrap();
        assert_eq!(
            report,
            CycleReport {
                received: 2,
                replies: 2,
                delivered: 1,
                recorded: 0,
            }
        );
        assert_eq!(client.sent().len(), 1);
        assert_eq!(client.sent()[0].0, "Alice");
    }

    #[tokio::test]
    async fn test_cycle_treats_read_fault_as_empty() {
        let client = Arc::new(FakeClient::with_polls(vec![Err(ClientError::Malformed(
            "truncated".into(),
        ))]));
        let connector = Arc::new(FakeConnector::new(client.clone(), 0));
        let mut llm = MockLlmProvider::new();
        llm.expect_complete().never();
        let (relay, _) = relay(connector, llm, Arc::new(FakeSink::default()));

        let report = relay.run_cycle(client.as_ref()).await.unwrap();
        assert_eq!(report, CycleReport::default());
    }

    #[tokio::test(start_paused = true)]
    async fn test_lost_connection_recovers_after_pause() {
        let client = Arc::new(FakeClient::with_polls(vec![
            Ok(RawSnapshot::default()),
            Err(ClientError::Disconnected("chat window closed".into())),
        ]));
        let connector = Arc::new(FakeConnector::new(client.clone(), 0));
        let mut llm = MockLlmProvider::new();
        llm.expect_complete().never();
        let (relay, _) = relay(connector.clone(), llm, Arc::new(FakeSink::default()));

        let start = Instant::now();
        let _ = tokio::time::timeout(Duration::from_secs(15), relay.run(std::future::pending())).await;

        // Second poll at t=1s fails, 10s recovery pause, reconnect at t=11s
        assert_eq!(
            connector.offsets(start),
            vec![Duration::from_secs(0), Duration::from_secs(11)]
        );
        assert_eq!(client.listeners.lock().unwrap().len(), 2);
    }

    static DASHBOARD_OPENS: Mutex<Vec<Instant>> = Mutex::new(Vec::new());

    fn record_dashboard_open(_url: &str) -> std::io::Result<()> {
        DASHBOARD_OPENS.lock().unwrap().push(Instant::now());
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_dashboard_opens_once_after_first_connection() {
        let client = Arc::new(FakeClient::with_polls(vec![
            Ok(RawSnapshot::default()),
            Err(ClientError::Disconnected("chat window closed".into())),
        ]));
        let connector = Arc::new(FakeConnector::new(client.clone(), 1));
        let mut llm = MockLlmProvider::new();
        llm.expect_complete().never();
        let (relay, _) = relay(connector.clone(), llm, Arc::new(FakeSink::default()));
        let relay = relay.with_dashboard(
            DashboardLauncher::new("http://127.0.0.1:5000", Duration::from_secs(2))
                .with_opener(record_dashboard_open),
        );

        let start = Instant::now();
        let _ = tokio::time::timeout(Duration::from_secs(20), relay.run(std::future::pending())).await;

        // Failed attempt at 0s, connected at 5s, lost at 6s, reconnected at 16s
        assert_eq!(
            connector.offsets(start),
            vec![
                Duration::from_secs(0),
                Duration::from_secs(5),
                Duration::from_secs(16)
            ]
        );
        let opens: Vec<Duration> = DASHBOARD_OPENS
            .lock()
            .unwrap()
            .iter()
            .map(|at| at.duration_since(start))
            .collect();
        assert_eq!(opens, vec![Duration::from_secs(7)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_panic_in_cycle_is_contained() {
        let client = Arc::new(FakeClient::with_polls(vec![Ok(unread("Alice", &["boom"]))]));
        let connector = Arc::new(FakeConnector::new(client.clone(), 0));
        let (relay, store) = relay(connector.clone(), PanickingLlm, Arc::new(FakeSink::default()));

        let start = Instant::now();
        let _ = tokio::time::timeout(Duration::from_secs(12), relay.run(std::future::pending())).await;

        assert_eq!(
            connector.offsets(start),
            vec![Duration::from_secs(0), Duration::from_secs(10)]
        );
        // The lock was released by the unwinding batch
        assert_eq!(store.snapshot("Alice", 5).await, vec![ChatTurn::user("boom")]);
    }

    #[tokio::test]
    async fn test_shutdown_stops_loop() {
        let connector = Arc::new(FakeConnector::new(Arc::new(FakeClient::default()), 0));
        let mut llm = MockLlmProvider::new();
        llm.expect_complete().never();
        let (relay, _) = relay(connector, llm, Arc::new(FakeSink::default()));

        relay.run(async {}).await;
    }
}
