// Application orchestration layer.
//
// Owns the shopping-list session, receives events from the WebSocket server
// and from background tasks, and pushes replies back to the client.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use voicecart_core::config::Config;
use voicecart_core::error::VoiceError;
use voicecart_core::protocol::{ClientMessage, ServerMessage};
use voicecart_core::services::{
    needs_translation, primary_language, IntentExtractor, RecommendationService, Translator,
};
use voicecart_core::shopping::{
    reconcile, HistoryRecord, ListState, ListView, MirrorOp, ParsedCommand, Status, StatusLevel,
};
use voicecart_core::store::{apply_mirror_op, HistoryMirror, RemoteListStore};
use voicecart_core::ws_server::WsEvent;

// ---------------------------------------------------------------------------
// Wiring
// ---------------------------------------------------------------------------

/// The external services a session talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub extractor: Arc<dyn IntentExtractor>,
    pub recommender: Arc<dyn RecommendationService>,
    /// `None` disables translation entirely.
    pub translator: Option<Arc<dyn Translator>>,
    pub list_store: Arc<dyn RemoteListStore>,
    pub history: Arc<dyn HistoryMirror>,
}

#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Bound on every remote call made on behalf of a command.
    pub request_timeout: Duration,
    pub translate_replies: bool,
    pub recommendations_enabled: bool,
    pub refresh_after_change: bool,
}

impl SessionSettings {
    pub fn from_config(config: &Config) -> Self {
        SessionSettings {
            request_timeout: Duration::from_secs(config.llm.request_timeout_secs),
            translate_replies: config.translation.enabled && config.translation.translate_replies,
            recommendations_enabled: config.recommendations.enabled,
            refresh_after_change: config.recommendations.refresh_after_change,
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        SessionSettings {
            request_timeout: Duration::from_secs(20),
            translate_replies: false,
            recommendations_enabled: true,
            refresh_after_change: true,
        }
    }
}

/// Results delivered back to the event loop by background tasks.
#[derive(Debug, Clone, PartialEq)]
pub enum BackgroundEvent {
    /// The mirror writes of a list change have been attempted and the
    /// history may have grown.
    MirrorSettled,
    Recommendations { generation: u64, items: Vec<String> },
}

/// Work queued for the mirror writer. Jobs run strictly in order, so a set
/// followed by a delete of the same key lands in that order.
enum MirrorJob {
    Write {
        op: Option<MirrorOp>,
        record: Option<HistoryRecord>,
        notify: bool,
    },
    Barrier(oneshot::Sender<()>),
}

// ---------------------------------------------------------------------------
// AppState
// ---------------------------------------------------------------------------

pub struct AppState {
    pub list: ListState,
    pub view: ListView,
    /// Latest suggestions, sent to every newly connected client.
    pub recommendations: Vec<String>,
    /// Monotonically increasing counter identifying the current
    /// recommendation refresh. Results from older generations are dropped in
    /// `handle_background`.
    pub recommendation_generation: u64,
    pub settings: SessionSettings,
    collaborators: Collaborators,
    background_tx: mpsc::Sender<BackgroundEvent>,
    current_recommendation_task: Option<JoinHandle<()>>,
    mirror_tx: Option<mpsc::UnboundedSender<MirrorJob>>,
    mirror_worker: Option<JoinHandle<()>>,
}

impl AppState {
    /// Create an empty session and start its mirror writer. Must be called
    /// from within a Tokio runtime.
    pub fn new(
        settings: SessionSettings,
        collaborators: Collaborators,
        background_tx: mpsc::Sender<BackgroundEvent>,
    ) -> Self {
        let (mirror_tx, mirror_rx) = mpsc::unbounded_channel();
        let mirror_worker = tokio::spawn(run_mirror_writer(
            mirror_rx,
            Arc::clone(&collaborators.list_store),
            Arc::clone(&collaborators.history),
            settings.request_timeout,
            background_tx.clone(),
        ));

        AppState {
            list: ListState::new(),
            view: ListView::Full,
            recommendations: Vec::new(),
            recommendation_generation: 0,
            settings,
            collaborators,
            background_tx,
            current_recommendation_task: None,
            mirror_tx: Some(mirror_tx),
            mirror_worker: Some(mirror_worker),
        }
    }

    /// Replace the list with the contents of the remote mirror. Returns the
    /// number of entries after merging.
    pub async fn hydrate(&mut self) -> anyhow::Result<usize> {
        let entries = self
            .collaborators
            .list_store
            .list_all()
            .await
            .context("failed to read list mirror")?;
        self.list = ListState::hydrate(entries);
        self.view = ListView::Full;
        Ok(self.list.len())
    }

    // -----------------------------------------------------------------------
    // Client messages
    // -----------------------------------------------------------------------

    /// Messages for a freshly connected client.
    pub fn on_connect(&self) -> Vec<ServerMessage> {
        vec![
            self.snapshot(),
            ServerMessage::Recommendations {
                items: self.recommendations.clone(),
            },
        ]
    }

    /// Dispatch one raw client frame. Unparseable frames are logged and
    /// produce no reply.
    pub async fn handle_client_message(&mut self, json: &str) -> Vec<ServerMessage> {
        let message = match ClientMessage::parse(json) {
            Ok(m) => m,
            Err(e) => {
                warn!("Ignoring unparseable client message: {} ({})", e, json);
                return Vec::new();
            }
        };

        match message {
            ClientMessage::VoiceCommand { text, lang } => {
                self.handle_voice_command(&text, lang.as_deref()).await
            }
            ClientMessage::RecognitionUnavailable { reason } => {
                let reason = if reason.trim().is_empty() {
                    "speech recognition is not supported by this client".to_string()
                } else {
                    reason
                };
                vec![error_status(VoiceError::RecognitionUnavailable(reason))]
            }
            ClientMessage::RequestSnapshot => vec![self.snapshot()],
            ClientMessage::RequestRecommendations => {
                self.refresh_recommendations();
                vec![ServerMessage::Recommendations {
                    items: self.recommendations.clone(),
                }]
            }
            ClientMessage::ClearSearch => {
                self.clear_search();
                vec![self.snapshot()]
            }
        }
    }

    /// Run the full pipeline for one transcript and return the replies:
    /// a status followed by a snapshot.
    pub async fn handle_voice_command(
        &mut self,
        text: &str,
        lang: Option<&str>,
    ) -> Vec<ServerMessage> {
        let text = text.trim();
        if text.is_empty() {
            return vec![error_status(VoiceError::RecognitionUnavailable(
                "no speech was recognized".into(),
            ))];
        }

        let english = self.to_english(text, lang).await;
        let command = self.extract(&english).await;
        let status = self.apply(command);

        let message = self.localize(status.to_string(), lang).await;
        vec![
            ServerMessage::Status {
                level: status.level(),
                message,
            },
            self.snapshot(),
        ]
    }

    /// Reconcile `command` into the session. The new state is in place before
    /// any mirror write is attempted.
    pub fn apply(&mut self, command: ParsedCommand) -> Status {
        let result = reconcile(std::mem::take(&mut self.list), command, Utc::now());
        self.list = result.state;
        if let Some(view) = result.view {
            self.view = view;
        }

        let notify = result.mirror.is_some()
            && self.settings.recommendations_enabled
            && self.settings.refresh_after_change;
        if result.mirror.is_some() || result.history.is_some() {
            self.enqueue_mirror(MirrorJob::Write {
                op: result.mirror,
                record: result.history,
                notify,
            });
        }

        info!(
            "{} ({} entries, ${:.2} total)",
            result.status,
            self.list.len(),
            self.list.total_price()
        );
        result.status
    }

    pub fn snapshot(&self) -> ServerMessage {
        ServerMessage::Snapshot {
            items: self.list.entries().to_vec(),
            view: self.view.clone(),
        }
    }

    pub fn clear_search(&mut self) {
        self.view = ListView::Full;
    }

    // -----------------------------------------------------------------------
    // Collaborator calls
    // -----------------------------------------------------------------------

    async fn to_english(&self, text: &str, lang: Option<&str>) -> String {
        if !needs_translation(lang) {
            return text.to_string();
        }
        let Some(translator) = &self.collaborators.translator else {
            return text.to_string();
        };
        let from = primary_language(lang);
        match tokio::time::timeout(
            self.settings.request_timeout,
            translator.translate(text, &from, "en"),
        )
        .await
        {
            Ok(Ok(translated)) => {
                debug!("Translated command from {}: {}", from, translated);
                translated
            }
            Ok(Err(e)) => {
                warn!("{}; using the original text", e);
                text.to_string()
            }
            Err(_) => {
                warn!("Translation from {} timed out; using the original text", from);
                text.to_string()
            }
        }
    }

    async fn extract(&self, text: &str) -> ParsedCommand {
        match tokio::time::timeout(
            self.settings.request_timeout,
            self.collaborators.extractor.extract(text),
        )
        .await
        {
            Ok(Ok(command)) => command,
            Ok(Err(e)) => {
                warn!("{}", e);
                ParsedCommand::Unrecognized
            }
            Err(_) => {
                warn!(
                    "{}",
                    VoiceError::ExtractionFailed(format!(
                        "no answer within {}s",
                        self.settings.request_timeout.as_secs()
                    ))
                );
                ParsedCommand::Unrecognized
            }
        }
    }

    /// Translate a reply back into the speaker's language when configured.
    async fn localize(&self, message: String, lang: Option<&str>) -> String {
        if !self.settings.translate_replies || !needs_translation(lang) {
            return message;
        }
        let Some(translator) = &self.collaborators.translator else {
            return message;
        };
        let to = primary_language(lang);
        match tokio::time::timeout(
            self.settings.request_timeout,
            translator.translate(&message, "en", &to),
        )
        .await
        {
            Ok(Ok(translated)) => translated,
            Ok(Err(e)) => {
                warn!("{}; replying in English", e);
                message
            }
            Err(_) => {
                warn!("Reply translation to {} timed out; replying in English", to);
                message
            }
        }
    }

    // -----------------------------------------------------------------------
    // Background work
    // -----------------------------------------------------------------------

    fn enqueue_mirror(&self, job: MirrorJob) {
        match &self.mirror_tx {
            Some(tx) => {
                if tx.send(job).is_err() {
                    warn!("Mirror writer has stopped; change kept locally only");
                }
            }
            None => warn!("Session is shutting down; change kept locally only"),
        }
    }

    /// Start a new recommendation refresh, cancelling any refresh still in
    /// flight.
    pub fn refresh_recommendations(&mut self) {
        if !self.settings.recommendations_enabled {
            return;
        }
        if let Some(handle) = self.current_recommendation_task.take() {
            handle.abort();
        }

        self.recommendation_generation += 1;
        let generation = self.recommendation_generation;
        let history = Arc::clone(&self.collaborators.history);
        let recommender = Arc::clone(&self.collaborators.recommender);
        let limit = self.settings.request_timeout;
        let tx = self.background_tx.clone();

        let handle = tokio::spawn(async move {
            let items = match tokio::time::timeout(
                limit,
                fetch_recommendations(history.as_ref(), recommender.as_ref()),
            )
            .await
            {
                Ok(Ok(items)) => items,
                Ok(Err(e)) => {
                    warn!("{}", e);
                    Vec::new()
                }
                Err(_) => {
                    warn!("Recommendation refresh (gen {}) timed out", generation);
                    Vec::new()
                }
            };
            let _ = tx
                .send(BackgroundEvent::Recommendations { generation, items })
                .await;
        });

        self.current_recommendation_task = Some(handle);
        debug!("Triggered recommendation refresh (gen {})", generation);
    }

    /// Fold a background result into the session. Returns the message to
    /// push to the client, if any.
    pub fn handle_background(&mut self, event: BackgroundEvent) -> Option<ServerMessage> {
        match event {
            BackgroundEvent::MirrorSettled => {
                if self.settings.refresh_after_change {
                    self.refresh_recommendations();
                }
                None
            }
            BackgroundEvent::Recommendations { generation, items } => {
                if generation != self.recommendation_generation {
                    debug!(
                        "Discarding stale recommendations (gen {}, current {})",
                        generation, self.recommendation_generation
                    );
                    return None;
                }
                self.current_recommendation_task = None;
                info!("Received {} recommendations", items.len());
                self.recommendations = items.clone();
                Some(ServerMessage::Recommendations { items })
            }
        }
    }

    /// Wait until every mirror write queued so far has been attempted.
    pub async fn settle(&self) {
        let Some(tx) = &self.mirror_tx else { return };
        let (done_tx, done_rx) = oneshot::channel();
        if tx.send(MirrorJob::Barrier(done_tx)).is_ok() {
            let _ = done_rx.await;
        }
    }

    /// Stop background work: pending mirror writes are flushed (bounded by
    /// the request timeout), an in-flight refresh is cancelled.
    pub async fn shutdown(&mut self) {
        if let Some(handle) = self.current_recommendation_task.take() {
            handle.abort();
        }
        self.mirror_tx = None;
        if let Some(worker) = self.mirror_worker.take() {
            let limit = self.settings.request_timeout;
            if tokio::time::timeout(limit, worker).await.is_err() {
                warn!("Pending mirror writes did not finish within {}s", limit.as_secs());
            }
        }
    }
}

fn error_status(err: VoiceError) -> ServerMessage {
    warn!("{}", err);
    ServerMessage::Status {
        level: StatusLevel::Error,
        message: err.to_string(),
    }
}

async fn fetch_recommendations(
    history: &dyn HistoryMirror,
    recommender: &dyn RecommendationService,
) -> Result<Vec<String>, VoiceError> {
    let records = history
        .list_all()
        .await
        .map_err(|e| VoiceError::RecommendationFailed(format!("failed to read history: {e}")))?;
    recommender.recommend(&records).await
}

/// Apply mirror jobs one at a time until the queue closes. Failures are
/// logged and never retried.
async fn run_mirror_writer(
    mut rx: mpsc::UnboundedReceiver<MirrorJob>,
    store: Arc<dyn RemoteListStore>,
    history: Arc<dyn HistoryMirror>,
    limit: Duration,
    background_tx: mpsc::Sender<BackgroundEvent>,
) {
    while let Some(job) = rx.recv().await {
        match job {
            MirrorJob::Write { op, record, notify } => {
                if let Some(op) = op {
                    let outcome =
                        tokio::time::timeout(limit, apply_mirror_op(store.as_ref(), &op)).await;
                    log_mirror_outcome(&format!("mirror write for '{}'", op.key()), outcome);
                }
                if let Some(record) = record {
                    let outcome = tokio::time::timeout(limit, history.append(&record)).await;
                    log_mirror_outcome(&format!("history append for '{}'", record.name), outcome);
                }
                if notify {
                    let _ = background_tx.send(BackgroundEvent::MirrorSettled).await;
                }
            }
            MirrorJob::Barrier(done) => {
                let _ = done.send(());
            }
        }
    }
    debug!("Mirror writer stopped");
}

fn log_mirror_outcome(
    what: &str,
    outcome: Result<anyhow::Result<()>, tokio::time::error::Elapsed>,
) {
    match outcome {
        Ok(Ok(())) => debug!("{} done", what),
        Ok(Err(e)) => warn!("{}", VoiceError::MirrorWriteFailed(format!("{what}: {e:#}"))),
        Err(_) => warn!("{}", VoiceError::MirrorWriteFailed(format!("{what}: timed out"))),
    }
}

// ---------------------------------------------------------------------------
// Event loop
// ---------------------------------------------------------------------------

/// Main event loop. Runs until the WebSocket event channel closes, then
/// flushes pending mirror writes.
pub async fn run(
    mut ws_rx: mpsc::Receiver<WsEvent>,
    mut background_rx: mpsc::Receiver<BackgroundEvent>,
    outbound: mpsc::Sender<String>,
    mut state: AppState,
) -> anyhow::Result<()> {
    info!("Application event loop started");
    let mut background_open = true;

    loop {
        tokio::select! {
            ws_event = ws_rx.recv() => {
                match ws_event {
                    Some(WsEvent::Connected { addr }) => {
                        info!("Client connected from {}", addr);
                        send_all(&outbound, state.on_connect());
                    }
                    Some(WsEvent::Disconnected) => {
                        info!("Client disconnected");
                    }
                    Some(WsEvent::Message(json)) => {
                        let replies = state.handle_client_message(&json).await;
                        send_all(&outbound, replies);
                    }
                    None => {
                        info!("WebSocket channel closed, shutting down");
                        break;
                    }
                }
            }
            event = background_rx.recv(), if background_open => {
                match event {
                    Some(event) => {
                        if let Some(message) = state.handle_background(event) {
                            send_all(&outbound, vec![message]);
                        }
                    }
                    None => {
                        background_open = false;
                    }
                }
            }
        }
    }

    state.shutdown().await;
    info!("Application event loop exited");
    Ok(())
}

/// Queue replies for the client without blocking the loop. Replies that do
/// not fit (no client draining the queue) are dropped.
fn send_all(outbound: &mpsc::Sender<String>, messages: Vec<ServerMessage>) {
    for message in messages {
        let json = match message.to_json() {
            Ok(json) => json,
            Err(e) => {
                warn!("Failed to serialize reply: {}", e);
                continue;
            }
        };
        if let Err(e) = outbound.try_send(json) {
            debug!("Dropping reply: {}", e);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use voicecart_core::db::Database;
    use voicecart_core::shopping::{AddCommand, ListEntry, RemoveCommand, SearchCommand};

    // -----------------------------------------------------------------------
    // Fakes
    // -----------------------------------------------------------------------

    /// Extractor answering from a fixed phrase table.
    struct TableExtractor(HashMap<String, ParsedCommand>);

    #[async_trait]
    impl IntentExtractor for TableExtractor {
        async fn extract(&self, text: &str) -> Result<ParsedCommand, VoiceError> {
            self.0
                .get(text)
                .cloned()
                .ok_or_else(|| VoiceError::ExtractionFailed(format!("unknown phrase {text:?}")))
        }
    }

    /// Suggests one line per history record.
    struct EchoRecommender;

    #[async_trait]
    impl RecommendationService for EchoRecommender {
        async fn recommend(&self, history: &[HistoryRecord]) -> Result<Vec<String>, VoiceError> {
            Ok(history.iter().map(|r| format!("More {}?", r.name)).collect())
        }
    }

    struct FailingRecommender;

    #[async_trait]
    impl RecommendationService for FailingRecommender {
        async fn recommend(&self, _: &[HistoryRecord]) -> Result<Vec<String>, VoiceError> {
            Err(VoiceError::RecommendationFailed("quota exceeded".into()))
        }
    }

    /// Translates from a fixed table; anything else fails.
    struct TableTranslator {
        table: HashMap<String, String>,
        calls: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl Translator for TableTranslator {
        async fn translate(&self, text: &str, from: &str, to: &str) -> Result<String, VoiceError> {
            self.calls
                .lock()
                .unwrap()
                .push((from.to_string(), to.to_string()));
            self.table
                .get(text)
                .cloned()
                .ok_or_else(|| VoiceError::TranslationFailed("no entry".into()))
        }
    }

    /// List store whose writes always fail.
    struct BrokenStore;

    #[async_trait]
    impl RemoteListStore for BrokenStore {
        async fn set(&self, _: &str, _: &ListEntry) -> anyhow::Result<()> {
            anyhow::bail!("connection refused")
        }
        async fn delete(&self, _: &str) -> anyhow::Result<()> {
            anyhow::bail!("connection refused")
        }
        async fn list_all(&self) -> anyhow::Result<Vec<ListEntry>> {
            anyhow::bail!("connection refused")
        }
    }

    fn phrases() -> HashMap<String, ParsedCommand> {
        HashMap::from([
            (
                "add 2 milk".to_string(),
                ParsedCommand::Add(
                    AddCommand::new("milk", 2)
                        .with_price(1.5)
                        .with_category("dairy"),
                ),
            ),
            (
                "add 3 milk".to_string(),
                ParsedCommand::Add(AddCommand::new("Milk", 3).with_price(1.5)),
            ),
            (
                "add 2 apples".to_string(),
                ParsedCommand::Add(AddCommand::new("apple", 2).with_price(0.5)),
            ),
            (
                "remove 5 milk".to_string(),
                ParsedCommand::Remove(RemoveCommand::new("milk", 5)),
            ),
            (
                "find milk".to_string(),
                ParsedCommand::Search(SearchCommand::new("milk")),
            ),
            ("what time is it".to_string(), ParsedCommand::Unrecognized),
        ])
    }

    fn collaborators(db: Arc<Database>) -> Collaborators {
        Collaborators {
            extractor: Arc::new(TableExtractor(phrases())),
            recommender: Arc::new(EchoRecommender),
            translator: None,
            list_store: db.clone(),
            history: db,
        }
    }

    fn test_state() -> (AppState, Arc<Database>, mpsc::Receiver<BackgroundEvent>) {
        let db = Arc::new(Database::open(":memory:").unwrap());
        let (bg_tx, bg_rx) = mpsc::channel(16);
        let state = AppState::new(SessionSettings::default(), collaborators(db.clone()), bg_tx);
        (state, db, bg_rx)
    }

    fn status_of(replies: &[ServerMessage]) -> (StatusLevel, String) {
        match &replies[0] {
            ServerMessage::Status { level, message } => (*level, message.clone()),
            other => panic!("expected Status first, got {other:?}"),
        }
    }

    // -----------------------------------------------------------------------
    // Tests: voice pipeline
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn add_replies_status_then_snapshot() {
        let (mut state, _db, _bg) = test_state();
        let replies = state.handle_voice_command("add 2 milk", None).await;

        assert_eq!(replies.len(), 2);
        assert_eq!(status_of(&replies), (StatusLevel::Info, "Added 2 milk(s)".into()));
        match &replies[1] {
            ServerMessage::Snapshot { items, view } => {
                assert_eq!(items.len(), 1);
                assert_eq!(items[0].quantity, 2);
                assert_eq!(*view, ListView::Full);
            }
            other => panic!("expected Snapshot, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn add_is_mirrored_and_recorded() {
        let (mut state, db, _bg) = test_state();
        state.handle_voice_command("add 2 milk", None).await;
        state.handle_voice_command("add 3 milk", None).await;
        state.settle().await;

        let mirrored = db.load_entries().unwrap();
        assert_eq!(mirrored.len(), 1);
        assert_eq!(mirrored[0].quantity, 5);
        assert_eq!(db.load_history().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn remove_to_zero_deletes_mirror_row_in_order() {
        let (mut state, db, _bg) = test_state();
        state.handle_voice_command("add 2 milk", None).await;
        state.handle_voice_command("remove 5 milk", None).await;
        state.settle().await;

        assert!(state.list.is_empty());
        assert!(db.load_entries().unwrap().is_empty());
        // Removes are never recorded in history.
        assert_eq!(db.load_history().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn empty_transcript_is_recognition_error() {
        let (mut state, _db, _bg) = test_state();
        let replies = state.handle_voice_command("   ", None).await;
        assert_eq!(replies.len(), 1);
        let (level, message) = status_of(&replies);
        assert_eq!(level, StatusLevel::Error);
        assert!(message.starts_with("Voice recognition unavailable"));
    }

    #[tokio::test]
    async fn extraction_failure_degrades_to_not_a_shopping_command() {
        let (mut state, _db, _bg) = test_state();
        let replies = state.handle_voice_command("sing me a song", None).await;
        assert_eq!(
            status_of(&replies),
            (StatusLevel::Warning, "Not a shopping command.".into())
        );
        assert!(state.list.is_empty());
    }

    #[tokio::test]
    async fn slow_extractor_times_out_to_unrecognized() {
        struct Sleepy;
        #[async_trait]
        impl IntentExtractor for Sleepy {
            async fn extract(&self, _: &str) -> Result<ParsedCommand, VoiceError> {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(ParsedCommand::Add(AddCommand::new("late", 1)))
            }
        }

        let db = Arc::new(Database::open(":memory:").unwrap());
        let (bg_tx, _bg_rx) = mpsc::channel(16);
        let mut collab = collaborators(db);
        collab.extractor = Arc::new(Sleepy);
        let settings = SessionSettings {
            request_timeout: Duration::from_millis(20),
            ..SessionSettings::default()
        };
        let mut state = AppState::new(settings, collab, bg_tx);

        let replies = state.handle_voice_command("add late", None).await;
        assert_eq!(status_of(&replies).1, "Not a shopping command.");
        assert!(state.list.is_empty());
    }

    #[tokio::test]
    async fn search_sets_view_and_clear_restores_full() {
        let (mut state, _db, _bg) = test_state();
        state.handle_voice_command("add 2 milk", None).await;
        state.handle_voice_command("add 2 apples", None).await;

        let replies = state.handle_voice_command("find milk", None).await;
        assert_eq!(
            status_of(&replies).1,
            "Found 1 item(s) matching \"milk\""
        );
        match &state.view {
            ListView::Search { term, matches } => {
                assert_eq!(term, "milk");
                assert_eq!(matches.len(), 1);
            }
            other => panic!("expected search view, got {other:?}"),
        }

        // An unrecognized command keeps the search view.
        state.handle_voice_command("what time is it", None).await;
        assert!(matches!(state.view, ListView::Search { .. }));

        let replies = state.handle_client_message(r#"{"type":"CLEAR_SEARCH"}"#).await;
        assert_eq!(state.view, ListView::Full);
        assert!(matches!(&replies[0], ServerMessage::Snapshot { view: ListView::Full, .. }));
    }

    #[tokio::test]
    async fn mirror_failure_keeps_local_state() {
        let db = Arc::new(Database::open(":memory:").unwrap());
        let (bg_tx, _bg_rx) = mpsc::channel(16);
        let mut collab = collaborators(db);
        collab.list_store = Arc::new(BrokenStore);
        let mut state = AppState::new(SessionSettings::default(), collab, bg_tx);

        let replies = state.handle_voice_command("add 2 milk", None).await;
        state.settle().await;
        assert_eq!(status_of(&replies).0, StatusLevel::Info);
        assert_eq!(state.list.get("milk").unwrap().quantity, 2);
    }

    // -----------------------------------------------------------------------
    // Tests: translation
    // -----------------------------------------------------------------------

    fn translating_state(
        translate_replies: bool,
    ) -> (AppState, Arc<TableTranslator>, mpsc::Receiver<BackgroundEvent>) {
        let db = Arc::new(Database::open(":memory:").unwrap());
        let (bg_tx, bg_rx) = mpsc::channel(16);
        let translator = Arc::new(TableTranslator {
            table: HashMap::from([
                ("दो दूध जोड़ो".to_string(), "add 2 milk".to_string()),
                ("Added 2 milk(s)".to_string(), "2 दूध जोड़ा गया".to_string()),
            ]),
            calls: Mutex::new(Vec::new()),
        });
        let mut collab = collaborators(db);
        collab.translator = Some(translator.clone());
        let settings = SessionSettings {
            translate_replies,
            ..SessionSettings::default()
        };
        (AppState::new(settings, collab, bg_tx), translator, bg_rx)
    }

    #[tokio::test]
    async fn non_english_command_is_translated_and_reply_localized() {
        let (mut state, translator, _bg) = translating_state(true);
        let replies = state.handle_voice_command("दो दूध जोड़ो", Some("hi-IN")).await;

        assert_eq!(status_of(&replies).1, "2 दूध जोड़ा गया");
        assert_eq!(state.list.get("milk").unwrap().quantity, 2);
        assert_eq!(
            *translator.calls.lock().unwrap(),
            vec![
                ("hi".to_string(), "en".to_string()),
                ("en".to_string(), "hi".to_string())
            ]
        );
    }

    #[tokio::test]
    async fn english_command_skips_translator() {
        let (mut state, translator, _bg) = translating_state(true);
        state.handle_voice_command("add 2 milk", Some("en-US")).await;
        assert!(translator.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn translation_failure_falls_back_to_original_text() {
        let (mut state, _translator, _bg) = translating_state(false);
        // Not in the translation table, but the extractor knows the phrase.
        let replies = state.handle_voice_command("add 2 apples", Some("mr")).await;
        assert_eq!(status_of(&replies).1, "Added 2 apple(s)");
    }

    // -----------------------------------------------------------------------
    // Tests: recommendations
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn change_triggers_refresh_after_mirror_settles() {
        let (mut state, _db, mut bg) = test_state();
        state.handle_voice_command("add 2 milk", None).await;

        let settled = bg.recv().await.unwrap();
        assert_eq!(settled, BackgroundEvent::MirrorSettled);
        assert!(state.handle_background(settled).is_none());
        assert_eq!(state.recommendation_generation, 1);

        let event = bg.recv().await.unwrap();
        let message = state.handle_background(event).unwrap();
        assert_eq!(
            message,
            ServerMessage::Recommendations {
                items: vec!["More milk?".to_string()]
            }
        );
        assert_eq!(state.recommendations, vec!["More milk?".to_string()]);
    }

    #[tokio::test]
    async fn search_does_not_trigger_refresh() {
        let (mut state, _db, mut bg) = test_state();
        state.handle_voice_command("find milk", None).await;
        state.settle().await;
        assert!(bg.try_recv().is_err());
        assert_eq!(state.recommendation_generation, 0);
    }

    #[tokio::test]
    async fn stale_generation_is_discarded() {
        let (mut state, _db, _bg) = test_state();
        state.recommendation_generation = 3;
        state.recommendations = vec!["keep".into()];

        let stale = BackgroundEvent::Recommendations {
            generation: 2,
            items: vec!["old".into()],
        };
        assert!(state.handle_background(stale).is_none());
        assert_eq!(state.recommendations, vec!["keep".to_string()]);
    }

    #[tokio::test]
    async fn failed_refresh_yields_empty_list() {
        let db = Arc::new(Database::open(":memory:").unwrap());
        let (bg_tx, mut bg_rx) = mpsc::channel(16);
        let mut collab = collaborators(db);
        collab.recommender = Arc::new(FailingRecommender);
        let mut state = AppState::new(SessionSettings::default(), collab, bg_tx);
        state.recommendations = vec!["stale".into()];

        state.refresh_recommendations();
        let event = bg_rx.recv().await.unwrap();
        assert_eq!(
            state.handle_background(event),
            Some(ServerMessage::Recommendations { items: vec![] })
        );
        assert!(state.recommendations.is_empty());
    }

    #[tokio::test]
    async fn disabled_recommendations_never_refresh() {
        let db = Arc::new(Database::open(":memory:").unwrap());
        let (bg_tx, mut bg_rx) = mpsc::channel(16);
        let settings = SessionSettings {
            recommendations_enabled: false,
            ..SessionSettings::default()
        };
        let mut state = AppState::new(settings, collaborators(db), bg_tx);

        state.handle_voice_command("add 2 milk", None).await;
        state.refresh_recommendations();
        state.settle().await;
        assert_eq!(state.recommendation_generation, 0);
        assert!(bg_rx.try_recv().is_err());
    }

    // -----------------------------------------------------------------------
    // Tests: client messages
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn unparseable_message_is_ignored() {
        let (mut state, _db, _bg) = test_state();
        assert!(state.handle_client_message("{not json").await.is_empty());
        assert!(state
            .handle_client_message(r#"{"type":"DANCE"}"#)
            .await
            .is_empty());
    }

    #[tokio::test]
    async fn recognition_unavailable_reports_reason() {
        let (mut state, _db, _bg) = test_state();
        let replies = state
            .handle_client_message(r#"{"type":"RECOGNITION_UNAVAILABLE","reason":"no microphone"}"#)
            .await;
        assert_eq!(
            status_of(&replies),
            (
                StatusLevel::Error,
                "Voice recognition unavailable: no microphone".into()
            )
        );
    }

    #[tokio::test]
    async fn hydrate_loads_mirror() {
        let (mut state, db, _bg) = test_state();
        db.upsert_entry("eggs", &ListEntry::new("eggs", 12)).unwrap();
        db.upsert_entry("Eggs", &ListEntry::new("Eggs", 6)).unwrap();

        assert_eq!(state.hydrate().await.unwrap(), 1);
        assert_eq!(state.list.get("EGGS").unwrap().quantity, 18);
    }

    #[tokio::test]
    async fn hydrate_failure_is_reported() {
        let db = Arc::new(Database::open(":memory:").unwrap());
        let (bg_tx, _bg_rx) = mpsc::channel(16);
        let mut collab = collaborators(db);
        collab.list_store = Arc::new(BrokenStore);
        let mut state = AppState::new(SessionSettings::default(), collab, bg_tx);
        assert!(state.hydrate().await.is_err());
        assert!(state.list.is_empty());
    }

    // -----------------------------------------------------------------------
    // Tests: event loop
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn event_loop_exits_when_ws_channel_closes() {
        let (state, _db, bg_rx) = test_state();
        let (ws_tx, ws_rx) = mpsc::channel(16);
        let (out_tx, _out_rx) = mpsc::channel(16);

        let handle = tokio::spawn(run(ws_rx, bg_rx, out_tx, state));
        drop(ws_tx);

        assert!(handle.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn event_loop_greets_new_client() {
        let (state, _db, bg_rx) = test_state();
        let (ws_tx, ws_rx) = mpsc::channel(16);
        let (out_tx, mut out_rx) = mpsc::channel(16);
        let handle = tokio::spawn(run(ws_rx, bg_rx, out_tx, state));

        ws_tx
            .send(WsEvent::Connected {
                addr: "127.0.0.1:5555".into(),
            })
            .await
            .unwrap();

        let first: serde_json::Value =
            serde_json::from_str(&out_rx.recv().await.unwrap()).unwrap();
        let second: serde_json::Value =
            serde_json::from_str(&out_rx.recv().await.unwrap()).unwrap();
        assert_eq!(first["type"], "SNAPSHOT");
        assert_eq!(second["type"], "RECOMMENDATIONS");

        drop(ws_tx);
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn event_loop_flushes_mirror_on_shutdown() {
        let (state, db, bg_rx) = test_state();
        let (ws_tx, ws_rx) = mpsc::channel(16);
        let (out_tx, _out_rx) = mpsc::channel(16);
        let handle = tokio::spawn(run(ws_rx, bg_rx, out_tx, state));

        ws_tx
            .send(WsEvent::Message(
                r#"{"type":"VOICE_COMMAND","text":"add 2 apples"}"#.into(),
            ))
            .await
            .unwrap();
        drop(ws_tx);
        handle.await.unwrap().unwrap();

        let entries = db.load_entries().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "apple");
    }
}
