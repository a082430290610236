// End-to-end tests: a real WebSocket client talking to the server task and
// the app loop, with in-process collaborators and an in-memory database.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use voicecart_app::app::{self, AppState, Collaborators, SessionSettings};
use voicecart_core::db::Database;
use voicecart_core::error::VoiceError;
use voicecart_core::services::{IntentExtractor, RecommendationService};
use voicecart_core::shopping::{AddCommand, HistoryRecord, ParsedCommand, RemoveCommand};
use voicecart_core::ws_server;

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Understands "add N name" and "remove N name".
struct WordExtractor;

#[async_trait]
impl IntentExtractor for WordExtractor {
    async fn extract(&self, text: &str) -> Result<ParsedCommand, VoiceError> {
        let words: Vec<&str> = text.split_whitespace().collect();
        let parsed = match words.as_slice() {
            ["add", n, name] => n
                .parse::<u32>()
                .ok()
                .map(|n| ParsedCommand::Add(AddCommand::new(*name, n).with_price(2.0))),
            ["remove", n, name] => n
                .parse::<u32>()
                .ok()
                .map(|n| ParsedCommand::Remove(RemoveCommand::new(*name, n))),
            _ => None,
        };
        Ok(parsed.unwrap_or(ParsedCommand::Unrecognized))
    }
}

/// Suggests the most recently added item.
struct LastItemRecommender;

#[async_trait]
impl RecommendationService for LastItemRecommender {
    async fn recommend(&self, history: &[HistoryRecord]) -> Result<Vec<String>, VoiceError> {
        Ok(history
            .last()
            .map(|r| vec![format!("Restock {}", r.name)])
            .unwrap_or_default())
    }
}

struct Server {
    client: Client,
    ws_handle: tokio::task::JoinHandle<()>,
    app_handle: tokio::task::JoinHandle<anyhow::Result<()>>,
}

async fn start(db: Arc<Database>) -> Server {
    let collaborators = Collaborators {
        extractor: Arc::new(WordExtractor),
        recommender: Arc::new(LastItemRecommender),
        translator: None,
        list_store: db.clone(),
        history: db,
    };
    let (ws_tx, ws_rx) = mpsc::channel(64);
    let (bg_tx, bg_rx) = mpsc::channel(64);
    let (out_tx, out_rx) = mpsc::channel(64);

    let mut state = AppState::new(SessionSettings::default(), collaborators, bg_tx);
    state.hydrate().await.unwrap();

    let listener = ws_server::bind("127.0.0.1", 0).await.unwrap();
    let addr = listener.local_addr().unwrap();
    let ws_handle = tokio::spawn(async move {
        let _ = ws_server::run(listener, ws_tx, out_rx).await;
    });
    let app_handle = tokio::spawn(app::run(ws_rx, bg_rx, out_tx, state));

    let (client, _) = connect_async(format!("ws://{addr}")).await.unwrap();
    Server {
        client,
        ws_handle,
        app_handle,
    }
}

async fn next_json(client: &mut Client) -> Value {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(5), client.next())
            .await
            .expect("timed out waiting for a server frame")
            .expect("connection closed")
            .expect("websocket error");
        if let Message::Text(text) = frame {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

/// Skip frames until one of type `kind` arrives.
async fn next_of_type(client: &mut Client, kind: &str) -> Value {
    loop {
        let value = next_json(client).await;
        if value["type"] == kind {
            return value;
        }
    }
}

async fn say(client: &mut Client, text: &str) {
    let frame = json!({"type": "VOICE_COMMAND", "text": text, "lang": "en-US"});
    client
        .send(Message::Text(frame.to_string().into()))
        .await
        .unwrap();
}

async fn stop(server: Server) {
    let Server {
        mut client,
        ws_handle,
        app_handle,
    } = server;
    let _ = client.close(None).await;
    ws_handle.abort();
    app_handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn connect_add_remove_roundtrip() {
    let db = Arc::new(Database::open(":memory:").unwrap());
    let mut server = start(db.clone()).await;
    let client = &mut server.client;

    let greeting = next_json(client).await;
    assert_eq!(greeting["type"], "SNAPSHOT");
    assert_eq!(greeting["items"], json!([]));
    assert_eq!(next_json(client).await["type"], "RECOMMENDATIONS");

    say(client, "add 3 bread").await;
    let status = next_of_type(client, "STATUS").await;
    assert_eq!(status["level"], "info");
    assert_eq!(status["message"], "Added 3 bread(s)");
    let snapshot = next_of_type(client, "SNAPSHOT").await;
    assert_eq!(snapshot["items"][0]["name"], "bread");
    assert_eq!(snapshot["items"][0]["quantity"], 3);
    assert_eq!(snapshot["items"][0]["totalPrice"], 6.0);

    let recs = next_of_type(client, "RECOMMENDATIONS").await;
    assert_eq!(recs["items"], json!(["Restock bread"]));

    say(client, "remove 1 bread").await;
    let status = next_of_type(client, "STATUS").await;
    assert_eq!(status["message"], "Removed 1 bread(s)");
    let snapshot = next_of_type(client, "SNAPSHOT").await;
    assert_eq!(snapshot["items"][0]["quantity"], 2);
    // Removal leaves the stored price untouched.
    assert_eq!(snapshot["items"][0]["totalPrice"], 6.0);

    say(client, "play some music").await;
    let status = next_of_type(client, "STATUS").await;
    assert_eq!(status["level"], "warning");
    assert_eq!(status["message"], "Not a shopping command.");

    stop(server).await;

    let mirrored = db.load_entries().unwrap();
    assert_eq!(mirrored.len(), 1);
    assert_eq!(mirrored[0].quantity, 2);
    assert_eq!(db.load_history().unwrap().len(), 1);
}

#[tokio::test]
async fn restart_restores_list_from_mirror() {
    let db = Arc::new(Database::open(":memory:").unwrap());

    let mut first = start(db.clone()).await;
    say(&mut first.client, "add 2 rice").await;
    next_of_type(&mut first.client, "STATUS").await;
    stop(first).await;

    let mut second = start(db).await;
    let greeting = next_json(&mut second.client).await;
    assert_eq!(greeting["type"], "SNAPSHOT");
    assert_eq!(greeting["items"][0]["name"], "rice");
    assert_eq!(greeting["items"][0]["quantity"], 2);
    stop(second).await;
}

#[tokio::test]
async fn snapshot_request_and_bad_frames() {
    let db = Arc::new(Database::open(":memory:").unwrap());
    let mut server = start(db).await;
    let client = &mut server.client;
    next_json(client).await;
    next_json(client).await;

    client
        .send(Message::Text("not json at all".into()))
        .await
        .unwrap();
    client
        .send(Message::Text(json!({"type": "REQUEST_SNAPSHOT"}).to_string().into()))
        .await
        .unwrap();

    // The bad frame produces nothing; the next reply is the snapshot.
    let reply = next_json(client).await;
    assert_eq!(reply["type"], "SNAPSHOT");
    assert_eq!(reply["view"]["mode"], "full");

    client
        .send(Message::Text(json!({"type": "VOICE_COMMAND", "text": ""}).to_string().into()))
        .await
        .unwrap();
    let status = next_json(client).await;
    assert_eq!(status["type"], "STATUS");
    assert_eq!(status["level"], "error");

    stop(server).await;
}
