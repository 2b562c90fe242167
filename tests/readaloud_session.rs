//! End-to-end readaloud sessions against an in-process server.
//!
//! The server runs on an ephemeral port with TLS disabled; the client is a
//! plain tokio-tungstenite websocket.

use actix_web::{web, App, HttpServer};
use async_trait::async_trait;
use edge_readaloud_bridge::{
    config::{BackendConfig, UpgradeConfig},
    middleware,
    protocol::READALOUD_PATH,
    server,
    tts::{HttpSpeechBackend, SpeechBackend, Synthesizer, Transcoder},
    AppConfig, AppState, SessionError,
};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

const CONFIG_FRAME: &str = "X-Timestamp:Thu Jan 01 1970 00:00:00 GMT+0000 (Coordinated Universal Time)\r\n\
    Content-Type:application/json; charset=utf-8\r\nPath:speech.config\r\n\r\n\
    {\"context\":{\"synthesis\":{\"audio\":{\"metadataoptions\":{\"sentenceBoundaryEnabled\":\"false\",\
    \"wordBoundaryEnabled\":\"true\"},\"outputFormat\":\"audio-24khz-48kbitrate-mono-mp3\"}}}}\r\n";

fn ssml_frame(request_id: &str, rate: &str, text: &str) -> String {
    format!(
        "X-RequestId:{}\r\nContent-Type:application/ssml+xml\r\n\
         X-Timestamp:Thu Jan 01 1970 00:00:00 GMT+0000 (Coordinated Universal Time)Z\r\nPath:ssml\r\n\r\n\
         <speak version='1.0' xmlns='http://www.w3.org/2001/10/synthesis' xml:lang='en-US'>\
         <voice name='Microsoft Server Speech Text to Speech Voice (en-US, AriaNeural)'>\
         <prosody pitch='+0Hz' rate='{}' volume='+0%'>{}</prosody></voice></speak>",
        request_id, rate, text
    )
}

/// Backend returning a fixed waveform and recording the requested texts.
#[derive(Default)]
struct StubBackend {
    texts: Mutex<Vec<String>>,
}

#[async_trait]
impl SpeechBackend for StubBackend {
    async fn synthesize(&self, text: &str, _voice: Option<&str>) -> Result<Vec<u8>, SessionError> {
        self.texts.lock().unwrap().push(text.to_string());
        Ok(b"RIFF-WAV".to_vec())
    }
}

/// Stands in for ffmpeg: tags the waveform and records the speed.
#[derive(Default)]
struct StubTranscoder {
    speeds: Mutex<Vec<f64>>,
}

#[async_trait]
impl Transcoder for StubTranscoder {
    async fn transcode(&self, waveform: Vec<u8>, speed: f64) -> Result<Vec<u8>, SessionError> {
        self.speeds.lock().unwrap().push(speed);
        let mut output = b"MP3:".to_vec();
        output.extend_from_slice(&waveform);
        Ok(output)
    }
}

fn permissive() -> UpgradeConfig {
    AppConfig::default().upgrade
}

fn spawn_bridge(synthesizer: Synthesizer, upgrade: UpgradeConfig) -> (SocketAddr, AppState) {
    let mut config = AppConfig::default();
    config.tls.enabled = false;
    config.upgrade = upgrade;

    let state = AppState::new(config, synthesizer);
    let app_state = state.clone();

    let server = HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .wrap(server::build_cors(&app_state.config.upgrade))
            .wrap(middleware::MetricsMiddleware)
            .configure(server::configure_routes)
    })
    .workers(1)
    .disable_signals()
    .bind(("127.0.0.1", 0))
    .unwrap();

    let addr = server.addrs()[0];
    actix_web::rt::spawn(server.run());
    (addr, state)
}

fn readaloud_url(addr: SocketAddr) -> String {
    format!(
        "ws://{}{}?TrustedClientToken=6A5AA1D4EAFF4E9FB37E23D68491D6F4&ConnectionId=0123456789abcdef",
        addr, READALOUD_PATH
    )
}

async fn connect(addr: SocketAddr) -> Client {
    let (client, _) = connect_async(readaloud_url(addr)).await.unwrap();
    client
}

/// Data frames received until the server closes the connection.
async fn collect_until_close(client: &mut Client) -> Vec<Message> {
    let mut frames = Vec::new();
    tokio::time::timeout(Duration::from_secs(10), async {
        while let Some(message) = client.next().await {
            match message {
                Ok(Message::Close(_)) | Err(_) => break,
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => continue,
                Ok(other) => frames.push(other),
            }
        }
    })
    .await
    .expect("server did not close the session in time");
    frames
}

fn header_value<'a>(head: &'a str, name: &str) -> Option<&'a str> {
    head.lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(header, _)| header.trim().eq_ignore_ascii_case(name))
        .map(|(_, value)| value.trim())
}

/// Checks turn.start / audio / turn.end and returns the audio payload.
fn assert_complete_turn(frames: &[Message], request_id: &str) -> Vec<u8> {
    assert_eq!(frames.len(), 3, "expected exactly three frames, got {:?}", frames);

    let start = match &frames[0] {
        Message::Text(text) => text.clone(),
        other => panic!("turn.start must be text, got {:?}", other),
    };
    assert_eq!(header_value(&start, "Path"), Some("turn.start"));
    assert_eq!(header_value(&start, "X-RequestId"), Some(request_id));
    assert!(header_value(&start, "X-Timestamp").unwrap().ends_with("GMT"));
    assert!(start.ends_with("\r\n\r\n{}"));

    let audio = match &frames[1] {
        Message::Binary(bytes) => bytes.clone(),
        other => panic!("audio must be binary, got {:?}", other),
    };
    let header_len = u16::from_be_bytes([audio[0], audio[1]]) as usize;
    let head = std::str::from_utf8(&audio[2..2 + header_len]).unwrap();
    assert_eq!(header_value(head, "Path"), Some("audio"));
    assert_eq!(header_value(head, "Content-Type"), Some("audio/mpeg"));
    assert_eq!(header_value(head, "X-RequestId"), Some(request_id));

    let end = match &frames[2] {
        Message::Text(text) => text.clone(),
        other => panic!("turn.end must be text, got {:?}", other),
    };
    assert_eq!(header_value(&end, "Path"), Some("turn.end"));
    assert_eq!(header_value(&end, "X-RequestId"), Some(request_id));
    assert!(end.ends_with("\r\n\r\n{}"));

    audio[2 + header_len..].to_vec()
}

async fn wiremock_backend(server: &MockServer) -> Arc<HttpSpeechBackend> {
    let backend = HttpSpeechBackend::new(&BackendConfig {
        url: format!("{}/api/text-to-speech", server.uri()),
        voice: None,
        speaker: None,
        forward_ssml_voice: false,
        timeout_secs: 5,
    })
    .unwrap();
    Arc::new(backend)
}

#[actix_web::test]
async fn test_config_then_ssml_produces_one_turn() {
    let backend = Arc::new(StubBackend::default());
    let transcoder = Arc::new(StubTranscoder::default());
    let (addr, state) = spawn_bridge(Synthesizer::new(backend.clone(), transcoder.clone()), permissive());

    let mut client = connect(addr).await;
    client.send(Message::Text(CONFIG_FRAME.to_string())).await.unwrap();
    client
        .send(Message::Text(ssml_frame("5f1c0b2ad3e94a7c8e6f0a1b2c3d4e5f", "+0%", "Hello world")))
        .await
        .unwrap();

    let frames = collect_until_close(&mut client).await;
    let audio = assert_complete_turn(&frames, "5f1c0b2ad3e94a7c8e6f0a1b2c3d4e5f");

    assert_eq!(audio, b"MP3:RIFF-WAV".to_vec());
    assert_eq!(*backend.texts.lock().unwrap(), vec!["Hello world".to_string()]);
    assert_eq!(*transcoder.speeds.lock().unwrap(), vec![1.0]);
    assert_eq!(state.metrics.snapshot().completed_turns, 1);
}

#[actix_web::test]
async fn test_ssml_then_config_produces_one_turn() {
    let backend = Arc::new(StubBackend::default());
    let transcoder = Arc::new(StubTranscoder::default());
    let (addr, _state) = spawn_bridge(Synthesizer::new(backend.clone(), transcoder.clone()), permissive());

    let mut client = connect(addr).await;
    client
        .send(Message::Text(ssml_frame("req-ssml-first", "+50%", "Read this aloud")))
        .await
        .unwrap();
    client.send(Message::Text(CONFIG_FRAME.to_string())).await.unwrap();

    let frames = collect_until_close(&mut client).await;
    let audio = assert_complete_turn(&frames, "req-ssml-first");

    assert_eq!(audio, b"MP3:RIFF-WAV".to_vec());
    assert_eq!(*backend.texts.lock().unwrap(), vec!["Read this aloud".to_string()]);
    assert_eq!(*transcoder.speeds.lock().unwrap(), vec![1.5]);
}

#[actix_web::test]
async fn test_backend_receives_percent_encoded_text() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/text-to-speech"))
        .and(query_param("text", "Hello world"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"RIFF-from-backend".to_vec()))
        .expect(1)
        .mount(&mock_server)
        .await;

    let transcoder = Arc::new(StubTranscoder::default());
    let (addr, _state) = spawn_bridge(
        Synthesizer::new(wiremock_backend(&mock_server).await, transcoder),
        permissive(),
    );

    let mut client = connect(addr).await;
    client.send(Message::Text(CONFIG_FRAME.to_string())).await.unwrap();
    client
        .send(Message::Text(ssml_frame("req-e2e", "1.0", "Hello world")))
        .await
        .unwrap();

    let frames = collect_until_close(&mut client).await;
    let audio = assert_complete_turn(&frames, "req-e2e");
    assert_eq!(audio, b"MP3:RIFF-from-backend".to_vec());

    let requests = mock_server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].url.query(), Some("text=Hello%20world"));
}

#[actix_web::test]
async fn test_backend_failure_sends_no_frames() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/text-to-speech"))
        .respond_with(ResponseTemplate::new(500).set_body_string("model not loaded"))
        .mount(&mock_server)
        .await;

    let transcoder = Arc::new(StubTranscoder::default());
    let (addr, state) = spawn_bridge(
        Synthesizer::new(wiremock_backend(&mock_server).await, transcoder.clone()),
        permissive(),
    );

    let mut client = connect(addr).await;
    client.send(Message::Text(CONFIG_FRAME.to_string())).await.unwrap();
    client
        .send(Message::Text(ssml_frame("req-fail", "1.0", "Hello world")))
        .await
        .unwrap();

    let frames = collect_until_close(&mut client).await;
    assert!(frames.is_empty(), "no frames expected, got {:?}", frames);
    assert!(transcoder.speeds.lock().unwrap().is_empty());

    let snapshot = state.metrics.snapshot();
    assert_eq!(snapshot.failed_sessions, 1);
    assert_eq!(snapshot.completed_turns, 0);
}

#[actix_web::test]
async fn test_malformed_ssml_sends_no_frames() {
    let backend = Arc::new(StubBackend::default());
    let (addr, _state) = spawn_bridge(
        Synthesizer::new(backend.clone(), Arc::new(StubTranscoder::default())),
        permissive(),
    );

    let mut client = connect(addr).await;
    client.send(Message::Text(CONFIG_FRAME.to_string())).await.unwrap();
    client
        .send(Message::Text(
            "X-RequestId:req-bad\r\nPath:ssml\r\n\r\n<speak><voice name='x'><prosody rate='1.0'>unterminated".to_string(),
        ))
        .await
        .unwrap();

    let frames = collect_until_close(&mut client).await;
    assert!(frames.is_empty(), "no frames expected, got {:?}", frames);
    assert!(backend.texts.lock().unwrap().is_empty());
}

#[actix_web::test]
async fn test_client_close_before_ssml_sends_no_frames() {
    let backend = Arc::new(StubBackend::default());
    let (addr, _state) = spawn_bridge(
        Synthesizer::new(backend.clone(), Arc::new(StubTranscoder::default())),
        permissive(),
    );

    let mut client = connect(addr).await;
    client.send(Message::Text(CONFIG_FRAME.to_string())).await.unwrap();
    client.close(None).await.unwrap();

    let frames = collect_until_close(&mut client).await;
    assert!(frames.is_empty(), "no frames expected, got {:?}", frames);
    assert!(backend.texts.lock().unwrap().is_empty());
}

#[actix_web::test]
async fn test_ssml_frame_larger_than_codec_default_is_served() {
    let backend = Arc::new(StubBackend::default());
    let (addr, _state) = spawn_bridge(
        Synthesizer::new(backend.clone(), Arc::new(StubTranscoder::default())),
        permissive(),
    );

    let article = "A long paragraph of an article being read aloud. ".repeat(4_000);
    assert!(article.len() > 128 * 1024);

    let mut client = connect(addr).await;
    client.send(Message::Text(CONFIG_FRAME.to_string())).await.unwrap();
    client
        .send(Message::Text(ssml_frame("req-long", "1.0", &article)))
        .await
        .unwrap();

    let frames = collect_until_close(&mut client).await;
    assert_complete_turn(&frames, "req-long");
    assert_eq!(*backend.texts.lock().unwrap(), vec![article.trim().to_string()]);
}

#[actix_web::test]
async fn test_frame_above_configured_limit_ends_session() {
    let backend = Arc::new(StubBackend::default());
    let upgrade = UpgradeConfig {
        max_frame_bytes: 1024,
        ..permissive()
    };
    let (addr, _state) = spawn_bridge(
        Synthesizer::new(backend.clone(), Arc::new(StubTranscoder::default())),
        upgrade,
    );

    let mut client = connect(addr).await;
    client.send(Message::Text(CONFIG_FRAME.to_string())).await.unwrap();
    client
        .send(Message::Text(ssml_frame("req-too-long", "1.0", &"word ".repeat(1_000))))
        .await
        .ok();

    let frames = collect_until_close(&mut client).await;
    assert!(frames.is_empty(), "no frames expected, got {:?}", frames);
    assert!(backend.texts.lock().unwrap().is_empty());
}

#[actix_web::test]
async fn test_disallowed_origin_is_rejected() {
    let upgrade = UpgradeConfig {
        allow_any_origin: false,
        allowed_origins: vec!["chrome-extension://readaloud".to_string()],
        ..permissive()
    };
    let (addr, _state) = spawn_bridge(
        Synthesizer::new(Arc::new(StubBackend::default()), Arc::new(StubTranscoder::default())),
        upgrade,
    );

    let mut request = readaloud_url(addr).into_client_request().unwrap();
    request
        .headers_mut()
        .insert("Origin", HeaderValue::from_static("https://evil.example"));

    match connect_async(request).await {
        Err(WsError::Http(response)) => assert!(response.status().is_client_error()),
        Err(other) => panic!("expected an HTTP rejection, got {:?}", other),
        Ok(_) => panic!("upgrade from a disallowed origin must fail"),
    }
}

#[actix_web::test]
async fn test_allowed_origin_is_served() {
    let upgrade = UpgradeConfig {
        allow_any_origin: false,
        allowed_origins: vec!["chrome-extension://readaloud".to_string()],
        ..permissive()
    };
    let (addr, _state) = spawn_bridge(
        Synthesizer::new(Arc::new(StubBackend::default()), Arc::new(StubTranscoder::default())),
        upgrade,
    );

    let mut request = readaloud_url(addr).into_client_request().unwrap();
    request
        .headers_mut()
        .insert("Origin", HeaderValue::from_static("chrome-extension://readaloud"));

    let (mut client, _) = connect_async(request).await.unwrap();
    client.send(Message::Text(CONFIG_FRAME.to_string())).await.unwrap();
    client
        .send(Message::Text(ssml_frame("req-origin", "1.0", "Hello")))
        .await
        .unwrap();

    let frames = collect_until_close(&mut client).await;
    assert_complete_turn(&frames, "req-origin");
}
