//! Integration tests for the running hub.
//!
//! The main plugin is a duplex pipe driven by the test, the broadcast site
//! is a scripted `NicoApi` and the comment server is an in-process TCP
//! listener.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use nagome::config::SettingsSlots;
use nagome::hub::{Hub, HubError, HubHandle, HubOptions, HubState};
use nagome::logging::Logger;
use nagome::message::{Domain, Message};
use nagome::nicolive::live_waku::{CommentServer, StreamInfo, UserInfo};
use nagome::nicolive::{Account, LiveWaku, MemoryUserStore, NicoApi, NicoError, RetryPolicy, User};
use nagome::plugin::{PluginManifest, PluginMethod};
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::io::{
    AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, Lines,
};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

// ============================================================================
// Fixtures
// ============================================================================

#[derive(Default)]
struct StubApi {
    waku: Mutex<Option<LiveWaku>>,
    failures: Mutex<VecDeque<NicoError>>,
    fetches: AtomicUsize,
}

impl StubApi {
    fn serving(waku: LiveWaku) -> Self {
        let api = Self::default();
        *api.waku.lock().unwrap() = Some(waku);
        api
    }

    fn failing(failures: Vec<NicoError>) -> Self {
        let api = Self::default();
        *api.failures.lock().unwrap() = failures.into();
        api
    }
}

#[async_trait]
impl NicoApi for StubApi {
    async fn fetch_information(&self, _: &str, _: &Account) -> Result<LiveWaku, NicoError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        self.waku
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| NicoError::Network("no broadcast configured".into()))
    }

    async fn fetch_post_key(&self, _: &str, _: u64, _: &Account) -> Result<String, NicoError> {
        Ok("pk".into())
    }

    async fn publish_status(&self, _: &str, _: &Account) -> Result<String, NicoError> {
        Err(NicoError::Other("not the owner".into()))
    }

    async fn comment_owner(&self, _: &str, _: &str, _: &str, _: &Account) -> Result<(), NicoError> {
        Err(NicoError::Other("not the owner".into()))
    }

    async fn login(&self, _: &mut Account) -> Result<(), NicoError> {
        Err(NicoError::IncorrectAccount("offline".into()))
    }

    async fn fetch_user_info(&self, user_id: &str, _: &Account) -> Result<User, NicoError> {
        Ok(User::new(user_id))
    }
}

/// Comment server answering thread requests and recording frames.
struct FakeCommentServer {
    addr: SocketAddr,
    frames: Arc<Mutex<Vec<String>>>,
    open: Arc<AtomicUsize>,
}

impl FakeCommentServer {
    async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let server = Self {
            addr: listener.local_addr().unwrap(),
            frames: Arc::default(),
            open: Arc::default(),
        };
        let frames = Arc::clone(&server.frames);
        let open = Arc::clone(&server.open);
        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                open.fetch_add(1, Ordering::SeqCst);
                let frames = Arc::clone(&frames);
                let open = Arc::clone(&open);
                tokio::spawn(async move {
                    let mut pending = Vec::new();
                    let mut buf = [0u8; 1024];
                    while let Ok(n) = stream.read(&mut buf).await {
                        if n == 0 {
                            break;
                        }
                        pending.extend_from_slice(&buf[..n]);
                        while let Some(end) = pending.iter().position(|&b| b == 0) {
                            let frame = String::from_utf8_lossy(&pending[..end]).into_owned();
                            pending.drain(..=end);
                            if frame.starts_with("<thread ") {
                                let _ = stream
                                    .write_all(b"<thread resultcode=\"0\" thread=\"1000\" ticket=\"0xabc\" last_res=\"0\"/>\0")
                                    .await;
                            }
                            frames.lock().unwrap().push(frame);
                        }
                    }
                    open.fetch_sub(1, Ordering::SeqCst);
                });
            }
        });
        server
    }

    fn waku(&self) -> LiveWaku {
        LiveWaku {
            broad_id: "lv12345".into(),
            stream: StreamInfo {
                title: "integration".into(),
                community_id: "co1".into(),
                owner_id: "1".into(),
                ..StreamInfo::default()
            },
            user: UserInfo {
                user_id: "42".into(),
                nickname: "viewer".into(),
                is_premium: false,
            },
            comment_server: CommentServer {
                addr: self.addr.ip().to_string(),
                port: self.addr.port(),
                thread: "1000".into(),
            },
        }
    }

    fn frames_starting(&self, prefix: &str) -> Vec<String> {
        self.frames
            .lock()
            .unwrap()
            .iter()
            .filter(|f| f.starts_with(prefix))
            .cloned()
            .collect()
    }
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(tokio::time::Instant::now() < deadline, "condition not met in time");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// One end of a plugin connection, as the plugin sees it.
struct PluginEnd<R, W> {
    lines: Lines<BufReader<R>>,
    writer: W,
}

impl<R: AsyncRead + Unpin, W: AsyncWrite + Unpin> PluginEnd<R, W> {
    fn new(reader: R, writer: W) -> Self {
        Self {
            lines: BufReader::new(reader).lines(),
            writer,
        }
    }

    async fn send(&mut self, domain: &str, command: &str, content: Value) {
        let line = json!({"Domain": domain, "Command": command, "Content": content}).to_string();
        self.writer.write_all(line.as_bytes()).await.unwrap();
        self.writer.write_all(b"\n").await.unwrap();
        self.writer.flush().await.unwrap();
    }

    async fn next(&mut self) -> Message {
        let line = tokio::time::timeout(Duration::from_secs(10), self.lines.next_line())
            .await
            .expect("Timed out waiting for a message")
            .unwrap()
            .expect("hub closed the connection");
        serde_json::from_str(&line).unwrap()
    }

    /// Next message with `command`, skipping anything else.
    async fn expect(&mut self, command: &str) -> Message {
        loop {
            let msg = self.next().await;
            if msg.command == command {
                return msg;
            }
        }
    }

    /// Whether anything arrives within `wait`.
    async fn is_quiet(&mut self, wait: Duration) -> bool {
        tokio::time::timeout(wait, self.lines.next_line()).await.is_err()
    }
}

type MainEnd = PluginEnd<
    tokio::io::ReadHalf<tokio::io::DuplexStream>,
    tokio::io::WriteHalf<tokio::io::DuplexStream>,
>;

struct Running {
    task: JoinHandle<Result<HubState, HubError>>,
    handle: HubHandle,
    main: MainEnd,
    _save: TempDir,
}

async fn build(api: Arc<StubApi>, tcp_port: Option<u16>) -> (Hub, TempDir) {
    let save = tempfile::tempdir().unwrap();
    let hub = Hub::new(HubOptions {
        save_path: save.path().to_path_buf(),
        tcp_port,
        account: Account::default(),
        settings: SettingsSlots::default(),
        api,
        users: Arc::new(MemoryUserStore::new()),
        retry: RetryPolicy::default(),
        log: Logger::root("test"),
    })
    .await
    .unwrap();
    (hub, save)
}

async fn run(hub: Hub, save: TempDir) -> Running {
    let handle = hub.handle();
    let (near, far) = tokio::io::duplex(64 * 1024);
    let task = tokio::spawn(hub.run(Box::new(near)));
    let (read, write) = tokio::io::split(far);
    let mut main = PluginEnd::new(read, write);
    assert_eq!(main.next().await.command, "Plug.Enabled");
    Running {
        task,
        handle,
        main,
        _save: save,
    }
}

async fn start(api: Arc<StubApi>) -> Running {
    let (hub, save) = build(api, None).await;
    run(hub, save).await
}

impl Running {
    async fn stop(self) -> HubState {
        self.handle.quit();
        tokio::time::timeout(Duration::from_secs(10), self.task)
            .await
            .expect("hub did not stop")
            .unwrap()
            .unwrap()
    }
}

// ============================================================================
// Broadcast
// ============================================================================

#[tokio::test]
async fn test_connect_then_send_comment() {
    let server = FakeCommentServer::start().await;
    let api = Arc::new(StubApi::serving(server.waku()));
    let mut hub = start(Arc::clone(&api)).await;

    hub.main.send("nagome_query", "Broad.Connect", json!({"BroadID": "lv12345"})).await;
    let open = hub.main.expect("Broad.Open").await;
    assert_eq!(open.domain, Domain::Nagome);
    assert_eq!(open.content["BroadID"], "lv12345");
    assert_eq!(open.content["Stream"]["CommunityID"], "co1");

    wait_until(|| !server.frames_starting("<thread ").is_empty()).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    hub.main
        .send("nagome_query", "Broad.SendComment", json!({"Text": "hello"}))
        .await;
    wait_until(|| !server.frames_starting("<chat").is_empty()).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let chats = server.frames_starting("<chat");
    assert_eq!(chats.len(), 1);
    assert!(chats[0].contains(">hello</chat>"), "{}", chats[0]);

    let state = hub.stop().await;
    assert!(state.session.is_none());
    wait_until(|| server.open.load(Ordering::SeqCst) == 0).await;
}

#[tokio::test]
async fn test_reconnect_replaces_session() {
    let server = FakeCommentServer::start().await;
    let api = Arc::new(StubApi::serving(server.waku()));
    let mut hub = start(Arc::clone(&api)).await;

    hub.main.send("nagome_query", "Broad.Connect", json!({"BroadID": "lv12345"})).await;
    hub.main.expect("Broad.Open").await;
    hub.main.send("nagome_query", "Broad.Connect", json!({"BroadID": "co1"})).await;

    assert_eq!(hub.main.next().await.command, "Broad.Close");
    assert_eq!(hub.main.next().await.command, "Broad.Open");
    wait_until(|| server.open.load(Ordering::SeqCst) == 1).await;
    assert_eq!(api.fetches.load(Ordering::SeqCst), 2);

    hub.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_transient_failures_stop_after_three_attempts() {
    let api = Arc::new(StubApi::failing(vec![
        NicoError::Network("timeout".into()),
        NicoError::Network("timeout".into()),
        NicoError::Network("timeout".into()),
        NicoError::Network("timeout".into()),
    ]));
    let mut hub = start(Arc::clone(&api)).await;

    hub.main.send("nagome_query", "Broad.Connect", json!({"BroadID": "lv1"})).await;
    let notice = hub.main.expect("UI.Notification").await;
    assert_eq!(notice.content["Type"], "warn");
    assert_eq!(notice.content["Title"], "network error");
    assert_eq!(api.fetches.load(Ordering::SeqCst), 3);

    // No fourth attempt is ever made.
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(api.fetches.load(Ordering::SeqCst), 3);
    hub.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_closed_broadcast_is_not_retried() {
    let api = Arc::new(StubApi::failing(vec![NicoError::ClosedBroadcast("ended".into())]));
    let mut hub = start(Arc::clone(&api)).await;

    hub.main.send("nagome_query", "Broad.Connect", json!({"BroadID": "lv1"})).await;
    let notice = hub.main.expect("UI.Notification").await;
    assert_eq!(notice.content["Title"], "broadcast closed");

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(api.fetches.load(Ordering::SeqCst), 1);
    hub.stop().await;
}

// ============================================================================
// Routing
// ============================================================================

#[tokio::test]
async fn test_events_reach_main_plugin_in_order() {
    let mut hub = start(Arc::new(StubApi::default())).await;

    for n in 0..50 {
        hub.main
            .send("nagome_query", "User.Set", json!({"ID": "7", "Name": format!("n{n}")}))
            .await;
    }
    for n in 0..50 {
        let update = hub.main.next().await;
        assert_eq!(update.command, "User.Update");
        assert_eq!(update.content["Name"], format!("n{n}"));
    }

    hub.main.send("nagome_direct", "User.Get", json!({"ID": "7"})).await;
    let reply = hub.main.next().await;
    assert_eq!(reply.domain, Domain::Directngm);
    assert_eq!(reply.content["Name"], "n49");

    hub.stop().await;
}

#[tokio::test]
async fn test_tcp_plugin_handshake_and_subscriptions() {
    let api = Arc::new(StubApi::default());
    let (mut hub, save) = build(api, Some(0)).await;
    let viewer = hub.add_plugin(
        PluginManifest {
            name: "viewer".into(),
            method: PluginMethod::Tcp,
            subscribe: vec!["nagome".into(), "custom".into()],
            ..PluginManifest::default()
        },
        PathBuf::from("."),
    );
    assert_eq!(viewer.no(), Some(1));
    let addr = hub.tcp_addr().unwrap();
    let mut hub = run(hub, save).await;

    let stream = TcpStream::connect(addr).await.unwrap();
    let (read, write) = stream.into_split();
    let mut plugin = PluginEnd::new(read, write);
    plugin.send("nagome_direct", "No", json!({"No": 1})).await;
    assert_eq!(plugin.next().await.command, "Plug.Enabled");

    // Direct replies go only to the asker.
    plugin.send("nagome_direct", "App.Version", json!({})).await;
    let reply = plugin.next().await;
    assert_eq!(reply.domain, Domain::Directngm);
    assert_eq!(reply.content["Name"], "nagome");

    // A custom domain reaches its subscribers only.
    hub.main.send("custom", "Hello", json!({"From": "main"})).await;
    let hello = plugin.next().await;
    assert_eq!(hello.command, "Hello");
    assert_eq!(hello.content["From"], "main");

    // Hub events reach both.
    hub.main.send("nagome_query", "User.Set", json!({"ID": "9", "Name": "x"})).await;
    assert_eq!(hub.main.next().await.command, "User.Update");
    assert_eq!(plugin.next().await.command, "User.Update");

    // A disabled plugin stops receiving events.
    hub.main.send("nagome_query", "Plug.Enable", json!({"No": 1, "Enable": false})).await;
    assert_eq!(plugin.next().await.command, "Plug.Disabled");
    hub.main.send("nagome_query", "User.Set", json!({"ID": "9", "Name": "y"})).await;
    assert_eq!(hub.main.next().await.command, "User.Update");
    assert!(plugin.is_quiet(Duration::from_millis(300)).await);

    let state = hub.stop().await;
    assert!(!state.settings().plugin_enabled("viewer"));
}

#[tokio::test]
async fn test_tcp_handshake_for_unknown_plugin_is_rejected() {
    let (hub, save) = build(Arc::new(StubApi::default()), Some(0)).await;
    let addr = hub.tcp_addr().unwrap();
    let hub = run(hub, save).await;

    let stream = TcpStream::connect(addr).await.unwrap();
    let (read, write) = stream.into_split();
    let mut plugin = PluginEnd::new(read, write);
    plugin.send("nagome_direct", "No", json!({"No": 5})).await;

    let closed = tokio::time::timeout(Duration::from_secs(5), plugin.lines.next_line())
        .await
        .expect("connection was not closed");
    assert!(matches!(closed, Ok(None) | Err(_)));
    hub.stop().await;
}

// ============================================================================
// Shutdown
// ============================================================================

#[tokio::test]
async fn test_losing_main_plugin_stops_hub() {
    let server = FakeCommentServer::start().await;
    let api = Arc::new(StubApi::serving(server.waku()));
    let mut hub = start(api).await;

    hub.main.send("nagome_query", "Broad.Connect", json!({"BroadID": "lv12345"})).await;
    hub.main.expect("Broad.Open").await;
    hub.main.send("nagome_query", "Account.Set", json!({"Mail": "me@example.com"})).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let Running { task, main, .. } = hub;
    drop(main);

    let state = tokio::time::timeout(Duration::from_secs(10), task)
        .await
        .expect("hub kept running without its main plugin")
        .unwrap()
        .unwrap();
    assert_eq!(state.account.mail, "me@example.com");
    assert!(state.session.is_none());
    wait_until(|| server.open.load(Ordering::SeqCst) == 0).await;
}

#[tokio::test]
async fn test_quit_while_main_plugin_stops_reading() {
    let (hub, _save) = build(Arc::new(StubApi::default()), None).await;
    let handle = hub.handle();
    let (near, far) = tokio::io::duplex(256);
    let task = tokio::spawn(hub.run(Box::new(near)));
    let (_read, mut write) = tokio::io::split(far);

    // Replies pile up until the reply queue and the pipe are both full.
    let flood = tokio::spawn(async move {
        let line = json!({"Domain": "nagome_direct", "Command": "App.Version", "Content": {}}).to_string();
        for _ in 0..500 {
            if write.write_all(format!("{line}\n").as_bytes()).await.is_err() {
                break;
            }
        }
        write
    });
    tokio::time::sleep(Duration::from_millis(500)).await;

    handle.quit();
    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("hub did not stop while its main plugin was not reading")
        .unwrap()
        .unwrap();
    flood.abort();
}

#[tokio::test]
async fn test_handshake_pending_at_quit_never_opens_plugin() {
    let (mut hub, save) = build(Arc::new(StubApi::default()), Some(0)).await;
    let viewer = hub.add_plugin(
        PluginManifest {
            name: "viewer".into(),
            method: PluginMethod::Tcp,
            subscribe: vec!["nagome".into()],
            ..PluginManifest::default()
        },
        PathBuf::from("."),
    );
    let addr = hub.tcp_addr().unwrap();
    let hub = run(hub, save).await;

    let stream = TcpStream::connect(addr).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    hub.stop().await;

    let (read, mut write) = stream.into_split();
    let line = json!({"Domain": "nagome_direct", "Command": "No", "Content": {"No": 1}}).to_string();
    let _ = write.write_all(format!("{line}\n").as_bytes()).await;

    let mut lines = BufReader::new(read).lines();
    let closed = tokio::time::timeout(Duration::from_secs(5), lines.next_line())
        .await
        .expect("connection was left open after the hub stopped");
    assert!(matches!(closed, Ok(None) | Err(_)), "{closed:?}");
    assert_eq!(viewer.state(), nagome::plugin::PluginState::Closed);
}
