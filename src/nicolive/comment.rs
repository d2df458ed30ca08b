//! Comment session on top of a [`LiveConnection`].
//!
//! Opening a session sends the thread request; the server answers with a
//! `<thread>` element carrying the ticket needed to post, then streams
//! `<chat>` elements. Each frame becomes a [`NicoEvent`]:
//!
//! | frame            | event                          |
//! |------------------|--------------------------------|
//! | `<thread …/>`    | `CommentOpen`                  |
//! | `<chat …>…`      | `CommentGot(Comment)`          |
//! | `<chat_result>`  | `CommentErr` if status != 0    |
//! | anything else    | logged, ignored                |

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::account::Account;
use super::api::NicoApi;
use super::connection::{FrameHandler, LiveConnection};
use super::error::NicoError;
use super::event::{EventReceiver, NicoEvent};
use super::live_waku::LiveWaku;
use super::xml;
use crate::constants::{COMMENTS_PER_BLOCK, COMMENT_HISTORY_COUNT};
use crate::logging::Logger;

/// Protocol version sent in the thread request.
const THREAD_VERSION: &str = "20061206";

/// One comment from the thread.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Comment {
    /// Sequence number within the thread.
    pub no: u64,
    /// Post time.
    pub date: DateTime<Utc>,
    /// Poster's user ID.
    #[serde(rename = "UserID")]
    pub user_id: String,
    /// Cached display name; filled in by the hub when known.
    #[serde(default)]
    pub user_name: String,
    /// Comment text.
    pub comment: String,
    /// Mail field (commands such as `184`).
    #[serde(default)]
    pub mail: String,
    /// Premium member.
    pub is_premium: bool,
    /// Posted by the broadcaster.
    pub is_broadcaster: bool,
    /// Posted by site staff or the system.
    pub is_staff: bool,
    /// Posted anonymously.
    pub is_anonymity: bool,
    /// NG score.
    #[serde(default)]
    pub score: i64,
}

impl Comment {
    /// Build a comment from a parsed `<chat>` element.
    pub fn from_chat(el: &xml::Element) -> Self {
        let premium: u32 = el.attr_num("premium").unwrap_or(0);
        Self {
            no: el.attr_num("no").unwrap_or(0),
            date: el
                .attr_num::<i64>("date")
                .and_then(|secs| DateTime::from_timestamp(secs, 0))
                .unwrap_or_default(),
            user_id: el.attr("user_id").unwrap_or_default().to_string(),
            user_name: String::new(),
            comment: el.text.clone(),
            mail: el.attr("mail").unwrap_or_default().to_string(),
            is_premium: premium == 1,
            is_staff: premium == 2,
            is_broadcaster: premium == 3,
            is_anonymity: el.attr("anonymity").is_some_and(|a| a != "0"),
            score: el.attr_num("score").unwrap_or(0),
        }
    }
}

#[derive(Debug, Default)]
struct ThreadState {
    ticket: Option<String>,
    last_no: u64,
}

/// Turn one frame into an event, updating thread state.
fn handle_frame(frame: &str, state: &Mutex<ThreadState>, log: &Logger) -> Option<NicoEvent> {
    let Some(el) = xml::parse_element(frame) else {
        log::debug!(target: log.target(), "ignoring non-element frame: {frame:?}");
        return None;
    };

    match el.name.as_str() {
        "thread" => {
            if let Ok(mut st) = state.lock() {
                st.ticket = el.attr("ticket").map(str::to_string);
                st.last_no = el.attr_num("last_res").unwrap_or(0);
            }
            Some(NicoEvent::CommentOpen)
        }
        "chat" => {
            let comment = Comment::from_chat(&el);
            if let Ok(mut st) = state.lock() {
                st.last_no = st.last_no.max(comment.no);
            }
            Some(NicoEvent::CommentGot(comment))
        }
        "chat_result" => match el.attr("status") {
            Some("0") | None => None,
            Some(status) => Some(NicoEvent::CommentErr(NicoError::SendComment(format!(
                "comment server rejected the comment (status {status})"
            )))),
        },
        other => {
            log::debug!(target: log.target(), "ignoring <{other}> frame");
            None
        }
    }
}

/// An open comment session for one broadcast.
pub struct CommentConnection {
    waku: LiveWaku,
    account: Account,
    conn: Arc<LiveConnection>,
    state: Arc<Mutex<ThreadState>>,
    api: Arc<dyn NicoApi>,
    events: Arc<dyn EventReceiver>,
    log: Logger,
}

impl std::fmt::Debug for CommentConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommentConnection")
            .field("broad_id", &self.waku.broad_id)
            .field("conn", &self.conn)
            .finish_non_exhaustive()
    }
}

impl CommentConnection {
    /// Connect to the broadcast's comment server and request the thread.
    ///
    /// Events for the session go to `events`; they start arriving once the
    /// server answers the thread request.
    pub async fn connect(
        waku: LiveWaku,
        account: Account,
        api: Arc<dyn NicoApi>,
        events: Arc<dyn EventReceiver>,
        log: Logger,
    ) -> Result<Self, NicoError> {
        let state = Arc::new(Mutex::new(ThreadState::default()));

        let handler: FrameHandler = {
            let state = Arc::clone(&state);
            let events = Arc::clone(&events);
            let log = log.clone();
            Box::new(move |frame| {
                if let Some(event) = handle_frame(&frame, &state, &log) {
                    events.proceed_nico_event(event);
                }
            })
        };

        let conn = LiveConnection::connect(
            &waku.comment_addr(),
            handler,
            Arc::clone(&events),
            log.scoped("socket"),
        )
        .await?;

        let request = format!(
            r#"<thread thread="{}" version="{THREAD_VERSION}" res_from="-{COMMENT_HISTORY_COUNT}"/>"#,
            xml::escape(&waku.comment_server.thread),
        );
        if let Err(e) = conn.send(&request).await {
            if let Err(close_err) = conn.disconnect().await {
                log::debug!(target: log.target(), "disconnect after failed thread request: {close_err}");
            }
            return Err(NicoError::Network(format!("thread request failed: {e}")));
        }

        log::info!(target: log.target(), "comment session opened for {}", waku.broad_id);
        Ok(Self {
            waku,
            account,
            conn,
            state,
            api,
            events,
            log,
        })
    }

    /// The broadcast this session belongs to.
    pub fn waku(&self) -> &LiveWaku {
        &self.waku
    }

    /// Whether the underlying socket is still open.
    pub fn is_connected(&self) -> bool {
        self.conn.is_connected()
    }

    /// Post a viewer comment; `iyayo` posts it anonymously.
    pub async fn send_comment(&self, text: &str, iyayo: bool) -> Result<(), NicoError> {
        if text.trim().is_empty() {
            return Err(NicoError::SendComment("comment is empty".to_string()));
        }
        if !self.conn.is_connected() {
            return Err(NicoError::SendComment("not connected".to_string()));
        }

        let (ticket, last_no) = {
            let st = self
                .state
                .lock()
                .map_err(|e| NicoError::Other(format!("thread state poisoned: {e}")))?;
            (st.ticket.clone(), st.last_no)
        };
        let ticket =
            ticket.ok_or_else(|| NicoError::SendComment("thread is not open yet".to_string()))?;

        let thread = &self.waku.comment_server.thread;
        let post_key = self
            .api
            .fetch_post_key(thread, last_no / u64::from(COMMENTS_PER_BLOCK), &self.account)
            .await?;

        let vpos = (Utc::now() - self.waku.stream.open_time)
            .num_milliseconds()
            .max(0)
            / 10;
        let mail = if iyayo { r#" mail="184""# } else { "" };
        let frame = format!(
            r#"<chat thread="{}" ticket="{}" vpos="{vpos}" postkey="{}"{mail} user_id="{}" premium="{}">{}</chat>"#,
            xml::escape(thread),
            xml::escape(&ticket),
            xml::escape(&post_key),
            xml::escape(&self.waku.user.user_id),
            u8::from(self.waku.user.is_premium),
            xml::escape(text),
        );

        self.conn.send(&frame).await?;
        log::debug!(target: self.log.target(), "sent comment to {}", self.waku.broad_id);
        Ok(())
    }

    /// Close the session. No events are delivered after this returns.
    pub async fn disconnect(&self) -> Result<(), NicoError> {
        let was_open = self.conn.is_connected();
        self.conn.disconnect().await?;
        if was_open {
            self.events.proceed_nico_event(NicoEvent::CommentClose);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nicolive::event::RecordingEventReceiver;
    use crate::nicolive::live_waku::{CommentServer, UserInfo};
    use crate::nicolive::user::User;
    use async_trait::async_trait;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    /// API stub that only answers post keys, recording the block number.
    #[derive(Debug, Default)]
    struct PostKeyApi {
        blocks: Mutex<Vec<u64>>,
    }

    #[async_trait]
    impl NicoApi for PostKeyApi {
        async fn fetch_information(&self, _: &str, _: &Account) -> Result<LiveWaku, NicoError> {
            Err(NicoError::Other("unused".into()))
        }
        async fn fetch_post_key(&self, _: &str, block_no: u64, _: &Account) -> Result<String, NicoError> {
            self.blocks.lock().unwrap().push(block_no);
            Ok("pk".into())
        }
        async fn publish_status(&self, _: &str, _: &Account) -> Result<String, NicoError> {
            Err(NicoError::Other("unused".into()))
        }
        async fn comment_owner(&self, _: &str, _: &str, _: &str, _: &Account) -> Result<(), NicoError> {
            Err(NicoError::Other("unused".into()))
        }
        async fn login(&self, _: &mut Account) -> Result<(), NicoError> {
            Err(NicoError::Other("unused".into()))
        }
        async fn fetch_user_info(&self, _: &str, _: &Account) -> Result<User, NicoError> {
            Err(NicoError::Other("unused".into()))
        }
    }

    fn waku_for(addr: std::net::SocketAddr) -> LiveWaku {
        LiveWaku {
            broad_id: "lv12345".into(),
            user: UserInfo {
                user_id: "42".into(),
                nickname: "viewer".into(),
                is_premium: false,
            },
            comment_server: CommentServer {
                addr: addr.ip().to_string(),
                port: addr.port(),
                thread: "1000".into(),
            },
            ..LiveWaku::default()
        }
    }

    async fn read_frame(server: &mut TcpStream) -> String {
        let mut out = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            tokio::time::timeout(Duration::from_secs(2), server.read_exact(&mut byte))
                .await
                .expect("Timed out reading frame")
                .unwrap();
            if byte[0] == 0 {
                return String::from_utf8(out).unwrap();
            }
            out.push(byte[0]);
        }
    }

    async fn wait_for(events: &RecordingEventReceiver, n: usize) -> Vec<NicoEvent> {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        loop {
            let recorded = events.events();
            if recorded.len() >= n {
                return recorded;
            }
            assert!(tokio::time::Instant::now() < deadline, "only got {recorded:?}");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[test]
    fn test_chat_frame_to_comment() {
        let state = Mutex::new(ThreadState::default());
        let log = Logger::root("test");
        let event = handle_frame(
            r#"<chat thread="1000" no="7" vpos="100" date="1500000000" mail="184" user_id="abcXYZ" premium="1" anonymity="1">hi &lt;3</chat>"#,
            &state,
            &log,
        );
        let Some(NicoEvent::CommentGot(c)) = event else {
            panic!("expected CommentGot, got {event:?}");
        };
        assert_eq!(c.no, 7);
        assert_eq!(c.comment, "hi <3");
        assert_eq!(c.user_id, "abcXYZ");
        assert!(c.is_premium && c.is_anonymity && !c.is_broadcaster);
        assert_eq!(c.date.timestamp(), 1_500_000_000);
        assert_eq!(state.lock().unwrap().last_no, 7);
    }

    #[test]
    fn test_chat_result_and_unknown_frames() {
        let state = Mutex::new(ThreadState::default());
        let log = Logger::root("test");
        assert!(handle_frame(r#"<chat_result thread="1" status="0"/>"#, &state, &log).is_none());
        assert!(matches!(
            handle_frame(r#"<chat_result thread="1" status="4"/>"#, &state, &log),
            Some(NicoEvent::CommentErr(NicoError::SendComment(_)))
        ));
        assert!(handle_frame("<view_counter/>", &state, &log).is_none());
        assert!(handle_frame("garbage", &state, &log).is_none());
    }

    #[tokio::test]
    async fn test_session_open_receive_and_send() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let waku = waku_for(listener.local_addr().unwrap());
        let api = Arc::new(PostKeyApi::default());
        let events = Arc::new(RecordingEventReceiver::default());

        let session = CommentConnection::connect(
            waku,
            Account::default(),
            Arc::clone(&api) as Arc<dyn NicoApi>,
            Arc::clone(&events) as Arc<dyn EventReceiver>,
            Logger::root("test"),
        )
        .await
        .unwrap();
        let (mut server, _) = listener.accept().await.unwrap();

        let request = read_frame(&mut server).await;
        assert!(request.starts_with(r#"<thread thread="1000" version="20061206""#), "{request}");

        server
            .write_all(b"<thread resultcode=\"0\" thread=\"1000\" ticket=\"0xabc\" last_res=\"250\"/>\0<chat no=\"251\" user_id=\"9\">yo</chat>\0")
            .await
            .unwrap();
        let recorded = wait_for(&events, 2).await;
        assert_eq!(recorded[0], NicoEvent::CommentOpen);
        assert!(matches!(&recorded[1], NicoEvent::CommentGot(c) if c.comment == "yo"));

        session.send_comment("hello & bye", true).await.unwrap();
        let chat = read_frame(&mut server).await;
        assert!(chat.contains(r#"ticket="0xabc""#), "{chat}");
        assert!(chat.contains(r#"postkey="pk""#));
        assert!(chat.contains(r#"mail="184""#));
        assert!(chat.ends_with(">hello &amp; bye</chat>"));
        assert_eq!(*api.blocks.lock().unwrap(), vec![2]);

        session.disconnect().await.unwrap();
        assert_eq!(events.events().last(), Some(&NicoEvent::CommentClose));
        assert!(session.send_comment("late", false).await.is_err());
    }

    #[tokio::test]
    async fn test_send_before_thread_open_fails() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let waku = waku_for(listener.local_addr().unwrap());
        let events = Arc::new(RecordingEventReceiver::default());

        let session = CommentConnection::connect(
            waku,
            Account::default(),
            Arc::new(PostKeyApi::default()),
            events,
            Logger::root("test"),
        )
        .await
        .unwrap();
        let (_server, _) = listener.accept().await.unwrap();

        let err = session.send_comment("hello", false).await.unwrap_err();
        assert!(matches!(err, NicoError::SendComment(_)));
        session.disconnect().await.unwrap();
    }
}
