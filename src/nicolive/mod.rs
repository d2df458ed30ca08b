//! Live connection and broadcast protocol.
//!
//! ```text
//! NicoApi (HTTP)          CommentConnection
//!   fetch_information ──►   LiveWaku ──► LiveConnection (TCP, NUL frames)
//!   fetch_post_key    ◄──   send_comment        │
//!   publish_status                              ▼
//!   comment_owner                          EventReceiver (NicoEvent)
//!   login / user info
//! ```

pub mod account;
pub mod api;
pub mod comment;
pub mod connection;
pub mod error;
pub mod event;
pub mod framing;
pub mod live_waku;
pub mod retry;
pub mod user;
pub mod xml;

pub use account::Account;
pub use api::{ApiEndpoints, HttpNicoApi, NicoApi};
pub use comment::{Comment, CommentConnection};
pub use connection::LiveConnection;
pub use error::{ErrorKind, NicoError};
pub use event::{EventReceiver, NicoEvent};
pub use live_waku::LiveWaku;
pub use retry::{RetryDecision, RetryPolicy};
pub use user::{is_184_user_id, MemoryUserStore, User, UserFetcher, UserStore};
