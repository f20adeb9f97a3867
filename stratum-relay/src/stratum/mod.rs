//! Stratum message layer.
//!
//! Workers and pools speak line-delimited JSON-RPC: every frame is one JSON
//! object terminated by LF. The relay decodes every frame rather than piping
//! bytes, so that it can intercept logins and route by content.
//!
//! # Message shapes
//!
//! - [`Request`]: `{"id": 1, "method": "login", "params": {...}}`, sent by
//!   workers (and re-issued by the relay for the pool login).
//! - [`Response`]: `{"id": 1, "result": ..., "error": ..., "jsonrpc": "2.0"}`,
//!   sent by pools. A response carrying `method` is a pool-initiated call
//!   such as a new job.
//!
//! # Usage
//!
//! ```rust,ignore
//! use stratum::{LineCodec, Message, Request};
//!
//! let mut lines = FramedRead::new(read_half, LineCodec::new());
//! while let Some(line) = lines.next().await {
//!     let req = Request::decode(&line?)?;
//!     // ...
//! }
//! ```

mod codec;
mod error;
mod messages;

pub use codec::{trim_frame, LineCodec, Message, DEFAULT_MAX_LINE_LENGTH};
pub use error::{StratumError, StratumResult};
pub use messages::{create_login_request, ErrorCode, Params, Request, Response, LOGIN_METHOD};
