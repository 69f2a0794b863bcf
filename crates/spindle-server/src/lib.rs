//! Lookup server for spindle.
//!
//! A blocking, thread-per-connection line server speaking the disc
//! metadata protocol, with a one-shot HTTP wrapper of the same
//! commands and the frame-distance matching engine behind them.

#![deny(unsafe_code)]
#![warn(missing_debug_implementations)]

pub mod error;
pub mod http;
pub mod matching;
pub mod net;
pub mod protocol;

pub use error::{Result, ServerError};
pub use net::{LineServer, Session, SessionHandler};
pub use protocol::CddbProtocol;
