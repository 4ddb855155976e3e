//! Core driver for a realtime document database that speaks a proprietary
//! query language serialized as JSON over a framed TCP protocol.
//!
//! This crate is the protocol core only: query AST and canonical JSON
//! encoding (`term`), the length-framed wire codec (`proto`), the
//! SCRAM-SHA-256 authenticated handshake (`handshake`), the connection
//! state machine that multiplexes many logical queries over one socket
//! (`connection`), and the streaming cursor engine (`cursor`). The
//! blocking/async/greenlet-flavored facades a full client ships are built
//! on top of this core; they are out of scope here.
//!
//! ```no_run
//! use reql_core::connection::{Connection, ConnectOpts, RunOpts, QueryResult};
//! use reql_core::term::{expr, Term};
//!
//! # async fn run() -> reql_core::error::Result<()> {
//! let conn = Connection::connect(ConnectOpts::new("localhost", 28015, "admin", "")).await?;
//! let term = Term::db("test").table("users").get(1i64);
//! match term.run(&conn, RunOpts::new()).await? {
//!     Some(QueryResult::Atom(datum)) => println!("{datum:?}"),
//!     Some(QueryResult::Sequence(mut cursor)) => {
//!         while let Ok(row) = cursor.next().await {
//!             println!("{row:?}");
//!         }
//!     }
//!     _ => {}
//! }
//! # Ok(())
//! # }
//! ```

pub mod connection;
pub mod cursor;
pub mod error;
pub mod handshake;
pub mod proto;
pub mod term;

pub use connection::{ConnectOpts, Connection, QueryResult, RunOpts, ServerInfo};
pub use cursor::Cursor;
pub use error::{Error, Result};
pub use term::{expr, Datum, Term};
