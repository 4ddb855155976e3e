//! Connection: socket ownership, token allocation, waiter registry, and the
//! submission protocol (spec §4.4).

mod stream;

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, trace, warn};
use tokio::io::{split, AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;

use crate::cursor::Cursor;
use crate::error::{Error, Result};
use crate::handshake::Handshake;
use crate::proto::{Query, Response, ResponseType};
use crate::term::{DecodeOpts, Datum, Format, Term};

use stream::AnyStream;

/// TLS parameters, present only when the `tls` feature is enabled.
#[cfg(feature = "tls")]
#[derive(Clone)]
pub struct TlsOpts {
    pub connector: tokio_rustls::TlsConnector,
    pub server_name: String,
}

/// Parameters accepted by `connect` (spec §4.4).
#[derive(Clone)]
pub struct ConnectOpts {
    pub host: String,
    pub port: u16,
    pub db: Option<String>,
    pub user: String,
    pub password: String,
    pub timeout: Duration,
    #[cfg(feature = "tls")]
    pub tls: Option<TlsOpts>,
}

impl ConnectOpts {
    pub fn new(host: impl Into<String>, port: u16, user: impl Into<String>, password: impl Into<String>) -> Self {
        ConnectOpts {
            host: host.into(),
            port,
            db: None,
            user: user.into(),
            password: password.into(),
            timeout: Duration::from_secs(20),
            #[cfg(feature = "tls")]
            tls: None,
        }
    }

    pub fn db(mut self, db: impl Into<String>) -> Self {
        self.db = Some(db.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Options accepted by a single `run` call (spec §4.1's global options
/// table plus the `db`/`noreply` shortcuts spec §4.4 singles out).
#[derive(Clone, Default)]
pub struct RunOpts {
    pub db: Option<String>,
    pub noreply: bool,
    pub time_format: Format,
    pub binary_format: Format,
    pub group_format: Format,
    pub global_opts: BTreeMap<String, Term>,
}

impl RunOpts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn db(mut self, db: impl Into<String>) -> Self {
        self.db = Some(db.into());
        self
    }

    pub fn noreply(mut self, noreply: bool) -> Self {
        self.noreply = noreply;
        self
    }

    /// `time_format` global opt (spec §4.1): `Native` (default, decoded to a
    /// `Datum::Time`) or `Raw` (left as the tagged object).
    pub fn time_format(mut self, format: Format) -> Self {
        self.time_format = format;
        self
    }

    /// `binary_format` global opt (spec §4.1).
    pub fn binary_format(mut self, format: Format) -> Self {
        self.binary_format = format;
        self
    }

    /// `group_format` global opt (spec §4.1).
    pub fn group_format(mut self, format: Format) -> Self {
        self.group_format = format;
        self
    }

    fn decode_opts(&self) -> DecodeOpts {
        DecodeOpts {
            time_format: self.time_format,
            binary_format: self.binary_format,
            group_format: self.group_format,
        }
    }

    pub fn opt(mut self, key: impl Into<String>, value: impl Into<Term>) -> Self {
        self.global_opts.insert(key.into(), value.into());
        self
    }
}

/// What `run` resolves to, per spec §4.4 step 6.
pub enum QueryResult {
    Atom(Datum),
    Sequence(Cursor),
    ServerInfo(ServerInfo),
    None,
}

#[derive(Debug, Clone)]
pub struct ServerInfo {
    pub id: String,
    pub name: Option<String>,
    pub proxy: bool,
}

enum Waiter {
    Atom(oneshot::Sender<Result<Response>>),
    Sequence(mpsc::Sender<Result<Response>>),
}

struct Shared {
    writer: Mutex<WriteHalf<AnyStream>>,
    next_token: AtomicU64,
    waiters: Mutex<HashMap<u64, Waiter>>,
    /// Per-token decode preferences (spec §4.1's `time_format`/
    /// `binary_format`/`group_format`), populated at submission and
    /// consulted by `reader_loop` since it decodes before any waiter-side
    /// code sees the response. Cleared alongside the waiter once a token's
    /// final response has been delivered.
    format_opts: Mutex<HashMap<u64, DecodeOpts>>,
    closed: AtomicBool,
    default_db: Mutex<Option<String>>,
    reader_handle: Mutex<Option<JoinHandle<()>>>,
    connect_opts: ConnectOpts,
}

/// One logical connection to the server: owns the socket, hands out
/// tokens, and multiplexes responses to whichever waiter submitted the
/// matching query (spec §4.4).
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Shared>,
}

thread_local! {
    static DEFAULT_CONNECTION: RefCell<Option<Connection>> = const { RefCell::new(None) };
}

impl Connection {
    /// Opens TCP (honoring `timeout`), optionally wraps TLS, drives the
    /// handshake to completion, spawns the reader task, and returns.
    pub async fn connect(opts: ConnectOpts) -> Result<Connection> {
        let timeout = opts.timeout;
        tokio::time::timeout(timeout, Self::connect_inner(opts))
            .await
            .map_err(|_| Error::TimeoutError { timeout })?
    }

    async fn connect_inner(opts: ConnectOpts) -> Result<Connection> {
        let tcp = TcpStream::connect((opts.host.as_str(), opts.port)).await?;
        tcp.set_nodelay(true).ok();

        #[cfg(feature = "tls")]
        let stream = match &opts.tls {
            Some(tls) => {
                let name = tokio_rustls::rustls::pki_types::ServerName::try_from(tls.server_name.clone())
                    .map_err(|e| Error::driver(format!("invalid TLS server name: {e}")))?;
                let tls_stream = tls.connector.connect(name, tcp).await?;
                AnyStream::Tls(Box::new(tls_stream))
            }
            None => AnyStream::Plain(tcp),
        };
        #[cfg(not(feature = "tls"))]
        let stream = AnyStream::Plain(tcp);

        let (mut reader, mut writer) = split(stream);

        let mut handshake = Handshake::new(opts.user.clone(), opts.password.clone());
        let first = handshake.first_message()?;
        writer.write_all(&first).await?;
        let first_response = read_until_nul(&mut reader).await?;
        let second = handshake.handle_first_response(&first_response)?;
        writer.write_all(&second).await?;
        let final_response = read_until_nul(&mut reader).await?;
        handshake.handle_final_response(&final_response)?;
        debug!("handshake complete for {}:{}", opts.host, opts.port);

        let default_db = opts.db.clone();
        let shared = Arc::new(Shared {
            writer: Mutex::new(writer),
            next_token: AtomicU64::new(1),
            waiters: Mutex::new(HashMap::new()),
            format_opts: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
            default_db: Mutex::new(default_db),
            reader_handle: Mutex::new(None),
            connect_opts: opts,
        });

        let reader_shared = shared.clone();
        let handle = tokio::spawn(async move { reader_loop(reader_shared, reader).await });
        *shared.reader_handle.lock().await = Some(handle);

        Ok(Connection { inner: shared })
    }

    /// Registers this connection as the task-local default so `Term::run`
    /// callers can omit the connection argument (SPEC_FULL §B.1).
    pub fn repl(self) {
        DEFAULT_CONNECTION.with(|cell| *cell.borrow_mut() = Some(self));
    }

    /// Retrieves the connection registered by a prior `repl()` call on
    /// this thread, if any.
    pub fn default() -> Option<Connection> {
        DEFAULT_CONNECTION.with(|cell| cell.borrow().clone())
    }

    /// Sets the default database merged into subsequent `run`s unless the
    /// caller overrides `db` explicitly (spec §4.4; SPEC_FULL §B.2).
    pub async fn use_(&self, db: impl Into<String>) {
        *self.inner.default_db.lock().await = Some(db.into());
    }

    fn next_token(&self) -> Result<u64> {
        let token = self.inner.next_token.fetch_add(1, Ordering::Relaxed);
        if token == u64::MAX {
            self.inner.closed.store(true, Ordering::SeqCst);
            return Err(Error::driver("token allocator overflow"));
        }
        Ok(token)
    }

    async fn write_frame(&self, frame: &[u8]) -> Result<()> {
        let mut writer = self.inner.writer.lock().await;
        writer.write_all(frame).await?;
        Ok(())
    }

    /// Submit a term for execution (spec §4.4 "Submission protocol").
    pub async fn run(&self, term: Term, opts: RunOpts) -> Result<Option<QueryResult>> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(Error::connection_closed());
        }
        let token = self.next_token()?;
        let decode_opts = opts.decode_opts();

        let mut global_opts = opts.global_opts;
        let db = opts.db.or(self.inner.default_db.lock().await.clone());
        if let Some(db) = db {
            global_opts.entry("db".to_string()).or_insert_with(|| Term::db(db));
        }
        if opts.noreply {
            global_opts.insert("noreply".to_string(), Term::from(true));
        }
        if opts.time_format == Format::Raw {
            global_opts
                .entry("time_format".to_string())
                .or_insert_with(|| Term::from(Format::Raw.as_str()));
        }
        if opts.binary_format == Format::Raw {
            global_opts
                .entry("binary_format".to_string())
                .or_insert_with(|| Term::from(Format::Raw.as_str()));
        }
        if opts.group_format == Format::Raw {
            global_opts
                .entry("group_format".to_string())
                .or_insert_with(|| Term::from(Format::Raw.as_str()));
        }

        let encoded_term = term.encode();
        let query = Query::start(token, term, global_opts);
        let frame = query.encode_frame();

        if opts.noreply {
            self.write_frame(&frame).await?;
            trace!("submitted noreply query token={token}");
            return Ok(None);
        }

        let (tx, rx) = oneshot::channel();
        self.inner.waiters.lock().await.insert(token, Waiter::Atom(tx));
        self.inner.format_opts.lock().await.insert(token, decode_opts);
        if let Err(e) = self.write_frame(&frame).await {
            self.inner.waiters.lock().await.remove(&token);
            self.inner.format_opts.lock().await.remove(&token);
            return Err(e);
        }

        let response = rx.await.map_err(|_| Error::connection_closed())??;
        self.dispatch_first_response(token, encoded_term, response).await
    }

    async fn dispatch_first_response(
        &self,
        token: u64,
        term_json: serde_json::Value,
        response: Response,
    ) -> Result<Option<QueryResult>> {
        match response.response_type {
            ResponseType::SuccessAtom => {
                let datum = response.result.into_iter().next().unwrap_or(Datum::Null);
                Ok(Some(QueryResult::Atom(datum)))
            }
            ResponseType::SuccessSequence | ResponseType::SuccessPartial => {
                let end_flag = response.response_type == ResponseType::SuccessSequence;
                let (tx, rx) = mpsc::channel(1);
                if !end_flag {
                    self.inner
                        .waiters
                        .lock()
                        .await
                        .insert(token, Waiter::Sequence(tx));
                }
                let cursor =
                    Cursor::new(self.clone(), token, response.result, end_flag, rx);
                Ok(Some(QueryResult::Sequence(cursor)))
            }
            ResponseType::WaitComplete => Ok(None),
            ResponseType::ServerInfo => {
                let obj = response.result.first().and_then(Datum::as_object);
                let id = obj
                    .and_then(|o| o.get("id"))
                    .and_then(Datum::as_str)
                    .unwrap_or_default()
                    .to_string();
                let name = obj
                    .and_then(|o| o.get("name"))
                    .and_then(Datum::as_str)
                    .map(str::to_string);
                let proxy = obj
                    .and_then(|o| o.get("proxy"))
                    .and_then(Datum::as_bool)
                    .unwrap_or(false);
                Ok(Some(QueryResult::ServerInfo(ServerInfo { id, name, proxy })))
            }
            error_type if error_type.is_error() => Err(response.into_error(Some(term_json))),
            _ => Err(Error::driver("unexpected response type for a START query")),
        }
    }

    /// Issues CONTINUE for `token`; used internally by `Cursor`.
    pub(crate) async fn continue_token(&self, token: u64) -> Result<()> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(Error::connection_closed());
        }
        let frame = Query::continue_(token).encode_frame();
        self.write_frame(&frame).await
    }

    /// Issues STOP for `token`; used internally by `Cursor::close`.
    pub(crate) async fn stop_token(&self, token: u64) -> Result<()> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Ok(());
        }
        let frame = Query::stop(token).encode_frame();
        self.write_frame(&frame).await?;
        self.inner.waiters.lock().await.remove(&token);
        self.inner.format_opts.lock().await.remove(&token);
        Ok(())
    }

    pub(crate) fn deregister(&self, token: u64) {
        if let Ok(mut waiters) = self.inner.waiters.try_lock() {
            waiters.remove(&token);
        }
        if let Ok(mut format_opts) = self.inner.format_opts.try_lock() {
            format_opts.remove(&token);
        }
    }

    /// Submits NOREPLY_WAIT and awaits `WAIT_COMPLETE` (spec §4.4).
    pub async fn noreply_wait(&self) -> Result<()> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(Error::connection_closed());
        }
        let token = self.next_token()?;
        let (tx, rx) = oneshot::channel();
        self.inner.waiters.lock().await.insert(token, Waiter::Atom(tx));
        let frame = Query::noreply_wait(token).encode_frame();
        if let Err(e) = self.write_frame(&frame).await {
            self.inner.waiters.lock().await.remove(&token);
            return Err(e);
        }
        let response = rx.await.map_err(|_| Error::connection_closed())??;
        match response.response_type {
            ResponseType::WaitComplete => Ok(()),
            error_type if error_type.is_error() => Err(response.into_error(None)),
            _ => Err(Error::driver("unexpected response to NOREPLY_WAIT")),
        }
    }

    /// Submits SERVER_INFO (spec §4.4).
    pub async fn server(&self) -> Result<ServerInfo> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(Error::connection_closed());
        }
        let token = self.next_token()?;
        let (tx, rx) = oneshot::channel();
        self.inner.waiters.lock().await.insert(token, Waiter::Atom(tx));
        let frame = Query::server_info(token).encode_frame();
        if let Err(e) = self.write_frame(&frame).await {
            self.inner.waiters.lock().await.remove(&token);
            return Err(e);
        }
        let response = rx.await.map_err(|_| Error::connection_closed())??;
        match self.dispatch_first_response(token, serde_json::Value::Null, response).await? {
            Some(QueryResult::ServerInfo(info)) => Ok(info),
            _ => Err(Error::driver("unexpected response to SERVER_INFO")),
        }
    }

    /// Closes the connection (spec §4.4). If `wait` is set, first submits
    /// NOREPLY_WAIT and awaits completion.
    pub async fn close(&self, wait: bool) -> Result<()> {
        if wait {
            let _ = self.noreply_wait().await;
        }
        self.shut_down(Error::connection_closed).await
    }

    async fn shut_down(&self, fail_with: impl Fn() -> Error) -> Result<()> {
        self.inner.closed.store(true, Ordering::SeqCst);
        let mut waiters = self.inner.waiters.lock().await;
        for (_, waiter) in waiters.drain() {
            match waiter {
                Waiter::Atom(tx) => {
                    let _ = tx.send(Err(fail_with()));
                }
                Waiter::Sequence(tx) => {
                    let _ = tx.try_send(Err(fail_with()));
                }
            }
        }
        drop(waiters);
        self.inner.format_opts.lock().await.clear();
        let mut writer = self.inner.writer.lock().await;
        let _ = writer.shutdown().await;
        drop(writer);
        if let Some(handle) = self.inner.reader_handle.lock().await.take() {
            handle.abort();
        }
        Ok(())
    }

    /// `close` then `connect` with the saved parameters (spec §4.4).
    pub async fn reconnect(&self, wait: bool) -> Result<Connection> {
        self.close(wait).await?;
        Connection::connect(self.inner.connect_opts.clone()).await
    }
}

async fn read_until_nul(reader: &mut ReadHalf<AnyStream>) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    loop {
        let byte = reader.read_u8().await?;
        if byte == 0 {
            return Ok(buf);
        }
        buf.push(byte);
    }
}

async fn reader_loop(shared: Arc<Shared>, mut reader: ReadHalf<AnyStream>) {
    loop {
        let token = match reader.read_u64_le().await {
            Ok(t) => t,
            Err(e) => {
                warn!("connection reader stopped: {e}");
                break;
            }
        };
        let len = match reader.read_u32_le().await {
            Ok(l) => l as usize,
            Err(e) => {
                warn!("connection reader stopped mid-frame: {e}");
                break;
            }
        };
        let mut body = vec![0u8; len];
        if let Err(e) = reader.read_exact(&mut body).await {
            warn!("connection reader stopped reading body: {e}");
            break;
        }

        let decode_opts = shared
            .format_opts
            .lock()
            .await
            .get(&token)
            .copied()
            .unwrap_or_default();
        let response = Response::decode(token, &body, &decode_opts);
        let mut waiters = shared.waiters.lock().await;
        let Some(waiter) = waiters.remove(&token) else {
            trace!("response for unknown or already-closed token {token}");
            continue;
        };
        match waiter {
            Waiter::Atom(tx) => {
                // A response delivered through the one-shot `Atom` waiter can
                // still be `SuccessPartial` (the first batch of a cursor,
                // before `dispatch_first_response` upgrades its waiter to
                // `Sequence`): keep `format_opts` around in that case so the
                // CONTINUE batches that follow decode with the same
                // time/binary/group format the caller asked for.
                let is_final = !matches!(
                    &response,
                    Ok(r) if r.response_type == ResponseType::SuccessPartial
                );
                drop(waiters);
                if is_final {
                    shared.format_opts.lock().await.remove(&token);
                }
                let _ = tx.send(response);
            }
            Waiter::Sequence(tx) => {
                let is_final = matches!(
                    &response,
                    Ok(r) if r.response_type != ResponseType::SuccessPartial
                );
                if !is_final {
                    waiters.insert(token, Waiter::Sequence(tx.clone()));
                }
                drop(waiters);
                if is_final {
                    shared.format_opts.lock().await.remove(&token);
                }
                let _ = tx.send(response).await;
                continue;
            }
        }
    }

    shared.closed.store(true, Ordering::SeqCst);
    let mut waiters = shared.waiters.lock().await;
    for (_, waiter) in waiters.drain() {
        match waiter {
            Waiter::Atom(tx) => {
                let _ = tx.send(Err(Error::connection_closed()));
            }
            Waiter::Sequence(tx) => {
                let _ = tx.try_send(Err(Error::connection_closed()));
            }
        }
    }
    drop(waiters);
    shared.format_opts.lock().await.clear();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_opts_builder_sets_db_and_timeout() {
        let opts = ConnectOpts::new("localhost", 28015, "admin", "")
            .db("test")
            .timeout(Duration::from_secs(5));
        assert_eq!(opts.db.as_deref(), Some("test"));
        assert_eq!(opts.timeout, Duration::from_secs(5));
    }

    #[test]
    fn run_opts_builder_collects_global_opts() {
        let opts = RunOpts::new().db("test").noreply(true).opt("durability", "soft");
        assert_eq!(opts.db.as_deref(), Some("test"));
        assert!(opts.noreply);
        assert!(opts.global_opts.contains_key("durability"));
    }

    #[test]
    fn run_opts_raw_time_format_is_reflected_in_decode_opts() {
        let opts = RunOpts::new().time_format(Format::Raw);
        assert_eq!(opts.decode_opts().time_format, Format::Raw);
        assert_eq!(opts.decode_opts().binary_format, Format::Native);
    }
}
