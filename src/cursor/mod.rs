//! Streaming multi-batch cursor with prefetch/backpressure (spec §4.5).

use std::collections::VecDeque;

use tokio::sync::mpsc;

use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::proto::{Response, ResponseType};
use crate::term::Datum;

/// A finite or potentially infinite stream over a query token.
///
/// Created when a START (or CONTINUE) yields `SUCCESS_SEQUENCE` or
/// `SUCCESS_PARTIAL`; destroyed when drained, errored, or explicitly
/// closed.
pub struct Cursor {
    conn: Connection,
    token: u64,
    queue: VecDeque<Datum>,
    threshold: usize,
    outstanding_continue: bool,
    end_flag: bool,
    error: Option<Error>,
    rx: mpsc::Receiver<Result<Response>>,
    rows_fetched: u64,
}

impl Cursor {
    pub(crate) fn new(
        conn: Connection,
        token: u64,
        initial_batch: Vec<Datum>,
        end_flag: bool,
        rx: mpsc::Receiver<Result<Response>>,
    ) -> Cursor {
        let threshold = (initial_batch.len() / 2).max(1);
        let rows_fetched = initial_batch.len() as u64;
        Cursor {
            conn,
            token,
            queue: initial_batch.into(),
            threshold,
            outstanding_continue: false,
            end_flag,
            error: None,
            rx,
            rows_fetched,
        }
    }

    /// Pops the next value, awaiting a CONTINUE batch if the queue is
    /// drained and more is expected; raises `ReqlCursorEmpty` at true
    /// end-of-stream.
    pub async fn next(&mut self) -> Result<Datum> {
        loop {
            if let Some(value) = self.queue.pop_front() {
                self.maybe_prefetch().await?;
                return Ok(value);
            }
            if let Some(err) = self.error.take() {
                return Err(err);
            }
            if self.end_flag {
                return Err(Error::ReqlCursorEmpty);
            }
            self.maybe_prefetch().await?;
            match self.rx.recv().await {
                Some(Ok(response)) => self.ingest(response),
                Some(Err(e)) => self.error = Some(e),
                None => self.error = Some(Error::connection_closed()),
            }
        }
    }

    /// Drains the remaining cursor into a `Vec`, stopping at
    /// end-of-stream. Errors mid-stream propagate.
    pub async fn collect(mut self) -> Result<Vec<Datum>> {
        let mut out = Vec::new();
        loop {
            match self.next().await {
                Ok(v) => out.push(v),
                Err(Error::ReqlCursorEmpty) => return Ok(out),
                Err(e) => return Err(e),
            }
        }
    }

    /// If still partial, issues STOP and detaches from the connection's
    /// waiter registry; otherwise just detaches.
    pub async fn close(&mut self) -> Result<()> {
        if !self.end_flag {
            self.conn.stop_token(self.token).await?;
            self.end_flag = true;
        } else {
            self.conn.deregister(self.token);
        }
        Ok(())
    }

    pub fn has_more(&self) -> bool {
        !self.end_flag || !self.queue.is_empty()
    }

    pub fn is_exhausted(&self) -> bool {
        self.end_flag && self.queue.is_empty() && self.error.is_none()
    }

    pub fn buffered_count(&self) -> usize {
        self.queue.len()
    }

    pub fn rows_fetched(&self) -> u64 {
        self.rows_fetched
    }

    /// Issues CONTINUE when the queue has drained past `threshold`
    /// (spec §4.5's prefetch discipline); never more than one outstanding
    /// CONTINUE at a time (Testable Property 7).
    async fn maybe_prefetch(&mut self) -> Result<()> {
        if self.queue.len() <= self.threshold
            && !self.end_flag
            && !self.outstanding_continue
            && self.error.is_none()
        {
            self.outstanding_continue = true;
            self.conn.continue_token(self.token).await?;
        }
        Ok(())
    }

    fn ingest(&mut self, response: Response) {
        self.outstanding_continue = false;
        if response.response_type.is_error() {
            self.end_flag = true;
            self.error = Some(response.into_error(None));
            return;
        }
        self.end_flag = response.response_type == ResponseType::SuccessSequence;
        let batch_len = response.result.len();
        self.rows_fetched += batch_len as u64;
        self.queue.extend(response.result);
        self.threshold = (batch_len / 2).max(1);
    }
}
