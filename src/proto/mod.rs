//! Wire envelope types and the length-prefixed frame codec (spec §4.2, §6).
//!
//! This module is pure data in, data out — no I/O. The socket-level framing
//! (`read_exact`/`write_all` calls) lives in `connection`.

use std::collections::BTreeMap;

use bytes::{BufMut, BytesMut};
use serde_json::{Map, Number, Value};

use crate::error::{BacktraceFrame, Error, ErrorContext, Result};
use crate::term::{DecodeOpts, Datum, Term};

/// `query_type` discriminant (spec §3, §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryType {
    Start = 1,
    Continue = 2,
    Stop = 3,
    NoreplyWait = 4,
    ServerInfo = 5,
}

/// `response_type` discriminant (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseType {
    SuccessAtom = 1,
    SuccessSequence = 2,
    SuccessPartial = 3,
    WaitComplete = 4,
    ServerInfo = 5,
    ClientError = 16,
    CompileError = 17,
    RuntimeError = 18,
}

impl ResponseType {
    fn from_code(code: i64) -> Result<ResponseType> {
        Ok(match code {
            1 => ResponseType::SuccessAtom,
            2 => ResponseType::SuccessSequence,
            3 => ResponseType::SuccessPartial,
            4 => ResponseType::WaitComplete,
            5 => ResponseType::ServerInfo,
            16 => ResponseType::ClientError,
            17 => ResponseType::CompileError,
            18 => ResponseType::RuntimeError,
            other => return Err(Error::driver(format!("unknown response type {other}"))),
        })
    }

    pub fn is_error(self) -> bool {
        matches!(
            self,
            ResponseType::ClientError | ResponseType::CompileError | ResponseType::RuntimeError
        )
    }
}

/// An outgoing query envelope (spec §3, §4.2).
#[derive(Debug, Clone)]
pub struct Query {
    pub query_type: QueryType,
    pub token: u64,
    pub term: Option<Term>,
    pub global_opts: Option<BTreeMap<String, Term>>,
}

impl Query {
    pub fn start(token: u64, term: Term, global_opts: BTreeMap<String, Term>) -> Query {
        Query {
            query_type: QueryType::Start,
            token,
            term: Some(term),
            global_opts: Some(global_opts),
        }
    }

    pub fn continue_(token: u64) -> Query {
        Query {
            query_type: QueryType::Continue,
            token,
            term: None,
            global_opts: None,
        }
    }

    pub fn stop(token: u64) -> Query {
        Query {
            query_type: QueryType::Stop,
            token,
            term: None,
            global_opts: None,
        }
    }

    pub fn noreply_wait(token: u64) -> Query {
        Query {
            query_type: QueryType::NoreplyWait,
            token,
            term: None,
            global_opts: None,
        }
    }

    pub fn server_info(token: u64) -> Query {
        Query {
            query_type: QueryType::ServerInfo,
            token,
            term: None,
            global_opts: None,
        }
    }

    /// Body JSON array: `[query_type, term?, global_opts?]`.
    fn encode_body(&self) -> Value {
        let mut parts = vec![Value::Number(Number::from(self.query_type as i64))];
        if let Some(term) = &self.term {
            parts.push(term.encode());
            let mut opts = Map::new();
            if let Some(global_opts) = &self.global_opts {
                for (k, v) in global_opts {
                    opts.insert(k.clone(), v.encode());
                }
            }
            parts.push(Value::Object(opts));
        }
        Value::Array(parts)
    }

    /// Encode the full outgoing frame: `token (u64 LE) || len (u32 LE) || body`.
    pub fn encode_frame(&self) -> Vec<u8> {
        let body = serde_json::to_vec(&self.encode_body()).expect("query body always serializes");
        encode_frame(self.token, &body)
    }
}

/// Encode a length-prefixed frame around an already-serialized JSON body.
pub fn encode_frame(token: u64, body: &[u8]) -> Vec<u8> {
    let mut out = BytesMut::with_capacity(8 + 4 + body.len());
    out.put_u64_le(token);
    out.put_u32_le(body.len() as u32);
    out.put_slice(body);
    out.to_vec()
}

/// A decoded incoming response envelope (spec §3).
#[derive(Debug, Clone)]
pub struct Response {
    pub token: u64,
    pub response_type: ResponseType,
    pub result: Vec<Datum>,
    pub notes: Vec<i64>,
    pub backtrace: Vec<BacktraceFrame>,
    pub profile: Option<Value>,
    pub error_kind: Option<u32>,
}

impl Response {
    /// Decode a response body (the JSON object after the frame header) for
    /// a given `token` (carried separately in the frame, spec §4.2),
    /// honoring the submitting `run`'s `time_format`/`binary_format`/
    /// `group_format` preferences (spec §4.1).
    pub fn decode(token: u64, body: &[u8], opts: &DecodeOpts) -> Result<Response> {
        let value: Value = serde_json::from_slice(body)
            .map_err(|e| Error::driver(format!("malformed response JSON: {e}")))?;
        let obj = value
            .as_object()
            .ok_or_else(|| Error::driver("response envelope is not a JSON object"))?;

        let t = obj
            .get("t")
            .and_then(Value::as_i64)
            .ok_or_else(|| Error::driver("response missing `t`"))?;
        let response_type = ResponseType::from_code(t)?;

        let result = match obj.get("r") {
            Some(Value::Array(items)) => items
                .iter()
                .map(|v| Datum::from_json_with(v, opts))
                .collect::<Result<Vec<_>>>()?,
            Some(other) => vec![Datum::from_json_with(other, opts)?],
            None => Vec::new(),
        };

        let notes = obj
            .get("n")
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(Value::as_i64).collect())
            .unwrap_or_default();

        let backtrace = obj
            .get("b")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .map(|f| match f {
                        Value::String(s) => BacktraceFrame::Key(s.clone()),
                        Value::Number(n) => {
                            BacktraceFrame::Index(n.as_u64().unwrap_or(0) as usize)
                        }
                        _ => BacktraceFrame::Index(0),
                    })
                    .collect()
            })
            .unwrap_or_default();

        let profile = obj.get("p").cloned();
        let error_kind = obj.get("e").and_then(Value::as_u64).map(|n| n as u32);

        Ok(Response {
            token,
            response_type,
            result,
            notes,
            backtrace,
            profile,
            error_kind,
        })
    }

    /// Convert an error response into the appropriate `Error` variant,
    /// attaching the blamed term (when supplied by the caller) and
    /// backtrace.
    pub fn into_error(self, term: Option<Value>) -> Error {
        let message = self
            .result
            .first()
            .and_then(Datum::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| "query failed".to_string());
        let context = ErrorContext {
            term,
            backtrace: self.backtrace,
        };
        match self.response_type {
            ResponseType::ClientError => Error::DriverError { message },
            ResponseType::CompileError => Error::CompileError { message, context },
            ResponseType::RuntimeError => {
                Error::from_server(self.error_kind.unwrap_or(3_000_000), message, context)
            }
            _ => Error::driver(message),
        }
    }
}
