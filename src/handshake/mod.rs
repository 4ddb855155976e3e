//! SCRAM-SHA-256 authenticated handshake state machine (spec §4.3).

use base64::Engine;
use hmac::{Hmac, Mac};
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use serde::Deserialize;
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

const MAGIC: u32 = 0x34c2bdc3;
const NUL: u8 = 0x00;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Initial,
    WaitFirstResponse,
    WaitFinalResponse,
    Done,
}

#[derive(Deserialize)]
struct ServerResponse {
    success: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_code: Option<i64>,
    #[serde(default)]
    min_protocol_version: Option<i64>,
    #[serde(default)]
    max_protocol_version: Option<i64>,
    #[serde(default)]
    authentication: Option<String>,
}

/// Drives the five-state handshake described in spec §4.3. Each step
/// consumes bytes read from the socket (up to, but not including, the
/// trailing NUL) and returns bytes to write next, or `None` once the
/// handshake is complete.
pub struct Handshake {
    state: State,
    user: String,
    password: String,
    client_nonce: String,
    client_first_bare: String,
    server_signature: Option<Vec<u8>>,
}

impl Handshake {
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Handshake {
        let mut nonce_bytes = [0u8; 18];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let client_nonce = base64::engine::general_purpose::STANDARD.encode(nonce_bytes);
        Handshake {
            state: State::Initial,
            user: user.into(),
            password: password.into(),
            client_nonce,
            client_first_bare: String::new(),
            server_signature: None,
        }
    }

    /// `INITIAL` → the magic-prefixed first message. Moves to
    /// `WAIT_FIRST_RESPONSE`.
    pub fn first_message(&mut self) -> Result<Vec<u8>> {
        if self.state != State::Initial {
            return Err(Error::InvalidHandshakeStateError { state: "first_message" });
        }
        self.client_first_bare = format!("n={},r={}", self.user, self.client_nonce);
        let authentication = format!("n,,{}", self.client_first_bare);
        let body = serde_json::json!({
            "protocol_version": 0,
            "authentication_method": "SCRAM-SHA-256",
            "authentication": authentication,
        });
        let body_bytes = serde_json::to_vec(&body).expect("handshake body always serializes");

        let mut out = Vec::with_capacity(4 + body_bytes.len() + 1);
        out.extend_from_slice(&MAGIC.to_le_bytes());
        out.extend_from_slice(&body_bytes);
        out.push(NUL);

        self.state = State::WaitFirstResponse;
        Ok(out)
    }

    /// `WAIT_FIRST_RESPONSE` → parses the server's SCRAM challenge, computes
    /// the client proof, and returns the client-final message. Moves to
    /// `WAIT_FINAL_RESPONSE`.
    pub fn handle_first_response(&mut self, message: &[u8]) -> Result<Vec<u8>> {
        if self.state != State::WaitFirstResponse {
            return Err(Error::InvalidHandshakeStateError {
                state: "handle_first_response",
            });
        }
        let response: ServerResponse = parse_response(message)?;
        fail_if_unsuccessful(&response)?;

        let max_v = response.max_protocol_version.unwrap_or(0);
        let min_v = response.min_protocol_version.unwrap_or(0);
        if !(max_v >= 0 && 0 >= min_v) {
            return Err(Error::auth("server does not support protocol version 0"));
        }

        let challenge = response
            .authentication
            .ok_or_else(|| Error::auth("missing authentication field in server response"))?;
        let fields = parse_scram_fields(&challenge);
        let server_nonce = fields
            .get("r")
            .ok_or_else(|| Error::auth("missing server nonce"))?
            .clone();
        if !server_nonce.starts_with(&self.client_nonce) {
            return Err(Error::auth("server nonce does not extend client nonce"));
        }
        let salt_b64 = fields.get("s").ok_or_else(|| Error::auth("missing salt"))?;
        let salt = base64::engine::general_purpose::STANDARD
            .decode(salt_b64)
            .map_err(|e| Error::auth(format!("invalid salt: {e}")))?;
        let iterations: u32 = fields
            .get("i")
            .ok_or_else(|| Error::auth("missing iteration count"))?
            .parse()
            .map_err(|_| Error::auth("invalid iteration count"))?;

        let mut salted_password = [0u8; 32];
        pbkdf2_hmac::<Sha256>(self.password.as_bytes(), &salt, iterations, &mut salted_password);

        let client_key = hmac_sha256(&salted_password, b"Client Key");
        let stored_key = Sha256::digest(client_key);

        let client_final_no_proof = format!("c=biws,r={server_nonce}");
        let auth_message = format!(
            "{},{},{}",
            self.client_first_bare, challenge, client_final_no_proof
        );
        let client_signature = hmac_sha256(&stored_key, auth_message.as_bytes());
        let client_proof: Vec<u8> = client_key
            .iter()
            .zip(client_signature.iter())
            .map(|(a, b)| a ^ b)
            .collect();
        let proof_b64 = base64::engine::general_purpose::STANDARD.encode(client_proof);

        let server_key = hmac_sha256(&salted_password, b"Server Key");
        self.server_signature = Some(hmac_sha256(&server_key, auth_message.as_bytes()).to_vec());

        let authentication = format!("{client_final_no_proof},p={proof_b64}");
        let body = serde_json::json!({ "authentication": authentication });
        let mut out = serde_json::to_vec(&body).expect("handshake body always serializes");
        out.push(NUL);

        self.state = State::WaitFinalResponse;
        Ok(out)
    }

    /// `WAIT_FINAL_RESPONSE` → verifies the server signature in constant
    /// time. Moves to `DONE`.
    pub fn handle_final_response(&mut self, message: &[u8]) -> Result<()> {
        if self.state != State::WaitFinalResponse {
            return Err(Error::InvalidHandshakeStateError {
                state: "handle_final_response",
            });
        }
        let response: ServerResponse = parse_response(message)?;
        fail_if_unsuccessful(&response)?;

        let authentication = response
            .authentication
            .ok_or_else(|| Error::auth("missing authentication field in final response"))?;
        let v = authentication
            .strip_prefix("v=")
            .ok_or_else(|| Error::auth("malformed server final message"))?;
        let got = base64::engine::general_purpose::STANDARD
            .decode(v)
            .map_err(|e| Error::auth(format!("invalid server signature encoding: {e}")))?;
        let expected = self
            .server_signature
            .as_ref()
            .expect("server_signature set by handle_first_response");
        if !constant_time_eq(&got, expected) {
            return Err(Error::auth("server signature verification failed"));
        }

        self.state = State::Done;
        Ok(())
    }

    pub fn is_done(&self) -> bool {
        self.state == State::Done
    }
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> [u8; 32] {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(data);
    mac.finalize().into_bytes().into()
}

fn parse_response(message: &[u8]) -> Result<ServerResponse> {
    let trimmed = message.strip_suffix(&[NUL]).unwrap_or(message);
    serde_json::from_slice(trimmed)
        .map_err(|e| Error::driver(format!("malformed handshake message: {e}")))
}

fn fail_if_unsuccessful(response: &ServerResponse) -> Result<()> {
    if response.success {
        return Ok(());
    }
    let message = response.error.clone().unwrap_or_else(|| "authentication failed".into());
    match response.error_code {
        Some(code) if (10..=20).contains(&code) => Err(Error::auth(message)),
        _ => Err(Error::driver(message)),
    }
}

/// Parses SCRAM's `key=value,key=value` wire format (no escaping beyond a
/// literal `=` inside the value, which this protocol never emits).
fn parse_scram_fields(s: &str) -> std::collections::HashMap<String, String> {
    s.split(',')
        .filter_map(|kv| kv.split_once('='))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_message_has_magic_prefix_and_nul_terminator() {
        let mut hs = Handshake::new("admin", "pw");
        let msg = hs.first_message().unwrap();
        assert_eq!(&msg[0..4], &MAGIC.to_le_bytes());
        assert_eq!(*msg.last().unwrap(), NUL);
    }

    #[test]
    fn calling_out_of_state_is_rejected() {
        let mut hs = Handshake::new("admin", "pw");
        let err = hs.handle_final_response(b"{}\x00").unwrap_err();
        assert!(matches!(err, Error::InvalidHandshakeStateError { .. }));
    }

    #[test]
    fn rejects_server_nonce_not_extending_client_nonce() {
        let mut hs = Handshake::new("admin", "pw");
        hs.first_message().unwrap();
        let challenge = "r=totally-different,s=c2FsdA==,i=4096";
        let body = serde_json::json!({
            "success": true,
            "min_protocol_version": 0,
            "max_protocol_version": 0,
            "authentication": challenge,
        });
        let mut msg = serde_json::to_vec(&body).unwrap();
        msg.push(NUL);
        let err = hs.handle_first_response(&msg).unwrap_err();
        assert!(matches!(err, Error::AuthError { .. }));
    }

    #[test]
    fn auth_error_code_range_maps_to_reql_auth_error() {
        let mut hs = Handshake::new("admin", "pw");
        hs.first_message().unwrap();
        let body = serde_json::json!({ "success": false, "error": "bad password", "error_code": 12 });
        let mut msg = serde_json::to_vec(&body).unwrap();
        msg.push(NUL);
        let err = hs.handle_first_response(&msg).unwrap_err();
        assert!(matches!(err, Error::AuthError { .. }));
    }

    #[test]
    fn constant_time_eq_rejects_mismatched_lengths() {
        assert!(!constant_time_eq(&[1, 2, 3], &[1, 2]));
        assert!(constant_time_eq(&[1, 2, 3], &[1, 2, 3]));
    }
}
