//! In-process fake server used by the integration tests (SPEC_FULL §A):
//! a loopback TCP peer that speaks the real SCRAM-SHA-256 handshake and a
//! small scripted subset of the post-handshake framing, standing in for a
//! live database server.

use base64::Engine;
use hmac::{Hmac, Mac};
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

type HmacSha256 = Hmac<Sha256>;

const NUL: u8 = 0x00;

/// What the fake server does with a single post-handshake request frame.
pub enum Step {
    /// Reply with a response body; the frame's token is echoed automatically.
    Reply(Value),
    /// Read and discard the frame without replying (models how a real
    /// server suppresses the response to a `noreply` query).
    Swallow,
    /// Close the socket without replying (simulates a server crash/EOF).
    Hangup,
}

pub struct FakeServer {
    pub addr: std::net::SocketAddr,
}

/// Starts a fake server on a loopback port. `password` must match what the
/// test's `ConnectOpts` supplies so the SCRAM handshake succeeds; passing a
/// mismatched password here alongside a correct one in `ConnectOpts` (or
/// vice versa) is how the auth-failure test is built.
pub async fn spawn(user: &str, password: &str, steps: Vec<Step>) -> FakeServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let user = user.to_string();
    let password = password.to_string();

    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        if server_handshake(&mut socket, &user, &password).await.is_err() {
            return;
        }
        for step in steps {
            match step {
                Step::Reply(body) => {
                    let Ok(token) = socket.read_u64_le().await else { return };
                    let Ok(len) = socket.read_u32_le().await else { return };
                    let mut buf = vec![0u8; len as usize];
                    if socket.read_exact(&mut buf).await.is_err() {
                        return;
                    }
                    let body_bytes = serde_json::to_vec(&body).unwrap();
                    let mut frame = Vec::with_capacity(12 + body_bytes.len());
                    frame.extend_from_slice(&token.to_le_bytes());
                    frame.extend_from_slice(&(body_bytes.len() as u32).to_le_bytes());
                    frame.extend_from_slice(&body_bytes);
                    if socket.write_all(&frame).await.is_err() {
                        return;
                    }
                }
                Step::Swallow => {
                    let Ok(_token) = socket.read_u64_le().await else { return };
                    let Ok(len) = socket.read_u32_le().await else { return };
                    let mut buf = vec![0u8; len as usize];
                    if socket.read_exact(&mut buf).await.is_err() {
                        return;
                    }
                }
                Step::Hangup => return,
            }
        }
        // Keep the socket open (but idle) once the script is exhausted so
        // the reader task observes a clean hang rather than a spurious EOF
        // mid-test; the test itself closes the `Connection` first.
        let mut sink = [0u8; 1];
        let _ = socket.read(&mut sink).await;
    });

    FakeServer { addr }
}

/// Always rejects with a bad-password-shaped SCRAM failure, regardless of
/// what the client sends; used for the `ReqlAuthError` scenario (spec §8.F).
pub async fn spawn_auth_failure() -> FakeServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let _ = read_until_nul(&mut socket).await;
        let body = json!({
            "success": false,
            "error": "Wrong password",
            "error_code": 12,
        });
        let mut out = serde_json::to_vec(&body).unwrap();
        out.push(NUL);
        let _ = socket.write_all(&out).await;
    });
    FakeServer { addr }
}

async fn read_until_nul(socket: &mut TcpStream) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    loop {
        let byte = socket.read_u8().await?;
        if byte == 0 {
            return Ok(buf);
        }
        buf.push(byte);
    }
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> [u8; 32] {
    let mut mac = HmacSha256::new_from_slice(key).unwrap();
    mac.update(data);
    mac.finalize().into_bytes().into()
}

fn parse_scram_fields(s: &str) -> std::collections::HashMap<String, String> {
    s.split(',')
        .filter_map(|kv| kv.split_once('='))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// Server side of the same SCRAM-SHA-256 exchange the client drives in
/// `handshake::Handshake` (spec §4.3) — computed independently here so the
/// two sides only agree via the shared `password`, the way a real client
/// and server would.
async fn server_handshake(socket: &mut TcpStream, _user: &str, password: &str) -> std::io::Result<()> {
    let magic = socket.read_u32_le().await?;
    assert_eq!(magic, 0x34c2bdc3, "client sent the wrong protocol magic");
    let first = read_until_nul(socket).await?;
    let first: Value = serde_json::from_slice(&first).unwrap();
    let client_first_bare = {
        let auth = first["authentication"].as_str().unwrap();
        auth.trim_start_matches("n,,").to_string()
    };
    let fields = parse_scram_fields(&client_first_bare);
    let client_nonce = fields.get("r").unwrap().clone();

    let mut extra = [0u8; 12];
    rand::thread_rng().fill_bytes(&mut extra);
    let server_nonce = format!("{client_nonce}{}", base64::engine::general_purpose::STANDARD.encode(extra));
    let mut salt_bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut salt_bytes);
    let salt_b64 = base64::engine::general_purpose::STANDARD.encode(salt_bytes);
    let iterations: u32 = 4096;

    let server_first = format!("r={server_nonce},s={salt_b64},i={iterations}");
    let challenge_body = json!({
        "success": true,
        "min_protocol_version": 0,
        "max_protocol_version": 0,
        "authentication": server_first,
    });
    let mut out = serde_json::to_vec(&challenge_body).unwrap();
    out.push(NUL);
    socket.write_all(&out).await?;

    let second = read_until_nul(socket).await?;
    let second: Value = serde_json::from_slice(&second).unwrap();
    let client_final = second["authentication"].as_str().unwrap().to_string();
    let (client_final_no_proof, proof_b64) = {
        let idx = client_final.rfind(",p=").expect("client final message carries a proof");
        (client_final[..idx].to_string(), client_final[idx + 3..].to_string())
    };

    let mut salted_password = [0u8; 32];
    pbkdf2_hmac::<Sha256>(password.as_bytes(), &salt_bytes, iterations, &mut salted_password);
    let client_key = hmac_sha256(&salted_password, b"Client Key");
    let stored_key = Sha256::digest(client_key);
    let auth_message = format!("{client_first_bare},{server_first},{client_final_no_proof}");
    let client_signature = hmac_sha256(&stored_key, auth_message.as_bytes());
    let expected_proof: Vec<u8> = client_key.iter().zip(client_signature.iter()).map(|(a, b)| a ^ b).collect();
    let got_proof = base64::engine::general_purpose::STANDARD.decode(&proof_b64).unwrap();
    if got_proof != expected_proof {
        let body = json!({ "success": false, "error": "Invalid proof", "error_code": 12 });
        let mut out = serde_json::to_vec(&body).unwrap();
        out.push(NUL);
        socket.write_all(&out).await?;
        return Err(std::io::Error::new(std::io::ErrorKind::Other, "bad proof"));
    }

    let server_key = hmac_sha256(&salted_password, b"Server Key");
    let server_signature = hmac_sha256(&server_key, auth_message.as_bytes());
    let v_b64 = base64::engine::general_purpose::STANDARD.encode(server_signature);
    let final_body = json!({ "success": true, "authentication": format!("v={v_b64}") });
    let mut out = serde_json::to_vec(&final_body).unwrap();
    out.push(NUL);
    socket.write_all(&out).await?;
    Ok(())
}
