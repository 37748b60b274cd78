//! RethinkDB JSON wire protocol: handshake, authentication and framing.
//!
//! A connection starts with the V1_0 handshake: the client sends the magic
//! number followed by null-terminated JSON messages carrying a
//! SCRAM-SHA-256 exchange. After that, every query is a frame of
//! `token (u64 LE) | length (u32 LE) | JSON`, and every response uses the
//! same header.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use hmac::{Hmac, Mac};
use rand::RngCore;
use serde::Deserialize;
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::backend::BACKEND_NAME;
use crate::error::{BackendError, StorageError};

/// Magic number of protocol version V1_0.
pub(crate) const V1_0: u32 = 0x34c2_bdc3;

const MAX_HANDSHAKE_MESSAGE: usize = 64 * 1024;
const MAX_RESPONSE: usize = 64 * 1024 * 1024;

/// Query types.
pub(crate) mod query_type {
    pub const START: u64 = 1;
    pub const CONTINUE: u64 = 2;
    pub const STOP: u64 = 3;
}

/// Response types.
pub(crate) mod response_type {
    pub const SUCCESS_ATOM: i64 = 1;
    pub const SUCCESS_SEQUENCE: i64 = 2;
    pub const SUCCESS_PARTIAL: i64 = 3;
    pub const WAIT_COMPLETE: i64 = 4;
    pub const CLIENT_ERROR: i64 = 16;
    pub const COMPILE_ERROR: i64 = 17;
    pub const RUNTIME_ERROR: i64 = 18;
}

type HmacSha256 = Hmac<Sha256>;

fn handshake_error(message: impl Into<String>) -> BackendError {
    BackendError::ConnectionFailed {
        backend_name: BACKEND_NAME.to_string(),
        message: message.into(),
    }
}

// ============================================================================
// SCRAM-SHA-256
// ============================================================================

/// Client side of a SCRAM-SHA-256 exchange (RFC 5802, RFC 7677).
pub(crate) struct ScramClient {
    password: String,
    nonce: String,
    client_first_bare: String,
    server_signature: Option<Vec<u8>>,
}

impl ScramClient {
    /// Starts an exchange with a random client nonce.
    pub(crate) fn new(user: &str, password: &str) -> Self {
        let mut raw = [0u8; 18];
        rand::thread_rng().fill_bytes(&mut raw);
        Self::with_nonce(user, password, BASE64.encode(raw))
    }

    pub(crate) fn with_nonce(user: &str, password: &str, nonce: impl Into<String>) -> Self {
        let nonce = nonce.into();
        let client_first_bare = format!("n={},r={}", escape_username(user), nonce);
        Self {
            password: password.to_string(),
            nonce,
            client_first_bare,
            server_signature: None,
        }
    }

    /// The client-first message, with the `n,,` GS2 header.
    pub(crate) fn client_first(&self) -> String {
        format!("n,,{}", self.client_first_bare)
    }

    /// Answers the server-first message with the client-final message.
    pub(crate) fn client_final(&mut self, server_first: &str) -> Result<String, BackendError> {
        let mut server_nonce = None;
        let mut salt = None;
        let mut iterations = None;
        for attribute in server_first.split(',') {
            match attribute.split_once('=') {
                Some(("r", value)) => server_nonce = Some(value),
                Some(("s", value)) => salt = Some(value),
                Some(("i", value)) => iterations = value.parse::<u32>().ok(),
                _ => {}
            }
        }

        let (Some(server_nonce), Some(salt), Some(iterations)) = (server_nonce, salt, iterations)
        else {
            return Err(handshake_error(format!(
                "malformed SCRAM server message: {server_first}"
            )));
        };
        if !server_nonce.starts_with(&self.nonce) {
            return Err(handshake_error("SCRAM server nonce does not extend the client nonce"));
        }
        let salt = BASE64
            .decode(salt)
            .map_err(|err| handshake_error(format!("invalid SCRAM salt: {err}")))?;

        let mut salted_password = [0u8; 32];
        pbkdf2::pbkdf2_hmac::<Sha256>(
            self.password.as_bytes(),
            &salt,
            iterations,
            &mut salted_password,
        );

        let client_key = hmac_sha256(&salted_password, b"Client Key")?;
        let stored_key = Sha256::digest(&client_key);
        let client_final_without_proof = format!("c=biws,r={server_nonce}");
        let auth_message = format!(
            "{},{},{}",
            self.client_first_bare, server_first, client_final_without_proof
        );
        let client_signature = hmac_sha256(&stored_key, auth_message.as_bytes())?;
        let proof: Vec<u8> = client_key
            .iter()
            .zip(&client_signature)
            .map(|(key, signature)| key ^ signature)
            .collect();

        let server_key = hmac_sha256(&salted_password, b"Server Key")?;
        self.server_signature = Some(hmac_sha256(&server_key, auth_message.as_bytes())?);

        Ok(format!(
            "{client_final_without_proof},p={}",
            BASE64.encode(proof)
        ))
    }

    /// Checks the server signature in the server-final message.
    pub(crate) fn verify_server_final(&self, server_final: &str) -> Result<(), BackendError> {
        let received = server_final
            .split(',')
            .find_map(|attribute| attribute.strip_prefix("v="))
            .ok_or_else(|| handshake_error("SCRAM server-final message has no signature"))?;
        let expected = self
            .server_signature
            .as_ref()
            .ok_or_else(|| handshake_error("SCRAM exchange out of order"))?;
        if BASE64.encode(expected) != received {
            return Err(handshake_error("SCRAM server signature mismatch"));
        }
        Ok(())
    }
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<Vec<u8>, BackendError> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|err| handshake_error(format!("invalid HMAC key: {err}")))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

fn escape_username(user: &str) -> String {
    user.replace('=', "=3D").replace(',', "=2C")
}

// ============================================================================
// Handshake
// ============================================================================

#[derive(Debug, Deserialize)]
struct HandshakeReply {
    success: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    authentication: Option<String>,
    #[serde(default)]
    server_version: Option<String>,
}

/// Runs the V1_0 handshake. Returns the server version.
pub(crate) async fn handshake<S>(
    stream: &mut S,
    user: &str,
    password: &str,
) -> Result<String, BackendError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut scram = ScramClient::new(user, password);

    let first = json!({
        "protocol_version": 0,
        "authentication_method": "SCRAM-SHA-256",
        "authentication": scram.client_first(),
    });
    let mut opening = V1_0.to_le_bytes().to_vec();
    opening.extend_from_slice(first.to_string().as_bytes());
    opening.push(0);
    stream.write_all(&opening).await?;
    stream.flush().await?;

    let versions = read_reply(stream).await?;
    let server_version = versions.server_version.unwrap_or_default();

    let server_first = read_reply(stream)
        .await?
        .authentication
        .ok_or_else(|| handshake_error("server sent no SCRAM challenge"))?;
    let client_final = scram.client_final(&server_first)?;
    write_message(stream, &json!({ "authentication": client_final })).await?;

    let server_final = read_reply(stream)
        .await?
        .authentication
        .ok_or_else(|| handshake_error("server sent no SCRAM signature"))?;
    scram.verify_server_final(&server_final)?;

    Ok(server_version)
}

async fn write_message<S>(stream: &mut S, message: &Value) -> Result<(), BackendError>
where
    S: AsyncWrite + Unpin,
{
    let mut bytes = message.to_string().into_bytes();
    bytes.push(0);
    stream.write_all(&bytes).await?;
    stream.flush().await?;
    Ok(())
}

async fn read_reply<S>(stream: &mut S) -> Result<HandshakeReply, BackendError>
where
    S: AsyncRead + Unpin,
{
    let mut bytes = Vec::new();
    loop {
        let byte = stream.read_u8().await?;
        if byte == 0 {
            break;
        }
        if bytes.len() == MAX_HANDSHAKE_MESSAGE {
            return Err(handshake_error("handshake message too long"));
        }
        bytes.push(byte);
    }

    let reply: HandshakeReply = serde_json::from_slice(&bytes).map_err(|_| {
        // Servers predating V1_0 answer with plain text.
        handshake_error(String::from_utf8_lossy(&bytes).into_owned())
    })?;
    if !reply.success {
        return Err(handshake_error(
            reply
                .error
                .unwrap_or_else(|| "handshake rejected".to_string()),
        ));
    }
    Ok(reply)
}

// ============================================================================
// Framing
// ============================================================================

/// Encodes a query frame.
pub(crate) fn encode_query(token: u64, query: &Value) -> Vec<u8> {
    let body = query.to_string().into_bytes();
    let mut frame = Vec::with_capacity(12 + body.len());
    frame.extend_from_slice(&token.to_le_bytes());
    frame.extend_from_slice(&(body.len() as u32).to_le_bytes());
    frame.extend_from_slice(&body);
    frame
}

/// `[START, term, {}]`.
pub(crate) fn start_query(term: &Value) -> Value {
    json!([query_type::START, term, {}])
}

/// Reads one response frame.
pub(crate) async fn read_response<S>(stream: &mut S) -> Result<(u64, Response), BackendError>
where
    S: AsyncRead + Unpin,
{
    let token = stream.read_u64_le().await?;
    let length = stream.read_u32_le().await? as usize;
    if length > MAX_RESPONSE {
        return Err(BackendError::QueryError {
            message: format!("response of {length} bytes exceeds the frame limit"),
        });
    }
    let mut body = vec![0u8; length];
    stream.read_exact(&mut body).await?;
    let response = serde_json::from_slice(&body).map_err(|err| BackendError::SerializationError {
        message: format!("malformed response: {err}"),
    })?;
    Ok((token, response))
}

/// A decoded response frame.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct Response {
    #[serde(rename = "t")]
    pub kind: i64,
    #[serde(rename = "r", default)]
    pub results: Vec<Value>,
}

impl Response {
    /// Returns `true` if more results follow after a CONTINUE.
    pub(crate) fn is_partial(&self) -> bool {
        self.kind == response_type::SUCCESS_PARTIAL
    }

    pub(crate) fn is_error(&self) -> bool {
        matches!(
            self.kind,
            response_type::CLIENT_ERROR | response_type::COMPILE_ERROR | response_type::RUNTIME_ERROR
        )
    }

    /// Turns error responses into storage errors.
    pub(crate) fn into_result(self) -> Result<Self, StorageError> {
        match self.kind {
            response_type::SUCCESS_ATOM
            | response_type::SUCCESS_SEQUENCE
            | response_type::SUCCESS_PARTIAL
            | response_type::WAIT_COMPLETE => Ok(self),
            _ if self.is_error() => {
                let message = self
                    .results
                    .first()
                    .and_then(Value::as_str)
                    .unwrap_or("unknown error");
                Err(BackendError::QueryError {
                    message: message.to_string(),
                }
                .into())
            }
            other => Err(BackendError::QueryError {
                message: format!("unexpected response type {other}"),
            }
            .into()),
        }
    }
}
