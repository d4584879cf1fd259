//! Server-side SCRAM-SHA-256 (RFC 5802 / RFC 7677).
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::{Digest, Sha256};

use super::AuthError;

type HmacSha256 = Hmac<Sha256>;

const ITERATIONS: u32 = 4096;
const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 18;

/// One SCRAM exchange. Nonce and salt are fresh per connection.
pub struct ScramServer {
    password: String,
    salt: [u8; SALT_LEN],
    server_nonce: String,
    /// client-first-message-bare, kept for the auth message.
    client_first_bare: String,
    /// full server-first-message as sent.
    server_first: String,
    combined_nonce: String,
}

impl ScramServer {
    pub fn new(password: impl Into<String>) -> Self {
        let mut rng = rand::thread_rng();
        let mut salt = [0u8; SALT_LEN];
        rng.fill_bytes(&mut salt);
        let mut nonce = [0u8; NONCE_LEN];
        rng.fill_bytes(&mut nonce);

        Self {
            password: password.into(),
            salt,
            server_nonce: BASE64.encode(nonce),
            client_first_bare: String::new(),
            server_first: String::new(),
            combined_nonce: String::new(),
        }
    }

    /// Process SASLInitialResponse data, producing server-first-message.
    pub fn client_first(&mut self, data: &[u8]) -> Result<Vec<u8>, AuthError> {
        let text = std::str::from_utf8(data)
            .map_err(|_| AuthError::new("SCRAM client-first is not UTF-8"))?;

        // gs2 header: "n,," (no channel binding) or "y,,"
        let bare = text
            .strip_prefix("n,,")
            .or_else(|| text.strip_prefix("y,,"))
            .ok_or_else(|| AuthError::new("unsupported SCRAM channel binding"))?;
        self.client_first_bare = bare.to_string();

        let client_nonce = attribute(bare, 'r')
            .ok_or_else(|| AuthError::new("SCRAM client-first missing nonce"))?;

        self.combined_nonce = format!("{client_nonce}{}", self.server_nonce);
        self.server_first = format!(
            "r={},s={},i={ITERATIONS}",
            self.combined_nonce,
            BASE64.encode(self.salt),
        );
        Ok(self.server_first.clone().into_bytes())
    }

    /// Verify the client proof in SASLResponse data; on success returns
    /// the server-final-message carrying the server signature.
    pub fn client_final(&mut self, data: &[u8]) -> Result<Vec<u8>, AuthError> {
        let text = std::str::from_utf8(data)
            .map_err(|_| AuthError::new("SCRAM client-final is not UTF-8"))?;

        let nonce = attribute(text, 'r')
            .ok_or_else(|| AuthError::new("SCRAM client-final missing nonce"))?;
        if nonce != self.combined_nonce {
            return Err(AuthError::new("SCRAM nonce mismatch"));
        }
        let proof_b64 = attribute(text, 'p')
            .ok_or_else(|| AuthError::new("SCRAM client-final missing proof"))?;
        let proof = BASE64
            .decode(proof_b64)
            .map_err(|_| AuthError::new("SCRAM proof is not valid base64"))?;

        let without_proof = text
            .rsplit_once(",p=")
            .map(|(head, _)| head)
            .ok_or_else(|| AuthError::new("SCRAM client-final missing proof"))?;

        let auth_message = format!(
            "{},{},{}",
            self.client_first_bare, self.server_first, without_proof,
        );

        let salted = hi(self.password.as_bytes(), &self.salt, ITERATIONS);
        let client_key = hmac(&salted, b"Client Key");
        let stored_key = Sha256::digest(client_key);
        let client_signature = hmac(&stored_key, auth_message.as_bytes());

        if proof.len() != client_signature.len() {
            return Err(AuthError::new("SCRAM proof has wrong length"));
        }
        let recovered_key: Vec<u8> = proof
            .iter()
            .zip(client_signature.iter())
            .map(|(p, s)| p ^ s)
            .collect();
        if Sha256::digest(&recovered_key).as_slice() != stored_key.as_slice() {
            return Err(AuthError::new("password authentication failed"));
        }

        let server_key = hmac(&salted, b"Server Key");
        let server_signature = hmac(&server_key, auth_message.as_bytes());
        Ok(format!("v={}", BASE64.encode(server_signature)).into_bytes())
    }
}

/// `Hi(str, salt, i)`: PBKDF2-HMAC-SHA-256 with a single output block.
fn hi(password: &[u8], salt: &[u8], iterations: u32) -> [u8; 32] {
    let mut mac = HmacSha256::new_from_slice(password).expect("hmac accepts any key length");
    mac.update(salt);
    mac.update(&1u32.to_be_bytes());
    let mut u: [u8; 32] = mac.finalize().into_bytes().into();

    let mut out = u;
    for _ in 1..iterations {
        let mut mac = HmacSha256::new_from_slice(password).expect("hmac accepts any key length");
        mac.update(&u);
        u = mac.finalize().into_bytes().into();
        for (o, b) in out.iter_mut().zip(u.iter()) {
            *o ^= b;
        }
    }
    out
}

fn hmac(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("hmac accepts any key length");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

/// Pull `<name>=<value>` out of a comma separated SCRAM message.
fn attribute<'a>(message: &'a str, name: char) -> Option<&'a str> {
    message.split(',').find_map(|part| {
        let mut chars = part.chars();
        (chars.next() == Some(name) && chars.next() == Some('=')).then(|| &part[2..])
    })
}
