use anyhow::{Context, Result};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Bearer token claims. `sub` carries the account RUT so a decoded
/// token is enough to look the caller back up.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub role: String,
    pub exp: usize,
}

pub fn issue_token(secret: &str, rut: &str, role: &str, ttl_minutes: i64) -> Result<String> {
    let exp = (chrono::Utc::now() + chrono::Duration::minutes(ttl_minutes)).timestamp() as usize;
    let claims = Claims {
        sub: rut.to_string(),
        role: role.to_string(),
        exp,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .context("failed to sign access token")
}

pub fn decode_token(secret: &str, token: &str) -> Result<Claims> {
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .context("invalid or expired token")?;
    Ok(data.claims)
}

/// Salted SHA-256, stored as `salt$digest` with both halves hex.
pub fn hash_password(password: &str) -> String {
    let mut salt_bytes = [0_u8; 16];
    rand::thread_rng().fill_bytes(&mut salt_bytes);
    let salt = hex_encode(&salt_bytes);
    let digest = hex_encode(Sha256::digest(format!("{salt}{password}").as_bytes()).as_slice());
    format!("{salt}${digest}")
}

pub fn verify_password(password: &str, stored: &str) -> bool {
    let Some((salt, digest)) = stored.split_once('$') else {
        return false;
    };
    let candidate = hex_encode(Sha256::digest(format!("{salt}{password}").as_bytes()).as_slice());
    candidate == digest
}

fn hex_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push_str(format!("{:02x}", byte).as_str());
    }
    out
}
