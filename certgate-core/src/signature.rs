//! Webhook signature verification
//!
//! The provider signs each delivery with HMAC-SHA256 over
//! `"{timestamp}.{raw body}"` using the endpoint's signing secret, and sends
//! the result in a header of the form `t=1700000000,v1=<hex>[,v1=<hex>]`.

use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::Error;
use crate::Result;

type HmacSha256 = Hmac<Sha256>;

/// Maximum age (and clock skew) accepted for a signed delivery, in seconds
pub const DEFAULT_TOLERANCE_SECS: i64 = 300;

/// Parsed signature header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureHeader {
    pub timestamp: i64,
    pub signatures: Vec<Vec<u8>>,
}

impl SignatureHeader {
    pub fn parse(header: &str) -> Result<Self> {
        let mut timestamp = None;
        let mut signatures = Vec::new();

        for part in header.split(',') {
            let Some((key, value)) = part.trim().split_once('=') else {
                continue;
            };
            match key {
                "t" => {
                    timestamp = Some(value.parse::<i64>().map_err(|_| {
                        Error::InvalidSignature("malformed timestamp".to_string())
                    })?)
                }
                // Undecodable v1 entries cannot match; skip them
                "v1" => {
                    if let Ok(sig) = hex::decode(value) {
                        signatures.push(sig);
                    }
                }
                _ => {}
            }
        }

        let timestamp =
            timestamp.ok_or_else(|| Error::InvalidSignature("missing timestamp".to_string()))?;
        if signatures.is_empty() {
            return Err(Error::InvalidSignature("missing v1 signature".to_string()));
        }

        Ok(Self {
            timestamp,
            signatures,
        })
    }
}

fn mac_for(payload: &[u8], secret: &str, timestamp: i64) -> Result<HmacSha256> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| Error::InvalidSignature(format!("unusable secret: {e}")))?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    Ok(mac)
}

/// Verify a signature header against the current time
pub fn verify_signature(payload: &[u8], header: &str, secret: &str) -> Result<()> {
    verify_signature_at(
        payload,
        header,
        secret,
        DEFAULT_TOLERANCE_SECS,
        Utc::now().timestamp(),
    )
}

/// Verify a signature header against an explicit clock
///
/// The signature is checked before the timestamp so a forged header never
/// learns anything about the tolerance window.
pub fn verify_signature_at(
    payload: &[u8],
    header: &str,
    secret: &str,
    tolerance_secs: i64,
    now: i64,
) -> Result<()> {
    let parsed = SignatureHeader::parse(header)?;
    let mac = mac_for(payload, secret, parsed.timestamp)?;

    let matched = parsed
        .signatures
        .iter()
        .any(|sig| mac.clone().verify_slice(sig).is_ok());
    if !matched {
        return Err(Error::InvalidSignature(
            "no signature matches the payload".to_string(),
        ));
    }

    if (now - parsed.timestamp).abs() > tolerance_secs {
        return Err(Error::SignatureExpired);
    }

    Ok(())
}

/// Produce a signature header for a payload (used by tests and local tooling)
pub fn sign_payload(payload: &[u8], secret: &str, timestamp: i64) -> Result<String> {
    let mac = mac_for(payload, secret, timestamp)?;
    let digest = hex::encode(mac.finalize().into_bytes());
    Ok(format!("t={timestamp},v1={digest}"))
}
