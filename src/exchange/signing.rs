use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::{CoreError, Result};

type HmacSha256 = Hmac<Sha256>;

/// Sign a query string with HMAC-SHA256 (Binance style).
/// Returns hex-encoded signature.
pub fn sign_binance(query: &str, secret: &str) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| CoreError::Configuration(format!("HMAC error: {}", e)))?;
    mac.update(query.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Append `timestamp`, `recvWindow` and the signature to a query string.
pub fn signed_query(query: &str, secret: &str, timestamp_ms: u64) -> Result<String> {
    let base = if query.is_empty() {
        format!("timestamp={}&recvWindow=5000", timestamp_ms)
    } else {
        format!("{}&timestamp={}&recvWindow=5000", query, timestamp_ms)
    };
    let signature = sign_binance(&base, secret)?;
    Ok(format!("{}&signature={}", base, signature))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binance_sign() {
        let query = "symbol=BTCUSDT&side=BUY&type=MARKET&quantity=0.001&timestamp=1234567890000";
        let sig = sign_binance(query, "test_secret").unwrap();
        assert_eq!(sig.len(), 64);
        assert_eq!(sig, sign_binance(query, "test_secret").unwrap());
        assert_ne!(sig, sign_binance(query, "other_secret").unwrap());
    }

    #[test]
    fn test_signed_query_layout() {
        let q = signed_query("symbol=BTCUSDT", "s", 42).unwrap();
        assert!(q.starts_with("symbol=BTCUSDT&timestamp=42&recvWindow=5000&signature="));
        let q = signed_query("", "s", 42).unwrap();
        assert!(q.starts_with("timestamp=42&"));
    }
}
