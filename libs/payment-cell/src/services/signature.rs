use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Lowercase hex of `HMAC-SHA256(secret, order_id + "|" + payment_id)`, the
/// checkout callback signature.
pub fn sign(secret: &str, order_id: &str, payment_id: &str) -> String {
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(m) => m,
        Err(_) => return String::new(),
    };
    mac.update(order_id.as_bytes());
    mac.update(b"|");
    mac.update(payment_id.as_bytes());

    mac.finalize()
        .into_bytes()
        .iter()
        .map(|byte| format!("{:02x}", byte))
        .collect()
}

/// Constant-time comparison against the expected signature.
pub fn verify(secret: &str, order_id: &str, payment_id: &str, signature: &str) -> bool {
    if secret.is_empty() {
        return false;
    }
    let expected = sign(secret, order_id, payment_id);
    expected.as_bytes().ct_eq(signature.as_bytes()).unwrap_u8() == 1
}
