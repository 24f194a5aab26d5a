//! HMAC-SHA256 signatures over callback bodies.

use hmac::Hmac;
use hmac::Mac;
use sha2::Sha256;

use crate::callback::error::DeliveryError;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the hex signature of the request body.
pub const SIGNATURE_HEADER: &str = "x-signature-sha256";

/// Signs the exact bytes that are sent, returning a lowercase hex digest.
pub fn sign_payload(secret: &str, body: &[u8]) -> Result<String, DeliveryError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).map_err(|e| {
        DeliveryError::InvalidSecret {
            msg: e.to_string(),
        }
    })?;
    mac.update(body);
    Ok(hex::encode(mac.finalize().into_bytes()))
}
