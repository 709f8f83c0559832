//! Webhook signature validation (`X-Hub-Signature` / `X-Hub-Signature-256`).

use hmac::{Hmac, Mac};
use sha1::Sha1;
use sha2::Sha256;

type HmacSha1 = Hmac<Sha1>;
type HmacSha256 = Hmac<Sha256>;

/// Checks that a webhook body was signed with the shared secret.
#[derive(Clone)]
pub struct SignatureValidator {
    secret: Vec<u8>,
}

impl std::fmt::Debug for SignatureValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignatureValidator")
            .field("configured", &!self.secret.is_empty())
            .finish()
    }
}

impl SignatureValidator {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// Validate a `sha1=<hex>` or `sha256=<hex>` signature header against `body`.
    ///
    /// The digest comparison is constant-time. A malformed header and a wrong
    /// digest both yield `false`, as does an unconfigured secret.
    pub fn validate(&self, body: &[u8], signature: &str) -> bool {
        if self.secret.is_empty() {
            return false;
        }

        let Some((algorithm, digest)) = signature.trim().split_once('=') else {
            return false;
        };
        let Ok(expected) = hex::decode(digest) else {
            return false;
        };

        match algorithm {
            "sha1" => match HmacSha1::new_from_slice(&self.secret) {
                Ok(mut mac) => {
                    mac.update(body);
                    mac.verify_slice(&expected).is_ok()
                }
                Err(_) => false,
            },
            "sha256" => match HmacSha256::new_from_slice(&self.secret) {
                Ok(mut mac) => {
                    mac.update(body);
                    mac.verify_slice(&expected).is_ok()
                }
                Err(_) => false,
            },
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "It's a Secret to Everybody";
    const BODY: &[u8] = b"Hello, World!";

    fn sign_sha1(secret: &str, body: &[u8]) -> String {
        let mut mac = HmacSha1::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        format!("sha1={}", hex::encode(mac.finalize().into_bytes()))
    }

    #[test]
    fn accepts_matching_sha1_signature() {
        let validator = SignatureValidator::new(SECRET);
        assert!(validator.validate(BODY, &sign_sha1(SECRET, BODY)));
    }

    #[test]
    fn accepts_published_sha256_example() {
        // Example values from GitHub's webhook validation guide.
        let validator = SignatureValidator::new(SECRET);
        assert!(validator.validate(
            BODY,
            "sha256=757107ea0eb2509fc211221cce984b8a37570b6d7586c22c46f4379c8b043e17"
        ));
    }

    #[test]
    fn rejects_any_single_bit_change_in_body() {
        let validator = SignatureValidator::new(SECRET);
        let signature = sign_sha1(SECRET, BODY);
        for byte in 0..BODY.len() {
            for bit in 0..8 {
                let mut body = BODY.to_vec();
                body[byte] ^= 1 << bit;
                assert!(!validator.validate(&body, &signature), "byte {byte} bit {bit}");
            }
        }
    }

    #[test]
    fn rejects_any_single_bit_change_in_signature() {
        let validator = SignatureValidator::new(SECRET);
        let signature = sign_sha1(SECRET, BODY);
        let digest = hex::decode(signature.strip_prefix("sha1=").unwrap()).unwrap();
        for byte in 0..digest.len() {
            for bit in 0..8 {
                let mut mutated = digest.clone();
                mutated[byte] ^= 1 << bit;
                let header = format!("sha1={}", hex::encode(&mutated));
                assert!(!validator.validate(BODY, &header), "byte {byte} bit {bit}");
            }
        }
    }

    #[test]
    fn malformed_headers_fail_closed() {
        let validator = SignatureValidator::new(SECRET);
        let digest = sign_sha1(SECRET, BODY);
        let hex_only = digest.strip_prefix("sha1=").unwrap();
        let wrong_algorithm = format!("md5={hex_only}");
        let too_long = format!("{digest}00");
        for header in [
            "",
            "sha1",
            "sha1=",
            "sha1=zz",
            hex_only,
            wrong_algorithm.as_str(),
            too_long.as_str(),
        ] {
            assert!(!validator.validate(BODY, header), "{header:?}");
        }
    }

    #[test]
    fn unconfigured_secret_rejects_everything() {
        let validator = SignatureValidator::new("");
        assert!(!validator.validate(BODY, &sign_sha1("", BODY)));
    }
}
