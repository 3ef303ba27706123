//! Signed demo issuance
//!
//! Competitive demo recordings are sealed by the master: before recording,
//! a client requests a signed start message carrying a fresh nonce; after
//! recording, it submits the start message together with the demo's SHA-1
//! checksum and receives a signed end message binding the two. A third
//! party holding the master's public key can then verify that the demo was
//! recorded between the two timestamps and was not substituted.
//!
//! Messages are clear-signed text: the plaintext fields followed by a
//! `Signature:` line holding a hex Ed25519 signature over the plaintext.
//! Nonces are single-use; redeeming one removes it from the issued set, so
//! a replayed end request fails verification.

use std::collections::HashSet;

use chrono::Utc;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier};

use crate::error::{MasterError, MasterResult};

/// Nonce length in bytes
pub const NONCE_SIZE: usize = 16;

const SIGNATURE_FIELD: &str = "Signature: ";
const NONCE_FIELD: &str = "Nonce: ";

/// Issues signed demo start messages and countersigns end messages.
pub struct DemoSigner {
    signing_key: SigningKey,
    issued_nonces: HashSet<[u8; NONCE_SIZE]>,
}

impl DemoSigner {
    /// Build a signer from a hex-encoded 32-byte Ed25519 seed.
    pub fn from_hex_seed(seed: &str) -> MasterResult<DemoSigner> {
        let bytes = hex::decode(seed.trim())
            .map_err(|e| MasterError::SigningKey(e.to_string()))?;
        let seed: [u8; 32] = bytes
            .try_into()
            .map_err(|_| MasterError::SigningKey("seed must be 32 bytes".to_string()))?;
        Ok(DemoSigner {
            signing_key: SigningKey::from_bytes(&seed),
            issued_nonces: HashSet::new(),
        })
    }

    /// ISO8601 UTC timestamp for message fields.
    fn now_string() -> String {
        Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()
    }

    /// Append a signature line over `plaintext`.
    fn clear_sign(&self, plaintext: &str) -> Vec<u8> {
        let signature = self.signing_key.sign(plaintext.as_bytes());
        let mut message = plaintext.to_string();
        message.push_str(SIGNATURE_FIELD);
        message.push_str(&hex::encode(signature.to_bytes()));
        message.push('\n');
        message.into_bytes()
    }

    /// Check a clear-signed message against our key, returning the
    /// plaintext (without the signature line) when valid.
    fn verify_signed(&self, message: &[u8]) -> Option<String> {
        let text = std::str::from_utf8(message).ok()?;
        let idx = text.rfind(SIGNATURE_FIELD)?;
        if idx != 0 && !text[..idx].ends_with('\n') {
            return None;
        }
        let plaintext = &text[..idx];
        let signature_hex = text[idx + SIGNATURE_FIELD.len()..].trim_end();
        let signature_bytes = hex::decode(signature_hex).ok()?;
        let signature = Signature::from_slice(&signature_bytes).ok()?;
        self.signing_key
            .verifying_key()
            .verify(plaintext.as_bytes(), &signature)
            .ok()?;
        Some(plaintext.to_string())
    }

    fn extract_nonce(plaintext: &str) -> Option<[u8; NONCE_SIZE]> {
        let line = plaintext.lines().find(|l| l.starts_with(NONCE_FIELD))?;
        let bytes = hex::decode(line[NONCE_FIELD.len()..].trim()).ok()?;
        bytes.try_into().ok()
    }

    /// Issue a start message with a fresh single-use nonce. Returns the
    /// nonce alongside the signed message.
    pub fn sign_start(&mut self) -> MasterResult<([u8; NONCE_SIZE], Vec<u8>)> {
        let mut nonce = [0u8; NONCE_SIZE];
        getrandom::getrandom(&mut nonce).map_err(|e| MasterError::Random(e.to_string()))?;

        let plaintext = format!(
            "Start-Time: {}\n{}{}\n",
            Self::now_string(),
            NONCE_FIELD,
            hex::encode(nonce)
        );
        self.issued_nonces.insert(nonce);
        Ok((nonce, self.clear_sign(&plaintext)))
    }

    /// Verify a start message and issue the matching end message binding
    /// the demo checksum.
    ///
    /// Returns `None` when the start message does not verify or its nonce
    /// was never issued by this signer (or was already redeemed).
    pub fn sign_end(&mut self, start_message: &[u8], demo_hash: &[u8]) -> Option<Vec<u8>> {
        let plaintext = self.verify_signed(start_message)?;
        let nonce = Self::extract_nonce(&plaintext)?;
        if !self.issued_nonces.remove(&nonce) {
            return None;
        }

        let mut message = plaintext;
        if !message.ends_with('\n') {
            message.push('\n');
        }
        message.push_str(&format!(
            "End-Time: {}\nDemo-Checksum: {}\n",
            Self::now_string(),
            hex::encode(demo_hash)
        ));
        Some(self.clear_sign(&message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_HASH: [u8; 20] = [0xab; 20];

    fn signer() -> DemoSigner {
        DemoSigner::from_hex_seed(&hex::encode([7u8; 32])).unwrap()
    }

    #[test]
    fn test_seed_validation() {
        assert!(DemoSigner::from_hex_seed("not hex").is_err());
        assert!(DemoSigner::from_hex_seed("abcd").is_err());
        assert!(DemoSigner::from_hex_seed(&hex::encode([0u8; 32])).is_ok());
    }

    #[test]
    fn test_start_end_cycle() {
        let mut signer = signer();
        let (nonce, start_message) = signer.sign_start().unwrap();

        let start_text = String::from_utf8(start_message.clone()).unwrap();
        assert!(start_text.contains(&format!("Nonce: {}", hex::encode(nonce))));
        assert!(start_text.contains("Start-Time: "));

        let end_message = signer.sign_end(&start_message, &TEST_HASH).unwrap();
        let end_text = String::from_utf8(end_message).unwrap();
        assert!(end_text.contains("End-Time: "));
        assert!(end_text.contains(&format!("Demo-Checksum: {}", hex::encode(TEST_HASH))));
        // The end message itself verifies against the same key.
        assert!(signer.verify_signed(end_text.as_bytes()).is_some());
    }

    #[test]
    fn test_replay_rejected() {
        let mut signer = signer();
        let (_, start_message) = signer.sign_start().unwrap();

        assert!(signer.sign_end(&start_message, &TEST_HASH).is_some());
        assert!(signer.sign_end(&start_message, &TEST_HASH).is_none());
    }

    #[test]
    fn test_unissued_nonce_rejected() {
        let mut issuer = signer();
        let (_, start_message) = issuer.sign_start().unwrap();

        // Same key, but a fresh signer never issued this nonce.
        let mut restarted = signer();
        assert!(restarted.sign_end(&start_message, &TEST_HASH).is_none());
    }

    #[test]
    fn test_tampered_message_rejected() {
        let mut signer = signer();
        let (_, start_message) = signer.sign_start().unwrap();

        let mut tampered = String::from_utf8(start_message).unwrap();
        tampered = tampered.replacen("Start-Time: ", "Start-Time: 1999", 1);
        assert!(signer.sign_end(tampered.as_bytes(), &TEST_HASH).is_none());
    }

    #[test]
    fn test_wrong_key_rejected() {
        let mut issuer = signer();
        let (_, start_message) = issuer.sign_start().unwrap();

        let mut other = DemoSigner::from_hex_seed(&hex::encode([8u8; 32])).unwrap();
        assert!(other.sign_end(&start_message, &TEST_HASH).is_none());
    }

    #[test]
    fn test_garbage_input_rejected() {
        let mut signer = signer();
        assert!(signer.sign_end(b"not a signed message", &TEST_HASH).is_none());
        assert!(signer.sign_end(&[0xff, 0xfe, 0x00], &TEST_HASH).is_none());
    }
}
