// totp.rs
// TOTP login codes: per-user Base32 secrets, verification and enrollment URLs.

use anyhow::Result;
use data_encoding::BASE32_NOPAD;
use rand::RngCore;
use totp_rs::{Algorithm, Secret, TOTP};

pub const ISSUER: &str = "SalesDesk";
pub const MIN_SECRET_BYTES: usize = 16; // 128 bits
pub const DEFAULT_SECRET_BYTES: usize = 20; // 160 bits

/// Builds the TOTP for a username. Rejects secrets shorter than 128 bits.
pub fn build_totp(username: &str, base32_secret: &str) -> Result<TOTP> {
    let secret = Secret::Encoded(base32_secret.trim().to_string()).to_bytes()?;
    if secret.len() < MIN_SECRET_BYTES {
        anyhow::bail!(
            "shared secret too short: {} bytes, need >= {}",
            secret.len(),
            MIN_SECRET_BYTES
        );
    }
    let totp = TOTP::new(
        Algorithm::SHA1,
        6,
        1, // ±1 step of clock drift
        30,
        secret,
        Some(ISSUER.to_string()),
        username.to_string(),
    )?;
    Ok(totp)
}

pub fn verify_code(username: &str, base32_secret: &str, code: &str) -> Result<bool> {
    let totp = build_totp(username, base32_secret)?;
    Ok(totp.check_current(code.trim()).unwrap_or(false))
}

pub fn generate_secret() -> String {
    generate_secret_n(DEFAULT_SECRET_BYTES)
}

pub fn generate_secret_n(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes.max(MIN_SECRET_BYTES)];
    rand::rng().fill_bytes(&mut buf);
    BASE32_NOPAD.encode(&buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_secrets_build_and_verify() {
        let secret = generate_secret();
        let totp = build_totp("ama", &secret).unwrap();
        let code = totp.generate_current().unwrap();
        assert!(verify_code("ama", &secret, &code).unwrap());
        assert!(!verify_code("ama", &secret, "000000x").unwrap());
        assert!(totp.get_url().contains("SalesDesk"));
    }

    #[test]
    fn short_secret_is_rejected() {
        let short = BASE32_NOPAD.encode(&[1u8; 8]);
        assert!(build_totp("ama", &short).is_err());
    }
}
