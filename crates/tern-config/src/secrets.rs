// Copyright (c) 2024-2026 Tern Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! Secret storage and API-key resolution.
//!
//! # Security model
//!
//! API keys stored in `settings.json` are never written as plaintext.  They
//! are sealed with a keystream derived from a machine-scoped secret
//! (hostname + user), so a copied settings file is useless on another
//! machine.  This protects against casual disclosure (config files in
//! backups, pasted directories), not against an attacker with code
//! execution on the same account.
//!
//! Resolution order for every provider key is
//! `environment variable → dedicated config entry → global fallback`.

use base64::Engine;
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::Config;

const SEAL_PREFIX: &str = "sealed:";
const NONCE_LEN: usize = 16;

/// Derive the machine-scoped sealing key.
///
/// Inputs are stable per user+host: `$HOSTNAME`/`$COMPUTERNAME`, `$USER`/
/// `$USERNAME`, and a fixed application salt.
fn machine_key() -> [u8; 32] {
    let host = std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .unwrap_or_default();
    let user = std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_default();
    let mut h = Sha256::new();
    h.update(b"tern-secret-seal-v1");
    h.update(host.as_bytes());
    h.update(b"\x00");
    h.update(user.as_bytes());
    h.finalize().into()
}

/// SHA-256-based keystream: block `i` is `SHA256(key || nonce || i)`.
fn keystream_block(key: &[u8; 32], nonce: &[u8], counter: u64) -> [u8; 32] {
    let mut h = Sha256::new();
    h.update(key);
    h.update(nonce);
    h.update(counter.to_le_bytes());
    h.finalize().into()
}

fn xor_keystream(key: &[u8; 32], nonce: &[u8], data: &mut [u8]) {
    for (i, chunk) in data.chunks_mut(32).enumerate() {
        let block = keystream_block(key, nonce, i as u64);
        for (b, k) in chunk.iter_mut().zip(block.iter()) {
            *b ^= k;
        }
    }
}

/// Seal a plaintext secret for storage: `sealed:<base64(nonce || ct)>`.
pub fn encrypt_secret(plaintext: &str) -> String {
    let key = machine_key();
    let mut nonce = [0u8; NONCE_LEN];
    rand::rngs::OsRng.fill_bytes(&mut nonce);
    let mut data = plaintext.as_bytes().to_vec();
    xor_keystream(&key, &nonce, &mut data);
    let mut out = Vec::with_capacity(NONCE_LEN + data.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&data);
    format!(
        "{SEAL_PREFIX}{}",
        base64::engine::general_purpose::STANDARD.encode(out)
    )
}

/// Unseal a stored secret.  Values without the `sealed:` prefix are passed
/// through unchanged so hand-edited plaintext entries keep working (they
/// are re-sealed on the next config write).
pub fn decrypt_secret(stored: &str) -> anyhow::Result<String> {
    let Some(b64) = stored.strip_prefix(SEAL_PREFIX) else {
        return Ok(stored.to_string());
    };
    let raw = base64::engine::general_purpose::STANDARD
        .decode(b64)
        .map_err(|e| anyhow::anyhow!("malformed sealed secret: {e}"))?;
    if raw.len() < NONCE_LEN {
        anyhow::bail!("sealed secret too short");
    }
    let (nonce, ct) = raw.split_at(NONCE_LEN);
    let key = machine_key();
    let mut data = ct.to_vec();
    xor_keystream(&key, nonce, &mut data);
    String::from_utf8(data).map_err(|_| anyhow::anyhow!("sealed secret is not valid UTF-8"))
}

/// Resolve the API key for a provider with the standard precedence:
/// environment variable, then the dedicated config entry, then the global
/// fallback.  Returns `None` when no source yields a key.
pub fn resolve_api_key(config: &Config, provider: &str) -> Option<String> {
    let env_var = match provider {
        "openrouter" | "chat" => "OPENROUTER_API_KEY",
        "morph" | "patch" => "MORPH_API_KEY",
        _ => return None,
    };
    if let Ok(key) = std::env::var(env_var) {
        if !key.is_empty() {
            return Some(key);
        }
    }
    let dedicated = match provider {
        "morph" | "patch" => config.patch.api_key.as_deref(),
        _ => config.api_key.as_deref(),
    };
    if let Some(stored) = dedicated {
        if let Ok(key) = decrypt_secret(stored) {
            return Some(key);
        }
    }
    config
        .fallback_api_key
        .as_deref()
        .and_then(|s| decrypt_secret(s).ok())
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    // Tests below mutate process-wide environment variables; serialize them.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn seal_round_trip() {
        let sealed = encrypt_secret("sk-or-test-key-1234567890");
        assert!(sealed.starts_with(SEAL_PREFIX));
        assert!(!sealed.contains("sk-or-test"));
        assert_eq!(decrypt_secret(&sealed).unwrap(), "sk-or-test-key-1234567890");
    }

    #[test]
    fn sealing_is_nonce_randomized() {
        let a = encrypt_secret("same-secret");
        let b = encrypt_secret("same-secret");
        assert_ne!(a, b, "distinct nonces must give distinct ciphertexts");
    }

    #[test]
    fn plaintext_passes_through() {
        assert_eq!(decrypt_secret("not-sealed").unwrap(), "not-sealed");
    }

    #[test]
    fn truncated_sealed_value_is_an_error() {
        assert!(decrypt_secret("sealed:QQ==").is_err());
    }

    #[test]
    fn env_var_takes_precedence() {
        let _env = ENV_LOCK.lock().unwrap();
        let mut config = Config::default();
        config.api_key = Some(encrypt_secret("from-config"));
        std::env::set_var("OPENROUTER_API_KEY", "from-env");
        let key = resolve_api_key(&config, "openrouter");
        std::env::remove_var("OPENROUTER_API_KEY");
        assert_eq!(key.as_deref(), Some("from-env"));
    }

    #[test]
    fn config_key_used_when_env_unset() {
        let _env = ENV_LOCK.lock().unwrap();
        std::env::remove_var("MORPH_API_KEY");
        let mut config = Config::default();
        config.patch.api_key = Some(encrypt_secret("morph-key"));
        assert_eq!(
            resolve_api_key(&config, "morph").as_deref(),
            Some("morph-key")
        );
    }

    #[test]
    fn fallback_used_last() {
        let _env = ENV_LOCK.lock().unwrap();
        std::env::remove_var("OPENROUTER_API_KEY");
        let mut config = Config::default();
        config.fallback_api_key = Some(encrypt_secret("fallback"));
        assert_eq!(
            resolve_api_key(&config, "openrouter").as_deref(),
            Some("fallback")
        );
    }

    #[test]
    fn unknown_provider_yields_none() {
        assert!(resolve_api_key(&Config::default(), "nonesuch").is_none());
    }
}
