//! Node identity: the Ed25519 key that signs session tokens.

use ed25519_dalek::{
    SigningKey,
    pkcs8::{DecodePrivateKey, EncodePrivateKey, spki::der::pem::LineEnding},
};
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};
use std::{fs, io, path::Path};
use tracing::info;

use crate::error::IdentityError;

/// Loads the identity key from `path`, creating it when absent.
///
/// A non-empty `configured_hex` key is used to create the file, and must match
/// an existing file. Without either, a fresh key is generated and stored.
pub fn load_or_create(path: &Path, configured_hex: &str) -> Result<SigningKey, IdentityError> {
    let configured = parse_configured_key(configured_hex)?;

    match fs::read_to_string(path) {
        Ok(pem) => {
            let stored = SigningKey::from_pkcs8_pem(&pem)
                .map_err(|e| IdentityError::Pem(e.to_string()))?;
            if let Some(configured) = configured
                && configured.to_bytes() != stored.to_bytes()
            {
                return Err(IdentityError::Mismatch);
            }
            info!(path = %path.display(), "loaded identity key");
            Ok(stored)
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            let key = match configured {
                Some(key) => key,
                None => SigningKey::generate(&mut OsRng),
            };
            store(path, &key)?;
            info!(path = %path.display(), "stored new identity key");
            Ok(key)
        }
        Err(e) => Err(IdentityError::io(path, e)),
    }
}

fn parse_configured_key(hex_key: &str) -> Result<Option<SigningKey>, IdentityError> {
    let hex_key = hex_key.trim().trim_start_matches("0x");
    if hex_key.is_empty() {
        return Ok(None);
    }

    let bytes = hex::decode(hex_key).map_err(|_| IdentityError::InvalidConfiguredKey)?;
    match bytes.len() {
        32 => {
            let seed: [u8; 32] = bytes
                .as_slice()
                .try_into()
                .map_err(|_| IdentityError::InvalidConfiguredKey)?;
            Ok(Some(SigningKey::from_bytes(&seed)))
        }
        64 => {
            let keypair: [u8; 64] = bytes
                .as_slice()
                .try_into()
                .map_err(|_| IdentityError::InvalidConfiguredKey)?;
            SigningKey::from_keypair_bytes(&keypair)
                .map(Some)
                .map_err(|_| IdentityError::InvalidConfiguredKey)
        }
        _ => Err(IdentityError::InvalidConfiguredKey),
    }
}

fn store(path: &Path, key: &SigningKey) -> Result<(), IdentityError> {
    if let Some(dir) = path.parent()
        && !dir.as_os_str().is_empty()
    {
        fs::create_dir_all(dir).map_err(|e| IdentityError::io(dir, e))?;
    }

    let pem = key
        .to_pkcs8_pem(LineEnding::LF)
        .map_err(|e| IdentityError::Pem(e.to_string()))?;
    fs::write(path, pem.as_bytes()).map_err(|e| IdentityError::io(path, e))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))
            .map_err(|e| IdentityError::io(path, e))?;
    }

    Ok(())
}

/// Hex SHA-256 of the public key. Used as issuer and audience of tokens.
pub fn identity_of(key: &SigningKey) -> String {
    hex::encode(Sha256::digest(key.verifying_key().as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const SEED_HEX: &str = "9d61b19deffd5a60ba844af492ec2cc44449c5697b326919703bac031cae7f60";

    #[test]
    fn test_generates_and_reloads() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("keys").join("identity.key");

        let created = load_or_create(&path, "").unwrap();
        assert!(path.exists());

        let loaded = load_or_create(&path, "").unwrap();
        assert_eq!(created.to_bytes(), loaded.to_bytes());
    }

    #[test]
    fn test_configured_key_is_persisted() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("identity.key");

        let key = load_or_create(&path, SEED_HEX).unwrap();
        assert_eq!(hex::encode(key.to_bytes()), SEED_HEX);

        let reloaded = load_or_create(&path, "").unwrap();
        assert_eq!(reloaded.to_bytes(), key.to_bytes());
    }

    #[test]
    fn test_keypair_form_is_accepted() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("identity.key");
        let seed = load_or_create(&dir.path().join("seed.key"), SEED_HEX).unwrap();

        let keypair_hex = hex::encode(seed.to_keypair_bytes());
        let key = load_or_create(&path, &keypair_hex).unwrap();
        assert_eq!(key.to_bytes(), seed.to_bytes());
    }

    #[test]
    fn test_mismatch_is_fatal() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("identity.key");
        load_or_create(&path, "").unwrap();

        let result = load_or_create(&path, SEED_HEX);
        assert!(matches!(result, Err(IdentityError::Mismatch)));
    }

    #[test]
    fn test_invalid_configured_key() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("identity.key");
        for bad in ["zz", "abcd", "00".repeat(33).as_str()] {
            assert!(matches!(
                load_or_create(&path, bad),
                Err(IdentityError::InvalidConfiguredKey)
            ));
        }
        assert!(!path.exists());
    }

    #[test]
    fn test_corrupt_file_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("identity.key");
        fs::write(&path, "not a pem").unwrap();
        assert!(matches!(
            load_or_create(&path, ""),
            Err(IdentityError::Pem(_))
        ));
    }

    #[test]
    fn test_identity_is_stable_hex() {
        let key = SigningKey::from_bytes(&[7u8; 32]);
        let identity = identity_of(&key);
        assert_eq!(identity.len(), 64);
        assert_eq!(identity, identity_of(&key));
    }
}
