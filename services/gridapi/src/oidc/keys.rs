//! RSA signing key for tokens minted by the embedded server.
//!
//! # Key invariants
//! - Keys are RSA-2048 and sign with RS256.
//! - The key ID is stable for the life of the key: it is stored next to the
//!   PEM in a `<path>.kid` sidecar file.
//! - Key files are created with mode 0600 and never overwritten.
//! - Without a configured path the key is ephemeral: tokens stop verifying
//!   when the process restarts.
use anyhow::{Context, Result};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use jsonwebtoken::EncodingKey;
use jsonwebtoken::jwk::{
    AlgorithmParameters, CommonParameters, Jwk, JwkSet, KeyAlgorithm, PublicKeyUse,
    RSAKeyParameters, RSAKeyType,
};
use rand::RngCore;
use rsa::pkcs1::{DecodeRsaPrivateKey, EncodeRsaPrivateKey, LineEnding};
use rsa::traits::PublicKeyParts;
use rsa::{RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

const KEY_BITS: usize = 2048;

/// Private signing key plus its key ID. `Debug` prints the key ID only.
#[derive(Clone)]
pub struct SigningKey {
    kid: String,
    encoding: EncodingKey,
    public: RsaPublicKey,
}

impl std::fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningKey")
            .field("kid", &self.kid)
            .finish_non_exhaustive()
    }
}

impl SigningKey {
    /// Fresh in-memory key with a random key ID.
    pub fn generate() -> Result<Self> {
        let private =
            RsaPrivateKey::new(&mut rand::thread_rng(), KEY_BITS).context("generate RSA key")?;
        let mut kid = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut kid);
        Self::from_private(&private, hex::encode(kid))
    }

    /// Load the key at `path`, or generate and persist one there. `None`
    /// yields an ephemeral key.
    ///
    /// # Errors
    /// - Unreadable or non-PKCS#1 key files, and failures writing a new key
    ///   or its `.kid` sidecar.
    ///
    /// # Security
    /// - New files are created with mode 0600. An existing file is never
    ///   replaced, even if it fails to parse.
    pub fn load_or_generate(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            tracing::warn!("no signing key path configured; using an ephemeral key");
            return Self::generate();
        };
        if path.exists() {
            return Self::load(path);
        }
        let key = RsaPrivateKey::new(&mut rand::thread_rng(), KEY_BITS)
            .context("generate RSA key")?;
        let pem = key
            .to_pkcs1_pem(LineEnding::LF)
            .context("encode signing key")?;
        write_private(path, pem.as_bytes())?;
        let kid = derive_kid(&RsaPublicKey::from(&key));
        write_private(&kid_path(path), kid.as_bytes())?;
        tracing::info!(path = %path.display(), kid = %kid, "signing key generated");
        Self::from_private(&key, kid)
    }

    fn load(path: &Path) -> Result<Self> {
        let pem = fs::read_to_string(path)
            .with_context(|| format!("read signing key {}", path.display()))?;
        let key = RsaPrivateKey::from_pkcs1_pem(&pem).context("parse signing key")?;
        let sidecar = kid_path(path);
        let kid = match fs::read_to_string(&sidecar) {
            Ok(kid) if !kid.trim().is_empty() => kid.trim().to_string(),
            _ => {
                let kid = derive_kid(&RsaPublicKey::from(&key));
                write_private(&sidecar, kid.as_bytes())?;
                kid
            }
        };
        tracing::info!(path = %path.display(), kid = %kid, "signing key loaded");
        Self::from_private(&key, kid)
    }

    fn from_private(key: &RsaPrivateKey, kid: String) -> Result<Self> {
        let pem = key
            .to_pkcs1_pem(LineEnding::LF)
            .context("encode signing key")?;
        let encoding = EncodingKey::from_rsa_pem(pem.as_bytes()).context("load encoding key")?;
        Ok(Self {
            kid,
            encoding,
            public: RsaPublicKey::from(key),
        })
    }

    pub fn kid(&self) -> &str {
        &self.kid
    }

    pub fn encoding_key(&self) -> &EncodingKey {
        &self.encoding
    }

    /// Public half as a JWKS document.
    pub fn jwks(&self) -> JwkSet {
        let jwk = Jwk {
            common: CommonParameters {
                public_key_use: Some(PublicKeyUse::Signature),
                key_algorithm: Some(KeyAlgorithm::RS256),
                key_id: Some(self.kid.clone()),
                ..CommonParameters::default()
            },
            algorithm: AlgorithmParameters::RSA(RSAKeyParameters {
                key_type: RSAKeyType::RSA,
                n: URL_SAFE_NO_PAD.encode(self.public.n().to_bytes_be()),
                e: URL_SAFE_NO_PAD.encode(self.public.e().to_bytes_be()),
            }),
        };
        JwkSet { keys: vec![jwk] }
    }
}

fn kid_path(path: &Path) -> PathBuf {
    let mut sidecar = path.as_os_str().to_owned();
    sidecar.push(".kid");
    PathBuf::from(sidecar)
}

fn derive_kid(public: &RsaPublicKey) -> String {
    let digest = Sha256::digest(public.n().to_bytes_be());
    hex::encode(&digest[..16])
}

fn write_private(path: &Path, contents: &[u8]) -> Result<()> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options
        .open(path)
        .with_context(|| format!("create {}", path.display()))?;
    file.write_all(contents)
        .with_context(|| format!("write {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("gridapi-keys-{}", uuid::Uuid::new_v4()));
        fs::create_dir_all(&dir).expect("temp dir");
        dir
    }

    #[test]
    fn persisted_key_keeps_its_kid() {
        let dir = temp_dir();
        let path = dir.join("signing.pem");
        let first = SigningKey::load_or_generate(Some(&path)).expect("generate");
        let second = SigningKey::load_or_generate(Some(&path)).expect("load");
        assert_eq!(first.kid(), second.kid());
        assert_eq!(first.jwks(), second.jwks());
        assert!(kid_path(&path).exists());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&path).expect("metadata").permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn jwks_exposes_rsa_public_parts() {
        let key = SigningKey::generate().expect("generate");
        let jwks = key.jwks();
        assert_eq!(jwks.keys.len(), 1);
        let jwk = &jwks.keys[0];
        assert_eq!(jwk.common.key_id.as_deref(), Some(key.kid()));
        let AlgorithmParameters::RSA(params) = &jwk.algorithm else {
            panic!("expected RSA jwk");
        };
        assert_eq!(params.e, "AQAB");
    }
}
