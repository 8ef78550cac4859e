//! Proof Key for Code Exchange (RFC 7636).
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PkceMethod {
    S256,
    #[serde(rename = "plain")]
    Plain,
}

impl PkceMethod {
    /// Absent method means `plain`, per RFC 7636 §4.3.
    pub fn parse(value: Option<&str>) -> Option<Self> {
        match value {
            None | Some("plain") => Some(PkceMethod::Plain),
            Some("S256") => Some(PkceMethod::S256),
            Some(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PkceChallenge {
    pub challenge: String,
    pub method: PkceMethod,
}

impl PkceChallenge {
    /// Check `verifier` against the stored challenge.
    ///
    /// # Returns
    /// - `false` for verifiers outside the 43 to 128 character range, whatever
    ///   the method.
    pub fn verify(&self, verifier: &str) -> bool {
        if !(43..=128).contains(&verifier.len()) {
            return false;
        }
        match self.method {
            PkceMethod::Plain => verifier == self.challenge,
            PkceMethod::S256 => s256(verifier) == self.challenge,
        }
    }
}

/// `BASE64URL(SHA256(verifier))` without padding.
pub fn s256(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rfc_7636_appendix_b_vector() {
        let verifier = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
        let challenge = PkceChallenge {
            challenge: "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM".to_string(),
            method: PkceMethod::S256,
        };
        assert!(challenge.verify(verifier));
        assert!(!challenge.verify(&verifier.replace('d', "e")));
    }

    #[test]
    fn plain_compares_directly_and_checks_length() {
        let verifier = "a".repeat(43);
        let plain = PkceChallenge {
            challenge: verifier.clone(),
            method: PkceMethod::Plain,
        };
        assert!(plain.verify(&verifier));
        let short = PkceChallenge {
            challenge: "short".to_string(),
            method: PkceMethod::Plain,
        };
        assert!(!short.verify("short"));
        assert_eq!(PkceMethod::parse(Some("S512")), None);
        assert_eq!(PkceMethod::parse(None), Some(PkceMethod::Plain));
    }
}
