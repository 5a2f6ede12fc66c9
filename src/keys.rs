use std::fmt;
use std::str::FromStr;

use base64::engine::general_purpose::STANDARD;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use jsonwebtoken::jwk::AlgorithmParameters;
use jsonwebtoken::jwk::EllipticCurve;
use jsonwebtoken::jwk::EllipticCurveKeyParameters;
use jsonwebtoken::jwk::Jwk;
use jsonwebtoken::jwk::OctetKeyPairParameters;
use jsonwebtoken::jwk::RSAKeyParameters;
use jsonwebtoken::Algorithm;
use jsonwebtoken::DecodingKey;

use crate::error::Error;
use crate::error::Result;
use crate::token::DecodedToken;

/// Key id reported for a locally configured key.
pub const LOCAL_KID: &str = "local";

const PEM_LINE_WIDTH: usize = 64;

// DER-encoded named curve OIDs carried in an EC SubjectPublicKeyInfo
const P256_OID: &[u8] = &[0x06, 0x08, 0x2A, 0x86, 0x48, 0xCE, 0x3D, 0x03, 0x01, 0x07];
const P384_OID: &[u8] = &[0x06, 0x05, 0x2B, 0x81, 0x04, 0x00, 0x22];

/// Verification key material, either a JWKS entry or a PEM-encoded public key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublicKey {
    Jwk(Jwk),
    Pem(String),
}

impl PublicKey {
    pub fn kid(&self) -> Option<&str> {
        match self {
            Self::Jwk(jwk) => jwk.common.key_id.as_deref(),
            Self::Pem(_) => Some(LOCAL_KID),
        }
    }
}

impl From<Jwk> for PublicKey {
    fn from(jwk: Jwk) -> Self {
        Self::Jwk(jwk)
    }
}

/// Family of asymmetric keys an algorithm needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyFamily {
    Rsa,
    Ec,
    Ed,
}

impl KeyFamily {
    pub fn for_algorithm(algorithm: Algorithm) -> Result<Self> {
        match algorithm {
            Algorithm::RS256
            | Algorithm::RS384
            | Algorithm::RS512
            | Algorithm::PS256
            | Algorithm::PS384
            | Algorithm::PS512 => Ok(Self::Rsa),
            Algorithm::ES256 | Algorithm::ES384 => Ok(Self::Ec),
            Algorithm::EdDSA => Ok(Self::Ed),
            Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512 => Err(
                Error::AlgorithmNotSupported(format!("{algorithm:?} is a symmetric algorithm")),
            ),
        }
    }
}

/// Parse a header `alg` value into one of the supported asymmetric algorithms.
pub fn parse_algorithm(name: &str) -> Result<Algorithm> {
    let algorithm =
        Algorithm::from_str(name).map_err(|_| Error::AlgorithmNotSupported(name.to_string()))?;
    KeyFamily::for_algorithm(algorithm)?;
    Ok(algorithm)
}

/// A key ready for signature checks, tagged with the family it was built for.
///
/// `DecodingKey` does not expose its family, so it is tracked here to refuse
/// pairing a key with an algorithm of another family.
#[derive(Clone)]
pub struct VerificationKey {
    family: KeyFamily,
    key: DecodingKey,
}

impl VerificationKey {
    /// Normalize either key shape for use with `algorithm`.
    pub fn new(key: &PublicKey, algorithm: Algorithm) -> Result<Self> {
        let wanted = KeyFamily::for_algorithm(algorithm)?;
        let verification_key = match key {
            PublicKey::Jwk(jwk) => Self::from_jwk(jwk, algorithm)?,
            PublicKey::Pem(pem) => Self::from_pem(pem, wanted, algorithm)?,
        };

        if verification_key.family != wanted {
            return Err(Error::KeyInvalid(format!(
                "{:?} key cannot verify {algorithm:?} signatures",
                verification_key.family
            )));
        }

        Ok(verification_key)
    }

    pub fn family(&self) -> KeyFamily {
        self.family
    }

    fn from_jwk(jwk: &Jwk, algorithm: Algorithm) -> Result<Self> {
        match &jwk.algorithm {
            AlgorithmParameters::RSA(RSAKeyParameters { n, e, .. }) => Ok(Self {
                family: KeyFamily::Rsa,
                key: DecodingKey::from_rsa_components(n, e).map_err(key_invalid)?,
            }),
            AlgorithmParameters::EllipticCurve(EllipticCurveKeyParameters { curve, x, y, .. }) => {
                check_curve(curve, algorithm)?;
                Ok(Self {
                    family: KeyFamily::Ec,
                    key: DecodingKey::from_ec_components(x, y).map_err(key_invalid)?,
                })
            }
            AlgorithmParameters::OctetKeyPair(OctetKeyPairParameters { curve, x, .. }) => {
                if *curve != EllipticCurve::Ed25519 {
                    return Err(Error::KeyInvalid(format!("unsupported OKP curve {curve:?}")));
                }
                Ok(Self {
                    family: KeyFamily::Ed,
                    key: DecodingKey::from_ed_components(x).map_err(key_invalid)?,
                })
            }
            AlgorithmParameters::OctetKey(_) => Err(Error::AlgorithmNotSupported(
                "symmetric (oct) keys cannot verify session tokens".to_string(),
            )),
        }
    }

    fn from_pem(pem: &str, family: KeyFamily, algorithm: Algorithm) -> Result<Self> {
        let key = match family {
            KeyFamily::Rsa => DecodingKey::from_rsa_pem(pem.as_bytes()),
            KeyFamily::Ec => DecodingKey::from_ec_pem(pem.as_bytes()),
            KeyFamily::Ed => DecodingKey::from_ed_pem(pem.as_bytes()),
        }
        .map_err(key_invalid)?;

        // from_ec_pem accepts any named curve, so read it from the DER ourselves
        if family == KeyFamily::Ec {
            check_curve(&pem_curve(pem)?, algorithm)?;
        }

        Ok(Self { family, key })
    }

    /// Check `signature` over `message`. A mismatch is `Ok(false)`, not an error.
    pub fn verify(&self, message: &[u8], signature: &[u8], algorithm: Algorithm) -> Result<bool> {
        if KeyFamily::for_algorithm(algorithm)? != self.family {
            return Err(Error::KeyInvalid(format!(
                "{:?} key cannot verify {algorithm:?} signatures",
                self.family
            )));
        }

        let signature = URL_SAFE_NO_PAD.encode(signature);
        jsonwebtoken::crypto::verify(&signature, message, &self.key, algorithm).map_err(key_invalid)
    }
}

fn check_curve(curve: &EllipticCurve, algorithm: Algorithm) -> Result<()> {
    let expected = match algorithm {
        Algorithm::ES384 => EllipticCurve::P384,
        _ => EllipticCurve::P256,
    };
    if *curve != expected {
        return Err(Error::KeyInvalid(format!(
            "curve {curve:?} cannot verify {algorithm:?} signatures"
        )));
    }
    Ok(())
}

fn pem_curve(pem: &str) -> Result<EllipticCurve> {
    let (_, body) = split_pem(pem)?;
    let der = STANDARD
        .decode(body)
        .map_err(|error| Error::KeyInvalid(format!("PEM body is not base64: {error}")))?;
    let contains = |oid: &[u8]| der.windows(oid.len()).any(|window| window == oid);

    if contains(P256_OID) {
        Ok(EllipticCurve::P256)
    } else if contains(P384_OID) {
        Ok(EllipticCurve::P384)
    } else {
        Err(Error::KeyInvalid("EC key uses an unsupported curve".to_string()))
    }
}

/// Verify the signature of a decoded token with the algorithm named in its header.
pub fn verify_signature(token: &DecodedToken, key: &PublicKey) -> Result<bool> {
    let algorithm = parse_algorithm(&token.header.alg)?;
    let verification_key = VerificationKey::new(key, algorithm)?;
    verification_key.verify(token.signed_input.as_bytes(), &token.signature, algorithm)
}

/// Turn operator-supplied key text into a PEM public key.
///
/// Accepts a full PEM block, a PEM block with escaped `\n` sequences (as often
/// found in environment variables) or the bare single-line key body.
pub fn load_local_key(raw: Option<&str>) -> Result<PublicKey> {
    let raw = raw
        .map(str::trim)
        .filter(|key| !key.is_empty())
        .ok_or(Error::LocalJwkMissing)?;
    let raw = raw.replace("\\n", "\n");

    let (label, body) = if raw.contains("-----BEGIN") {
        split_pem(&raw)?
    } else {
        ("PUBLIC KEY".to_string(), raw.split_whitespace().collect())
    };

    Ok(PublicKey::Pem(wrap_pem(&label, &body)))
}

fn split_pem(pem: &str) -> Result<(String, String)> {
    let label = pem
        .lines()
        .map(str::trim)
        .find_map(|line| line.strip_prefix("-----BEGIN ")?.strip_suffix("-----"))
        .ok_or_else(|| Error::KeyInvalid("PEM block has no BEGIN line".to_string()))?
        .to_string();
    let body = pem
        .lines()
        .map(str::trim)
        .filter(|line| !line.starts_with("-----"))
        .collect::<String>();

    if body.is_empty() {
        return Err(Error::KeyInvalid("PEM block has no body".to_string()));
    }

    Ok((label, body))
}

fn wrap_pem(label: &str, body: &str) -> String {
    let mut pem = format!("-----BEGIN {label}-----\n");
    let chars = body.chars().collect::<Vec<_>>();
    for line in chars.chunks(PEM_LINE_WIDTH) {
        pem.extend(line);
        pem.push('\n');
    }
    pem.push_str(&format!("-----END {label}-----\n"));
    pem
}

impl fmt::Debug for VerificationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VerificationKey")
            .field("family", &self.family)
            .finish_non_exhaustive()
    }
}

fn key_invalid(error: jsonwebtoken::errors::Error) -> Error {
    Error::KeyInvalid(error.to_string())
}
