use base64::alphabet;
use base64::engine::general_purpose::GeneralPurpose;
use base64::engine::general_purpose::GeneralPurposeConfig;
use base64::engine::DecodePaddingMode;
use base64::Engine as _;
use serde::Deserialize;
use serde_json::Map;
use serde_json::Value;

use crate::claims::JwtPayload;
use crate::error::Error;
use crate::error::Result;

/// URL-safe base64 that accepts segments with or without `=` padding.
const BASE64URL: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new()
        .with_encode_padding(false)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// The JOSE header fields the verifier relies on.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct JwtHeader {
    pub alg: String,
    #[serde(default)]
    pub kid: Option<String>,
    #[serde(default)]
    pub typ: Option<String>,
}

/// A token split into its decoded parts. Nothing here has been verified yet.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedToken {
    pub header: JwtHeader,
    /// Every header field, including the ones not modelled by [`JwtHeader`].
    pub raw_header: Map<String, Value>,
    pub payload: JwtPayload,
    pub signature: Vec<u8>,
    /// The exact `header.payload` text the signature was computed over.
    pub signed_input: String,
}

/// Split and decode a compact `header.payload.signature` token.
///
/// Any malformed segment yields [`Error::TokenInvalid`] without saying which
/// part was wrong.
pub fn decode(token: &str) -> Result<DecodedToken> {
    let mut segments = token.split('.');
    let (Some(header), Some(payload), Some(signature), None) = (
        segments.next(),
        segments.next(),
        segments.next(),
        segments.next(),
    ) else {
        return Err(Error::TokenInvalid(
            "Invalid JWT form. A JWT consists of three parts separated by dots.".to_string(),
        ));
    };

    if header.is_empty() || payload.is_empty() || signature.is_empty() {
        return Err(Error::TokenInvalid(
            "Invalid JWT form. None of the three parts may be empty.".to_string(),
        ));
    }

    let raw_header = decode_json_segment(header)?;
    let parsed_header = serde_json::from_value::<JwtHeader>(Value::Object(raw_header.clone()))
        .map_err(|_| malformed())?;
    let payload_map = decode_json_segment(payload)?;
    let signature_bytes = BASE64URL.decode(signature).map_err(|_| malformed())?;

    Ok(DecodedToken {
        header: parsed_header,
        raw_header,
        payload: JwtPayload::from(payload_map),
        signature: signature_bytes,
        signed_input: token[..header.len() + 1 + payload.len()].to_string(),
    })
}

fn decode_json_segment(segment: &str) -> Result<Map<String, Value>> {
    let bytes = BASE64URL.decode(segment).map_err(|_| malformed())?;
    serde_json::from_slice(&bytes).map_err(|_| malformed())
}

fn malformed() -> Error {
    Error::TokenInvalid("Invalid JWT. The token could not be decoded.".to_string())
}
