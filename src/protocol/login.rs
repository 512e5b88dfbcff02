//! Login identity extraction
//!
//! The login body is a little-endian `u32` length followed by a JSON chain
//! document: `{"chain": [token, token, token]}`. Each token is three
//! dot-separated base64url segments. When a third token is present, its
//! payload carries `extraData.displayName` and `extraData.XUID`.
//!
//! Signatures are not verified. The identity is a label for logging and
//! bookkeeping, not a credential.

use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig};
use base64::engine::DecodePaddingMode;
use base64::Engine;
use serde::Deserialize;
use tracing::debug;

use crate::core::cursor::{Cursor, Writer};
use crate::core::schema::Value;
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::port::PortContext;
use crate::utils::metrics::global_metrics;

/// base64url that tolerates both padded and unpadded input
const TOKEN_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new()
        .with_encode_padding(false)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

#[derive(Debug, Deserialize)]
struct ChainDocument {
    chain: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct IdentityClaims {
    #[serde(rename = "extraData", default)]
    extra_data: Option<LoginIdentity>,
}

/// Player identity claimed by the login chain
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct LoginIdentity {
    #[serde(rename = "displayName", default)]
    pub display_name: Option<String>,
    #[serde(rename = "XUID", default)]
    pub xuid: Option<String>,
}

/// Header and payload of a chain token
#[derive(Debug, Clone)]
pub struct DecodedToken {
    pub header: serde_json::Value,
    pub payload: serde_json::Value,
}

fn decode_segment(segment: &str) -> Result<Vec<u8>> {
    let normalized: String = segment
        .chars()
        .map(|ch| match ch {
            '+' => '-',
            '/' => '_',
            other => other,
        })
        .collect();
    TOKEN_ENGINE
        .decode(normalized.trim_end_matches('='))
        .map_err(|e| ProtocolError::InvalidLoginChain(format!("bad base64 segment: {e}")))
}

/// Decode a token's header and payload without checking its signature
pub fn decode_token(token: &str) -> Result<DecodedToken> {
    let segments: Vec<&str> = token.split('.').collect();
    let [header, payload, _signature] = segments.as_slice() else {
        return Err(ProtocolError::InvalidLoginChain(
            constants::ERR_CHAIN_SEGMENTS.to_string(),
        ));
    };
    Ok(DecodedToken {
        header: serde_json::from_slice(&decode_segment(header)?)?,
        payload: serde_json::from_slice(&decode_segment(payload)?)?,
    })
}

/// Read the identity out of a login body.
///
/// A chain with fewer than three tokens yields an empty identity.
pub fn read_login_chain(body: &[u8]) -> Result<LoginIdentity> {
    let mut c = Cursor::new(body);
    let len = c.read_u32_le()? as usize;
    let document: ChainDocument = serde_json::from_str(c.read_str(len)?)?;

    let Some(token) = document.chain.get(2) else {
        return Ok(LoginIdentity::default());
    };
    let segments: Vec<&str> = token.split('.').collect();
    let [_, payload, _] = segments.as_slice() else {
        return Err(ProtocolError::InvalidLoginChain(
            constants::ERR_CHAIN_SEGMENTS.to_string(),
        ));
    };
    let claims: IdentityClaims = serde_json::from_slice(&decode_segment(payload)?)?;
    Ok(claims.extra_data.unwrap_or_default())
}

/// Login packet handler: `[i32 protocol, varint-prefixed chain body]`.
/// After login the stream is encrypted, so the connection goes passthrough.
pub fn handle_login(value: &Value, _c: &mut Cursor<'_>, ctx: &mut PortContext) -> Result<()> {
    let protocol = value.at(0)?.as_int()?;
    let identity = read_login_chain(value.at(1)?.as_bytes()?)?;
    debug!(
        peer = %ctx.peer,
        protocol = %protocol,
        name = identity.display_name.as_deref().unwrap_or("-"),
        "Login observed"
    );
    global_metrics().login();
    ctx.events.on_login(
        ctx.peer.ip(),
        identity.display_name.as_deref(),
        identity.xuid.as_deref(),
    );
    ctx.demote("login completed");
    Ok(())
}

/// Server handshake handler: `[varint-prefixed token]`
pub fn handle_server_handshake(
    value: &Value,
    _c: &mut Cursor<'_>,
    ctx: &mut PortContext,
) -> Result<()> {
    let token = decode_token(value.at(0)?.as_str()?)?;
    debug!(
        peer = %ctx.peer,
        header = %token.header,
        payload = %token.payload,
        "Server handshake"
    );
    Ok(())
}

/// Build an unsigned token around `payload`
pub fn unsigned_token(payload: &serde_json::Value) -> Result<String> {
    let header = serde_json::json!({ "alg": "none" });
    Ok(format!(
        "{}.{}.",
        TOKEN_ENGINE.encode(serde_json::to_vec(&header)?),
        TOKEN_ENGINE.encode(serde_json::to_vec(payload)?)
    ))
}

/// Build a login chain body from tokens
pub fn build_login_body(chain: &[String]) -> Result<Vec<u8>> {
    let document = serde_json::to_string(&serde_json::json!({ "chain": chain }))?;
    let len = u32::try_from(document.len())
        .map_err(|_| ProtocolError::ValueOutOfRange(format!("chain of {} bytes", document.len())))?;
    let mut w = Writer::with_capacity(4 + document.len());
    w.write_u32_le(len);
    w.write_str(&document);
    Ok(w.into_inner())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use serde_json::json;

    fn identity_token(name: &str, xuid: &str) -> String {
        unsigned_token(&json!({ "extraData": { "displayName": name, "XUID": xuid } })).unwrap()
    }

    #[test]
    fn test_third_token_carries_identity() {
        let chain = vec![
            unsigned_token(&json!({})).unwrap(),
            unsigned_token(&json!({})).unwrap(),
            identity_token("Steve", "2535400000000000"),
        ];
        let identity = read_login_chain(&build_login_body(&chain).unwrap()).unwrap();
        assert_eq!(identity.display_name.as_deref(), Some("Steve"));
        assert_eq!(identity.xuid.as_deref(), Some("2535400000000000"));
    }

    #[test]
    fn test_short_chain_has_no_identity() {
        let chain = vec![identity_token("Alex", "1")];
        let identity = read_login_chain(&build_login_body(&chain).unwrap()).unwrap();
        assert_eq!(identity, LoginIdentity::default());
    }

    #[test]
    fn test_standard_alphabet_and_padding_accepted() {
        // {"a":"~~~"} contains '+' under the standard alphabet
        let standard = "eyJhIjoifn5+In0=";
        assert_eq!(decode_segment(standard).unwrap(), br#"{"a":"~~~"}"#);
        assert_eq!(decode_segment("eyJhIjoifn5-In0").unwrap(), br#"{"a":"~~~"}"#);
    }

    #[test]
    fn test_malformed_token() {
        assert!(matches!(
            decode_token("only.two"),
            Err(ProtocolError::InvalidLoginChain(_))
        ));
        let chain = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        assert!(read_login_chain(&build_login_body(&chain).unwrap()).is_err());
    }

    #[test]
    fn test_truncated_body() {
        let body = build_login_body(&[]).unwrap();
        let err = read_login_chain(&body[..body.len() - 1]).unwrap_err();
        assert!(err.is_underrun());
    }
}
