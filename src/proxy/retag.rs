//! Display-tag rewriting for surviving descriptors
//!
//! Rewrites only the tag component of a descriptor, appending `::<COUNTRY>`.
//! An existing country suffix is replaced, never doubled. How the tag is
//! stored differs per protocol: vless/trojan/shadowsocks keep it in the URI
//! fragment, vmess embeds it in the base64 payload's `ps` field. Each
//! encoding is a codec; adding a protocol means adding a codec, not another
//! branch in the rewrite logic.

use crate::proxy::models::Protocol;
use crate::proxy::parser::DescriptorParser;
use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine;

/// Tag storage strategy for one descriptor encoding
trait TagCodec {
    /// Rewrite the descriptor's tag, leaving everything else untouched
    fn write_tag(&self, raw: &str, tag: &str) -> Option<String>;
}

/// Tag lives in the URI fragment; a missing delimiter is created
struct FragmentTag;

impl TagCodec for FragmentTag {
    fn write_tag(&self, raw: &str, tag: &str) -> Option<String> {
        let base = raw.split_once('#').map_or(raw, |(b, _)| b);
        Some(format!("{}#{}", base, tag))
    }
}

/// Tag lives in the `ps` field of the base64-wrapped JSON payload
struct EncodedTag;

impl TagCodec for EncodedTag {
    fn write_tag(&self, raw: &str, tag: &str) -> Option<String> {
        let body = raw.strip_prefix("vmess://")?;
        let (payload, fragment) = match body.split_once('#') {
            Some((p, f)) => (p, Some(f)),
            None => (body, None),
        };

        let decoded = decode_base64(payload)?;
        let mut json: serde_json::Value = serde_json::from_slice(&decoded).ok()?;
        json.as_object_mut()?
            .insert("ps".to_string(), serde_json::Value::String(tag.to_string()));

        let reencoded = STANDARD.encode(serde_json::to_string(&json).ok()?);
        Some(match fragment {
            Some(f) => format!("vmess://{}#{}", reencoded, f),
            None => format!("vmess://{}", reencoded),
        })
    }
}

fn codec_for(protocol: Protocol) -> &'static dyn TagCodec {
    match protocol {
        Protocol::Vmess => &EncodedTag,
        Protocol::Vless | Protocol::Trojan | Protocol::Shadowsocks => &FragmentTag,
    }
}

/// Rewrite a descriptor's display tag to `<base name>::<country>`
///
/// The base name is the current tag with any previous `::CC` suffix
/// stripped. Returns the original descriptor unchanged when it cannot be
/// parsed or re-encoded.
pub fn retag_with_country(raw: &str, country: &str) -> String {
    let raw = raw.trim();
    let params = match DescriptorParser::parse_uri(raw) {
        Ok(p) => p,
        Err(_) => return raw.to_string(),
    };

    let base_name = params
        .display_tag
        .split("::")
        .next()
        .unwrap_or(&params.display_tag)
        .trim();
    let new_tag = format!("{}::{}", base_name, country);

    codec_for(params.protocol)
        .write_tag(raw, &new_tag)
        .unwrap_or_else(|| raw.to_string())
}

fn decode_base64(s: &str) -> Option<Vec<u8>> {
    let s = s.trim();
    STANDARD
        .decode(s)
        .or_else(|_| STANDARD_NO_PAD.decode(s))
        .or_else(|_| URL_SAFE.decode(s))
        .or_else(|_| URL_SAFE_NO_PAD.decode(s))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const UUID: &str = "d342d11e-d424-4583-b36e-524ab1f0afa4";

    #[test]
    fn test_retag_appends_country_to_fragment() {
        let uri = format!("vless://{}@example.com:443?type=ws#Berlin", UUID);
        let tagged = retag_with_country(&uri, "DE");
        assert!(tagged.ends_with("#Berlin::DE"));
        assert!(tagged.starts_with(&format!("vless://{}@example.com:443?type=ws", UUID)));
    }

    #[test]
    fn test_retag_replaces_existing_suffix() {
        let uri = "trojan://pw@example.com:443#node::DE";
        let tagged = retag_with_country(uri, "FR");
        assert!(tagged.ends_with("#node::FR"));
        assert!(!tagged.contains("DE"));
    }

    #[test]
    fn test_retag_twice_keeps_single_suffix() {
        let uri = format!("vless://{}@example.com:443#edge", UUID);
        let once = retag_with_country(&uri, "DE");
        let twice = retag_with_country(&once, "FR");
        assert!(twice.ends_with("#edge::FR"));
    }

    #[test]
    fn test_retag_creates_missing_delimiter() {
        let uri = format!("vless://{}@example.com:443", UUID);
        let tagged = retag_with_country(&uri, "NL");
        // Default tag is host:port, so the created fragment carries it
        assert!(tagged.ends_with("#example.com:443::NL"));
    }

    #[test]
    fn test_retag_vmess_rewrites_payload_only() {
        let json = format!(
            r#"{{"v":"2","ps":"Tokyo","add":"example.com","port":"443","id":"{}","aid":"0","net":"ws","tls":"tls"}}"#,
            UUID
        );
        let uri = format!("vmess://{}", STANDARD.encode(&json));
        let tagged = retag_with_country(&uri, "JP");

        let payload = tagged.strip_prefix("vmess://").unwrap();
        let decoded: serde_json::Value =
            serde_json::from_slice(&STANDARD.decode(payload).unwrap()).unwrap();
        assert_eq!(decoded["ps"], "Tokyo::JP");
        assert_eq!(decoded["add"], "example.com");
        assert_eq!(decoded["net"], "ws");
    }

    #[test]
    fn test_retag_vmess_round_trip_suffix() {
        let json = format!(
            r#"{{"ps":"Osaka","add":"example.com","port":"443","id":"{}"}}"#,
            UUID
        );
        let uri = format!("vmess://{}", STANDARD.encode(&json));
        let twice = retag_with_country(&retag_with_country(&uri, "DE"), "FR");

        let payload = twice.strip_prefix("vmess://").unwrap();
        let decoded: serde_json::Value =
            serde_json::from_slice(&STANDARD.decode(payload).unwrap()).unwrap();
        assert_eq!(decoded["ps"], "Osaka::FR");
    }

    #[test]
    fn test_retag_unparsable_returns_original() {
        assert_eq!(retag_with_country("not a uri", "DE"), "not a uri");
    }
}
