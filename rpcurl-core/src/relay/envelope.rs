use super::RelayError;
use base64::{Engine, engine::general_purpose::STANDARD};
use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue};

/// One header name with all its values, in order.
#[derive(Clone, PartialEq, prost::Message)]
pub struct Header {
    #[prost(string, tag = "1")]
    pub key: String,
    #[prost(string, repeated, tag = "2")]
    pub value: Vec<String>,
}

/// A call to relay.
#[derive(Clone, PartialEq, prost::Message)]
pub struct RequestEnvelope {
    /// Absolute URL of the RPC, e.g. `https://api.example.com/pkg.Service/Method`.
    #[prost(string, tag = "1")]
    pub target: String,
    #[prost(message, repeated, tag = "2")]
    pub headers: Vec<Header>,
    /// The RPC body, already in the wire format of the target protocol.
    #[prost(bytes = "bytes", tag = "3")]
    pub body: Bytes,
}

/// What the upstream answered.
#[derive(Clone, PartialEq, prost::Message)]
pub struct ResponseEnvelope {
    #[prost(uint32, tag = "1")]
    pub status: u32,
    #[prost(message, repeated, tag = "2")]
    pub headers: Vec<Header>,
    #[prost(bytes = "bytes", tag = "3")]
    pub body: Bytes,
    #[prost(message, repeated, tag = "4")]
    pub trailers: Vec<Header>,
}

/// Standard alphabet base64. Line breaks are ignored.
pub fn decode_base64(text: &[u8]) -> Result<Vec<u8>, base64::DecodeError> {
    let compact: Vec<u8> = text
        .iter()
        .copied()
        .filter(|b| *b != b'\r' && *b != b'\n')
        .collect();

    STANDARD.decode(compact)
}

pub fn encode_base64(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Builds a header map from envelope headers, keeping every value.
pub(crate) fn to_header_map(headers: &[Header]) -> Result<HeaderMap, RelayError> {
    let mut map = HeaderMap::new();

    for header in headers {
        let name = HeaderName::from_bytes(header.key.as_bytes()).map_err(|e| {
            RelayError::InvalidHeader {
                name: header.key.clone(),
                reason: e.to_string(),
            }
        })?;

        for value in &header.value {
            let value = HeaderValue::from_str(value).map_err(|e| RelayError::InvalidHeader {
                name: header.key.clone(),
                reason: e.to_string(),
            })?;
            map.append(name.clone(), value);
        }
    }

    Ok(map)
}

/// Groups a header map back into envelope headers.
pub(crate) fn from_header_map(map: &HeaderMap) -> Vec<Header> {
    map.keys()
        .map(|name| Header {
            key: name.as_str().to_string(),
            value: map
                .get_all(name)
                .iter()
                .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
                .collect(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base64_ignores_line_breaks() {
        let encoded = encode_base64(b"hello relay, this wraps");
        let (head, tail) = encoded.split_at(8);
        let wrapped = format!("{head}\r\n{tail}\n");

        assert_eq!(decode_base64(wrapped.as_bytes()).unwrap(), b"hello relay, this wraps");
    }

    #[test]
    fn url_safe_alphabet_is_rejected() {
        // 0xfb 0xff encodes to "+/8=" in the standard alphabet and "-_8=" in the URL safe one.
        assert_eq!(decode_base64(b"+/8=").unwrap(), vec![0xfb, 0xff]);
        assert!(decode_base64(b"-_8=").is_err());
    }

    #[test]
    fn header_maps_keep_repeated_values_in_order() {
        let headers = vec![
            Header {
                key: "X-Tag".into(),
                value: vec!["a".into(), "b".into()],
            },
            Header {
                key: "authorization".into(),
                value: vec!["Bearer t".into()],
            },
        ];

        let map = to_header_map(&headers).unwrap();
        let back = from_header_map(&map);

        assert_eq!(back[0].key, "x-tag");
        assert_eq!(back[0].value, vec!["a", "b"]);
        assert_eq!(back[1].value, vec!["Bearer t"]);
    }

    #[test]
    fn invalid_header_names_are_reported() {
        let headers = vec![Header {
            key: "bad header".into(),
            value: vec!["x".into()],
        }];

        assert!(matches!(
            to_header_map(&headers),
            Err(RelayError::InvalidHeader { name, .. }) if name == "bad header"
        ));
    }
}
