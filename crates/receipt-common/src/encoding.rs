use sha2::{Digest, Sha256};

pub fn hex_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{b:02x}"));
    }
    out
}

/// Decode hex (either case). `None` on odd length or a non-hex digit.
pub fn hex_decode(input: &str) -> Option<Vec<u8>> {
    if input.len() % 2 != 0 {
        return None;
    }
    input
        .as_bytes()
        .chunks_exact(2)
        .map(|pair| {
            let hi = (pair[0] as char).to_digit(16)?;
            let lo = (pair[1] as char).to_digit(16)?;
            Some(((hi << 4) | lo) as u8)
        })
        .collect()
}

/// Whether `s` is exactly the form [`sha256_hex`] produces: 64 lowercase
/// hex digits.
pub fn is_sha256_hex(s: &str) -> bool {
    !s.bytes().any(|b| b.is_ascii_uppercase())
        && hex_decode(s).is_some_and(|bytes| bytes.len() == 32)
}

/// Lowercase hex SHA-256 of `bytes`.
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex_encode(&Sha256::digest(bytes))
}

/// First `len` characters of a hex digest, for logs and audit lines.
pub fn hash_prefix(hash: &str, len: usize) -> &str {
    hash.get(..len).unwrap_or(hash)
}

/// Serde adapter storing byte vectors as standard base64 strings.
pub mod base64_bytes {
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&base64::engine::general_purpose::STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        base64::engine::general_purpose::STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

/// Optional variant of [`base64_bytes`]; `None` serializes as `null`.
pub mod base64_bytes_opt {
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        bytes: &Option<Vec<u8>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match bytes {
            Some(b) => {
                serializer.serialize_some(&base64::engine::general_purpose::STANDARD.encode(b))
            }
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Vec<u8>>, D::Error> {
        let encoded: Option<String> = Option::deserialize(deserializer)?;
        encoded
            .map(|s| {
                base64::engine::general_purpose::STANDARD
                    .decode(s.as_bytes())
                    .map_err(serde::de::Error::custom)
            })
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_hex_matches_known_vector() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn hex_decode_rejects_odd_length_and_bad_chars() {
        assert!(hex_decode("abc").is_none());
        assert!(hex_decode("zz").is_none());
        assert!(hex_decode(" 0ff").is_none());
        assert_eq!(hex_decode("00fF").unwrap(), vec![0x00, 0xff]);
    }

    #[test]
    fn digest_shape_is_strict() {
        let digest = sha256_hex(b"abc");
        assert!(is_sha256_hex(&digest));
        assert!(!is_sha256_hex(&digest.to_uppercase()));
        assert!(!is_sha256_hex(&digest[..62]));
        assert!(!is_sha256_hex(&format!("{}|0", &digest[..62])));
        assert!(!is_sha256_hex("GENESIS"));
    }

    #[test]
    fn hash_prefix_is_safe_on_short_input() {
        assert_eq!(hash_prefix("abcdef", 4), "abcd");
        assert_eq!(hash_prefix("ab", 8), "ab");
    }

    #[test]
    fn base64_adapter_serializes_as_string() {
        #[derive(serde::Serialize, serde::Deserialize, PartialEq, Debug)]
        struct Holder {
            #[serde(with = "base64_bytes")]
            data: Vec<u8>,
            #[serde(with = "base64_bytes_opt")]
            maybe: Option<Vec<u8>>,
        }

        let holder = Holder {
            data: vec![1, 2, 3],
            maybe: None,
        };
        let json = serde_json::to_value(&holder).unwrap();
        assert_eq!(json["data"], "AQID");
        assert!(json["maybe"].is_null());
        let back: Holder = serde_json::from_value(json).unwrap();
        assert_eq!(back, holder);
    }
}
