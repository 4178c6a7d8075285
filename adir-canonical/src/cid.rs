// Copyright © 2024 The Agent Directory Contributors
//
// This file is part of agent-dir, distributed under the GPLv3 or later.
// For full terms see the included LICENSE file.

use std::{
    convert::TryFrom,
    fmt::{self, Display},
    str::FromStr,
};

use multibase::Base;
use multihash::{Multihash, Sha2_256};
use serde::{de::Visitor, Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// CIDv1 framing: version tag, then the content codec, then the multihash.
const VERSION: u8 = 0x01;
/// dag-pb content codec, which renders sha2-256 CIDs as `bafy…` strings.
const CODEC: u8 = 0x70;

#[derive(Clone, PartialEq, Eq, Debug, Error)]
#[error("invalid hash algorithm, expected {expected:?}, actual {actual:?}")]
pub struct AlgorithmMismatch {
    expected: multihash::Code,
    actual: multihash::Code,
}

/// Content identifier of a record
///
/// The identifier of a record is the sha2-256 digest of its canonical form,
/// wrapped in a multihash and framed as a CIDv1. The rendered form is the
/// base32-lower multibase encoding of that framing.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Cid(Multihash);

impl Cid {
    /// Derive the [`Cid`] of a byte string.
    pub fn digest(data: &[u8]) -> Self {
        Cid(Sha2_256::digest(data))
    }

    pub fn multihash(&self) -> &Multihash {
        &self.0
    }

    /// The `sha256:<hex>` rendering of the wrapped digest, as used in OCI
    /// descriptors.
    pub fn oci_digest(&self) -> String {
        format!("sha256:{}", hex(self.0.digest()))
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

impl TryFrom<Multihash> for Cid {
    type Error = AlgorithmMismatch;

    fn try_from(mh: Multihash) -> Result<Self, Self::Error> {
        match mh.algorithm() {
            multihash::Code::Sha2_256 => Ok(Self(mh)),
            c => Err(AlgorithmMismatch {
                expected: multihash::Code::Sha2_256,
                actual: c,
            }),
        }
    }
}

impl Display for Cid {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut framed = Vec::with_capacity(2 + self.0.as_bytes().len());
        framed.push(VERSION);
        framed.push(CODEC);
        framed.extend_from_slice(self.0.as_bytes());
        f.write_str(&multibase::encode(Base::Base32Lower, framed))
    }
}

#[derive(Clone, PartialEq, Eq, Debug, Error)]
pub enum ParseError {
    #[error(transparent)]
    Algo(#[from] AlgorithmMismatch),

    #[error(transparent)]
    Encoding(#[from] multibase::Error),

    #[error(transparent)]
    Multihash(#[from] multihash::DecodeOwnedError),

    #[error("truncated CID")]
    Truncated,

    #[error("unsupported CID version {0:#04x}")]
    Version(u8),

    #[error("unsupported content codec {0:#04x}")]
    Codec(u8),
}

impl FromStr for Cid {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = multibase::decode(s).map(|(_base, bytes)| bytes)?;
        match bytes.as_slice() {
            [] | [_] => Err(ParseError::Truncated),
            [VERSION, CODEC, ..] => {
                let mhash = Multihash::from_bytes(bytes[2..].to_vec())?;
                Self::try_from(mhash).map_err(ParseError::from)
            },
            [VERSION, codec, ..] => Err(ParseError::Codec(*codec)),
            [version, ..] => Err(ParseError::Version(*version)),
        }
    }
}

impl Serialize for Cid {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Cid {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct CidVisitor;

        impl<'de> Visitor<'de> for CidVisitor {
            type Value = Cid;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                write!(f, "a Cid")
            }

            fn visit_str<E>(self, s: &str) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                s.parse().map_err(serde::de::Error::custom)
            }
        }

        deserializer.deserialize_str(CidVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;
    use rand::random;

    #[test]
    fn is_a_deterministic_function() {
        let data: [u8; 32] = random();
        assert_eq!(Cid::digest(&data), Cid::digest(&data))
    }

    #[test]
    fn renders_base32_cidv1() {
        let cid = Cid::digest(b"hello record");
        assert!(cid.to_string().starts_with("bafy"), "{}", cid)
    }

    #[test]
    fn str_roundtrip() {
        let cid = Cid::digest(b"roundtrip");
        assert_eq!(cid, cid.to_string().parse().unwrap())
    }

    #[test]
    fn json_roundtrip() {
        let cid = Cid::digest(b"json");
        let json = serde_json::to_string(&cid).unwrap();
        assert_eq!(cid, serde_json::from_str(&json).unwrap())
    }

    #[test]
    fn rejects_wrong_algorithm() {
        let mh = multihash::Sha3_256::digest(b"nope");
        let mut framed = vec![VERSION, CODEC];
        framed.extend_from_slice(mh.as_bytes());
        let rendered = multibase::encode(Base::Base32Lower, framed);

        assert!(matches!(
            rendered.parse::<Cid>(),
            Err(ParseError::Algo(AlgorithmMismatch { .. }))
        ))
    }

    #[test]
    fn rejects_wrong_codec() {
        let mh = Sha2_256::digest(b"nope");
        let mut framed = vec![VERSION, 0x55];
        framed.extend_from_slice(mh.as_bytes());
        let rendered = multibase::encode(Base::Base32Lower, framed);

        assert!(matches!(rendered.parse::<Cid>(), Err(ParseError::Codec(0x55))))
    }

    #[test]
    fn oci_digest_is_hex_sha256() {
        let cid = Cid::digest(b"digest");
        let digest = cid.oci_digest();
        assert!(digest.starts_with("sha256:"));
        assert_eq!(digest.len(), "sha256:".len() + 64)
    }
}
