// Copyright (c) 2022 Octavian Oncescu
// Copyright (c) 2022-2023 The Purplecoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use bech32::{self, FromBase32, ToBase32, Variant};
use bincode::{Decode, Encode};
use lazy_static::lazy_static;
use libsecp256k1::{
    recover, sign, verify, Message, PublicKey as SecpPublicKey, RecoveryId,
    SecretKey as SecpSecretKey, Signature as SecpSignature,
};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::hash::Hash as HashTrait;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::str;

pub const KEY_ID_BYTES: usize = 20;

const HASH_KEY_PREFIX: &str = "purplecoin.evo.hash.";

lazy_static! {
    static ref HASH_KEY160_OWNED: String = format!("{}", 20);
    static ref HASH_KEY160: &'static str = &HASH_KEY160_OWNED;
    static ref HASH_KEY256_OWNED: String = format!("{}", 32);
    static ref HASH_KEY256: &'static str = &HASH_KEY256_OWNED;
}

#[derive(PartialEq, Eq, Encode, Decode, Clone, Copy, HashTrait, PartialOrd, Ord, Default)]
pub struct Hash160(pub [u8; 20]);

impl Hash160 {
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    #[must_use]
    pub fn zero() -> Self {
        Self([0; 20])
    }

    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.0 == [0; 20]
    }

    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    #[inline]
    pub fn hash_from_slice<T: AsRef<[u8]>>(slice: T, key: &str) -> Self {
        let mut out_hash = Hash160([0; 20]);
        let mut hash1 = [0; 32];
        let key1 = &[
            HASH_KEY_PREFIX.as_bytes(),
            HASH_KEY256.as_bytes(),
            ".".as_bytes(),
            key.as_bytes(),
        ]
        .concat();
        let key1 = unsafe { str::from_utf8_unchecked(key1) };
        let mut hasher = blake3::Hasher::new_derive_key(key1);
        hasher.update(slice.as_ref());
        let mut out = hasher.finalize_xof();
        out.fill(&mut hash1);
        let key = &[
            HASH_KEY_PREFIX.as_bytes(),
            HASH_KEY160.as_bytes(),
            ".".as_bytes(),
            key.as_bytes(),
        ]
        .concat();
        let key = unsafe { str::from_utf8_unchecked(key) };
        let mut hasher = blake3::Hasher::new_derive_key(key);
        hasher.update(&hash1);
        let mut out = hasher.finalize_xof();
        out.fill(&mut out_hash.0);
        out_hash
    }
}

impl fmt::Debug for Hash160 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Hash160").field(&self.to_hex()).finish()
    }
}

impl AsRef<[u8]> for Hash160 {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

#[derive(
    PartialEq, Eq, Encode, Decode, Clone, Copy, HashTrait, PartialOrd, Ord, Default,
)]
pub struct Hash256(pub [u8; 32]);

impl Hash256 {
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    #[must_use]
    pub fn zero() -> Self {
        Self([0; 32])
    }

    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.0 == [0; 32]
    }

    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(hexstr: &str) -> Result<Self, &'static str> {
        let bytes = hex::decode(hexstr).map_err(|_| "invalid hexstr")?;
        if bytes.len() != 32 {
            return Err("invalid slice length! expected 32");
        }
        let mut out = Self::zero();
        out.0.copy_from_slice(&bytes);
        Ok(out)
    }

    #[inline]
    pub fn hash_from_slice<T: AsRef<[u8]>>(slice: T, key: &str) -> Self {
        let mut out_hash = Hash256([0; 32]);
        let key = &[
            HASH_KEY_PREFIX.as_bytes(),
            HASH_KEY256.as_bytes(),
            ".".as_bytes(),
            key.as_bytes(),
        ]
        .concat();
        let key = unsafe { str::from_utf8_unchecked(key) };
        let mut hasher = blake3::Hasher::new_derive_key(key);
        hasher.update(slice.as_ref());
        let mut out = hasher.finalize_xof();
        out.fill(&mut out_hash.0);
        out_hash
    }
}

impl fmt::Debug for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Hash256").field(&self.to_hex()).finish()
    }
}

impl AsRef<[u8]> for Hash256 {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<Vec<u8>> for Hash256 {
    fn from(v: Vec<u8>) -> Self {
        debug_assert_eq!(v.len(), 32);
        let mut h: Self = Default::default();
        h.0.copy_from_slice(&v);
        h
    }
}

impl Serialize for Hash256 {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        String::serialize(&self.to_hex(), serializer)
    }
}

impl<'de> Deserialize<'de> for Hash256 {
    fn deserialize<D>(deserializer: D) -> Result<Hash256, D::Error>
    where
        D: Deserializer<'de>,
    {
        let string = String::deserialize(deserializer)?;
        Hash256::from_hex(&string).map_err(|err| serde::de::Error::custom(err.to_owned()))
    }
}

/// Identifier of a secp256k1 key: the 160-bit hash of the compressed public key
#[derive(
    PartialEq, Eq, Encode, Decode, Clone, Copy, HashTrait, PartialOrd, Ord, Default,
)]
pub struct KeyId(pub [u8; KEY_ID_BYTES]);

impl KeyId {
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    #[must_use]
    pub fn zero() -> Self {
        Self([0; KEY_ID_BYTES])
    }

    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.0 == [0; KEY_ID_BYTES]
    }

    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    #[must_use]
    pub fn to_bech32(&self, hrp: &str) -> String {
        bech32::encode(hrp, self.0.to_base32(), Variant::Bech32m).unwrap()
    }

    pub fn from_bech32(encoded: &str) -> Result<Self, &'static str> {
        let (_hrp, data, _variant) = bech32::decode(encoded).map_err(|_| "invalid key id")?;
        let data: Vec<u8> = Vec::<u8>::from_base32(&data).map_err(|_| "invalid key id")?;

        if data.len() != KEY_ID_BYTES {
            return Err("invalid key id length");
        }

        let mut out = Self([0; KEY_ID_BYTES]);
        out.0.copy_from_slice(&data);
        Ok(out)
    }

    #[cfg(test)]
    #[must_use]
    pub fn random() -> Self {
        use rand::Rng;
        Self(rand::thread_rng().gen())
    }
}

impl fmt::Debug for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("KeyId").field(&self.to_hex()).finish()
    }
}

impl AsRef<[u8]> for KeyId {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl Serialize for KeyId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        String::serialize(&self.to_bech32("pu"), serializer)
    }
}

impl<'de> Deserialize<'de> for KeyId {
    fn deserialize<D>(deserializer: D) -> Result<KeyId, D::Error>
    where
        D: Deserializer<'de>,
    {
        let string = String::deserialize(deserializer)?;
        KeyId::from_bech32(&string).map_err(|err| serde::de::Error::custom(err.to_owned()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicKey(pub SecpPublicKey);

impl PublicKey {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, &'static str> {
        if bytes.len() != 33 {
            return Err("invalid slice length! expected 33");
        }

        let mut buf = [0; 33];
        buf.copy_from_slice(bytes);
        Ok(Self(
            SecpPublicKey::parse_compressed(&buf).map_err(|_| "could not decode public key")?,
        ))
    }

    pub fn from_hex(hexstr: &str) -> Result<Self, &'static str> {
        let bytes = hex::decode(hexstr).map_err(|_| "invalid hexstr")?;
        Self::from_bytes(&bytes)
    }

    #[must_use]
    pub fn to_bytes(&self) -> [u8; 33] {
        self.0.serialize_compressed()
    }

    /// The 160-bit identifier of this key
    #[inline]
    #[must_use]
    pub fn to_key_id(&self) -> KeyId {
        let hash = Hash160::hash_from_slice(self.to_bytes(), "keyid");
        KeyId(hash.0)
    }
}

impl Encode for PublicKey {
    fn encode<E: bincode::enc::Encoder>(
        &self,
        encoder: &mut E,
    ) -> core::result::Result<(), bincode::error::EncodeError> {
        bincode::Encode::encode(&self.to_bytes(), encoder)?;
        Ok(())
    }
}

impl Decode for PublicKey {
    fn decode<D: bincode::de::Decoder>(
        decoder: &mut D,
    ) -> core::result::Result<Self, bincode::error::DecodeError> {
        let pk_bytes: [u8; 33] = bincode::Decode::decode(decoder)?;
        let result = SecpPublicKey::parse_compressed(&pk_bytes).map_err(|_| {
            bincode::error::DecodeError::OtherString("invalid public key format".to_owned())
        })?;
        Ok(Self(result))
    }
}

#[derive(Clone)]
pub struct SecretKey(pub SecpSecretKey);

impl SecretKey {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, &'static str> {
        if bytes.len() != 32 {
            return Err("invalid slice length! expected 32");
        }

        let mut buf = [0; 32];
        buf.copy_from_slice(bytes);
        Ok(Self(
            SecpSecretKey::parse(&buf).map_err(|_| "could not decode secret key")?,
        ))
    }

    pub fn from_hex(hexstr: &str) -> Result<Self, &'static str> {
        let bytes = hex::decode(hexstr).map_err(|_| "invalid hexstr")?;
        Self::from_bytes(&bytes)
    }

    #[must_use]
    pub fn random() -> Self {
        use rand::rngs::OsRng;
        Self(SecpSecretKey::random(&mut OsRng))
    }

    #[must_use]
    pub fn public_key(&self) -> PublicKey {
        PublicKey(SecpPublicKey::from_secret_key(&self.0))
    }

    /// Signs a 32-byte digest producing a 65-byte recoverable signature
    #[must_use]
    pub fn sign_digest(&self, digest: &Hash256) -> Vec<u8> {
        let message = Message::parse(&digest.0);
        let (sig, rec_id) = sign(&message, &self.0);
        let mut out = Vec::with_capacity(65);
        out.push(rec_id.serialize());
        out.extend_from_slice(&sig.serialize());
        out
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SecretKey").field(&"<redacted>").finish()
    }
}

/// Verifies a 65-byte recoverable signature over `digest` against a key id.
/// The public key is recovered from the signature and its identifier must
/// match `key_id`.
pub fn verify_digest_with_key_id(
    digest: &Hash256,
    key_id: &KeyId,
    sig: &[u8],
) -> Result<(), SigErr> {
    if sig.len() != 65 {
        return Err(SigErr::InvalidLength);
    }

    let rec_id = RecoveryId::parse(sig[0]).map_err(|_| SigErr::InvalidRecoveryId)?;
    let mut sig_buf = [0; 64];
    sig_buf.copy_from_slice(&sig[1..]);
    let signature = SecpSignature::parse_standard(&sig_buf).map_err(|_| SigErr::InvalidSignature)?;
    let message = Message::parse(&digest.0);
    let recovered = recover(&message, &signature, &rec_id).map_err(|_| SigErr::InvalidSignature)?;

    if &PublicKey(recovered).to_key_id() != key_id {
        return Err(SigErr::KeyIdMismatch);
    }
    Ok(())
}

/// Verifies a 65-byte recoverable signature over `digest` against a known
/// public key
pub fn verify_digest_with_pub_key(
    digest: &Hash256,
    pub_key: &PublicKey,
    sig: &[u8],
) -> Result<(), SigErr> {
    if sig.len() != 65 {
        return Err(SigErr::InvalidLength);
    }

    let mut sig_buf = [0; 64];
    sig_buf.copy_from_slice(&sig[1..]);
    let signature = SecpSignature::parse_standard(&sig_buf).map_err(|_| SigErr::InvalidSignature)?;
    let message = Message::parse(&digest.0);

    if verify(&message, &signature, &pub_key.0) {
        Ok(())
    } else {
        Err(SigErr::InvalidSignature)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SigErr {
    /// Signature is not 65 bytes
    InvalidLength,

    /// Recovery id byte is out of range
    InvalidRecoveryId,

    /// Signature bytes could not be parsed or did not verify
    InvalidSignature,

    /// Recovered key does not hash to the expected key id
    KeyIdMismatch,
}

/// Routable network endpoint of a service node. Stored as a 16-byte
/// IPv6 address (IPv4 addresses are mapped) plus a port.
#[derive(Clone, Copy, PartialEq, Eq, HashTrait, PartialOrd, Ord)]
pub struct NetAddress {
    pub ip: [u8; 16],
    pub port: u16,
}

impl NetAddress {
    #[must_use]
    pub fn zero() -> Self {
        Self {
            ip: [0; 16],
            port: 0,
        }
    }

    #[must_use]
    pub fn from_socket_addr(addr: &SocketAddr) -> Self {
        let ip = match addr.ip() {
            IpAddr::V4(v4) => v4.to_ipv6_mapped().octets(),
            IpAddr::V6(v6) => v6.octets(),
        };
        Self {
            ip,
            port: addr.port(),
        }
    }

    pub fn from_str_addr(s: &str) -> Result<Self, &'static str> {
        let addr: SocketAddr = s.parse().map_err(|_| "invalid network address")?;
        Ok(Self::from_socket_addr(&addr))
    }

    #[must_use]
    pub fn to_socket_addr(&self) -> SocketAddr {
        let v6 = Ipv6Addr::from(self.ip);
        match v6.to_ipv4_mapped() {
            Some(v4) => SocketAddr::new(IpAddr::V4(v4), self.port),
            None => SocketAddr::new(IpAddr::V6(v6), self.port),
        }
    }

    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.port != 0 && self.ip != [0; 16]
    }

    /// Whether the address is reachable from the public internet. Always
    /// false for unspecified, loopback, link-local and private ranges.
    #[must_use]
    pub fn is_routable(&self) -> bool {
        if !self.is_valid() {
            return false;
        }

        let v6 = Ipv6Addr::from(self.ip);
        if let Some(v4) = v6.to_ipv4_mapped() {
            return !v4.is_unspecified()
                && !v4.is_loopback()
                && !v4.is_private()
                && !v4.is_link_local()
                && !v4.is_broadcast();
        }

        !v6.is_unspecified() && !v6.is_loopback() && (v6.segments()[0] & 0xffc0) != 0xfe80
    }
}

impl Encode for NetAddress {
    fn encode<E: bincode::enc::Encoder>(
        &self,
        encoder: &mut E,
    ) -> core::result::Result<(), bincode::error::EncodeError> {
        bincode::Encode::encode(&self.ip, encoder)?;
        crate::codec::encode_fixed_u16(self.port, encoder)?;
        Ok(())
    }
}

impl Decode for NetAddress {
    fn decode<D: bincode::de::Decoder>(
        decoder: &mut D,
    ) -> core::result::Result<Self, bincode::error::DecodeError> {
        let ip: [u8; 16] = bincode::Decode::decode(decoder)?;
        let port = crate::codec::decode_fixed_u16(decoder)?;
        Ok(Self { ip, port })
    }
}

impl fmt::Debug for NetAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("NetAddress")
            .field(&self.to_socket_addr())
            .finish()
    }
}

impl fmt::Display for NetAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_socket_addr())
    }
}
