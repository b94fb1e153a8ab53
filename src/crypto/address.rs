//! Account addresses
//!
//! An address is `Base58(version || RIPEMD160(SHA256(pubkey)) || checksum)`
//! where the checksum is the first four bytes of the double SHA-256 of the
//! preceding 21 bytes. The version byte pins the network, which also fixes
//! the encoded length.

use super::hash::{double_sha256, sha256};
use ripemd::Ripemd160;
use secp256k1::PublicKey;
use serde::{Deserialize, Serialize};
use sha2::Digest;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Decoded address length in bytes
pub const ADDRESS_DECODED_LEN: usize = 25;

/// Address validation errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("Address has length {actual}, expected {expected}")]
    WrongLength { expected: usize, actual: usize },
    #[error("Address is not valid base58")]
    InvalidEncoding,
    #[error("Address belongs to another network (version byte {0:#04x})")]
    WrongNetwork(u8),
    #[error("Address checksum mismatch")]
    BadChecksum,
}

/// Network an address or transaction belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    #[default]
    Mainnet,
    Testnet,
}

impl Network {
    pub fn version_byte(self) -> u8 {
        match self {
            Network::Mainnet => 0x68,
            Network::Testnet => 0x98,
        }
    }

    /// Base58 length of every address on this network
    pub fn address_length(self) -> usize {
        match self {
            Network::Mainnet => 34,
            Network::Testnet => 35,
        }
    }

    fn from_version_byte(byte: u8) -> Option<Self> {
        match byte {
            0x68 => Some(Network::Mainnet),
            0x98 => Some(Network::Testnet),
            _ => None,
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Network::Mainnet => write!(f, "mainnet"),
            Network::Testnet => write!(f, "testnet"),
        }
    }
}

/// A checksum-validated account address
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address(String);

impl Address {
    /// Derive the address of a public key
    pub fn from_public_key(public_key: &PublicKey, network: Network) -> Self {
        let sha256_hash = sha256(&public_key.serialize());

        let mut ripemd = Ripemd160::new();
        ripemd.update(&sha256_hash);
        let ripemd_hash = ripemd.finalize();

        let mut address_bytes = vec![network.version_byte()];
        address_bytes.extend_from_slice(&ripemd_hash);

        let checksum = double_sha256(&address_bytes);
        address_bytes.extend_from_slice(&checksum[..4]);

        Address(bs58::encode(address_bytes).into_string())
    }

    /// Parse and validate an address for a specific network
    pub fn parse(s: &str, network: Network) -> Result<Self, AddressError> {
        let address = Self::parse_any(s)?;
        let version = address.version_byte();
        if version != network.version_byte() {
            return Err(AddressError::WrongNetwork(version));
        }
        Ok(address)
    }

    /// Parse an address for any known network
    pub fn parse_any(s: &str) -> Result<Self, AddressError> {
        let trimmed = s.trim();
        let bytes = bs58::decode(trimmed)
            .into_vec()
            .map_err(|_| AddressError::InvalidEncoding)?;

        if bytes.len() != ADDRESS_DECODED_LEN {
            return Err(AddressError::WrongLength {
                expected: ADDRESS_DECODED_LEN,
                actual: bytes.len(),
            });
        }

        let network =
            Network::from_version_byte(bytes[0]).ok_or(AddressError::WrongNetwork(bytes[0]))?;
        if trimmed.len() != network.address_length() {
            return Err(AddressError::WrongLength {
                expected: network.address_length(),
                actual: trimmed.len(),
            });
        }

        let checksum = double_sha256(&bytes[..21]);
        if checksum[..4] != bytes[21..] {
            return Err(AddressError::BadChecksum);
        }

        Ok(Address(trimmed.to_string()))
    }

    pub fn network(&self) -> Option<Network> {
        Network::from_version_byte(self.version_byte())
    }

    fn version_byte(&self) -> u8 {
        bs58::decode(&self.0)
            .into_vec()
            .ok()
            .and_then(|bytes| bytes.first().copied())
            .unwrap_or_default()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_any(s)
    }
}

impl TryFrom<String> for Address {
    type Error = AddressError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse_any(&value)
    }
}

impl From<Address> for String {
    fn from(address: Address) -> Self {
        address.0
    }
}

impl AsRef<str> for Address {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KeyPair;

    #[test]
    fn test_address_has_fixed_length() {
        for _ in 0..16 {
            let kp = KeyPair::generate();
            let main = Address::from_public_key(&kp.public_key, Network::Mainnet);
            let test = Address::from_public_key(&kp.public_key, Network::Testnet);
            assert_eq!(main.as_str().len(), Network::Mainnet.address_length());
            assert_eq!(test.as_str().len(), Network::Testnet.address_length());
        }
    }

    #[test]
    fn test_parse_round_trip() {
        let kp = KeyPair::generate();
        let address = Address::from_public_key(&kp.public_key, Network::Mainnet);
        let parsed = Address::parse(address.as_str(), Network::Mainnet).unwrap();
        assert_eq!(parsed, address);
        assert_eq!(parsed.network(), Some(Network::Mainnet));
    }

    #[test]
    fn test_checksum_detects_typo() {
        let kp = KeyPair::generate();
        let address = Address::from_public_key(&kp.public_key, Network::Mainnet);

        let mut chars: Vec<char> = address.as_str().chars().collect();
        let last = chars.len() - 1;
        chars[last] = if chars[last] == 'a' { 'b' } else { 'a' };
        let tampered: String = chars.into_iter().collect();

        assert!(Address::parse(&tampered, Network::Mainnet).is_err());
    }

    #[test]
    fn test_wrong_network_rejected() {
        let kp = KeyPair::generate();
        let address = Address::from_public_key(&kp.public_key, Network::Testnet);
        assert!(matches!(
            Address::parse(address.as_str(), Network::Mainnet),
            Err(AddressError::WrongNetwork(0x98))
        ));
    }

    #[test]
    fn test_garbage_rejected() {
        assert_eq!(
            Address::parse("not an address!", Network::Mainnet),
            Err(AddressError::InvalidEncoding)
        );
        assert!(Address::parse("", Network::Mainnet).is_err());
    }
}
