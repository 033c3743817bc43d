//! Network-tagged Ed25519 accounts and detached signatures.
//!
//! A packed account is `varint(33) | header | key` where the header byte
//! carries the algorithm in its high nibble and the network flag in its
//! low bits. Decoding compares the network flag against the process mode,
//! so a key packed for one chain is rejected on the other.

use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
use thiserror::Error;

use crate::mode;
use crate::varint::{from_varint64, to_varint64, VarintError};

pub const PUBLIC_KEY_LENGTH: usize = 32;
pub const PRIVATE_KEY_LENGTH: usize = 64;
pub const SIGNATURE_LENGTH: usize = 64;

const ALGORITHM_ED25519: u8 = 0x01;
const KEY_VARIANT_PUBLIC: u8 = 0x01;
const NETWORK_TEST_FLAG: u8 = 0x02;
const PACKED_KEY_LENGTH: usize = PUBLIC_KEY_LENGTH + 1;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AccountError {
    #[error("buffer too short for an account")]
    ShortBuffer,
    #[error("unsupported key algorithm: {0:#04x}")]
    UnsupportedAlgorithm(u8),
    #[error("unsupported packed key length: {0}")]
    UnsupportedKeyLength(u64),
    #[error("public key network does not match the process mode")]
    WrongNetworkForPublicKey,
    #[error("public key bytes are not a valid Ed25519 key")]
    InvalidPublicKey,
    #[error("private key must be {PRIVATE_KEY_LENGTH} bytes")]
    InvalidPrivateKey,
    #[error("signature verification failed")]
    InvalidSignature,
    #[error(transparent)]
    Varint(#[from] VarintError),
}

/// An Ed25519 public key tagged with the network it belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Account {
    testing: bool,
    public_key: [u8; PUBLIC_KEY_LENGTH],
}

impl Account {
    pub fn new_ed25519(testing: bool, public_key: [u8; PUBLIC_KEY_LENGTH]) -> Self {
        Account {
            testing,
            public_key,
        }
    }

    pub fn is_testing(&self) -> bool {
        self.testing
    }

    pub fn public_key(&self) -> &[u8; PUBLIC_KEY_LENGTH] {
        &self.public_key
    }

    fn header_byte(&self) -> u8 {
        let mut header = (ALGORITHM_ED25519 << 4) | KEY_VARIANT_PUBLIC;
        if self.testing {
            header |= NETWORK_TEST_FLAG;
        }
        header
    }

    /// Append the wire form to `buffer`.
    pub fn pack_into(&self, buffer: &mut Vec<u8>) {
        buffer.extend_from_slice(&to_varint64(PACKED_KEY_LENGTH as u64));
        buffer.push(self.header_byte());
        buffer.extend_from_slice(&self.public_key);
    }

    /// Decode an account from the front of `buffer`.
    ///
    /// Returns the account and the number of bytes consumed. The network
    /// flag must match the process mode.
    pub fn unpack(buffer: &[u8]) -> Result<(Self, usize), AccountError> {
        let (length, used) = from_varint64(buffer)?;
        if length as usize != PACKED_KEY_LENGTH {
            return Err(AccountError::UnsupportedKeyLength(length));
        }
        let rest = &buffer[used..];
        if rest.len() < PACKED_KEY_LENGTH {
            return Err(AccountError::ShortBuffer);
        }
        let header = rest[0];
        if header >> 4 != ALGORITHM_ED25519 || header & KEY_VARIANT_PUBLIC == 0 {
            return Err(AccountError::UnsupportedAlgorithm(header));
        }
        let testing = header & NETWORK_TEST_FLAG != 0;
        if testing != mode::is_testing() {
            return Err(AccountError::WrongNetworkForPublicKey);
        }
        let mut public_key = [0u8; PUBLIC_KEY_LENGTH];
        public_key.copy_from_slice(&rest[1..PACKED_KEY_LENGTH]);
        Ok((
            Account {
                testing,
                public_key,
            },
            used + PACKED_KEY_LENGTH,
        ))
    }

    /// Verify `signature` over `message` with this account's key.
    pub fn verify(&self, message: &[u8], signature: &Signature) -> Result<(), AccountError> {
        let key = VerifyingKey::from_bytes(&self.public_key)
            .map_err(|_| AccountError::InvalidPublicKey)?;
        let bytes: [u8; SIGNATURE_LENGTH] = signature
            .as_bytes()
            .try_into()
            .map_err(|_| AccountError::InvalidSignature)?;
        key.verify(message, &ed25519_dalek::Signature::from_bytes(&bytes))
            .map_err(|_| AccountError::InvalidSignature)
    }
}

/// A detached signature, serialised as `varint(len) || bytes`.
///
/// Always 64 bytes for Ed25519.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Signature(Vec<u8>);

impl Signature {
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Signature(bytes.to_vec())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn pack_into(&self, buffer: &mut Vec<u8>) {
        buffer.extend_from_slice(&to_varint64(self.0.len() as u64));
        buffer.extend_from_slice(&self.0);
    }

    /// Decode a length-prefixed signature from the front of `buffer`.
    pub fn unpack(buffer: &[u8]) -> Result<(Self, usize), AccountError> {
        let (length, used) = from_varint64(buffer)?;
        let length = usize::try_from(length).map_err(|_| AccountError::ShortBuffer)?;
        let end = used
            .checked_add(length)
            .ok_or(AccountError::ShortBuffer)?;
        if buffer.len() < end {
            return Err(AccountError::ShortBuffer);
        }
        Ok((Signature(buffer[used..end].to_vec()), end))
    }
}

/// Sign `message` with a 64-byte Ed25519 private key (seed then public key).
pub fn sign(private_key: &[u8], message: &[u8]) -> Result<Signature, AccountError> {
    if private_key.len() != PRIVATE_KEY_LENGTH {
        return Err(AccountError::InvalidPrivateKey);
    }
    let mut seed = [0u8; 32];
    seed.copy_from_slice(&private_key[..32]);
    let key = SigningKey::from_bytes(&seed);
    Ok(Signature(key.sign(message).to_bytes().to_vec()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mode;
    use rand::RngCore;

    fn random_keypair() -> (Vec<u8>, Account) {
        let mut seed = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut seed);
        let key = SigningKey::from_bytes(&seed);
        let mut private_key = seed.to_vec();
        private_key.extend_from_slice(key.verifying_key().as_bytes());
        let account = Account::new_ed25519(true, key.verifying_key().to_bytes());
        (private_key, account)
    }

    #[test]
    fn test_header_byte_values() {
        let live = Account::new_ed25519(false, [0u8; 32]);
        let testing = Account::new_ed25519(true, [0u8; 32]);
        assert_eq!(live.header_byte(), 0x11);
        assert_eq!(testing.header_byte(), 0x13);
    }

    #[test]
    fn test_pack_unpack_round_trip() {
        mode::force_testing_for_unit_tests();
        let (_, account) = random_keypair();
        let mut buffer = Vec::new();
        account.pack_into(&mut buffer);
        assert_eq!(buffer.len(), 34);
        assert_eq!(buffer[0], 0x21);
        assert_eq!(buffer[1], 0x13);
        let (unpacked, used) = Account::unpack(&buffer).unwrap();
        assert_eq!(used, buffer.len());
        assert_eq!(unpacked, account);
    }

    #[test]
    fn test_wrong_network_is_rejected() {
        mode::force_testing_for_unit_tests();
        let live = Account::new_ed25519(false, [7u8; 32]);
        let mut buffer = Vec::new();
        live.pack_into(&mut buffer);
        assert_eq!(
            Account::unpack(&buffer),
            Err(AccountError::WrongNetworkForPublicKey)
        );
    }

    #[test]
    fn test_unsupported_key_material() {
        mode::force_testing_for_unit_tests();
        assert_eq!(
            Account::unpack(&[0x22, 0x13]),
            Err(AccountError::UnsupportedKeyLength(0x22))
        );
        let mut buffer = vec![0x21, 0x23]; // algorithm nibble 2
        buffer.extend_from_slice(&[0u8; 32]);
        assert_eq!(
            Account::unpack(&buffer),
            Err(AccountError::UnsupportedAlgorithm(0x23))
        );
        assert_eq!(
            Account::unpack(&[0x21, 0x13, 0x00]),
            Err(AccountError::ShortBuffer)
        );
    }

    #[test]
    fn test_sign_and_verify() {
        mode::force_testing_for_unit_tests();
        let (private_key, account) = random_keypair();
        let message = b"a message worth signing";
        let signature = sign(&private_key, message).unwrap();
        assert_eq!(signature.as_bytes().len(), SIGNATURE_LENGTH);
        account.verify(message, &signature).unwrap();
        assert_eq!(
            account.verify(b"a different message", &signature),
            Err(AccountError::InvalidSignature)
        );

        let (other_key, _) = random_keypair();
        let forged = sign(&other_key, message).unwrap();
        assert_eq!(
            account.verify(message, &forged),
            Err(AccountError::InvalidSignature)
        );

        assert_eq!(
            sign(&private_key[..32], message),
            Err(AccountError::InvalidPrivateKey)
        );
    }

    #[test]
    fn test_signature_length_prefix() {
        let signature = Signature::from_bytes(&[0xaa; SIGNATURE_LENGTH]);
        let mut buffer = Vec::new();
        signature.pack_into(&mut buffer);
        assert_eq!(buffer[0], 0x40);
        assert_eq!(buffer.len(), 65);
        let (unpacked, used) = Signature::unpack(&buffer).unwrap();
        assert_eq!(used, 65);
        assert_eq!(unpacked, signature);
        assert_eq!(
            Signature::unpack(&buffer[..40]),
            Err(AccountError::ShortBuffer)
        );
    }
}
