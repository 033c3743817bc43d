//! Pay ids and packed payment records.
//!
//! A payer claims payment for a transfer by embedding a pay id in an
//! external chain transaction. The watcher stores what it finds as a
//! packed payment record: `varint(currency) | varint-len txid |
//! varint(vout_count) | per vout: varint-len address | varint(amount)`.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use crate::currency::Currency;
use crate::varint::to_varint64;

/// Bytes in a pay id: the full OP_RETURN payload.
pub const PAY_ID_LENGTH: usize = 48;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PayIdError {
    #[error("pay id text must be {} hexadecimal characters", PAY_ID_LENGTH * 2)]
    MalformedPayId,
}

/// Identifier embedded in an external chain to claim a payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PayId(pub [u8; PAY_ID_LENGTH]);

impl PayId {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for PayId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl FromStr for PayId {
    type Err = PayIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s).map_err(|_| PayIdError::MalformedPayId)?;
        let id: [u8; PAY_ID_LENGTH] = bytes
            .try_into()
            .map_err(|_| PayIdError::MalformedPayId)?;
        Ok(PayId(id))
    }
}

/// Convert a decimal currency amount to minor units.
///
/// `"0.00000001"` converts to 1. Non-digit, non-point bytes are simply
/// ignored, extra decimal points are ignored, and conversion stops after
/// eight decimal places have been processed.
pub fn convert_to_satoshi(amount: &[u8]) -> u64 {
    let mut satoshi = 0u64;
    let mut point = false;
    let mut decimals = 0;
    for &byte in amount {
        if byte.is_ascii_digit() {
            satoshi *= 10;
            satoshi += u64::from(byte - b'0');
            if point {
                decimals += 1;
                if decimals >= 8 {
                    break;
                }
            }
        } else if byte == b'.' {
            point = true;
        }
    }
    while decimals < 8 {
        satoshi *= 10;
        decimals += 1;
    }
    satoshi
}

/// Serialise the payments found in one external transaction.
///
/// `amounts` maps payout address to minor units; the map's ordering makes
/// the record deterministic.
pub fn pack_payment_record(
    currency: Currency,
    tx_id: &[u8],
    amounts: &BTreeMap<String, u64>,
) -> Vec<u8> {
    let mut packed = to_varint64(currency.code());
    packed.extend_from_slice(&to_varint64(tx_id.len() as u64));
    packed.extend_from_slice(tx_id);
    packed.extend_from_slice(&to_varint64(amounts.len() as u64));
    for (address, amount) in amounts {
        packed.extend_from_slice(&to_varint64(address.len() as u64));
        packed.extend_from_slice(address.as_bytes());
        packed.extend_from_slice(&to_varint64(*amount));
    }
    packed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_convert_to_satoshi() {
        assert_eq!(convert_to_satoshi(b"0.00000001"), 1);
        assert_eq!(convert_to_satoshi(b"1"), 100_000_000);
        assert_eq!(convert_to_satoshi(b"21.5"), 2_150_000_000);
        assert_eq!(convert_to_satoshi(b"0"), 0);
        // stops after eight decimal places
        assert_eq!(convert_to_satoshi(b"0.123456789"), 12_345_678);
        // junk bytes are ignored
        assert_eq!(convert_to_satoshi(b" 1,00 "), 10_000_000_000);
        // a second decimal point is ignored
        assert_eq!(convert_to_satoshi(b"1.2.3"), 123_000_000);
    }

    #[test]
    fn test_pay_id_text_round_trip() {
        let text = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f\
                    202122232425262728292a2b2c2d2e2f";
        let pay_id: PayId = text.parse().unwrap();
        assert_eq!(pay_id.to_string(), text);
        assert_eq!(pay_id.as_bytes()[0], 0x00);
        assert_eq!(pay_id.as_bytes()[47], 0x2f);

        assert_eq!("00ff".parse::<PayId>(), Err(PayIdError::MalformedPayId));
        assert_eq!(
            "zz0102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f\
             202122232425262728292a2b2c2d2e2f"
                .parse::<PayId>(),
            Err(PayIdError::MalformedPayId)
        );
    }

    #[test]
    fn test_pack_payment_record() {
        let mut amounts = BTreeMap::new();
        amounts.insert("addr-b".to_string(), 5000u64);
        amounts.insert("addr-a".to_string(), 1u64);
        let tx_id = [0xde, 0xad, 0xbe, 0xef];
        let packed = pack_payment_record(Currency::Bitcoin, &tx_id, &amounts);

        let mut expected = vec![0x01]; // bitcoin
        expected.push(0x04);
        expected.extend_from_slice(&tx_id);
        expected.push(0x02); // two vouts, in address order
        expected.push(0x06);
        expected.extend_from_slice(b"addr-a");
        expected.push(0x01);
        expected.push(0x06);
        expected.extend_from_slice(b"addr-b");
        expected.extend_from_slice(&[0x88, 0x27]); // varint 5000
        assert_eq!(packed, expected);
    }
}
