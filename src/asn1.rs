use core::fmt;

use crate::{snmp, Error, Oid, Result};

pub const PRIMITIVE: u8 = 0b0000_0000;
pub const CONSTRUCTED: u8 = 0b0010_0000;

pub const CLASS_UNIVERSAL: u8 = 0b0000_0000;
pub const CLASS_APPLICATION: u8 = 0b0100_0000;
pub const CLASS_CONTEXTSPECIFIC: u8 = 0b1000_0000;

pub const TYPE_BOOLEAN: u8 = CLASS_UNIVERSAL | PRIMITIVE | 1;
pub const TYPE_INTEGER: u8 = CLASS_UNIVERSAL | PRIMITIVE | 2;
pub const TYPE_OCTETSTRING: u8 = CLASS_UNIVERSAL | PRIMITIVE | 4;
pub const TYPE_NULL: u8 = CLASS_UNIVERSAL | PRIMITIVE | 5;
pub const TYPE_OBJECTIDENTIFIER: u8 = CLASS_UNIVERSAL | PRIMITIVE | 6;
pub const TYPE_SEQUENCE: u8 = CLASS_UNIVERSAL | CONSTRUCTED | 16;

/// Maximum number of long-form length bytes accepted or produced.
pub const MAX_LENGTH_LEN: usize = 4;

/// BER decoder over a borrowed byte slice.
///
/// Supports:
///
/// - types required by SNMPv3.
///
/// Does not support:
///
/// - extended tag IDs.
/// - indefinite lengths.
/// - INTEGER values not representable by i64.
pub struct AsnReader<'a> {
    inner: &'a [u8],
}

impl<'a> Clone for AsnReader<'a> {
    fn clone(&self) -> AsnReader<'a> {
        AsnReader { inner: self.inner }
    }
}

impl fmt::Debug for AsnReader<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_list().entries(self.clone()).finish()
    }
}

impl<'a> AsnReader<'a> {
    pub fn from_bytes(bytes: &[u8]) -> AsnReader {
        AsnReader { inner: bytes }
    }

    pub fn peek_byte(&mut self) -> Result<u8> {
        self.inner.first().copied().ok_or(Error::AsnEof)
    }

    pub fn read_byte(&mut self) -> Result<u8> {
        match self.inner.split_first() {
            Some((head, tail)) => {
                self.inner = tail;
                Ok(*head)
            }
            _ => Err(Error::AsnEof),
        }
    }

    pub fn read_length(&mut self) -> Result<usize> {
        let head = self.read_byte()?;
        if head < 128 {
            // short form
            return Ok(head as usize);
        }
        if head == 0xff {
            return Err(Error::AsnInvalidLen); // reserved for future use
        }
        let length_len = (head & 0b0111_1111) as usize;
        if length_len == 0 {
            // indefinite length
            return Err(Error::AsnInvalidLen);
        }
        if length_len > MAX_LENGTH_LEN {
            return Err(Error::AsnInvalidLen);
        }
        if self.inner.len() < length_len {
            return Err(Error::AsnEof);
        }
        let (length_bytes, rest) = self.inner.split_at(length_len);
        self.inner = rest;
        let mut len = 0usize;
        for byte in length_bytes {
            len = (len << 8) | usize::from(*byte);
        }
        Ok(len)
    }

    pub fn read_i64_type(&mut self, expected_ident: u8) -> Result<i64> {
        let val = self.read_raw(expected_ident)?;
        decode_i64(val)
    }

    pub fn read_raw(&mut self, expected_ident: u8) -> Result<&'a [u8]> {
        let ident = self.read_byte()?;
        if ident != expected_ident {
            return Err(Error::AsnWrongType);
        }
        let val_len = self.read_length()?;
        if val_len > self.inner.len() {
            return Err(Error::AsnInvalidLen);
        }
        let (val, remaining) = self.inner.split_at(val_len);
        self.inner = remaining;
        Ok(val)
    }

    pub fn read_constructed<F>(&mut self, expected_ident: u8, f: F) -> Result<()>
    where
        F: Fn(&mut AsnReader) -> Result<()>,
    {
        let content = self.read_raw(expected_ident)?;
        let mut reader = AsnReader::from_bytes(content);
        f(&mut reader)
    }

    //
    // ASN
    //

    pub fn read_asn_boolean(&mut self) -> Result<bool> {
        let val = self.read_raw(TYPE_BOOLEAN)?;
        if val.len() != 1 {
            return Err(Error::AsnInvalidLen);
        }
        match val[0] {
            0 => Ok(false),
            1 => Ok(true),
            _ => Err(Error::AsnParse),
        }
    }

    pub fn read_asn_integer(&mut self) -> Result<i64> {
        self.read_i64_type(TYPE_INTEGER)
    }

    pub fn read_asn_octetstring(&mut self) -> Result<&'a [u8]> {
        self.read_raw(TYPE_OCTETSTRING)
    }

    pub fn read_asn_null(&mut self) -> Result<()> {
        let val = self.read_raw(TYPE_NULL)?;
        if val.is_empty() {
            Ok(())
        } else {
            Err(Error::AsnInvalidLen)
        }
    }

    pub fn read_asn_objectidentifier(&mut self) -> Result<Oid<'a>> {
        let val = self.read_raw(TYPE_OBJECTIDENTIFIER)?;
        Ok(Oid::new(val.into()))
    }

    pub fn read_asn_sequence<F>(&mut self, f: F) -> Result<()>
    where
        F: Fn(&mut AsnReader) -> Result<()>,
    {
        self.read_constructed(TYPE_SEQUENCE, f)
    }

    /// Exception values (noSuchObject, noSuchInstance, endOfMibView) are
    /// zero-length context tags.
    pub fn read_exception(&mut self, expected_ident: u8) -> Result<()> {
        let val = self.read_raw(expected_ident)?;
        if val.is_empty() {
            Ok(())
        } else {
            Err(Error::AsnInvalidLen)
        }
    }

    pub fn read_snmp_counter32(&mut self) -> Result<u32> {
        decode_unsigned32(self.read_i64_type(snmp::TYPE_COUNTER32)?)
    }

    pub fn read_snmp_unsigned32(&mut self) -> Result<u32> {
        decode_unsigned32(self.read_i64_type(snmp::TYPE_UNSIGNED32)?)
    }

    pub fn read_snmp_timeticks(&mut self) -> Result<u32> {
        decode_unsigned32(self.read_i64_type(snmp::TYPE_TIMETICKS)?)
    }

    #[allow(clippy::cast_sign_loss)]
    pub fn read_snmp_counter64(&mut self) -> Result<u64> {
        self.read_i64_type(snmp::TYPE_COUNTER64).map(|v| v as u64)
    }

    pub fn read_snmp_opaque(&mut self) -> Result<&'a [u8]> {
        self.read_raw(snmp::TYPE_OPAQUE)
    }

    pub fn read_snmp_ipaddress(&mut self) -> Result<[u8; 4]> {
        let val = self.read_raw(snmp::TYPE_IPADDRESS)?;
        match val {
            &[a, b, c, d] => Ok([a, b, c, d]),
            _ => Err(Error::AsnInvalidLen),
        }
    }

    pub fn bytes_left(&self) -> usize {
        self.inner.len()
    }
}

fn decode_i64(val: &[u8]) -> Result<i64> {
    if val.is_empty() {
        return Err(Error::AsnParse);
    }
    if val.len() > 8 {
        return Err(Error::AsnIntOverflow);
    }
    let fill = if val[0] & 0x80 != 0 { 0xff } else { 0x00 };
    let mut bytes = [fill; 8];
    bytes[8 - val.len()..].copy_from_slice(val);
    Ok(i64::from_be_bytes(bytes))
}

/// Unsigned 32-bit values may arrive with a leading zero octet (1 to 5
/// content bytes); anything outside the u32 range is rejected.
fn decode_unsigned32(val: i64) -> Result<u32> {
    u32::try_from(val).map_err(|_| Error::AsnIntOverflow)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_byte_until_eof() {
        let bytes = [1, 2, 3, 4];
        let mut reader = AsnReader::from_bytes(&bytes[..]);
        let a = reader.read_byte().unwrap();
        let b = reader.read_byte().unwrap();
        let c = reader.read_byte().unwrap();
        let d = reader.read_byte().unwrap();
        assert_eq!(&[a, b, c, d], &bytes[..]);
        assert_eq!(reader.read_byte(), Err(Error::AsnEof));
    }

    #[test]
    fn read_length_forms() {
        let mut short = AsnReader::from_bytes(&[0x7f]);
        assert_eq!(short.read_length().unwrap(), 127);

        let mut long = AsnReader::from_bytes(&[0x82, 0x01, 0x00]);
        assert_eq!(long.read_length().unwrap(), 256);

        let mut indefinite = AsnReader::from_bytes(&[0x80]);
        assert_eq!(indefinite.read_length(), Err(Error::AsnInvalidLen));

        let mut oversized = AsnReader::from_bytes(&[0x85, 1, 2, 3, 4, 5]);
        assert_eq!(oversized.read_length(), Err(Error::AsnInvalidLen));

        let mut truncated = AsnReader::from_bytes(&[0x82, 0x01]);
        assert_eq!(truncated.read_length(), Err(Error::AsnEof));
    }

    #[test]
    fn read_integers() {
        let mut positive = AsnReader::from_bytes(&[0x02, 0x02, 0x04, 0xd2]);
        assert_eq!(positive.read_asn_integer().unwrap(), 1234);

        let mut negative = AsnReader::from_bytes(&[0x02, 0x01, 0xff]);
        assert_eq!(negative.read_asn_integer().unwrap(), -1);

        // u32 with the sign-protecting leading zero octet
        let mut unsigned = AsnReader::from_bytes(&[0x42, 0x05, 0x00, 0xff, 0xff, 0xff, 0xff]);
        assert_eq!(unsigned.read_snmp_unsigned32().unwrap(), u32::MAX);
    }

    #[test]
    fn wrong_type_is_rejected() {
        let mut reader = AsnReader::from_bytes(&[0x04, 0x01, 0x00]);
        assert_eq!(reader.read_asn_integer(), Err(Error::AsnWrongType));
    }
}
