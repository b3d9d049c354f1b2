use std::{fmt, ops};

use crate::{
    asn1::{self, AsnReader},
    snmp, Error, MessageType, Oid, Result, Value, Varbinds, BUFFER_SIZE,
};

/// Reverse-building BER writer.
///
/// Fields are pushed innermost-last-first, so every constructed type knows
/// its content length before the header is written. The finished message is
/// the trailing `len` bytes of the backing buffer, and the distance from any
/// written byte to the end of the message never changes afterwards.
///
/// Writes past the buffer capacity set a sticky overflow flag instead of
/// panicking; callers check it once serialization is complete.
pub struct Buf {
    len: usize,
    overflow: bool,
    #[cfg(not(feature = "heap_buffers"))]
    buf: [u8; BUFFER_SIZE],

    #[cfg(feature = "heap_buffers")]
    buf: Box<[u8]>,
}

impl fmt::Debug for Buf {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt.debug_list().entries(&self[..]).finish()
    }
}

impl Default for Buf {
    fn default() -> Buf {
        Buf {
            len: 0,
            overflow: false,
            #[cfg(not(feature = "heap_buffers"))]
            buf: [0; BUFFER_SIZE],
            #[cfg(feature = "heap_buffers")]
            buf: vec![0; BUFFER_SIZE].into_boxed_slice(),
        }
    }
}

impl ops::Deref for Buf {
    type Target = [u8];
    fn deref(&self) -> &[u8] {
        &self.buf[BUFFER_SIZE - self.len..]
    }
}

impl ops::DerefMut for Buf {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.buf[BUFFER_SIZE - self.len..]
    }
}

impl Buf {
    pub(crate) fn len(&self) -> usize {
        self.len
    }

    #[allow(dead_code)]
    pub(crate) fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub(crate) fn overflowed(&self) -> bool {
        self.overflow
    }

    pub(crate) fn reset(&mut self) {
        self.len = 0;
        self.overflow = false;
    }

    fn remaining(&self) -> usize {
        BUFFER_SIZE - self.len
    }

    pub(crate) fn push_chunk(&mut self, chunk: &[u8]) {
        if chunk.len() > self.remaining() {
            self.overflow = true;
            return;
        }
        let offset = BUFFER_SIZE - self.len;
        self.buf[(offset - chunk.len())..offset].copy_from_slice(chunk);
        self.len += chunk.len();
    }

    pub(crate) fn push_byte(&mut self, byte: u8) {
        if self.remaining() == 0 {
            self.overflow = true;
            return;
        }
        self.buf[BUFFER_SIZE - self.len - 1] = byte;
        self.len += 1;
    }

    pub(crate) fn push_constructed<F>(&mut self, ident: u8, mut f: F)
    where
        F: FnMut(&mut Self),
    {
        let before_len = self.len;
        f(self);
        let written = self.len - before_len;
        self.push_length(written);
        self.push_byte(ident);
    }

    pub(crate) fn push_sequence<F>(&mut self, f: F)
    where
        F: FnMut(&mut Self),
    {
        self.push_constructed(asn1::TYPE_SEQUENCE, f);
    }

    #[allow(clippy::cast_possible_truncation)]
    pub(crate) fn push_length(&mut self, len: usize) {
        if len < 128 {
            // short form
            self.push_byte(len as u8);
        } else {
            // long form
            let bytes = len.to_be_bytes();
            let skip = (len.leading_zeros() / 8) as usize;
            let length_len = bytes.len() - skip;
            if length_len > asn1::MAX_LENGTH_LEN {
                self.overflow = true;
                return;
            }
            self.push_chunk(&bytes[skip..]);
            self.push_byte(0b1000_0000 | length_len as u8);
        }
    }

    pub(crate) fn push_integer(&mut self, n: i64) {
        let len = self.push_i64(n);
        self.push_length(len);
        self.push_byte(asn1::TYPE_INTEGER);
    }

    /// Minimal two's-complement encoding, one extra sign octet where the
    /// top bit of the first content octet would misreport the sign.
    pub(crate) fn push_i64(&mut self, n: i64) -> usize {
        let bytes = n.to_be_bytes();
        let null = if n < 0 { !n } else { n };
        let mut start = ((null.leading_zeros() / 8) as usize).min(bytes.len() - 1);
        let sign = if n < 0 { 0xff } else { 0x00 };
        if start > 0 && (bytes[start] ^ sign) & 0x80 != 0 {
            start -= 1;
        }
        self.push_chunk(&bytes[start..]);
        bytes.len() - start
    }

    pub(crate) fn push_boolean(&mut self, boolean: bool) {
        self.push_byte(u8::from(boolean));
        self.push_length(1);
        self.push_byte(asn1::TYPE_BOOLEAN);
    }

    pub(crate) fn push_null(&mut self) {
        self.push_chunk(&[asn1::TYPE_NULL, 0]);
    }

    pub(crate) fn push_octet_string(&mut self, bytes: &[u8]) {
        self.push_chunk(bytes);
        self.push_length(bytes.len());
        self.push_byte(asn1::TYPE_OCTETSTRING);
    }

    pub(crate) fn push_object_identifier_raw(&mut self, input: &[u8]) {
        self.push_chunk(input);
        self.push_length(input.len());
        self.push_byte(asn1::TYPE_OBJECTIDENTIFIER);
    }

    pub(crate) fn push_ipaddress(&mut self, ip: [u8; 4]) {
        self.push_chunk(&ip);
        self.push_length(ip.len());
        self.push_byte(snmp::TYPE_IPADDRESS);
    }

    pub(crate) fn push_counter32(&mut self, n: u32) {
        let len = self.push_i64(i64::from(n));
        self.push_length(len);
        self.push_byte(snmp::TYPE_COUNTER32);
    }

    pub(crate) fn push_unsigned32(&mut self, n: u32) {
        let len = self.push_i64(i64::from(n));
        self.push_length(len);
        self.push_byte(snmp::TYPE_UNSIGNED32);
    }

    pub(crate) fn push_timeticks(&mut self, n: u32) {
        let len = self.push_i64(i64::from(n));
        self.push_length(len);
        self.push_byte(snmp::TYPE_TIMETICKS);
    }

    pub(crate) fn push_opaque(&mut self, bytes: &[u8]) {
        self.push_chunk(bytes);
        self.push_length(bytes.len());
        self.push_byte(snmp::TYPE_OPAQUE);
    }

    #[allow(clippy::cast_possible_wrap)]
    pub(crate) fn push_counter64(&mut self, n: u64) {
        let len = self.push_i64(n as i64);
        self.push_length(len);
        self.push_byte(snmp::TYPE_COUNTER64);
    }

    pub(crate) fn push_endofmibview(&mut self) {
        self.push_chunk(&[snmp::SNMP_ENDOFMIBVIEW, 0]);
    }

    pub(crate) fn push_nosuchobject(&mut self) {
        self.push_chunk(&[snmp::SNMP_NOSUCHOBJECT, 0]);
    }

    pub(crate) fn push_nosuchinstance(&mut self) {
        self.push_chunk(&[snmp::SNMP_NOSUCHINSTANCE, 0]);
    }
}

/// Encodes the PDU body shared by every PDU type: request ID, error status,
/// error index (non-repeaters and max-repetitions for GetBulk), varbinds.
pub(crate) fn build_inner(
    ident: u8,
    req_id: i32,
    values: &[(&Oid, Value)],
    error_status: u32,
    error_index: u32,
    buf: &mut Buf,
) {
    buf.push_constructed(ident, |buf| {
        buf.push_sequence(|buf| {
            for &(oid, ref val) in values.iter().rev() {
                buf.push_sequence(|buf| {
                    match *val {
                        Value::Boolean(b) => buf.push_boolean(b),
                        Value::Null => buf.push_null(),
                        Value::Integer(i) => buf.push_integer(i),
                        Value::OctetString(ostr) => buf.push_octet_string(ostr),
                        Value::ObjectIdentifier(ref objid) => {
                            buf.push_object_identifier_raw(objid.as_bytes());
                        }
                        Value::IpAddress(ip) => buf.push_ipaddress(ip),
                        Value::Counter32(i) => buf.push_counter32(i),
                        Value::Unsigned32(i) => buf.push_unsigned32(i),
                        Value::Timeticks(tt) => buf.push_timeticks(tt),
                        Value::Opaque(bytes) => buf.push_opaque(bytes),
                        Value::Counter64(i) => buf.push_counter64(i),
                        Value::EndOfMibView => buf.push_endofmibview(),
                        Value::NoSuchObject => buf.push_nosuchobject(),
                        Value::NoSuchInstance => buf.push_nosuchinstance(),
                        _ => return,
                    }
                    buf.push_object_identifier_raw(oid.as_bytes());
                });
            }
        });
        buf.push_integer(i64::from(error_index));
        buf.push_integer(i64::from(error_status));
        buf.push_integer(i64::from(req_id));
    });
}

/// Wraps a PDU body in the plaintext scoped PDU sequence:
/// contextEngineID, contextName, PDU.
pub(crate) fn push_scoped_pdu<F>(
    buf: &mut Buf,
    context_engine_id: &[u8],
    context_name: &[u8],
    mut f: F,
) where
    F: FnMut(&mut Buf),
{
    buf.push_sequence(|buf| {
        f(buf);
        buf.push_octet_string(context_name);
        buf.push_octet_string(context_engine_id);
    });
}

/// A PDU deserialized from plaintext scoped PDU bytes.
#[derive(Debug, Clone)]
pub struct Pdu<'a> {
    pub message_type: MessageType,
    pub req_id: i32,
    pub error_status: u32,
    pub error_index: u32,
    pub varbinds: Varbinds<'a>,
}

impl<'a> Pdu<'a> {
    pub fn from_scoped_bytes(bytes: &'a [u8]) -> Result<Pdu<'a>> {
        let mut rdr = AsnReader::from_bytes(bytes);
        let ident = rdr.peek_byte()?;
        let message_type = MessageType::from_ident(ident)?;
        let mut body = AsnReader::from_bytes(rdr.read_raw(ident)?);

        let req_id = body.read_asn_integer()?;
        if req_id < i64::from(i32::MIN) || req_id > i64::from(i32::MAX) {
            return Err(Error::ValueOutOfRange);
        }

        let error_status = body.read_asn_integer()?;
        if error_status < 0 || error_status > i64::from(i32::MAX) {
            return Err(Error::ValueOutOfRange);
        }

        let error_index = body.read_asn_integer()?;
        if error_index < 0 || error_index > i64::from(i32::MAX) {
            return Err(Error::ValueOutOfRange);
        }

        let varbind_bytes = body.read_raw(asn1::TYPE_SEQUENCE)?;

        Ok(Pdu {
            message_type,
            req_id: i32::try_from(req_id)?,
            error_status: u32::try_from(error_status)?,
            error_index: u32::try_from(error_index)?,
            varbinds: Varbinds::from_bytes(varbind_bytes),
        })
    }

    pub(crate) fn validate(&self, expected_type: MessageType, expected_req_id: i32) -> Result<()> {
        if self.message_type != expected_type {
            return Err(Error::AsnWrongType);
        }
        if self.req_id != expected_req_id {
            return Err(Error::RequestIdMismatch);
        }
        Ok(())
    }
}
