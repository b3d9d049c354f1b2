#![allow(unknown_lints, clippy::doc_markdown)]
//! SNMPv3 client library built around the User Security Model (RFC 3414):
//! engine discovery, HMAC-MD5-96 / HMAC-SHA-96 authentication and DES-CBC /
//! AES-128-CFB (RFC 3826) privacy over BER-encoded messages.
//!
//! The protocol core is a pure transform between PDUs and datagram bytes
//! ([`build_outbound`] / [`parse_inbound`] over a shared [`UsmState`]);
//! [`SyncSession`] and the `async`-feature `AsyncSession` put a UDP
//! transport and the discovery/retry policy on top of it.

use std::fmt;
use std::io;

pub use der_parser::Oid;

pub mod asn1;
mod auth;
pub mod discovery;
mod keys;
pub mod message;
pub mod pdu;
mod privacy;
pub mod security;
pub mod state;

mod syncsession;
pub use syncsession::SyncSession;

#[cfg(feature = "async")]
mod asyncsession;
#[cfg(feature = "async")]
pub use asyncsession::AsyncSession;

#[cfg(test)]
mod tests;

pub use keys::localize;
pub use message::{build_outbound, parse_inbound, ParsedMessage};
pub use pdu::Pdu;
pub use security::{AuthProtocol, PrivProtocol, SecurityParameters, UsmParameters};
pub use state::UsmState;

pub(crate) const BUFFER_SIZE: usize = 4096;

/// SNMP error type.
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// ASN.1 parsing error.
    AsnParse,
    /// ASN.1 invalid length.
    AsnInvalidLen,
    /// ASN.1 wrong type.
    AsnWrongType,
    /// ASN.1 unsupported type.
    AsnUnsupportedType,
    /// ASN.1 unexpected end of input.
    AsnEof,
    /// ASN.1 integer overflow.
    AsnIntOverflow,

    /// Message version is not SNMPv3.
    UnsupportedVersion,
    /// Security model is not USM (3).
    UnsupportedSecurityModel,
    /// Response request ID does not match the request.
    RequestIdMismatch,
    /// Value out of range.
    ValueOutOfRange,

    /// Illegal flag/protocol combination or empty passphrase under auth.
    InvalidConfig,
    /// Message does not fit the send buffer or a supported BER length.
    SerializeTooLarge,
    /// Inbound header tag/length/size mismatch.
    MalformedHeader,
    /// Authentication parameters field has the wrong size.
    MalformedAuthParams,
    /// Privacy parameters field has the wrong size.
    MalformedPrivParams,
    /// HMAC verification failed; the message is discarded.
    Unauthentic,
    /// Cipher init failure or DES block-alignment failure.
    DecryptionError,
    /// The authoritative engine reported usmStatsNotInTimeWindows;
    /// connection state has been updated, the caller may retransmit.
    OutOfTimeWindow { new_boots: u32, new_time: u32 },
    /// Engine discovery returned no usable engine ID.
    DiscoveryFailed,
    /// Privacy salt counter wrapped within a session.
    SaltExhausted,

    /// Report: usmStatsUnknownEngineIDs.
    UnknownEngineId,
    /// Report: usmStatsUnknownUserNames.
    UnknownUser,
    /// Report: usmStatsWrongDigests.
    WrongDigests,
    /// Report: usmStatsUnsupportedSecLevels.
    UnsupportedSecLevel,

    /// Socket send error.
    Send,
    /// Socket receive error.
    Receive,
    /// Socket setup error.
    Io(String),
    /// Cryptographic backend error.
    Crypto(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::AsnParse => write!(f, "ASN.1 parsing error"),
            Error::AsnInvalidLen => write!(f, "ASN.1 invalid length"),
            Error::AsnWrongType => write!(f, "ASN.1 wrong type"),
            Error::AsnUnsupportedType => write!(f, "ASN.1 unsupported type"),
            Error::AsnEof => write!(f, "ASN.1 unexpected end of input"),
            Error::AsnIntOverflow => write!(f, "ASN.1 integer overflow"),
            Error::UnsupportedVersion => write!(f, "unsupported SNMP version"),
            Error::UnsupportedSecurityModel => write!(f, "unsupported security model"),
            Error::RequestIdMismatch => write!(f, "request ID mismatch"),
            Error::ValueOutOfRange => write!(f, "value out of range"),
            Error::InvalidConfig => write!(f, "invalid security configuration"),
            Error::SerializeTooLarge => write!(f, "message too large to serialize"),
            Error::MalformedHeader => write!(f, "malformed message header"),
            Error::MalformedAuthParams => write!(f, "malformed authentication parameters"),
            Error::MalformedPrivParams => write!(f, "malformed privacy parameters"),
            Error::Unauthentic => write!(f, "message authentication failed"),
            Error::DecryptionError => write!(f, "decryption failed"),
            Error::OutOfTimeWindow { new_boots, new_time } => write!(
                f,
                "not in time window (engine boots {}, engine time {})",
                new_boots, new_time
            ),
            Error::DiscoveryFailed => write!(f, "engine discovery failed"),
            Error::SaltExhausted => write!(f, "privacy salt counter exhausted"),
            Error::UnknownEngineId => write!(f, "authoritative engine reported unknown engine ID"),
            Error::UnknownUser => write!(f, "authoritative engine reported unknown user name"),
            Error::WrongDigests => write!(f, "authoritative engine reported wrong digest"),
            Error::UnsupportedSecLevel => {
                write!(f, "authoritative engine reported unsupported security level")
            }
            Error::Send => write!(f, "socket send error"),
            Error::Receive => write!(f, "socket receive error"),
            Error::Io(e) => write!(f, "socket error: {}", e),
            Error::Crypto(e) => write!(f, "crypto error: {}", e),
        }
    }
}

impl std::error::Error for Error {}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Error {
        Error::Io(e.to_string())
    }
}

impl From<openssl::error::ErrorStack> for Error {
    fn from(e: openssl::error::ErrorStack) -> Error {
        Error::Crypto(e.to_string())
    }
}

impl From<std::num::TryFromIntError> for Error {
    fn from(_: std::num::TryFromIntError) -> Error {
        Error::ValueOutOfRange
    }
}

pub type Result<T> = std::result::Result<T, Error>;

pub mod snmp {
    //! SNMPv3 wire constants.
    #![allow(dead_code, clippy::identity_op)]

    use crate::asn1;

    pub const VERSION_3: i64 = 3;
    pub const SECURITY_MODEL_USM: u8 = 3;

    pub const MSG_FLAG_AUTH: u8 = 0x01;
    pub const MSG_FLAG_PRIV: u8 = 0x02;
    pub const MSG_FLAG_REPORTABLE: u8 = 0x04;

    pub const MSG_GET: u8 = asn1::CLASS_CONTEXTSPECIFIC | asn1::CONSTRUCTED | 0;
    pub const MSG_GET_NEXT: u8 = asn1::CLASS_CONTEXTSPECIFIC | asn1::CONSTRUCTED | 1;
    pub const MSG_RESPONSE: u8 = asn1::CLASS_CONTEXTSPECIFIC | asn1::CONSTRUCTED | 2;
    pub const MSG_SET: u8 = asn1::CLASS_CONTEXTSPECIFIC | asn1::CONSTRUCTED | 3;
    pub const MSG_GET_BULK: u8 = asn1::CLASS_CONTEXTSPECIFIC | asn1::CONSTRUCTED | 5;
    pub const MSG_INFORM: u8 = asn1::CLASS_CONTEXTSPECIFIC | asn1::CONSTRUCTED | 6;
    pub const MSG_TRAP: u8 = asn1::CLASS_CONTEXTSPECIFIC | asn1::CONSTRUCTED | 7;
    pub const MSG_REPORT: u8 = asn1::CLASS_CONTEXTSPECIFIC | asn1::CONSTRUCTED | 8;

    pub const TYPE_IPADDRESS: u8 = asn1::CLASS_APPLICATION | 0;
    pub const TYPE_COUNTER32: u8 = asn1::CLASS_APPLICATION | 1;
    pub const TYPE_UNSIGNED32: u8 = asn1::CLASS_APPLICATION | 2;
    pub const TYPE_GAUGE32: u8 = TYPE_UNSIGNED32;
    pub const TYPE_TIMETICKS: u8 = asn1::CLASS_APPLICATION | 3;
    pub const TYPE_OPAQUE: u8 = asn1::CLASS_APPLICATION | 4;
    pub const TYPE_COUNTER64: u8 = asn1::CLASS_APPLICATION | 6;

    pub const SNMP_NOSUCHOBJECT: u8 = asn1::CLASS_CONTEXTSPECIFIC | asn1::PRIMITIVE | 0x0;
    pub const SNMP_NOSUCHINSTANCE: u8 = asn1::CLASS_CONTEXTSPECIFIC | asn1::PRIMITIVE | 0x1;
    pub const SNMP_ENDOFMIBVIEW: u8 = asn1::CLASS_CONTEXTSPECIFIC | asn1::PRIMITIVE | 0x2;
}

/// PDU type carried inside a scoped PDU.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum MessageType {
    GetRequest,
    GetNextRequest,
    GetBulkRequest,
    Response,
    SetRequest,
    InformRequest,
    Trap,
    Report,
}

impl MessageType {
    pub fn from_ident(ident: u8) -> Result<MessageType> {
        Ok(match ident {
            snmp::MSG_GET => MessageType::GetRequest,
            snmp::MSG_GET_NEXT => MessageType::GetNextRequest,
            snmp::MSG_GET_BULK => MessageType::GetBulkRequest,
            snmp::MSG_RESPONSE => MessageType::Response,
            snmp::MSG_SET => MessageType::SetRequest,
            snmp::MSG_INFORM => MessageType::InformRequest,
            snmp::MSG_TRAP => MessageType::Trap,
            snmp::MSG_REPORT => MessageType::Report,
            _ => return Err(Error::AsnWrongType),
        })
    }
}

/// SNMP varbind value.
pub enum Value<'a> {
    Boolean(bool),
    Null,
    Integer(i64),
    OctetString(&'a [u8]),
    ObjectIdentifier(Oid<'a>),
    Sequence(asn1::AsnReader<'a>),
    Constructed(u8, asn1::AsnReader<'a>),

    IpAddress([u8; 4]),
    Counter32(u32),
    Unsigned32(u32),
    Timeticks(u32),
    Opaque(&'a [u8]),
    Counter64(u64),

    EndOfMibView,
    NoSuchObject,
    NoSuchInstance,
}

impl fmt::Debug for Value<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Value::Boolean(v) => write!(f, "BOOLEAN: {}", v),
            Value::Null => write!(f, "NULL"),
            Value::Integer(n) => write!(f, "INTEGER: {}", n),
            Value::OctetString(slice) => {
                write!(f, "OCTET STRING: {}", String::from_utf8_lossy(slice))
            }
            Value::ObjectIdentifier(ref obj_id) => write!(f, "OBJECT IDENTIFIER: {}", obj_id),
            Value::Sequence(ref val) => write!(f, "SEQUENCE: {:#?}", val),
            Value::Constructed(ident, ref val) => write!(f, "CONSTRUCTED-{}: {:#?}", ident, val),
            Value::IpAddress(val) => {
                write!(f, "IP ADDRESS: {}.{}.{}.{}", val[0], val[1], val[2], val[3])
            }
            Value::Counter32(val) => write!(f, "COUNTER32: {}", val),
            Value::Unsigned32(val) => write!(f, "UNSIGNED32: {}", val),
            Value::Timeticks(val) => write!(f, "TIMETICKS: {}", val),
            Value::Opaque(val) => write!(f, "OPAQUE: {:?}", val),
            Value::Counter64(val) => write!(f, "COUNTER64: {}", val),
            Value::EndOfMibView => write!(f, "END OF MIB VIEW"),
            Value::NoSuchObject => write!(f, "NO SUCH OBJECT"),
            Value::NoSuchInstance => write!(f, "NO SUCH INSTANCE"),
        }
    }
}

impl<'a> Iterator for asn1::AsnReader<'a> {
    type Item = Value<'a>;

    fn next(&mut self) -> Option<Value<'a>> {
        if let Ok(ident) = self.peek_byte() {
            let ret: Result<Value> = match ident {
                asn1::TYPE_BOOLEAN => self.read_asn_boolean().map(Value::Boolean),
                asn1::TYPE_NULL => self.read_asn_null().map(|()| Value::Null),
                asn1::TYPE_INTEGER => self.read_asn_integer().map(Value::Integer),
                asn1::TYPE_OCTETSTRING => self.read_asn_octetstring().map(Value::OctetString),
                asn1::TYPE_OBJECTIDENTIFIER => self
                    .read_asn_objectidentifier()
                    .map(Value::ObjectIdentifier),
                asn1::TYPE_SEQUENCE => self
                    .read_raw(ident)
                    .map(|v| Value::Sequence(asn1::AsnReader::from_bytes(v))),
                snmp::TYPE_IPADDRESS => self.read_snmp_ipaddress().map(Value::IpAddress),
                snmp::TYPE_COUNTER32 => self.read_snmp_counter32().map(Value::Counter32),
                snmp::TYPE_UNSIGNED32 => self.read_snmp_unsigned32().map(Value::Unsigned32),
                snmp::TYPE_TIMETICKS => self.read_snmp_timeticks().map(Value::Timeticks),
                snmp::TYPE_OPAQUE => self.read_snmp_opaque().map(Value::Opaque),
                snmp::TYPE_COUNTER64 => self.read_snmp_counter64().map(Value::Counter64),
                snmp::SNMP_NOSUCHOBJECT => self.read_exception(ident).map(|()| Value::NoSuchObject),
                snmp::SNMP_NOSUCHINSTANCE => {
                    self.read_exception(ident).map(|()| Value::NoSuchInstance)
                }
                snmp::SNMP_ENDOFMIBVIEW => self.read_exception(ident).map(|()| Value::EndOfMibView),
                ident if ident & asn1::CONSTRUCTED == asn1::CONSTRUCTED => self
                    .read_raw(ident)
                    .map(|v| Value::Constructed(ident, asn1::AsnReader::from_bytes(v))),
                _ => Err(Error::AsnUnsupportedType),
            };
            ret.ok()
        } else {
            None
        }
    }
}

/// Lazy iterator over the varbind list of a PDU.
#[derive(Clone)]
pub struct Varbinds<'a> {
    inner: asn1::AsnReader<'a>,
}

impl fmt::Debug for Varbinds<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut ds = f.debug_struct("Varbinds");
        for (name, val) in self.clone() {
            ds.field(&format!("{}", name), &format!("{:?}", val));
        }
        ds.finish()
    }
}

impl<'a> Varbinds<'a> {
    pub(crate) fn from_bytes(bytes: &'a [u8]) -> Varbinds<'a> {
        Varbinds {
            inner: asn1::AsnReader::from_bytes(bytes),
        }
    }
}

impl<'a> Iterator for Varbinds<'a> {
    type Item = (Oid<'a>, Value<'a>);
    fn next(&mut self) -> Option<Self::Item> {
        if let Ok(seq) = self.inner.read_raw(asn1::TYPE_SEQUENCE) {
            let mut pair = asn1::AsnReader::from_bytes(seq);
            if let (Ok(name), Some(value)) = (pair.read_asn_objectidentifier(), pair.next()) {
                return Some((name, value));
            }
        }
        None
    }
}
