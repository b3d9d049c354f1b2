use std::borrow::Cow;

use crate::{
    asn1::{self, AsnReader},
    auth::{self, AUTH_PARAMS_LEN},
    pdu::{self, Buf},
    privacy,
    security::{self, AuthProtocol, PrivProtocol, SecurityParameters, UsmParameters},
    snmp, Error, Oid, Result, UsmState, Value, BUFFER_SIZE,
};

/// Engine IDs are 5 to 32 octets (RFC 3411 SnmpEngineID).
const MIN_ENGINE_ID_LEN: usize = 5;
const MAX_ENGINE_ID_LEN: usize = 32;

/// A verified and, where applicable, decrypted inbound SNMPv3 message.
///
/// `pdu_bytes` borrows the receive buffer for plaintext messages and owns
/// the recovered plaintext for encrypted ones.
#[derive(Debug)]
pub struct ParsedMessage<'a> {
    pub msg_id: u32,
    pub flags: u8,
    pub max_size: i64,
    pub security: UsmParameters,
    pub context_engine_id: Vec<u8>,
    pub context_name: Vec<u8>,
    pub pdu_bytes: Cow<'a, [u8]>,
}

/// Serializes, encrypts and authenticates one outgoing message into `buf`.
///
/// Every call draws a fresh msg ID and, under privacy, a fresh salt from
/// `state`, so concurrent builds never reuse either. The reserved
/// authentication slot is located while the security parameter block is
/// written: in a reverse-building buffer the distance from a written byte
/// to the end of the message is final, so the slot's tail distance converts
/// to an absolute offset once the outer sequence is closed.
#[allow(clippy::too_many_arguments)]
pub fn build_outbound(
    state: &UsmState,
    security: &SecurityParameters,
    ident: u8,
    req_id: i32,
    values: &[(&Oid, Value)],
    error_status: u32,
    error_index: u32,
    buf: &mut Buf,
) -> Result<()> {
    let usm = security.as_usm();
    usm.validate()?;
    let flags = usm.msg_flags() | snmp::MSG_FLAG_REPORTABLE;
    let engine = state.engine_snapshot();
    let msg_id = state.next_msg_id();

    let mut priv_params = Vec::new();
    let encrypted = if flags & snmp::MSG_FLAG_PRIV != 0 {
        let mut plain = Buf::default();
        pdu::push_scoped_pdu(
            &mut plain,
            &engine.context_engine_id,
            &engine.context_name,
            |buf| pdu::build_inner(ident, req_id, values, error_status, error_index, buf),
        );
        if plain.overflowed() {
            return Err(Error::SerializeTooLarge);
        }
        let keys = state.keys(usm)?;
        let (ciphertext, salt) = match usm.priv_protocol {
            PrivProtocol::Des => {
                privacy::encrypt_des(&keys.priv_key, engine.boots, state.next_des_salt()?, &plain)?
            }
            PrivProtocol::Aes128 => privacy::encrypt_aes(
                &keys.priv_key,
                engine.boots,
                engine.time,
                state.next_aes_salt()?,
                &plain,
            )?,
            PrivProtocol::NoPriv => return Err(Error::InvalidConfig),
        };
        priv_params = salt;
        Some(ciphertext)
    } else {
        None
    };

    buf.reset();
    let mut sec_buf = Buf::default();
    let mut auth_tail = 0;
    buf.push_sequence(|buf| {
        if let Some(ref ciphertext) = encrypted {
            buf.push_octet_string(ciphertext);
        } else {
            pdu::push_scoped_pdu(buf, &engine.context_engine_id, &engine.context_name, |buf| {
                pdu::build_inner(ident, req_id, values, error_status, error_index, buf);
            });
        }
        let data_len = buf.len();

        let mut slot_tail = 0;
        sec_buf.reset();
        sec_buf.push_sequence(|sec| {
            sec.push_octet_string(&priv_params);
            if flags & snmp::MSG_FLAG_AUTH != 0 {
                let before = sec.len();
                sec.push_octet_string(&[0u8; AUTH_PARAMS_LEN]);
                slot_tail = before + AUTH_PARAMS_LEN;
            } else {
                sec.push_octet_string(&[]);
            }
            sec.push_octet_string(&usm.user_name);
            sec.push_integer(i64::from(engine.time));
            sec.push_integer(i64::from(engine.boots));
            sec.push_octet_string(&engine.id);
        });
        buf.push_octet_string(&sec_buf);
        if slot_tail != 0 {
            // the security block content sits directly before msgData
            auth_tail = data_len + slot_tail;
        }

        buf.push_sequence(|global| {
            global.push_integer(i64::from(snmp::SECURITY_MODEL_USM));
            global.push_octet_string(&[flags]);
            global.push_integer(BUFFER_SIZE as i64);
            global.push_integer(i64::from(msg_id));
        });
        buf.push_integer(snmp::VERSION_3);
    });
    if buf.overflowed() || sec_buf.overflowed() {
        return Err(Error::SerializeTooLarge);
    }

    if flags & snmp::MSG_FLAG_AUTH != 0 {
        let keys = state.keys(usm)?;
        let offset = buf.len() - auth_tail;
        auth::sign(usm.auth_protocol, &keys.auth_key, &mut buf[..], offset)?;
    }
    Ok(())
}

struct WireFields {
    msg_id: u32,
    flags: u8,
    max_size: i64,
    engine_id: Vec<u8>,
    engine_boots: u32,
    engine_time: u32,
    user_name: Vec<u8>,
    auth_params: Vec<u8>,
    priv_params: Vec<u8>,
    auth_offset: usize,
    data_start: usize,
    data_len: usize,
    data_encrypted: bool,
}

/// Authenticates, decrypts and deserializes one inbound datagram.
///
/// Verification zeroes the authentication slot of `bytes` in place before
/// recomputing the tag, which is why the buffer is taken mutably.
/// Authentication runs before decryption; on any failure no
/// [`ParsedMessage`] is produced.
pub fn parse_inbound<'a>(
    state: &UsmState,
    security: &SecurityParameters,
    bytes: &'a mut [u8],
) -> Result<ParsedMessage<'a>> {
    let usm = security.as_usm();
    let wire = read_wire_fields(bytes)?;

    if wire.flags & snmp::MSG_FLAG_AUTH != 0 {
        if wire.auth_params.len() != AUTH_PARAMS_LEN {
            return Err(Error::MalformedAuthParams);
        }
    } else if !wire.auth_params.is_empty() {
        return Err(Error::MalformedAuthParams);
    }
    if wire.flags & snmp::MSG_FLAG_PRIV != 0 {
        if wire.priv_params.len() != privacy::SALT_LEN {
            return Err(Error::MalformedPrivParams);
        }
    } else if !wire.priv_params.is_empty() {
        return Err(Error::MalformedPrivParams);
    }

    let synchronized = state.is_synchronized();
    if wire.flags & snmp::MSG_FLAG_AUTH != 0 {
        if usm.auth_protocol != AuthProtocol::NoAuth {
            let keys = state.keys(usm)?;
            auth::verify(usm.auth_protocol, &keys.auth_key, bytes, wire.auth_offset)?;
            // the engine clock of a verified message is the clock this
            // connection keeps using
            state.update_times(wire.engine_boots, wire.engine_time);
        }
    } else if usm.auth_protocol != AuthProtocol::NoAuth && synchronized {
        // an unauthenticated message is only acceptable while discovering
        return Err(Error::Unauthentic);
    }

    if !synchronized && !wire.engine_id.is_empty() {
        if wire.engine_id.len() < MIN_ENGINE_ID_LEN || wire.engine_id.len() > MAX_ENGINE_ID_LEN {
            return Err(Error::MalformedHeader);
        }
        state.store_engine(&wire.engine_id, wire.engine_boots, wire.engine_time);
    }

    let bytes: &'a [u8] = bytes;
    let data = &bytes[wire.data_start..wire.data_start + wire.data_len];
    let (context_engine_id, context_name, pdu_bytes) = if wire.data_encrypted {
        if usm.priv_protocol == PrivProtocol::NoPriv {
            return Err(Error::DecryptionError);
        }
        let keys = state.keys(usm)?;
        let plain = match usm.priv_protocol {
            PrivProtocol::Des => privacy::decrypt_des(&keys.priv_key, &wire.priv_params, data)?,
            PrivProtocol::Aes128 => privacy::decrypt_aes(
                &keys.priv_key,
                wire.engine_boots,
                wire.engine_time,
                &wire.priv_params,
                data,
            )?,
            PrivProtocol::NoPriv => return Err(Error::DecryptionError),
        };
        let (id, name, (start, end)) = split_scoped(&plain)?;
        (id, name, Cow::Owned(plain[start..end].to_vec()))
    } else {
        let (id, name, (start, end)) = split_scoped(data)?;
        (id, name, Cow::Borrowed(&data[start..end]))
    };

    Ok(ParsedMessage {
        msg_id: wire.msg_id,
        flags: wire.flags,
        max_size: wire.max_size,
        security: UsmParameters {
            engine_id: wire.engine_id,
            engine_boots: wire.engine_boots,
            engine_time: wire.engine_time,
            user_name: wire.user_name,
            auth_params: wire.auth_params,
            privacy_params: wire.priv_params,
            ..UsmParameters::default()
        },
        context_engine_id,
        context_name,
        pdu_bytes,
    })
}

/// First pass: walks the outer sequence tag by tag, mirroring the builder,
/// and captures the authentication slot offset and the msgData span. The
/// security block content ends exactly where msgData begins, so both fall
/// out of the readers' leftover counts.
fn read_wire_fields(bytes: &[u8]) -> Result<WireFields> {
    let total = bytes.len();
    let mut outer = AsnReader::from_bytes(bytes);
    let message = outer
        .read_raw(asn1::TYPE_SEQUENCE)
        .map_err(|_| Error::MalformedHeader)?;
    if outer.bytes_left() != 0 {
        // suffix offset arithmetic needs the outer TLV to span the datagram
        return Err(Error::MalformedHeader);
    }
    let mut rdr = AsnReader::from_bytes(message);
    if rdr.read_asn_integer().map_err(|_| Error::MalformedHeader)? != snmp::VERSION_3 {
        return Err(Error::UnsupportedVersion);
    }

    let mut global = AsnReader::from_bytes(
        rdr.read_raw(asn1::TYPE_SEQUENCE)
            .map_err(|_| Error::MalformedHeader)?,
    );
    let msg_id = read_u32(&mut global)?;
    let max_size = global
        .read_asn_integer()
        .map_err(|_| Error::MalformedHeader)?;
    let flag_octets = global
        .read_asn_octetstring()
        .map_err(|_| Error::MalformedHeader)?;
    if flag_octets.len() != 1 {
        return Err(Error::MalformedHeader);
    }
    let flags = flag_octets[0];
    if !security::flags_are_legal(flags) {
        return Err(Error::MalformedHeader);
    }
    let model = global
        .read_asn_integer()
        .map_err(|_| Error::MalformedHeader)?;
    if model != i64::from(snmp::SECURITY_MODEL_USM) {
        return Err(Error::UnsupportedSecurityModel);
    }

    let sec_octets = rdr
        .read_asn_octetstring()
        .map_err(|_| Error::MalformedHeader)?;
    let sec_content = AsnReader::from_bytes(sec_octets)
        .read_raw(asn1::TYPE_SEQUENCE)
        .map_err(|_| Error::MalformedHeader)?;
    let mut sec = AsnReader::from_bytes(sec_content);
    let engine_id = sec
        .read_asn_octetstring()
        .map_err(|_| Error::MalformedHeader)?
        .to_vec();
    let engine_boots = read_u32(&mut sec)?;
    let engine_time = read_u32(&mut sec)?;
    let user_name = sec
        .read_asn_octetstring()
        .map_err(|_| Error::MalformedHeader)?
        .to_vec();
    let auth_params = sec
        .read_asn_octetstring()
        .map_err(|_| Error::MalformedAuthParams)?
        .to_vec();
    let auth_offset = total - rdr.bytes_left() - sec.bytes_left() - auth_params.len();
    let priv_params = sec
        .read_asn_octetstring()
        .map_err(|_| Error::MalformedPrivParams)?
        .to_vec();

    let data_tag = rdr.peek_byte().map_err(|_| Error::MalformedHeader)?;
    let (data_start, data_len, data_encrypted) = match data_tag {
        asn1::TYPE_OCTETSTRING => {
            if flags & snmp::MSG_FLAG_PRIV == 0 {
                return Err(Error::MalformedHeader);
            }
            let content = rdr
                .read_asn_octetstring()
                .map_err(|_| Error::MalformedHeader)?;
            (total - rdr.bytes_left() - content.len(), content.len(), true)
        }
        asn1::TYPE_SEQUENCE => {
            if flags & snmp::MSG_FLAG_PRIV != 0 {
                return Err(Error::MalformedHeader);
            }
            let start = total - rdr.bytes_left();
            rdr.read_raw(asn1::TYPE_SEQUENCE)
                .map_err(|_| Error::MalformedHeader)?;
            (start, total - rdr.bytes_left() - start, false)
        }
        _ => return Err(Error::MalformedHeader),
    };

    Ok(WireFields {
        msg_id,
        flags,
        max_size,
        engine_id,
        engine_boots,
        engine_time,
        user_name,
        auth_params,
        priv_params,
        auth_offset,
        data_start,
        data_len,
        data_encrypted,
    })
}

/// Splits a plaintext scoped PDU into its context fields and the PDU span.
/// The sequence's own BER length bounds the content, which is what
/// discards trailing DES zero-padding.
fn split_scoped(plain: &[u8]) -> Result<(Vec<u8>, Vec<u8>, (usize, usize))> {
    let mut outer = AsnReader::from_bytes(plain);
    let content = outer
        .read_raw(asn1::TYPE_SEQUENCE)
        .map_err(|_| Error::MalformedHeader)?;
    let content_end = plain.len() - outer.bytes_left();
    let content_start = content_end - content.len();

    let mut rdr = AsnReader::from_bytes(content);
    let context_engine_id = rdr
        .read_asn_octetstring()
        .map_err(|_| Error::MalformedHeader)?
        .to_vec();
    let context_name = rdr
        .read_asn_octetstring()
        .map_err(|_| Error::MalformedHeader)?
        .to_vec();
    let pdu_start = content_start + (content.len() - rdr.bytes_left());
    Ok((context_engine_id, context_name, (pdu_start, content_end)))
}

/// engineBoots and engineTime are unsigned 32-bit but may arrive as 1 to 5
/// content bytes (leading zero octet included).
fn read_u32(rdr: &mut AsnReader) -> Result<u32> {
    let value = rdr.read_asn_integer().map_err(|_| Error::MalformedHeader)?;
    u32::try_from(value).map_err(|_| Error::MalformedHeader)
}
