use crate::{
    message::{self, ParsedMessage},
    pdu::{Buf, Pdu},
    snmp, Error, MessageType, Result, SecurityParameters, UsmState, BUFFER_SIZE,
};

// usmStats counters (RFC 3414 §5), raw OID encodings.
const USM_STATS_UNSUPPORTED_SEC_LEVELS: &[u8] = &[0x2b, 6, 1, 6, 3, 15, 1, 1, 1, 0];
const USM_STATS_NOT_IN_TIME_WINDOWS: &[u8] = &[0x2b, 6, 1, 6, 3, 15, 1, 1, 2, 0];
const USM_STATS_UNKNOWN_USER_NAMES: &[u8] = &[0x2b, 6, 1, 6, 3, 15, 1, 1, 3, 0];
const USM_STATS_UNKNOWN_ENGINE_IDS: &[u8] = &[0x2b, 6, 1, 6, 3, 15, 1, 1, 4, 0];
const USM_STATS_WRONG_DIGESTS: &[u8] = &[0x2b, 6, 1, 6, 3, 15, 1, 1, 5, 0];
const USM_STATS_DECRYPTION_ERRORS: &[u8] = &[0x2b, 6, 1, 6, 3, 15, 1, 1, 6, 0];

/// Builds the engine discovery probe: reportable-only flags, empty USM
/// parameters, a GetRequest with an empty varbind list (RFC 3414 §4).
pub(crate) fn build_probe(msg_id: u32, req_id: i32, buf: &mut Buf) -> Result<()> {
    buf.reset();
    let mut sec_buf = Buf::default();
    sec_buf.push_sequence(|sec| {
        sec.push_octet_string(&[]); // priv params
        sec.push_octet_string(&[]); // auth params
        sec.push_octet_string(&[]); // user name
        sec.push_integer(0); // time
        sec.push_integer(0); // boots
        sec.push_octet_string(&[]); // engine ID
    });
    buf.push_sequence(|message| {
        message.push_sequence(|scoped| {
            scoped.push_constructed(snmp::MSG_GET, |req| {
                req.push_sequence(|_| {}); // empty varbind list
                req.push_integer(0); // error index
                req.push_integer(0); // error status
                req.push_integer(i64::from(req_id));
            });
            scoped.push_octet_string(&[]); // context name
            scoped.push_octet_string(&[]); // context engine ID
        });
        message.push_octet_string(&sec_buf);
        message.push_sequence(|global| {
            global.push_integer(i64::from(snmp::SECURITY_MODEL_USM));
            global.push_octet_string(&[snmp::MSG_FLAG_REPORTABLE]);
            global.push_integer(BUFFER_SIZE as i64);
            global.push_integer(i64::from(msg_id));
        });
        message.push_integer(snmp::VERSION_3);
    });
    if buf.overflowed() || sec_buf.overflowed() {
        return Err(Error::SerializeTooLarge);
    }
    Ok(())
}

/// Runs the two-step engine bootstrap over a caller-supplied exchange:
/// `exchange` sends one datagram, receives one and returns its length.
/// The Report answering the probe carries the authoritative engine
/// ID/boots/time, which `parse_inbound` stores into `state`.
pub fn discover<F>(
    state: &UsmState,
    security: &SecurityParameters,
    req_id: i32,
    mut exchange: F,
) -> Result<()>
where
    F: FnMut(&[u8], &mut [u8]) -> Result<usize>,
{
    let mut probe = Buf::default();
    build_probe(state.next_msg_id(), req_id, &mut probe)?;
    let mut recv = [0u8; BUFFER_SIZE];
    let received = exchange(&probe[..], &mut recv).map_err(|_| Error::DiscoveryFailed)?;
    if received > BUFFER_SIZE {
        return Err(Error::DiscoveryFailed);
    }
    message::parse_inbound(state, security, &mut recv[..received])?;
    if !state.is_synchronized() {
        return Err(Error::DiscoveryFailed);
    }
    Ok(())
}

/// Maps a Report PDU onto the matching error. Out-of-time-window reports
/// also update the engine clock so the caller can retransmit immediately.
pub fn report_error(state: &UsmState, message: &ParsedMessage, pdu: &Pdu) -> Option<Error> {
    if pdu.message_type != MessageType::Report {
        return None;
    }
    for (oid, _value) in pdu.varbinds.clone() {
        let error = match oid.as_bytes() {
            USM_STATS_NOT_IN_TIME_WINDOWS => {
                let new_boots = message.security.engine_boots;
                let new_time = message.security.engine_time;
                state.update_times(new_boots, new_time);
                Error::OutOfTimeWindow {
                    new_boots,
                    new_time,
                }
            }
            USM_STATS_UNSUPPORTED_SEC_LEVELS => Error::UnsupportedSecLevel,
            USM_STATS_UNKNOWN_USER_NAMES => Error::UnknownUser,
            USM_STATS_UNKNOWN_ENGINE_IDS => Error::UnknownEngineId,
            USM_STATS_WRONG_DIGESTS => Error::WrongDigests,
            USM_STATS_DECRYPTION_ERRORS => Error::DecryptionError,
            _ => continue,
        };
        return Some(error);
    }
    None
}
