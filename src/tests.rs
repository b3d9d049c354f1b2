use std::collections::HashSet;

use crate::{
    discovery, message,
    pdu::{self, Buf, Pdu},
    snmp, AuthProtocol, Error, MessageType, Oid, PrivProtocol, SecurityParameters, UsmParameters,
    UsmState, Value,
};

const ENGINE_ID: &[u8] = &[
    0x80, 0x00, 0x1f, 0x88, 0x80, 0xe9, 0x63, 0x00, 0x00, 0x53, 0xab, 0x22,
];

fn synced_state(boots: u32, time: u32) -> UsmState {
    let state = UsmState::new().unwrap();
    state.store_engine(ENGINE_ID, boots, time);
    state
}

fn auth_security() -> SecurityParameters {
    SecurityParameters::Usm(
        UsmParameters::new(b"testuser").with_auth(AuthProtocol::Md5, b"authpass123"),
    )
}

fn des_security() -> SecurityParameters {
    SecurityParameters::Usm(
        UsmParameters::new(b"privuser")
            .with_auth(AuthProtocol::Md5, b"authpass123")
            .with_privacy(PrivProtocol::Des, b"privpass123"),
    )
}

fn aes_security() -> SecurityParameters {
    SecurityParameters::Usm(
        UsmParameters::new(b"privuser")
            .with_auth(AuthProtocol::Sha1, b"authpass123")
            .with_privacy(PrivProtocol::Aes128, b"privpass123"),
    )
}

/// Hand-built plaintext message with arbitrary flags and security model.
fn build_raw(flags: u8, model: i64) -> Vec<u8> {
    let mut sec_buf = Buf::default();
    sec_buf.push_sequence(|sec| {
        sec.push_octet_string(&[]); // priv params
        sec.push_octet_string(&[]); // auth params
        sec.push_octet_string(b"user");
        sec.push_integer(0); // time
        sec.push_integer(0); // boots
        sec.push_octet_string(b"engine-00001");
    });
    let mut buf = Buf::default();
    buf.push_sequence(|message| {
        message.push_sequence(|scoped| {
            pdu::build_inner(snmp::MSG_RESPONSE, 1, &[], 0, 0, scoped);
            scoped.push_octet_string(&[]); // context name
            scoped.push_octet_string(&[]); // context engine ID
        });
        message.push_octet_string(&sec_buf);
        message.push_sequence(|global| {
            global.push_integer(model);
            global.push_octet_string(&[flags]);
            global.push_integer(4096);
            global.push_integer(99);
        });
        message.push_integer(3);
    });
    buf.to_vec()
}

#[test]
fn round_trip_auth_no_priv() {
    let sender = synced_state(7, 1234);
    let receiver = synced_state(7, 1234);
    let security = auth_security();
    let oid = Oid::from(&[1, 3, 6, 1, 2, 1, 1, 1, 0]).unwrap();

    let mut buf = Buf::default();
    message::build_outbound(
        &sender,
        &security,
        snmp::MSG_GET,
        9001,
        &[(&oid, Value::Null)],
        0,
        0,
        &mut buf,
    )
    .unwrap();

    let mut wire = buf.to_vec();
    let parsed = message::parse_inbound(&receiver, &security, &mut wire).unwrap();
    assert_eq!(parsed.flags, snmp::MSG_FLAG_AUTH | snmp::MSG_FLAG_REPORTABLE);
    assert_eq!(parsed.security.auth_params.len(), 12);
    assert!(parsed.security.privacy_params.is_empty());
    assert_eq!(parsed.security.engine_id, ENGINE_ID);
    assert_eq!(parsed.security.user_name, b"testuser");
    assert_eq!(parsed.context_engine_id, ENGINE_ID);
    assert!(parsed.context_name.is_empty());

    let response = Pdu::from_scoped_bytes(&parsed.pdu_bytes).unwrap();
    assert_eq!(response.message_type, MessageType::GetRequest);
    assert_eq!(response.req_id, 9001);
    let (name, value) = response.varbinds.clone().next().unwrap();
    assert_eq!(name, oid);
    assert!(matches!(value, Value::Null));
}

#[test]
fn round_trip_md5_des() {
    let sender = synced_state(3, 9999);
    let receiver = synced_state(3, 9999);
    let security = des_security();
    let oid = Oid::from(&[1, 3, 6, 1, 2, 1, 1, 5, 0]).unwrap();
    let payload = b"twenty byte payload!";

    let mut buf = Buf::default();
    message::build_outbound(
        &sender,
        &security,
        snmp::MSG_SET,
        31337,
        &[(&oid, Value::OctetString(payload))],
        0,
        0,
        &mut buf,
    )
    .unwrap();

    let mut wire = buf.to_vec();
    let parsed = message::parse_inbound(&receiver, &security, &mut wire).unwrap();
    assert_eq!(
        parsed.flags,
        snmp::MSG_FLAG_AUTH | snmp::MSG_FLAG_PRIV | snmp::MSG_FLAG_REPORTABLE
    );
    assert_eq!(parsed.security.auth_params.len(), 12);
    assert_eq!(parsed.security.privacy_params.len(), 8);
    assert_eq!(parsed.context_engine_id, ENGINE_ID);

    let request = Pdu::from_scoped_bytes(&parsed.pdu_bytes).unwrap();
    assert_eq!(request.message_type, MessageType::SetRequest);
    assert_eq!(request.req_id, 31337);
    let (name, value) = request.varbinds.clone().next().unwrap();
    assert_eq!(name, oid);
    match value {
        Value::OctetString(bytes) => assert_eq!(bytes, payload),
        other => panic!("unexpected value {:?}", other),
    }
}

#[test]
fn round_trip_sha1_aes_multiple_blocks() {
    let sender = synced_state(11, 60000);
    let receiver = synced_state(11, 60000);
    let security = aes_security();
    let oid = Oid::from(&[1, 3, 6, 1, 4, 1, 2, 21, 1]).unwrap();
    let payload = vec![0x5au8; 200];

    let mut buf = Buf::default();
    message::build_outbound(
        &sender,
        &security,
        snmp::MSG_SET,
        777,
        &[(&oid, Value::OctetString(&payload))],
        0,
        0,
        &mut buf,
    )
    .unwrap();

    let mut wire = buf.to_vec();
    let parsed = message::parse_inbound(&receiver, &security, &mut wire).unwrap();
    assert_eq!(parsed.security.privacy_params.len(), 8);

    let request = Pdu::from_scoped_bytes(&parsed.pdu_bytes).unwrap();
    assert_eq!(request.req_id, 777);
    let (_, value) = request.varbinds.clone().next().unwrap();
    match value {
        Value::OctetString(bytes) => assert_eq!(bytes, &payload[..]),
        other => panic!("unexpected value {:?}", other),
    }
}

#[test]
fn single_bit_tampering_is_rejected() {
    let sender = synced_state(2, 500);
    let receiver = synced_state(2, 500);
    let security = auth_security();
    let oid = Oid::from(&[1, 3, 6, 1, 2, 1, 1, 3, 0]).unwrap();

    let mut buf = Buf::default();
    message::build_outbound(
        &sender,
        &security,
        snmp::MSG_GET,
        55,
        &[(&oid, Value::Null)],
        0,
        0,
        &mut buf,
    )
    .unwrap();
    let wire = buf.to_vec();

    // untampered copy verifies
    let mut clean = wire.clone();
    message::parse_inbound(&receiver, &security, &mut clean).unwrap();

    for index in 0..wire.len() {
        let mut tampered = wire.clone();
        tampered[index] ^= 0x01;
        assert!(
            message::parse_inbound(&receiver, &security, &mut tampered).is_err(),
            "bit flip at byte {} was accepted",
            index
        );
    }

    // a flip in the scoped PDU region fails authentication specifically
    let mut tampered = wire.clone();
    let last = tampered.len() - 1;
    tampered[last] ^= 0x01;
    assert_eq!(
        message::parse_inbound(&receiver, &security, &mut tampered).unwrap_err(),
        Error::Unauthentic
    );
}

#[test]
fn discovery_probe_and_report() {
    // the probe is parseable by the authoritative side
    let mut probe = Buf::default();
    discovery::build_probe(42, 7, &mut probe).unwrap();

    let agent_state = synced_state(3, 1000);
    let agent_security = SecurityParameters::Usm(UsmParameters::new(b""));
    let mut wire = probe.to_vec();
    let parsed = message::parse_inbound(&agent_state, &agent_security, &mut wire).unwrap();
    assert_eq!(parsed.flags, snmp::MSG_FLAG_REPORTABLE);
    assert!(parsed.security.engine_id.is_empty());
    assert!(parsed.security.user_name.is_empty());

    let probe_pdu = Pdu::from_scoped_bytes(&parsed.pdu_bytes).unwrap();
    assert_eq!(probe_pdu.message_type, MessageType::GetRequest);
    assert_eq!(probe_pdu.req_id, 7);
    assert_eq!(probe_pdu.varbinds.clone().count(), 0);

    // the agent answers with an unauthenticated report carrying its engine
    let report_oid = Oid::from(&[1, 3, 6, 1, 6, 3, 15, 1, 1, 4, 0]).unwrap();
    let mut reply = Buf::default();
    message::build_outbound(
        &agent_state,
        &agent_security,
        snmp::MSG_REPORT,
        probe_pdu.req_id,
        &[(&report_oid, Value::Counter32(1))],
        0,
        0,
        &mut reply,
    )
    .unwrap();

    // absorbing the report synchronizes the requesting side
    let client_state = UsmState::new().unwrap();
    let client_security = auth_security();
    assert!(!client_state.is_synchronized());
    let mut wire = reply.to_vec();
    message::parse_inbound(&client_state, &client_security, &mut wire).unwrap();
    assert!(client_state.is_synchronized());
    assert_eq!(client_state.engine_id(), ENGINE_ID);
    assert_eq!(client_state.engine_boots_time(), (3, 1000));
}

#[test]
fn discover_drives_the_exchange() {
    let agent_state = synced_state(5, 777);
    let agent_security = SecurityParameters::Usm(UsmParameters::new(b""));
    let report_oid = Oid::from(&[1, 3, 6, 1, 6, 3, 15, 1, 1, 4, 0]).unwrap();

    let client_state = UsmState::new().unwrap();
    let client_security = auth_security();
    discovery::discover(&client_state, &client_security, 1, |probe, recv| {
        // the agent parses the probe and responds with a report
        let mut wire = probe.to_vec();
        let parsed = message::parse_inbound(&agent_state, &agent_security, &mut wire)?;
        let pdu = Pdu::from_scoped_bytes(&parsed.pdu_bytes)?;
        let mut reply = Buf::default();
        message::build_outbound(
            &agent_state,
            &agent_security,
            snmp::MSG_REPORT,
            pdu.req_id,
            &[(&report_oid, Value::Counter32(1))],
            0,
            0,
            &mut reply,
        )?;
        recv[..reply.len()].copy_from_slice(&reply);
        Ok(reply.len())
    })
    .unwrap();

    assert!(client_state.is_synchronized());
    assert_eq!(client_state.engine_id(), ENGINE_ID);
}

#[test]
fn out_of_time_window_updates_state() {
    let agent_state = synced_state(9, 55555);
    let agent_security = auth_security();
    let ootw_oid = Oid::from(&[1, 3, 6, 1, 6, 3, 15, 1, 1, 2, 0]).unwrap();

    let mut report = Buf::default();
    message::build_outbound(
        &agent_state,
        &agent_security,
        snmp::MSG_REPORT,
        123,
        &[(&ootw_oid, Value::Counter32(4))],
        0,
        0,
        &mut report,
    )
    .unwrap();

    // the requesting side is behind the agent's clock
    let client_state = synced_state(3, 1000);
    let client_security = auth_security();
    let mut wire = report.to_vec();
    let parsed = message::parse_inbound(&client_state, &client_security, &mut wire).unwrap();
    let pdu = Pdu::from_scoped_bytes(&parsed.pdu_bytes).unwrap();

    let error = discovery::report_error(&client_state, &parsed, &pdu);
    assert_eq!(
        error,
        Some(Error::OutOfTimeWindow {
            new_boots: 9,
            new_time: 55555,
        })
    );
    assert_eq!(client_state.engine_boots_time(), (9, 55555));
}

#[test]
fn privacy_salts_never_repeat() {
    let sender = synced_state(1, 1);
    let receiver = synced_state(1, 1);
    let security = des_security();
    let oid = Oid::from(&[1, 3, 6, 1, 2, 1, 1, 1, 0]).unwrap();

    let mut salts = HashSet::new();
    for _ in 0..16 {
        let mut buf = Buf::default();
        message::build_outbound(
            &sender,
            &security,
            snmp::MSG_GET,
            1,
            &[(&oid, Value::Null)],
            0,
            0,
            &mut buf,
        )
        .unwrap();
        let mut wire = buf.to_vec();
        let parsed = message::parse_inbound(&receiver, &security, &mut wire).unwrap();
        assert_eq!(parsed.security.privacy_params.len(), 8);
        assert!(salts.insert(parsed.security.privacy_params.clone()));
    }
}

#[test]
fn oversized_message_is_rejected() {
    let sender = synced_state(1, 1);
    let security = auth_security();
    let oid = Oid::from(&[1, 3, 6, 1, 2, 1, 1, 1, 0]).unwrap();
    let payload = vec![0u8; 5000];

    let mut buf = Buf::default();
    let result = message::build_outbound(
        &sender,
        &security,
        snmp::MSG_SET,
        1,
        &[(&oid, Value::OctetString(&payload))],
        0,
        0,
        &mut buf,
    );
    assert_eq!(result, Err(Error::SerializeTooLarge));
}

#[test]
fn foreign_security_model_is_rejected() {
    let state = UsmState::new().unwrap();
    let security = SecurityParameters::Usm(UsmParameters::new(b"user"));
    let mut wire = build_raw(0, 2);
    assert_eq!(
        message::parse_inbound(&state, &security, &mut wire).unwrap_err(),
        Error::UnsupportedSecurityModel
    );
}

#[test]
fn priv_without_auth_flags_are_rejected() {
    let state = UsmState::new().unwrap();
    let security = SecurityParameters::Usm(UsmParameters::new(b"user"));
    let mut wire = build_raw(snmp::MSG_FLAG_PRIV, 3);
    assert_eq!(
        message::parse_inbound(&state, &security, &mut wire).unwrap_err(),
        Error::MalformedHeader
    );
}

#[test]
fn unauthenticated_reply_is_rejected_after_sync() {
    let agent_state = synced_state(1, 1);
    let agent_security = SecurityParameters::Usm(UsmParameters::new(b"testuser"));
    let oid = Oid::from(&[1, 3, 6, 1, 2, 1, 1, 1, 0]).unwrap();

    let mut reply = Buf::default();
    message::build_outbound(
        &agent_state,
        &agent_security,
        snmp::MSG_RESPONSE,
        12,
        &[(&oid, Value::Null)],
        0,
        0,
        &mut reply,
    )
    .unwrap();

    // an authenticated requester must not accept a noAuth downgrade
    let client_state = synced_state(1, 1);
    let client_security = auth_security();
    let mut wire = reply.to_vec();
    assert_eq!(
        message::parse_inbound(&client_state, &client_security, &mut wire).unwrap_err(),
        Error::Unauthentic
    );
}

#[test]
fn report_oids_map_to_errors() {
    let agent_state = synced_state(1, 1);
    let agent_security = auth_security();
    let client_security = auth_security();

    for (arc, expected) in [
        (1u64, Error::UnsupportedSecLevel),
        (3, Error::UnknownUser),
        (4, Error::UnknownEngineId),
        (5, Error::WrongDigests),
        (6, Error::DecryptionError),
    ] {
        let oid = Oid::from(&[1, 3, 6, 1, 6, 3, 15, 1, 1, arc, 0]).unwrap();
        let mut report = Buf::default();
        message::build_outbound(
            &agent_state,
            &agent_security,
            snmp::MSG_REPORT,
            1,
            &[(&oid, Value::Counter32(1))],
            0,
            0,
            &mut report,
        )
        .unwrap();

        let client_state = synced_state(1, 1);
        let mut wire = report.to_vec();
        let parsed = message::parse_inbound(&client_state, &client_security, &mut wire).unwrap();
        let pdu = Pdu::from_scoped_bytes(&parsed.pdu_bytes).unwrap();
        assert_eq!(
            discovery::report_error(&client_state, &parsed, &pdu),
            Some(expected)
        );
    }
}
