use std::{
    net::{Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs, UdpSocket},
    num::Wrapping,
    time::Duration,
};

use crate::{
    discovery, message,
    pdu::{self, Pdu},
    snmp, Error, MessageType, Oid, Result, SecurityParameters, UsmState, Value, BUFFER_SIZE,
};

/// Synchronous SNMPv3 client.
///
/// Discovery runs lazily before the first request; an out-of-time-window
/// report triggers exactly one retransmission with the updated engine
/// clock.
pub struct SyncSession {
    socket: UdpSocket,
    security: SecurityParameters,
    state: UsmState,
    req_id: Wrapping<i32>,
    send_buf: pdu::Buf,
    recv_buf: [u8; BUFFER_SIZE],
    scoped: Vec<u8>,
}

impl SyncSession {
    pub fn new<SA>(
        destination: SA,
        security: SecurityParameters,
        timeout: Option<Duration>,
        starting_req_id: i32,
    ) -> Result<Self>
    where
        SA: ToSocketAddrs,
    {
        let socket = match destination.to_socket_addrs()?.next() {
            Some(SocketAddr::V4(_)) => UdpSocket::bind((Ipv4Addr::new(0, 0, 0, 0), 0))?,
            Some(SocketAddr::V6(_)) => UdpSocket::bind((Ipv6Addr::new(0, 0, 0, 0, 0, 0, 0, 0), 0))?,
            None => return Err(Error::Io("no address found".into())),
        };
        socket.set_read_timeout(timeout)?;
        socket.set_write_timeout(timeout)?;
        socket.connect(destination)?;
        Ok(Self {
            socket,
            security,
            state: UsmState::new()?,
            req_id: Wrapping(starting_req_id),
            send_buf: pdu::Buf::default(),
            recv_buf: [0; BUFFER_SIZE],
            scoped: Vec::new(),
        })
    }

    /// Presets the authoritative engine, skipping the discovery exchange.
    pub fn with_engine(self, engine_id: &[u8], boots: u32, time: u32) -> Self {
        self.state.store_engine(engine_id, boots, time);
        self
    }

    /// Overrides the context addressed by outgoing requests.
    pub fn set_context(&self, context_engine_id: &[u8], context_name: &[u8]) {
        self.state.set_context(context_engine_id, context_name);
    }

    pub fn state(&self) -> &UsmState {
        &self.state
    }

    fn next_req_id(&mut self) -> i32 {
        let req_id = self.req_id.0;
        self.req_id += Wrapping(1);
        req_id
    }

    fn init(&mut self) -> Result<()> {
        if self.state.is_synchronized() {
            return Ok(());
        }
        let req_id = self.next_req_id();
        let socket = &self.socket;
        discovery::discover(&self.state, &self.security, req_id, |out, recv| {
            socket.send(out).map_err(|_| Error::Send)?;
            socket.recv(recv).map_err(|_| Error::Receive)
        })
    }

    fn request(
        &mut self,
        ident: u8,
        values: &[(&Oid, Value)],
        error_status: u32,
        error_index: u32,
    ) -> Result<Pdu<'_>> {
        self.init()?;
        let mut retried = false;
        let mut req_id;
        loop {
            req_id = self.next_req_id();
            message::build_outbound(
                &self.state,
                &self.security,
                ident,
                req_id,
                values,
                error_status,
                error_index,
                &mut self.send_buf,
            )?;
            if self.socket.send(&self.send_buf).is_err() {
                return Err(Error::Send);
            }
            let received = self.socket.recv(&mut self.recv_buf).map_err(|_| Error::Receive)?;
            let parsed =
                message::parse_inbound(&self.state, &self.security, &mut self.recv_buf[..received])?;
            let report = {
                let pdu = Pdu::from_scoped_bytes(&parsed.pdu_bytes)?;
                discovery::report_error(&self.state, &parsed, &pdu)
            };
            match report {
                Some(Error::OutOfTimeWindow { .. }) if !retried => {
                    retried = true;
                    continue;
                }
                Some(error) => return Err(error),
                None => {}
            }
            self.scoped = parsed.pdu_bytes.into_owned();
            break;
        }
        let pdu = Pdu::from_scoped_bytes(&self.scoped)?;
        pdu.validate(MessageType::Response, req_id)?;
        Ok(pdu)
    }

    pub fn get(&mut self, oid: &Oid) -> Result<Pdu<'_>> {
        self.request(snmp::MSG_GET, &[(oid, Value::Null)], 0, 0)
    }

    pub fn get_many(&mut self, oids: &[&Oid]) -> Result<Pdu<'_>> {
        let values: Vec<(&Oid, Value)> = oids.iter().map(|&oid| (oid, Value::Null)).collect();
        self.request(snmp::MSG_GET, &values, 0, 0)
    }

    pub fn getnext(&mut self, oid: &Oid) -> Result<Pdu<'_>> {
        self.request(snmp::MSG_GET_NEXT, &[(oid, Value::Null)], 0, 0)
    }

    pub fn getbulk(
        &mut self,
        oids: &[&Oid],
        non_repeaters: u32,
        max_repetitions: u32,
    ) -> Result<Pdu<'_>> {
        let values: Vec<(&Oid, Value)> = oids.iter().map(|&oid| (oid, Value::Null)).collect();
        self.request(snmp::MSG_GET_BULK, &values, non_repeaters, max_repetitions)
    }

    pub fn set(&mut self, values: &[(&Oid, Value)]) -> Result<Pdu<'_>> {
        self.request(snmp::MSG_SET, values, 0, 0)
    }
}
