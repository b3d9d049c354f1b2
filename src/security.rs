use openssl::hash::MessageDigest;

use crate::{snmp, Error, Result};

/// Maximum msgUserName length (RFC 3414 §2.4).
pub(crate) const MAX_USER_NAME_LEN: usize = 32;

/// Security parameters of an SNMPv3 message.
///
/// USM (model 3) is the only implemented model; further models would
/// extend the variant.
#[derive(Debug, Clone)]
pub enum SecurityParameters {
    Usm(UsmParameters),
}

impl SecurityParameters {
    pub(crate) fn as_usm(&self) -> &UsmParameters {
        let SecurityParameters::Usm(usm) = self;
        usm
    }
}

/// Authentication protocol of an SNMPv3 user.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub enum AuthProtocol {
    #[default]
    NoAuth,
    /// HMAC-MD5-96 (RFC 3414 §6).
    Md5,
    /// HMAC-SHA-96 (RFC 3414 §7).
    Sha1,
}

impl AuthProtocol {
    pub(crate) fn digest(self) -> Result<MessageDigest> {
        match self {
            AuthProtocol::NoAuth => Err(Error::InvalidConfig),
            AuthProtocol::Md5 => Ok(MessageDigest::md5()),
            AuthProtocol::Sha1 => Ok(MessageDigest::sha1()),
        }
    }
}

/// Privacy protocol of an SNMPv3 user.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub enum PrivProtocol {
    #[default]
    NoPriv,
    /// DES-CBC (RFC 3414 §8).
    Des,
    /// AES-128-CFB (RFC 3826).
    Aes128,
}

/// USM user configuration plus the wire fields of msgSecurityParameters
/// (RFC 3414 §2.4). The passphrases are never transmitted.
#[derive(Debug, Clone, Default)]
pub struct UsmParameters {
    pub engine_id: Vec<u8>,
    pub engine_boots: u32,
    pub engine_time: u32,
    pub user_name: Vec<u8>,
    pub auth_params: Vec<u8>,
    pub privacy_params: Vec<u8>,
    pub auth_protocol: AuthProtocol,
    pub priv_protocol: PrivProtocol,
    pub auth_passphrase: Vec<u8>,
    pub priv_passphrase: Vec<u8>,
}

impl UsmParameters {
    pub fn new(user_name: &[u8]) -> Self {
        Self {
            user_name: user_name.to_vec(),
            ..Self::default()
        }
    }

    pub fn with_auth(mut self, protocol: AuthProtocol, passphrase: &[u8]) -> Self {
        self.auth_protocol = protocol;
        self.auth_passphrase = passphrase.to_vec();
        self
    }

    pub fn with_privacy(mut self, protocol: PrivProtocol, passphrase: &[u8]) -> Self {
        self.priv_protocol = protocol;
        self.priv_passphrase = passphrase.to_vec();
        self
    }

    /// Flag bits implied by the configured protocols.
    pub fn msg_flags(&self) -> u8 {
        let mut flags = 0;
        if self.auth_protocol != AuthProtocol::NoAuth {
            flags |= snmp::MSG_FLAG_AUTH;
        }
        if self.priv_protocol != PrivProtocol::NoPriv {
            flags |= snmp::MSG_FLAG_PRIV;
        }
        flags
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.priv_protocol != PrivProtocol::NoPriv && self.auth_protocol == AuthProtocol::NoAuth
        {
            // privacy without authentication is not a valid security level
            return Err(Error::InvalidConfig);
        }
        if self.auth_protocol != AuthProtocol::NoAuth && self.auth_passphrase.is_empty() {
            return Err(Error::InvalidConfig);
        }
        if self.priv_protocol != PrivProtocol::NoPriv && self.priv_passphrase.is_empty() {
            return Err(Error::InvalidConfig);
        }
        if self.user_name.len() > MAX_USER_NAME_LEN {
            return Err(Error::InvalidConfig);
        }
        Ok(())
    }
}

/// Priv without Auth (0b010) is the one illegal flag combination.
pub(crate) fn flags_are_legal(flags: u8) -> bool {
    flags & (snmp::MSG_FLAG_AUTH | snmp::MSG_FLAG_PRIV) != snmp::MSG_FLAG_PRIV
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priv_requires_auth() {
        let params = UsmParameters::new(b"user").with_privacy(PrivProtocol::Des, b"privpass");
        assert_eq!(params.validate(), Err(Error::InvalidConfig));

        let params = params.with_auth(AuthProtocol::Md5, b"authpass");
        assert_eq!(params.validate(), Ok(()));
        assert_eq!(
            params.msg_flags(),
            snmp::MSG_FLAG_AUTH | snmp::MSG_FLAG_PRIV
        );
    }

    #[test]
    fn empty_passphrase_is_rejected() {
        let params = UsmParameters::new(b"user").with_auth(AuthProtocol::Sha1, b"");
        assert_eq!(params.validate(), Err(Error::InvalidConfig));
    }

    #[test]
    fn oversized_user_name_is_rejected() {
        let params = UsmParameters::new(&[b'u'; 33]);
        assert_eq!(params.validate(), Err(Error::InvalidConfig));
    }

    #[test]
    fn flag_combinations() {
        for flags in [0x00, 0x01, 0x03, 0x04, 0x05, 0x07] {
            assert!(flags_are_legal(flags), "flags {:#04x}", flags);
        }
        assert!(!flags_are_legal(0x02));
        assert!(!flags_are_legal(0x06));
    }
}
