use std::sync::{
    atomic::{AtomicU32, AtomicU64, Ordering},
    Mutex, MutexGuard, PoisonError,
};

use openssl::rand::rand_bytes;

use crate::{
    keys::{self, LocalizedKeys},
    security::UsmParameters,
    Error, Result,
};

/// Authoritative engine parameters and scoped-PDU context defaults,
/// learned through discovery.
#[derive(Debug, Clone, Default)]
pub(crate) struct EngineParams {
    pub id: Vec<u8>,
    pub boots: u32,
    pub time: u32,
    pub context_engine_id: Vec<u8>,
    pub context_name: Vec<u8>,
}

/// Per-connection USM state, safe to share between tasks.
///
/// Message IDs and privacy salts advance atomically so concurrent builds
/// always observe unique (msg id, salt) tuples; engine parameters mutate
/// only under a short critical section. Localized keys live behind a
/// separate lock and are dropped whenever the engine ID changes.
#[derive(Debug)]
pub struct UsmState {
    engine: Mutex<EngineParams>,
    msg_id: AtomicU32,
    des_salt: AtomicU32,
    aes_salt: AtomicU64,
    key_cache: Mutex<Option<LocalizedKeys>>,
}

impl UsmState {
    /// Creates an unsynchronized state with all counters seeded from a
    /// cryptographic random source.
    pub fn new() -> Result<Self> {
        let mut msg_id = [0u8; 4];
        let mut des_salt = [0u8; 4];
        let mut aes_salt = [0u8; 8];
        rand_bytes(&mut msg_id)?;
        rand_bytes(&mut des_salt)?;
        rand_bytes(&mut aes_salt)?;
        Ok(Self {
            engine: Mutex::new(EngineParams::default()),
            msg_id: AtomicU32::new(u32::from_be_bytes(msg_id)),
            des_salt: AtomicU32::new(u32::from_be_bytes(des_salt)),
            aes_salt: AtomicU64::new(u64::from_be_bytes(aes_salt)),
            key_cache: Mutex::new(None),
        })
    }

    #[cfg(test)]
    pub(crate) fn with_counters(msg_id: u32, des_salt: u32, aes_salt: u64) -> Self {
        Self {
            engine: Mutex::new(EngineParams::default()),
            msg_id: AtomicU32::new(msg_id),
            des_salt: AtomicU32::new(des_salt),
            aes_salt: AtomicU64::new(aes_salt),
            key_cache: Mutex::new(None),
        }
    }

    fn engine_lock(&self) -> MutexGuard<'_, EngineParams> {
        self.engine.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn next_msg_id(&self) -> u32 {
        // wraps; outstanding IDs are tiny compared to the counter space
        self.msg_id.fetch_add(1, Ordering::Relaxed).wrapping_add(1)
    }

    pub(crate) fn next_des_salt(&self) -> Result<u32> {
        let previous = self.des_salt.fetch_add(1, Ordering::Relaxed);
        if previous == u32::MAX {
            return Err(Error::SaltExhausted);
        }
        Ok(previous.wrapping_add(1))
    }

    pub(crate) fn next_aes_salt(&self) -> Result<u64> {
        let previous = self.aes_salt.fetch_add(1, Ordering::Relaxed);
        if previous == u64::MAX {
            return Err(Error::SaltExhausted);
        }
        Ok(previous.wrapping_add(1))
    }

    pub(crate) fn engine_snapshot(&self) -> EngineParams {
        self.engine_lock().clone()
    }

    /// `true` once an authoritative engine ID is known.
    pub fn is_synchronized(&self) -> bool {
        !self.engine_lock().id.is_empty()
    }

    pub fn engine_id(&self) -> Vec<u8> {
        self.engine_lock().id.clone()
    }

    pub fn engine_boots_time(&self) -> (u32, u32) {
        let engine = self.engine_lock();
        (engine.boots, engine.time)
    }

    /// Stores authoritative parameters. A changed engine ID invalidates
    /// the key cache and re-defaults an unset context engine ID.
    pub fn store_engine(&self, engine_id: &[u8], boots: u32, time: u32) {
        let mut engine = self.engine_lock();
        if engine.id != engine_id {
            engine.id = engine_id.to_vec();
            self.key_cache_invalidate();
        }
        engine.boots = boots;
        engine.time = time;
        if engine.context_engine_id.is_empty() {
            engine.context_engine_id = engine_id.to_vec();
        }
    }

    pub(crate) fn update_times(&self, boots: u32, time: u32) {
        let mut engine = self.engine_lock();
        engine.boots = boots;
        engine.time = time;
    }

    /// Overrides the context addressed by outgoing scoped PDUs.
    pub fn set_context(&self, context_engine_id: &[u8], context_name: &[u8]) {
        let mut engine = self.engine_lock();
        engine.context_engine_id = context_engine_id.to_vec();
        engine.context_name = context_name.to_vec();
    }

    /// Drops cached localized keys; the next build or parse re-derives them.
    pub fn key_cache_invalidate(&self) {
        *self
            .key_cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Localized keys for `usm` at the current engine, derived lazily and
    /// cached until the engine ID changes.
    pub(crate) fn keys(&self, usm: &UsmParameters) -> Result<LocalizedKeys> {
        let engine_id = self.engine_lock().id.clone();
        if engine_id.is_empty() {
            return Err(Error::DiscoveryFailed);
        }
        let mut cache = self
            .key_cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(cached) = cache.as_ref() {
            if cached.engine_id == engine_id {
                return Ok(cached.clone());
            }
        }
        let auth_key = keys::localize(usm.auth_protocol, &usm.auth_passphrase, &engine_id)?;
        let priv_key = keys::localize_priv(
            usm.auth_protocol,
            usm.priv_protocol,
            &usm.priv_passphrase,
            &engine_id,
        )?;
        let derived = LocalizedKeys {
            engine_id,
            auth_key,
            priv_key,
        };
        *cache = Some(derived.clone());
        Ok(derived)
    }
}
