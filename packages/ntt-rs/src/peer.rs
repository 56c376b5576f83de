//! Peer and transceiver registration
//!
//! A manager knows one peer manager per remote chain, and each of its
//! transceivers independently knows one peer transceiver per remote chain.
//! The two registrations are unrelated: a route works only when both exist.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::bitmap::Bitmap;
use crate::error::{NttError, Result};
use crate::rate_limit::{RateLimitState, RateLimiter};
use crate::types::{ChainId, UniversalAddress};

// ============================================================================
// Manager peers
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Peer {
    pub chain: ChainId,
    pub manager_address: UniversalAddress,
    pub token_decimals: u8,
    /// Capacity for transfers arriving from this chain
    pub inbound_limit: RateLimitState,
}

#[derive(Debug, Clone, Default)]
pub struct PeerRegistry {
    peers: HashMap<ChainId, Peer>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn validate(chain: ChainId, address: &UniversalAddress, token_decimals: u8) -> Result<()> {
        if chain.0 == 0 {
            return Err(NttError::Config("peer chain id must be non-zero".to_string()));
        }
        if address.is_zero() {
            return Err(NttError::Config(format!(
                "peer address for chain {} must be non-zero",
                chain
            )));
        }
        if token_decimals == 0 {
            return Err(NttError::Config(format!(
                "peer token decimals for chain {} must be non-zero",
                chain
            )));
        }
        Ok(())
    }

    /// Register the peer manager for `chain`.
    ///
    /// Registering the same address and decimals again only applies the new
    /// inbound limit. A different address or decimals is a `PeerMismatch`:
    /// use [`PeerRegistry::update_peer`] to change them.
    pub fn register_peer(
        &mut self,
        limiter: &RateLimiter,
        chain: ChainId,
        manager_address: UniversalAddress,
        token_decimals: u8,
        inbound_limit: u64,
        now: u64,
    ) -> Result<&Peer> {
        Self::validate(chain, &manager_address, token_decimals)?;

        if let Some(existing) = self.peers.get(&chain) {
            if existing.manager_address != manager_address {
                return Err(NttError::PeerMismatch {
                    chain,
                    reason: format!(
                        "registered address {} differs from {}",
                        existing.manager_address, manager_address
                    ),
                });
            }
            if existing.token_decimals != token_decimals {
                return Err(NttError::PeerMismatch {
                    chain,
                    reason: format!(
                        "registered decimals {} differ from {}",
                        existing.token_decimals, token_decimals
                    ),
                });
            }
        }

        let peer = match self.peers.entry(chain) {
            std::collections::hash_map::Entry::Occupied(entry) => {
                let peer = entry.into_mut();
                peer.inbound_limit = limiter.set_limit(&peer.inbound_limit, now, inbound_limit);
                peer
            }
            std::collections::hash_map::Entry::Vacant(entry) => {
                info!(chain = %chain, address = %manager_address, token_decimals, "Registered peer");
                entry.insert(Peer {
                    chain,
                    manager_address,
                    token_decimals,
                    inbound_limit: RateLimitState::new(inbound_limit, now),
                })
            }
        };
        Ok(peer)
    }

    /// Overwrite an existing peer's address and decimals. The inbound limit
    /// state is kept.
    pub fn update_peer(
        &mut self,
        chain: ChainId,
        manager_address: UniversalAddress,
        token_decimals: u8,
    ) -> Result<&Peer> {
        Self::validate(chain, &manager_address, token_decimals)?;
        let peer = self
            .peers
            .get_mut(&chain)
            .ok_or(NttError::PeerNotRegistered { chain })?;
        info!(
            chain = %chain,
            old_address = %peer.manager_address,
            new_address = %manager_address,
            token_decimals,
            "Updated peer"
        );
        peer.manager_address = manager_address;
        peer.token_decimals = token_decimals;
        Ok(peer)
    }

    pub fn get(&self, chain: ChainId) -> Option<&Peer> {
        self.peers.get(&chain)
    }

    pub fn get_mut(&mut self, chain: ChainId) -> Option<&mut Peer> {
        self.peers.get_mut(&chain)
    }

    pub fn require(&self, chain: ChainId) -> Result<&Peer> {
        self.get(chain).ok_or(NttError::PeerNotRegistered { chain })
    }

    pub fn require_mut(&mut self, chain: ChainId) -> Result<&mut Peer> {
        self.peers
            .get_mut(&chain)
            .ok_or(NttError::PeerNotRegistered { chain })
    }

    pub fn chains(&self) -> impl Iterator<Item = ChainId> + '_ {
        self.peers.keys().copied()
    }
}

// ============================================================================
// Transceivers
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransceiverPeer {
    pub chain: ChainId,
    pub address: UniversalAddress,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisteredTransceiver {
    pub index: u8,
    pub address: UniversalAddress,
    peers: HashMap<ChainId, TransceiverPeer>,
}

impl RegisteredTransceiver {
    pub fn peer(&self, chain: ChainId) -> Option<&TransceiverPeer> {
        self.peers.get(&chain)
    }
}

/// Registered transceivers, indexed by registration order.
///
/// Indices are never reused: a deregistered transceiver keeps its slot and
/// is only cleared from the enabled bitmap, so votes it cast earlier stop
/// counting.
#[derive(Debug, Clone, Default)]
pub struct TransceiverRegistry {
    transceivers: Vec<RegisteredTransceiver>,
    enabled: Bitmap,
}

impl TransceiverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or re-enable) a transceiver and return its index.
    pub fn register(&mut self, address: UniversalAddress) -> Result<u8> {
        if address.is_zero() {
            return Err(NttError::Config(
                "transceiver address must be non-zero".to_string(),
            ));
        }
        if let Some(existing) = self.transceivers.iter().find(|t| t.address == address) {
            let index = existing.index;
            self.enabled.set(index, true)?;
            return Ok(index);
        }
        if self.transceivers.len() >= Bitmap::BITS as usize {
            return Err(NttError::TooManyTransceivers { max: Bitmap::BITS });
        }
        let index = self.transceivers.len() as u8;
        self.transceivers.push(RegisteredTransceiver {
            index,
            address,
            peers: HashMap::new(),
        });
        self.enabled.set(index, true)?;
        info!(transceiver = index, address = %address, "Registered transceiver");
        Ok(index)
    }

    pub fn deregister(&mut self, index: u8) -> Result<()> {
        if !self.is_enabled(index) {
            return Err(NttError::TransceiverNotRegistered { index });
        }
        self.enabled.set(index, false)?;
        info!(transceiver = index, "Deregistered transceiver");
        Ok(())
    }

    pub fn is_enabled(&self, index: u8) -> bool {
        (index as usize) < self.transceivers.len() && self.enabled.get(index).unwrap_or(false)
    }

    pub fn require_enabled(&self, index: u8) -> Result<&RegisteredTransceiver> {
        if !self.is_enabled(index) {
            return Err(NttError::TransceiverNotRegistered { index });
        }
        Ok(&self.transceivers[index as usize])
    }

    pub fn enabled_bitmap(&self) -> Bitmap {
        self.enabled
    }

    pub fn enabled_count(&self) -> u8 {
        self.enabled.count_enabled_votes(self.enabled)
    }

    pub fn get(&self, index: u8) -> Option<&RegisteredTransceiver> {
        self.transceivers.get(index as usize)
    }

    /// Same idempotency rule as manager peers.
    pub fn set_peer(&mut self, index: u8, chain: ChainId, address: UniversalAddress) -> Result<()> {
        if chain.0 == 0 || address.is_zero() {
            return Err(NttError::Config(format!(
                "transceiver peer for chain {} must have a non-zero chain and address",
                chain
            )));
        }
        self.require_enabled(index)?;
        let transceiver = &mut self.transceivers[index as usize];
        match transceiver.peers.get(&chain) {
            Some(existing) if existing.address == address => Ok(()),
            Some(existing) => Err(NttError::PeerMismatch {
                chain,
                reason: format!(
                    "transceiver {} already has peer {} registered",
                    index, existing.address
                ),
            }),
            None => {
                transceiver
                    .peers
                    .insert(chain, TransceiverPeer { chain, address });
                info!(transceiver = index, chain = %chain, address = %address, "Registered transceiver peer");
                Ok(())
            }
        }
    }

    pub fn get_peer(&self, index: u8, chain: ChainId) -> Option<&TransceiverPeer> {
        self.get(index).and_then(|t| t.peer(chain))
    }
}
