//! Pod identifiers.
//!
//! A pod is addressed by a 32-bit radio address assigned at pairing and
//! carries two factory identifiers, the lot number and the TID, which seed
//! the nonce generator.

use std::fmt::Display;

use serde::{Deserialize, Serialize};

/// Radio address assigned to a pod during pairing.
///
/// Immutable for the life of the pod. Every non-setup response must carry
/// this address; a mismatch means crosstalk with another pod and is a hard
/// error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PodAddress(u32);

impl PodAddress {
    pub fn new(address: u32) -> Self {
        Self(address)
    }

    pub fn as_u32(self) -> u32 {
        self.0
    }
}

impl Display for PodAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:08X}", self.0)
    }
}

impl From<u32> for PodAddress {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl From<PodAddress> for u32 {
    fn from(address: PodAddress) -> Self {
        address.0
    }
}

/// Factory lot number reported by the pod.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Lot(u32);

impl Lot {
    pub fn new(lot: u32) -> Self {
        Self(lot)
    }

    pub fn as_u32(self) -> u32 {
        self.0
    }

    /// Low 16 bits, used by the nonce resync seed computation.
    pub fn low_word(self) -> u32 {
        self.0 & 0xFFFF
    }
}

impl Display for Lot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for Lot {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

/// Factory TID (serial) reported by the pod.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tid(u32);

impl Tid {
    pub fn new(tid: u32) -> Self {
        Self(tid)
    }

    pub fn as_u32(self) -> u32 {
        self.0
    }

    /// Low 16 bits, used by the nonce resync seed computation.
    pub fn low_word(self) -> u32 {
        self.0 & 0xFFFF
    }
}

impl Display for Tid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for Tid {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_displays_as_hex() {
        assert_eq!(PodAddress::new(0x1F0E_C0DE).to_string(), "1F0EC0DE");
    }

    #[test]
    fn lot_and_tid_low_words() {
        assert_eq!(Lot::new(0x0012_AB34).low_word(), 0xAB34);
        assert_eq!(Tid::new(0xFFFF_0001).low_word(), 0x0001);
    }
}
