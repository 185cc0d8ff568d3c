//! Option negotiation (`SMFIC_OPTNEG`).
//!
//! The MTA offers a protocol version, the modification actions it allows and
//! the protocol steps it is able to skip. The filter answers with the subset
//! it wants.

use bytes::{Buf, BufMut, BytesMut};

use crate::error::{Error, Result};

/// Modification actions a filter may request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Actions(u32);

impl Actions {
    /// Creates an action set from its wire value.
    #[must_use]
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    /// Returns the wire value.
    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Returns true if every action in `other` is present.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Returns the actions present in both sets.
    #[must_use]
    pub const fn intersection(self, other: Self) -> Self {
        Self(self.0 & other.0)
    }

    /// Returns the actions present in either set.
    #[must_use]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }
}

// Action flags
impl Actions {
    /// SMFIF_ADDHDRS
    pub const ADD_HEADERS: Self = Self(0x01);
    /// SMFIF_CHGBODY
    pub const CHANGE_BODY: Self = Self(0x02);
    /// SMFIF_ADDRCPT
    pub const ADD_RECIPIENT: Self = Self(0x04);
    /// SMFIF_DELRCPT
    pub const DELETE_RECIPIENT: Self = Self(0x08);
    /// SMFIF_CHGHDRS
    pub const CHANGE_HEADERS: Self = Self(0x10);
    /// SMFIF_QUARANTINE
    pub const QUARANTINE: Self = Self(0x20);
}

/// Protocol steps the filter asks the MTA to skip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProtocolFlags(u32);

impl ProtocolFlags {
    /// Creates a flag set from its wire value.
    #[must_use]
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    /// Returns the wire value.
    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Returns true if every flag in `other` is present.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Returns the flags present in both sets.
    #[must_use]
    pub const fn intersection(self, other: Self) -> Self {
        Self(self.0 & other.0)
    }

    /// Returns the flags present in either set.
    #[must_use]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }
}

// Protocol flags
impl ProtocolFlags {
    /// SMFIP_NOCONNECT
    pub const NO_CONNECT: Self = Self(0x01);
    /// SMFIP_NOHELO
    pub const NO_HELO: Self = Self(0x02);
    /// SMFIP_NOMAIL
    pub const NO_MAIL: Self = Self(0x04);
    /// SMFIP_NORCPT
    pub const NO_RCPT: Self = Self(0x08);
    /// SMFIP_NOBODY
    pub const NO_BODY: Self = Self(0x10);
    /// SMFIP_NOHDRS
    pub const NO_HEADERS: Self = Self(0x20);
    /// SMFIP_NOEOH
    pub const NO_EOH: Self = Self(0x40);
    /// SMFIP_NOUNKNOWN
    pub const NO_UNKNOWN: Self = Self(0x100);
    /// SMFIP_NODATA
    pub const NO_DATA: Self = Self(0x200);
}

/// One side of an option negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Negotiation {
    /// Milter protocol version.
    pub version: u32,
    /// Modification actions.
    pub actions: Actions,
    /// Protocol steps to skip.
    pub protocol: ProtocolFlags,
}

impl Negotiation {
    /// Highest protocol version spoken.
    pub const MAX_VERSION: u32 = 6;

    /// Lowest protocol version accepted.
    pub const MIN_VERSION: u32 = 2;

    /// Size of the encoded payload.
    pub const ENCODED_LEN: usize = 12;

    /// Actions the filter needs: header edits and body replacement.
    pub const WANTED_ACTIONS: Actions = Actions::ADD_HEADERS
        .union(Actions::CHANGE_HEADERS)
        .union(Actions::CHANGE_BODY);

    /// Steps the filter has no use for.
    pub const WANTED_PROTOCOL: ProtocolFlags = ProtocolFlags::NO_HELO
        .union(ProtocolFlags::NO_UNKNOWN)
        .union(ProtocolFlags::NO_DATA);

    /// Decodes an `O` payload.
    ///
    /// # Errors
    ///
    /// Returns a protocol error if the payload is shorter than three words.
    pub fn decode(mut payload: &[u8]) -> Result<Self> {
        if payload.len() < Self::ENCODED_LEN {
            return Err(Error::protocol(format!(
                "option negotiation payload is {} bytes",
                payload.len()
            )));
        }
        Ok(Self {
            version: payload.get_u32(),
            actions: Actions::from_bits(payload.get_u32()),
            protocol: ProtocolFlags::from_bits(payload.get_u32()),
        })
    }

    /// Appends the encoded payload to `buf`.
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32(self.version);
        buf.put_u32(self.actions.bits());
        buf.put_u32(self.protocol.bits());
    }

    /// Builds the filter's answer to an MTA offer.
    ///
    /// # Errors
    ///
    /// Returns a protocol error if the MTA speaks a version older than
    /// [`Self::MIN_VERSION`].
    pub fn answer(offer: &Self) -> Result<Self> {
        if offer.version < Self::MIN_VERSION {
            return Err(Error::protocol(format!(
                "milter protocol version {} is not supported",
                offer.version
            )));
        }

        let actions = offer.actions.intersection(Self::WANTED_ACTIONS);
        if !actions.contains(Self::WANTED_ACTIONS) {
            tracing::warn!(
                offered = offer.actions.bits(),
                "MTA does not allow all header and body modifications"
            );
        }

        let answer = Self {
            version: offer.version.min(Self::MAX_VERSION),
            actions,
            protocol: offer.protocol.intersection(Self::WANTED_PROTOCOL),
        };
        tracing::debug!(
            version = answer.version,
            actions = answer.actions.bits(),
            protocol = answer.protocol.bits(),
            "negotiated options"
        );
        Ok(answer)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::redundant_clone, clippy::manual_string_new, clippy::needless_collect, clippy::unreadable_literal, clippy::used_underscore_items, clippy::similar_names)]
mod tests {
    use super::*;

    #[test]
    fn test_decode() {
        let payload = [0, 0, 0, 6, 0, 0, 0, 0x3f, 0, 0, 0x03, 0xff];
        let offer = Negotiation::decode(&payload).unwrap();
        assert_eq!(offer.version, 6);
        assert_eq!(offer.actions.bits(), 0x3f);
        assert_eq!(offer.protocol.bits(), 0x3ff);
        assert!(Negotiation::decode(&payload[..8]).is_err());
    }

    #[test]
    fn test_answer_masks_to_offer() {
        let offer = Negotiation {
            version: 6,
            actions: Actions::from_bits(0x1ff),
            protocol: ProtocolFlags::from_bits(0x1fffff),
        };
        let answer = Negotiation::answer(&offer).unwrap();
        assert_eq!(answer.version, 6);
        assert_eq!(answer.actions.bits(), 0x13);
        assert_eq!(answer.protocol.bits(), 0x302);
    }

    #[test]
    fn test_answer_old_mta() {
        let offer = Negotiation {
            version: 2,
            actions: Actions::ADD_HEADERS,
            protocol: ProtocolFlags::from_bits(0x7f),
        };
        let answer = Negotiation::answer(&offer).unwrap();
        assert_eq!(answer.version, 2);
        assert_eq!(answer.actions, Actions::ADD_HEADERS);
        assert_eq!(answer.protocol, ProtocolFlags::NO_HELO);
    }

    #[test]
    fn test_answer_newer_mta() {
        let offer = Negotiation {
            version: 8,
            actions: Actions::from_bits(0x3f),
            protocol: ProtocolFlags::default(),
        };
        assert_eq!(Negotiation::answer(&offer).unwrap().version, 6);
    }

    #[test]
    fn test_answer_rejects_ancient_mta() {
        let offer = Negotiation {
            version: 1,
            actions: Actions::default(),
            protocol: ProtocolFlags::default(),
        };
        assert!(Negotiation::answer(&offer).is_err());
    }

    #[test]
    fn test_encode() {
        let mut buf = BytesMut::new();
        Negotiation {
            version: 6,
            actions: Actions::from_bits(0x13),
            protocol: ProtocolFlags::from_bits(0x302),
        }
        .encode(&mut buf);
        assert_eq!(&buf[..], &[0, 0, 0, 6, 0, 0, 0, 0x13, 0, 0, 0x03, 0x02]);
    }
}
