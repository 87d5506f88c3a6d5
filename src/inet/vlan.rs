// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! IEEE 802.1Q VLAN tagging
//!
//! The tag control field packs 4 bits of PCP/DEI and a 12-bit VLAN id,
//! followed by the inner ethertype.

use crate::inet::ethernet::EtherType;
use core::fmt;
use zerocopy::{
    byteorder::{NetworkEndian, U16},
    AsBytes, FromBytes, FromZeroes, Ref, Unaligned,
};

#[derive(
    Clone, Copy, Default, PartialEq, Eq, Hash, AsBytes, FromBytes, FromZeroes, Unaligned,
)]
#[repr(C)]
pub struct Header {
    tag: U16<NetworkEndian>,
    ethertype: EtherType,
}

impl Header {
    pub const LEN: usize = core::mem::size_of::<Self>();

    const VID_MASK: u16 = 0x0fff;

    #[inline]
    pub fn new(pcp_dei: u8, vlan_id: u16, ethertype: EtherType) -> Self {
        let tag = (pcp_dei as u16) << 12 | (vlan_id & Self::VID_MASK);
        Self {
            tag: U16::new(tag),
            ethertype,
        }
    }

    /// Overlays a header on the start of `bytes`, returning the payload
    #[inline]
    pub fn decode(bytes: &[u8]) -> Option<(&Self, &[u8])> {
        let (header, payload) = Ref::<_, Self>::new_from_prefix(bytes)?;
        Some((header.into_ref(), payload))
    }

    /// Mutable variant of [`Self::decode`]
    #[inline]
    pub fn decode_mut(bytes: &mut [u8]) -> Option<(&mut Self, &mut [u8])> {
        let (header, payload) = Ref::<_, Self>::new_from_prefix(bytes)?;
        Some((header.into_mut(), payload))
    }

    /// Priority code point and drop eligible indicator, as one 4-bit field
    #[inline]
    pub fn pcp_dei(&self) -> u8 {
        (self.tag.get() >> 12) as u8
    }

    #[inline]
    pub fn set_pcp_dei(&mut self, pcp_dei: u8) -> &mut Self {
        let tag = (pcp_dei as u16) << 12 | (self.tag.get() & Self::VID_MASK);
        self.tag.set(tag);
        self
    }

    #[inline]
    pub fn vlan_id(&self) -> u16 {
        self.tag.get() & Self::VID_MASK
    }

    #[inline]
    pub fn set_vlan_id(&mut self, vlan_id: u16) -> &mut Self {
        let tag = (self.tag.get() & !Self::VID_MASK) | (vlan_id & Self::VID_MASK);
        self.tag.set(tag);
        self
    }

    /// Ethertype of the encapsulated payload
    #[inline]
    pub const fn ethertype(&self) -> &EtherType {
        &self.ethertype
    }

    #[inline]
    pub fn ethertype_mut(&mut self) -> &mut EtherType {
        &mut self.ethertype
    }
}

impl fmt::Debug for Header {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("vlan::Header")
            .field("pcp_dei", &self.pcp_dei())
            .field("vlan_id", &self.vlan_id())
            .field("ethertype", &self.ethertype)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bolero::check;

    #[test]
    fn layout_test() {
        assert_eq!(Header::LEN, 4);
    }

    /// Decode followed by encode returns the original bytes
    #[test]
    fn round_trip_test() {
        check!().for_each(|bytes: &[u8]| {
            if let Some((header, _payload)) = Header::decode(bytes) {
                assert_eq!(header.as_bytes(), &bytes[..Header::LEN]);
            } else {
                assert!(bytes.len() < Header::LEN);
            }
        });
    }

    /// The two tag fields never bleed into each other
    #[test]
    fn tag_fields_test() {
        check!()
            .with_type::<(u8, u16)>()
            .for_each(|&(pcp_dei, vlan_id)| {
                let mut header = Header::new(pcp_dei, vlan_id, EtherType::IPV4);

                assert_eq!(header.pcp_dei(), pcp_dei & 0x0f);
                assert_eq!(header.vlan_id(), vlan_id & 0x0fff);

                header.set_pcp_dei(0);
                assert_eq!(header.vlan_id(), vlan_id & 0x0fff);

                header.set_vlan_id(0);
                assert_eq!(header.pcp_dei(), 0);
                assert_eq!(header.ethertype(), &EtherType::IPV4);
            });
    }

    #[test]
    fn encode_test() {
        let header = Header::new(0b1011, 0x123, EtherType::IPV4);
        assert_eq!(header.as_bytes(), &[0xb1, 0x23, 0x08, 0x00]);
    }
}
