// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Ethernet II framing
//!
//! <https://www.rfc-editor.org/rfc/rfc826>: 6-byte destination, 6-byte
//! source, 2-byte ethertype.

use core::fmt;
use zerocopy::{AsBytes, FromBytes, FromZeroes, Ref, Unaligned};

const MAC_LEN: usize = 48 / 8;

#[derive(
    Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, AsBytes, FromBytes, FromZeroes,
    Unaligned,
)]
#[repr(C)]
pub struct MacAddress {
    octets: [u8; MAC_LEN],
}

impl MacAddress {
    pub const UNSPECIFIED: Self = Self {
        octets: [0; MAC_LEN],
    };

    #[inline]
    pub const fn octets(&self) -> &[u8; MAC_LEN] {
        &self.octets
    }

    #[inline]
    pub fn is_unspecified(&self) -> bool {
        self.octets == [0; MAC_LEN]
    }
}

impl From<[u8; MAC_LEN]> for MacAddress {
    #[inline]
    fn from(octets: [u8; MAC_LEN]) -> Self {
        Self { octets }
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        let [a, b, c, d, e, f] = self.octets;
        write!(fmt, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{f:02x}")
    }
}

impl fmt::Debug for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_tuple("MacAddress")
            .field(&format_args!("{self}"))
            .finish()
    }
}

#[derive(
    Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, AsBytes, FromBytes, FromZeroes,
    Unaligned,
)]
#[repr(C)]
pub struct EtherType {
    id: [u8; 2],
}

macro_rules! ether_type {
    ($fun:ident, $cap:ident, $val:expr) => {
        pub const $cap: Self = Self { id: $val };

        #[inline]
        pub const fn $fun(self) -> bool {
            matches!(self, Self::$cap)
        }
    };
}

impl EtherType {
    // https://www.iana.org/assignments/ieee-802-numbers/ieee-802-numbers.xhtml
    ether_type!(is_ipv4, IPV4, [0x08, 0x00]);
    ether_type!(is_arp, ARP, [0x08, 0x06]);
    ether_type!(is_ipv6, IPV6, [0x86, 0xDD]);
    ether_type!(is_vlan, VLAN, [0x81, 0x00]);

    #[inline]
    pub const fn from_be_bytes(id: [u8; 2]) -> Self {
        Self { id }
    }

    #[inline]
    pub const fn to_be_bytes(self) -> [u8; 2] {
        self.id
    }
}

impl fmt::Display for EtherType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Self::IPV4 => "IPv4",
            Self::ARP => "ARP",
            Self::IPV6 => "IPv6",
            Self::VLAN => "VLAN",
            Self { id: [a, b] } => return write!(f, "[unknown 0x{a:02x}{b:02x}]"),
        }
        .fmt(f)
    }
}

impl fmt::Debug for EtherType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_tuple("EtherType")
            .field(&format_args!("{self}"))
            .finish()
    }
}

#[derive(
    Clone, Copy, Default, PartialEq, Eq, Hash, AsBytes, FromBytes, FromZeroes, Unaligned,
)]
#[repr(C)]
pub struct Header {
    destination: MacAddress,
    source: MacAddress,
    ethertype: EtherType,
}

impl Header {
    pub const LEN: usize = core::mem::size_of::<Self>();

    #[inline]
    pub fn new(destination: MacAddress, source: MacAddress, ethertype: EtherType) -> Self {
        Self {
            destination,
            source,
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

    /// Swaps the direction of the header
    #[inline]
    pub fn swap(&mut self) {
        core::mem::swap(&mut self.source, &mut self.destination)
    }

    #[inline]
    pub const fn destination(&self) -> &MacAddress {
        &self.destination
    }

    #[inline]
    pub fn destination_mut(&mut self) -> &mut MacAddress {
        &mut self.destination
    }

    #[inline]
    pub const fn source(&self) -> &MacAddress {
        &self.source
    }

    #[inline]
    pub fn source_mut(&mut self) -> &mut MacAddress {
        &mut self.source
    }

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
        f.debug_struct("ethernet::Header")
            .field("destination", &self.destination)
            .field("source", &self.source)
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
        assert_eq!(Header::LEN, 14);
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

    #[test]
    fn swap_test() {
        let mut bytes = [0u8; 14];
        bytes[..6].copy_from_slice(&[1; 6]);
        bytes[6..12].copy_from_slice(&[2; 6]);
        bytes[12..].copy_from_slice(&EtherType::IPV4.to_be_bytes());

        let (header, _) = Header::decode_mut(&mut bytes).unwrap();
        header.swap();

        assert_eq!(header.destination().octets(), &[2; 6]);
        assert_eq!(header.source().octets(), &[1; 6]);
        assert!(header.ethertype().is_ipv4());
    }

    #[test]
    fn display_test() {
        let mac = MacAddress::from([0xde, 0xad, 0xbe, 0xef, 0x00, 0x01]);
        assert_eq!(mac.to_string(), "de:ad:be:ef:00:01");
        assert_eq!(EtherType::IPV6.to_string(), "IPv6");
        assert_eq!(
            EtherType::from_be_bytes([0x12, 0x34]).to_string(),
            "[unknown 0x1234]"
        );
    }
}
