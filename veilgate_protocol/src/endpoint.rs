// Overlay endpoint addresses.
//
// An `Endpoint` is the 16 raw bytes of an IPv6 address on the virtual
// overlay. Peer tables hold `Option<Endpoint>` (an absent slot means "no
// peer"), but the all-zero form stays reserved on the wire, where a
// serialised endpoint is always exactly 16 bytes.

use std::fmt;
use std::net::Ipv6Addr;

use crate::error::ProtocolError;

/// Byte width of a serialised endpoint.
pub const ENDPOINT_LEN: usize = 16;

/// 16-byte IPv6 address identifying a participant on the overlay.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Endpoint([u8; ENDPOINT_LEN]);

impl Endpoint {
    /// The reserved all-zero wire form.
    pub const UNSPECIFIED: Endpoint = Endpoint([0; ENDPOINT_LEN]);

    pub fn from_bytes(octets: [u8; ENDPOINT_LEN]) -> Self {
        Endpoint(octets)
    }

    /// Parse a textual IPv6 address. Tolerant: anything that is not a valid
    /// IPv6 literal (including IPv4 literals) yields `None`.
    pub fn parse(text: &str) -> Option<Endpoint> {
        text.parse::<Ipv6Addr>().ok().map(Endpoint::from)
    }

    pub fn octets(&self) -> [u8; ENDPOINT_LEN] {
        self.0
    }

    pub fn is_unspecified(&self) -> bool {
        *self == Self::UNSPECIFIED
    }

    pub fn to_ipv6(&self) -> Ipv6Addr {
        Ipv6Addr::from(self.0)
    }

    /// Wire form: the 16 raw address bytes.
    pub fn serialize(&self) -> Vec<u8> {
        self.0.to_vec()
    }

    /// Inverse of [`serialize`](Self::serialize). Any buffer that is not
    /// exactly 16 bytes is rejected.
    pub fn deserialize(buf: &[u8]) -> Result<Endpoint, ProtocolError> {
        let octets: [u8; ENDPOINT_LEN] = buf
            .try_into()
            .map_err(|_| ProtocolError::EndpointLength(buf.len()))?;
        Ok(Endpoint(octets))
    }
}

impl From<Ipv6Addr> for Endpoint {
    fn from(addr: Ipv6Addr) -> Self {
        Endpoint(addr.octets())
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.to_ipv6().fmt(f)
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Endpoint({})", self.to_ipv6())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_valid_ipv6() {
        let ep = Endpoint::parse("fd80:56c2:e21c::1").unwrap();
        assert_eq!(ep.octets()[0], 0xfd);
        assert_eq!(ep.octets()[15], 1);
    }

    #[test]
    fn parse_rejects_garbage_and_ipv4() {
        assert!(Endpoint::parse("not an address").is_none());
        assert!(Endpoint::parse("192.168.0.1").is_none());
        assert!(Endpoint::parse("").is_none());
    }

    #[test]
    fn serialize_roundtrip() {
        let octets: [u8; ENDPOINT_LEN] = core::array::from_fn(|i| i as u8);
        let ep = Endpoint::from_bytes(octets);
        let wire = ep.serialize();
        assert_eq!(wire.len(), ENDPOINT_LEN);
        assert_eq!(Endpoint::deserialize(&wire).unwrap(), ep);
    }

    #[test]
    fn deserialize_rejects_wrong_length() {
        assert!(matches!(
            Endpoint::deserialize(&[0u8; 15]),
            Err(ProtocolError::EndpointLength(15))
        ));
        assert!(matches!(
            Endpoint::deserialize(&[0u8; 17]),
            Err(ProtocolError::EndpointLength(17))
        ));
        assert!(matches!(
            Endpoint::deserialize(&[]),
            Err(ProtocolError::EndpointLength(0))
        ));
    }

    #[test]
    fn ordering_is_lexicographic() {
        let lo = Endpoint::from_bytes([0; 16]);
        let mut hi_octets = [0u8; 16];
        hi_octets[0] = 1;
        let hi = Endpoint::from_bytes(hi_octets);
        assert!(lo < hi);
        assert_eq!(lo, Endpoint::UNSPECIFIED);
        assert!(lo.is_unspecified());
        assert!(!hi.is_unspecified());
    }
}
