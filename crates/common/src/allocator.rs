//! Address allocation
//!
//! Linear scans over the currently persisted membership record. Networks are
//! small and allocation is rare, so predictability wins over speed. Nothing
//! here touches the disk: callers persist the result inside a store update.

use crate::types::{MembershipDocument, Network};
use crate::{Error, Result};
use ipnetwork::Ipv4Network;
use std::collections::HashSet;
use std::net::Ipv4Addr;

/// Supernet every network block is carved from
pub const SUPERNET: Ipv4Addr = Ipv4Addr::new(10, 5, 0, 0);

/// Prefix length of a network block
pub const BLOCK_PREFIX: u8 = 24;

/// Highest usable host offset in a block (offset 255 is broadcast)
const MAX_HOST_OFFSET: u32 = 254;

/// Parse the host part of `10.5.0.1/32` or `10.5.0.1`
pub fn parse_host(address: &str) -> Option<Ipv4Addr> {
    address.split('/').next()?.trim().parse().ok()
}

/// Parse a network block, normalising it to its network address
pub fn parse_block(address: &str) -> Result<Ipv4Network> {
    let net: Ipv4Network = address.trim().parse()?;
    Ok(Ipv4Network::new(net.network(), net.prefix())?)
}

/// Third octets of the `10.5.K.0/24` blocks already owned by a network
fn used_block_octets(doc: &MembershipDocument) -> HashSet<u8> {
    doc.networks
        .iter()
        .filter_map(|n| parse_block(&n.address).ok())
        .map(|block| block.network().octets())
        .filter(|o| o[0] == SUPERNET.octets()[0] && o[1] == SUPERNET.octets()[1])
        .map(|o| o[2])
        .collect()
}

/// Lowest unused `/24` inside `10.5.0.0/16`
pub fn next_network_block(doc: &MembershipDocument) -> Result<Ipv4Network> {
    let used = used_block_octets(doc);
    let [a, b, _, _] = SUPERNET.octets();

    (0..=u8::MAX)
        .find(|octet| !used.contains(octet))
        .map(|octet| Ipv4Network::new(Ipv4Addr::new(a, b, octet, 0), BLOCK_PREFIX))
        .transpose()?
        .ok_or(Error::NoBlockAvailable)
}

/// Lowest unused host address inside `network`'s block, as a `/32`
///
/// Only peers of `network` are considered; other networks never influence
/// the result.
pub fn next_host_address(network: &Network) -> Result<Ipv4Network> {
    let block = parse_block(&network.address)?;
    let base = u32::from(block.network());

    let used: HashSet<u32> = network
        .peers
        .iter()
        .filter_map(|p| parse_host(&p.address))
        .filter(|ip| block.contains(*ip))
        .map(|ip| u32::from(ip) - base)
        .collect();

    let last = MAX_HOST_OFFSET.min(block.size().saturating_sub(2));

    (1..=last)
        .find(|offset| !used.contains(offset))
        .map(|offset| Ipv4Network::new(Ipv4Addr::from(base + offset), 32))
        .transpose()?
        .ok_or_else(|| Error::NoAddressAvailable {
            block: block.to_string(),
        })
}
