//! Source-address allowlisting for webhook ingress.
//!
//! When enabled, deliveries must originate from one of the configured CIDR
//! ranges (GitHub's hook ranges, plus any proxy ranges in front of the
//! service). Addresses outside every range are rejected with `403` before
//! signature verification runs.
//!
//! Ranges are plain `addr/prefix` strings; a bare address is treated as a
//! full-length prefix. IPv4-mapped IPv6 addresses are canonicalized before
//! matching so `::ffff:140.82.112.1` matches an IPv4 range.

use std::net::IpAddr;

/// One parsed CIDR range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CidrBlock {
    network: IpAddr,
    prefix_len: u8,
}

impl CidrBlock {
    /// Parses `addr/prefix` (or a bare address) into a block.
    ///
    /// Returns `None` for malformed input: bad address syntax, prefix longer
    /// than the address family allows, or a non-numeric prefix.
    pub fn parse(s: &str) -> Option<CidrBlock> {
        let (addr_part, prefix_part) = match s.split_once('/') {
            Some((a, p)) => (a, Some(p)),
            None => (s, None),
        };

        let network: IpAddr = addr_part.trim().parse().ok()?;
        let max_len = match network {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        };

        let prefix_len = match prefix_part {
            Some(p) => p.trim().parse::<u8>().ok()?,
            None => max_len,
        };
        if prefix_len > max_len {
            return None;
        }

        Some(CidrBlock {
            network,
            prefix_len,
        })
    }

    /// Returns true if `addr` falls inside this block.
    ///
    /// Address families never cross-match; callers should canonicalize
    /// v4-mapped v6 addresses first (see [`IpAllowlist::is_allowed`]).
    pub fn contains(&self, addr: IpAddr) -> bool {
        match (self.network, addr) {
            (IpAddr::V4(net), IpAddr::V4(ip)) => {
                let mask = prefix_mask_v4(self.prefix_len);
                u32::from(net) & mask == u32::from(ip) & mask
            }
            (IpAddr::V6(net), IpAddr::V6(ip)) => {
                let mask = prefix_mask_v6(self.prefix_len);
                u128::from(net) & mask == u128::from(ip) & mask
            }
            _ => false,
        }
    }
}

fn prefix_mask_v4(len: u8) -> u32 {
    match len {
        0 => 0,
        n => u32::MAX << (32 - u32::from(n)),
    }
}

fn prefix_mask_v6(len: u8) -> u128 {
    match len {
        0 => 0,
        n => u128::MAX << (128 - u32::from(n)),
    }
}

/// A set of allowed source ranges.
#[derive(Debug, Clone, Default)]
pub struct IpAllowlist {
    blocks: Vec<CidrBlock>,
}

impl IpAllowlist {
    /// Builds an allowlist from range strings, skipping malformed entries.
    ///
    /// Malformed entries are reported to the caller so startup can log them;
    /// an operator typo must not silently widen or narrow the list without
    /// a trace.
    pub fn from_ranges<S: AsRef<str>>(ranges: &[S]) -> (IpAllowlist, Vec<String>) {
        let mut blocks = Vec::with_capacity(ranges.len());
        let mut rejected = Vec::new();

        for range in ranges {
            match CidrBlock::parse(range.as_ref()) {
                Some(block) => blocks.push(block),
                None => rejected.push(range.as_ref().to_string()),
            }
        }

        (IpAllowlist { blocks }, rejected)
    }

    /// Returns true if `addr` is inside any configured range.
    ///
    /// An empty allowlist admits nothing: enabling allowlisting without
    /// ranges is a configuration error that fails closed.
    pub fn is_allowed(&self, addr: IpAddr) -> bool {
        let addr = addr.to_canonical();
        self.blocks.iter().any(|b| b.contains(addr))
    }

    /// Number of configured ranges.
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// Returns true if no ranges are configured.
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}
