//! Range-table snapshot format.
//!
//! A plain-text table of `network,CC` lines, compiled into sorted,
//! non-overlapping interval vectors (one per address family). Lookups are a
//! binary search over the intervals.
//!
//! ```text
//! # version: 2024-06-01
//! network,country_iso_code
//! 1.0.0.0/24,AU
//! 2001:db8::/32,DE
//! 198.51.100.7,US
//! ```

use anyhow::{Context, Result};
use ipnet::IpNet;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use super::types::CountryCode;

#[derive(Debug, Clone)]
struct Interval<T> {
    start: T,
    end: T,
    country: CountryCode,
}

/// Country table compiled from `network,CC` lines.
#[derive(Debug, Clone, Default)]
pub struct RangeTable {
    v4: Vec<Interval<u32>>,
    v6: Vec<Interval<u128>>,
    version: Option<String>,
}

impl RangeTable {
    /// Parses and compiles a table.
    ///
    /// Fails on unparsable lines, invalid country codes and overlapping
    /// ranges, so a corrupted download never passes the trial load.
    pub fn parse(text: &str) -> Result<Self> {
        let mut table = RangeTable::default();

        for (index, raw_line) in text.lines().enumerate() {
            let line_no = index + 1;
            let line = raw_line.trim();
            if line.is_empty() {
                continue;
            }
            if let Some(comment) = line.strip_prefix('#') {
                if let Some(version) = comment.trim().strip_prefix("version:") {
                    table.version = Some(version.trim().to_string());
                }
                continue;
            }

            let (network, country) = line
                .split_once(',')
                .with_context(|| format!("line {}: expected 'network,country'", line_no))?;
            let network = network.trim();
            if network.eq_ignore_ascii_case("network") {
                continue;
            }

            let net = parse_network(network)
                .with_context(|| format!("line {}: invalid network '{}'", line_no, network))?;
            let country = CountryCode::parse(country)
                .map_err(|e| anyhow::anyhow!("line {}: {}", line_no, e))?;

            match net {
                IpNet::V4(v4) => table.v4.push(Interval {
                    start: u32::from(v4.network()),
                    end: u32::from(v4.broadcast()),
                    country,
                }),
                IpNet::V6(v6) => table.v6.push(Interval {
                    start: u128::from(v6.network()),
                    end: u128::from(v6.broadcast()),
                    country,
                }),
            }
        }

        sort_and_check(&mut table.v4, "IPv4")?;
        sort_and_check(&mut table.v6, "IPv6")?;

        if table.is_empty() {
            return Err(anyhow::anyhow!("range table contains no entries"));
        }
        Ok(table)
    }

    /// Looks up the country for an address. IPv4-mapped IPv6 addresses are
    /// looked up in the IPv4 table.
    pub fn lookup(&self, ip: IpAddr) -> Option<&CountryCode> {
        match ip {
            IpAddr::V4(v4) => find(&self.v4, u32::from(v4)),
            IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
                Some(v4) => find(&self.v4, u32::from(v4)),
                None => find(&self.v6, u128::from(v6)),
            },
        }
    }

    /// Number of ranges in the table.
    pub fn len(&self) -> usize {
        self.v4.len() + self.v6.len()
    }

    /// Whether the table has no ranges.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Version declared by a `# version:` comment, if any.
    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }
}

fn parse_network(raw: &str) -> Result<IpNet> {
    if raw.contains('/') {
        return Ok(raw.parse::<IpNet>()?);
    }
    let ip: IpAddr = raw.parse()?;
    let prefix = if ip.is_ipv4() { 32 } else { 128 };
    Ok(IpNet::new(ip, prefix)?)
}

fn sort_and_check<T: Ord + Copy + AddrDisplay>(
    intervals: &mut [Interval<T>],
    family: &str,
) -> Result<()> {
    intervals.sort_by_key(|iv| iv.start);
    for pair in intervals.windows(2) {
        if pair[1].start <= pair[0].end {
            return Err(anyhow::anyhow!(
                "overlapping {} ranges: {}-{} and {}-{}",
                family,
                pair[0].start.addr(),
                pair[0].end.addr(),
                pair[1].start.addr(),
                pair[1].end.addr()
            ));
        }
    }
    Ok(())
}

fn find<T: Ord + Copy>(intervals: &[Interval<T>], addr: T) -> Option<&CountryCode> {
    let idx = intervals.partition_point(|iv| iv.start <= addr);
    if idx == 0 {
        return None;
    }
    let candidate = &intervals[idx - 1];
    (addr <= candidate.end).then_some(&candidate.country)
}

/// Renders the numeric form of an interval bound as an address.
trait AddrDisplay {
    fn addr(&self) -> IpAddr;
}

impl AddrDisplay for u32 {
    fn addr(&self) -> IpAddr {
        IpAddr::V4(Ipv4Addr::from(*self))
    }
}

impl AddrDisplay for u128 {
    fn addr(&self) -> IpAddr {
        IpAddr::V6(Ipv6Addr::from(*self))
    }
}
