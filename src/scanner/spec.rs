//! Sweep specifications and their expansion into scan units
//!
//! A subnet definition is up to four dot-separated octet definitions. Each
//! one is a single value (`134`), an inclusive range (`132:134`) or a list
//! (`132,134`). Octets left out expand to the sweep's `start_ip..=end_ip`,
//! so `10.1.134` covers `10.1.134.1` to `10.1.134.254` with the default range.

use crate::config::SweepConfig;
use crate::network::ScanTarget;
use crate::SweepError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::Ipv4Addr;

/// Subnets × host range × ports to probe in one invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepSpec {
    pub subnets: Vec<String>,
    pub start_ip: u8,
    pub end_ip: u8,
    pub ports: Vec<u16>,
}

/// One fully resolved endpoint, tagged with its position in expansion order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScanUnit {
    pub index: usize,
    pub target: ScanTarget,
}

impl SweepSpec {
    pub fn new(subnets: Vec<String>, start_ip: u8, end_ip: u8, ports: Vec<u16>) -> Self {
        Self {
            subnets,
            start_ip,
            end_ip,
            ports,
        }
    }

    /// Build a spec from subnets, taking range and ports from the config
    pub fn from_config(subnets: Vec<String>, config: &SweepConfig) -> Self {
        Self::new(subnets, config.start_ip, config.end_ip, config.ports.clone())
    }

    /// Reject specs that cannot be swept, before any network activity
    pub fn validate(&self) -> crate::Result<()> {
        self.parse_subnets().map(|_| ())
    }

    /// Upper bound on the number of units, before duplicates are dropped
    pub fn unit_count(&self) -> crate::Result<usize> {
        let subnets = self.parse_subnets()?;
        Ok(subnets.iter().map(SubnetDefinition::len).sum::<usize>() * self.ports.len())
    }

    /// Expand into units: subnet (input order) × port (input order) × address (ascending)
    ///
    /// A repeated `(ip, port)` pair keeps only its first occurrence.
    pub fn expand(&self) -> crate::Result<Vec<ScanUnit>> {
        let subnets = self.parse_subnets()?;

        let mut seen = HashSet::new();
        let mut units = Vec::new();
        for subnet in &subnets {
            let addresses = subnet.addresses();
            for &port in &self.ports {
                for &ip in &addresses {
                    let target = ScanTarget::new(ip, port)?;
                    if seen.insert(target) {
                        units.push(ScanUnit {
                            index: units.len(),
                            target,
                        });
                    }
                }
            }
        }

        Ok(units)
    }

    fn parse_subnets(&self) -> crate::Result<Vec<SubnetDefinition>> {
        if self.subnets.is_empty() {
            return Err(SweepError::InvalidSpec("At least one subnet is required".to_string()));
        }
        if self.ports.is_empty() {
            return Err(SweepError::InvalidSpec("At least one port is required".to_string()));
        }
        if self.ports.contains(&0) {
            return Err(SweepError::InvalidSpec("Port 0 is not a valid port".to_string()));
        }
        if self.end_ip < self.start_ip {
            return Err(SweepError::InvalidSpec(format!(
                "end_ip {} is less than start_ip {}",
                self.end_ip, self.start_ip
            )));
        }

        self.subnets
            .iter()
            .map(|def| SubnetDefinition::parse(def, self.start_ip, self.end_ip))
            .collect()
    }
}

/// Parsed subnet definition: the candidate values of each octet, ascending
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubnetDefinition {
    octets: [Vec<u8>; 4],
}

impl SubnetDefinition {
    pub fn parse(def: &str, start_ip: u8, end_ip: u8) -> crate::Result<Self> {
        let def = def.trim();
        let parts: Vec<&str> = def.split('.').collect();
        if def.is_empty() || parts.len() > 4 {
            return Err(SweepError::InvalidSpec(format!(
                "Invalid subnet definition '{}': expected 1 to 4 octets",
                def
            )));
        }

        let mut octets: [Vec<u8>; 4] = Default::default();
        for (index, values) in octets.iter_mut().enumerate() {
            *values = match parts.get(index) {
                Some(part) => parse_octet(part, def)?,
                None => (start_ip..=end_ip).collect(),
            };
        }

        Ok(Self { octets })
    }

    /// Number of addresses this definition covers
    pub fn len(&self) -> usize {
        self.octets.iter().map(Vec::len).product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All covered addresses in ascending order
    pub fn addresses(&self) -> Vec<Ipv4Addr> {
        let mut out = Vec::with_capacity(self.len());
        for &a in &self.octets[0] {
            for &b in &self.octets[1] {
                for &c in &self.octets[2] {
                    for &d in &self.octets[3] {
                        out.push(Ipv4Addr::new(a, b, c, d));
                    }
                }
            }
        }
        out
    }
}

fn parse_octet(octet: &str, def: &str) -> crate::Result<Vec<u8>> {
    let octet = octet.trim();
    let invalid = |reason: String| {
        SweepError::InvalidSpec(format!("Invalid octet '{}' in '{}': {}", octet, def, reason))
    };
    let value = |s: &str| -> crate::Result<u8> {
        s.trim()
            .parse::<u8>()
            .map_err(|_| invalid(format!("'{}' is not a value in 0-255", s.trim())))
    };

    let mut values = if let Some((min, max)) = octet.split_once(':') {
        if max.contains(':') {
            return Err(invalid("range has too many components".to_string()));
        }
        let (min, max) = (value(min)?, value(max)?);
        if max < min {
            return Err(invalid(format!("{} must not be less than {}", max, min)));
        }
        (min..=max).collect::<Vec<u8>>()
    } else if octet.contains(',') {
        octet.split(',').map(value).collect::<crate::Result<Vec<u8>>>()?
    } else {
        vec![value(octet)?]
    };

    values.sort_unstable();
    values.dedup();
    Ok(values)
}
