//! Facility topology: integer-id addressing for racks, servers, and CRAC
//! zones.
//!
//! Racks, servers, and GPUs live in contiguous collections indexed by
//! integer id; cross-references are held as ids, never as pointers. The
//! canonical string forms (`rack-3`, `rack-3-srv-1`, `crac-0`) are the wire
//! representation used in snapshots, failure targets, and actions.

use crate::config::FacilitySection;
use crate::error::SimError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A server address: rack index plus server index within the rack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServerId {
    pub rack: usize,
    pub server: usize,
}

impl ServerId {
    pub fn new(rack: usize, server: usize) -> Self {
        Self { rack, server }
    }

    /// Flat index into the facility-wide server arena.
    pub fn index(&self, facility: &FacilitySection) -> usize {
        self.rack * facility.servers_per_rack + self.server
    }

    /// Inverse of [`index`](Self::index).
    pub fn from_index(index: usize, facility: &FacilitySection) -> Self {
        Self {
            rack: index / facility.servers_per_rack,
            server: index % facility.servers_per_rack,
        }
    }
}

impl fmt::Display for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rack-{}-srv-{}", self.rack, self.server)
    }
}

impl FromStr for ServerId {
    type Err = SimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split('-').collect();
        if parts.len() == 4 && parts[0] == "rack" && parts[2] == "srv" {
            let rack = parts[1].parse().map_err(|_| bad_id(s))?;
            let server = parts[3].parse().map_err(|_| bad_id(s))?;
            return Ok(Self { rack, server });
        }
        Err(bad_id(s))
    }
}

impl Serialize for ServerId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ServerId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

fn bad_id(s: &str) -> SimError {
    SimError::InvalidArgument(format!("malformed server id {:?}", s))
}

/// CRAC zone serving a rack. Zoning is contiguous: with 8 racks and 2
/// units, racks 0–3 map to crac-0 and racks 4–7 to crac-1.
pub fn zone_of_rack(rack: usize, num_racks: usize, crac_units: usize) -> usize {
    (rack * crac_units / num_racks).min(crac_units - 1)
}

/// Racks served by a CRAC zone, in index order.
pub fn racks_in_zone(zone: usize, num_racks: usize, crac_units: usize) -> Vec<usize> {
    (0..num_racks)
        .filter(|&r| zone_of_rack(r, num_racks, crac_units) == zone)
        .collect()
}

/// Parsed failure target: a rack, a CRAC unit, or a single server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureTarget {
    Rack(usize),
    Crac(usize),
    Server(ServerId),
}

impl FailureTarget {
    /// Parse a target string, validating ids against the facility layout.
    pub fn parse(s: &str, facility: &FacilitySection, crac_units: usize) -> Result<Self, SimError> {
        let invalid = || SimError::InvalidTarget(s.to_string());

        if let Some(rest) = s.strip_prefix("crac-") {
            let unit: usize = rest.parse().map_err(|_| invalid())?;
            if unit >= crac_units {
                return Err(invalid());
            }
            return Ok(FailureTarget::Crac(unit));
        }
        if let Ok(server) = s.parse::<ServerId>() {
            if server.rack >= facility.num_racks || server.server >= facility.servers_per_rack {
                return Err(invalid());
            }
            return Ok(FailureTarget::Server(server));
        }
        if let Some(rest) = s.strip_prefix("rack-") {
            let rack: usize = rest.parse().map_err(|_| invalid())?;
            if rack >= facility.num_racks {
                return Err(invalid());
            }
            return Ok(FailureTarget::Rack(rack));
        }
        Err(invalid())
    }
}

impl fmt::Display for FailureTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureTarget::Rack(r) => write!(f, "rack-{}", r),
            FailureTarget::Crac(u) => write!(f, "crac-{}", u),
            FailureTarget::Server(s) => write!(f, "{}", s),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn facility() -> FacilitySection {
        FacilitySection::default()
    }

    #[test]
    fn test_server_id_round_trip() {
        let id: ServerId = "rack-3-srv-1".parse().unwrap();
        assert_eq!(id, ServerId::new(3, 1));
        assert_eq!(id.to_string(), "rack-3-srv-1");
    }

    #[test]
    fn test_server_id_index_round_trip() {
        let facility = facility();
        for index in 0..facility.num_servers() {
            let id = ServerId::from_index(index, &facility);
            assert_eq!(id.index(&facility), index);
        }
    }

    #[test]
    fn test_malformed_server_id() {
        assert!("rack-x-srv-1".parse::<ServerId>().is_err());
        assert!("srv-1".parse::<ServerId>().is_err());
        assert!("rack-1-gpu-0".parse::<ServerId>().is_err());
    }

    #[test]
    fn test_zone_mapping_contiguous_halves() {
        for rack in 0..4 {
            assert_eq!(zone_of_rack(rack, 8, 2), 0);
        }
        for rack in 4..8 {
            assert_eq!(zone_of_rack(rack, 8, 2), 1);
        }
        assert_eq!(racks_in_zone(1, 8, 2), vec![4, 5, 6, 7]);
    }

    #[test]
    fn test_zone_mapping_uneven() {
        // 5 racks over 2 units: the extra rack lands in the upper zone.
        let zones: Vec<usize> = (0..5).map(|r| zone_of_rack(r, 5, 2)).collect();
        assert_eq!(zones, vec![0, 0, 0, 1, 1]);
    }

    #[test]
    fn test_failure_target_parsing() {
        let f = facility();
        assert_eq!(
            FailureTarget::parse("rack-2", &f, 2).unwrap(),
            FailureTarget::Rack(2)
        );
        assert_eq!(
            FailureTarget::parse("crac-1", &f, 2).unwrap(),
            FailureTarget::Crac(1)
        );
        assert_eq!(
            FailureTarget::parse("rack-0-srv-3", &f, 2).unwrap(),
            FailureTarget::Server(ServerId::new(0, 3))
        );
    }

    #[test]
    fn test_failure_target_out_of_range() {
        let f = facility();
        assert!(FailureTarget::parse("rack-8", &f, 2).is_err());
        assert!(FailureTarget::parse("crac-2", &f, 2).is_err());
        assert!(FailureTarget::parse("rack-0-srv-4", &f, 2).is_err());
        assert!(FailureTarget::parse("pdu-0", &f, 2).is_err());
    }
}
