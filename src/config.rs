use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::path::Path;

use crate::error::{Error, Result};
use crate::packet::MacAddr;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server_ip: Ipv4Addr,
    pub subnet_mask: Ipv4Addr,
    pub pool_start: Ipv4Addr,
    pub pool_end: Ipv4Addr,
    pub gateway: Option<Ipv4Addr>,
    pub dns_servers: Vec<Ipv4Addr>,
    pub lease_duration_seconds: u32,
    pub reservations: Vec<StaticReservation>,
}

/// A fixed MAC-to-IP binding. The address may sit outside the dynamic
/// pool; either way it is only ever handed to this hardware address.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StaticReservation {
    pub mac_address: String,
    pub ip_address: Ipv4Addr,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_ip: Ipv4Addr::new(192, 168, 0, 1),
            subnet_mask: Ipv4Addr::new(255, 255, 255, 0),
            pool_start: Ipv4Addr::new(192, 168, 0, 100),
            pool_end: Ipv4Addr::new(192, 168, 0, 200),
            gateway: Some(Ipv4Addr::new(192, 168, 0, 1)),
            dns_servers: vec![Ipv4Addr::new(8, 8, 8, 8)],
            lease_duration_seconds: 86400,
            reservations: Vec::new(),
        }
    }
}

impl Config {
    pub fn load_or_create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Config = serde_json::from_str(&content)?;
            config.validate()?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save(path)?;
            Ok(config)
        }
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let start = u32::from(self.pool_start);
        let end = u32::from(self.pool_end);

        if start > end {
            return Err(Error::InvalidConfig(
                "pool_start must be less than or equal to pool_end".to_string(),
            ));
        }

        let server = u32::from(self.server_ip);
        if server >= start && server <= end {
            return Err(Error::InvalidConfig(
                "server_ip must not be within the pool range".to_string(),
            ));
        }

        if let Some(gateway) = self.gateway {
            let gw = u32::from(gateway);
            if gw >= start && gw <= end {
                return Err(Error::InvalidConfig(
                    "gateway must not be within the pool range".to_string(),
                ));
            }
        }

        if self.lease_duration_seconds == 0 {
            return Err(Error::InvalidConfig(
                "lease_duration_seconds must be greater than 0".to_string(),
            ));
        }

        for reservation in &self.reservations {
            reservation.mac_address.parse::<MacAddr>().map_err(|_| {
                Error::InvalidConfig(format!(
                    "unparseable reservation MAC address: {}",
                    reservation.mac_address
                ))
            })?;
            if reservation.ip_address == self.server_ip {
                return Err(Error::InvalidConfig(format!(
                    "reservation for MAC {} collides with server_ip",
                    reservation.mac_address
                )));
            }
        }

        Ok(())
    }

    pub fn ip_in_pool(&self, ip: Ipv4Addr) -> bool {
        let addr = u32::from(ip);
        let start = u32::from(self.pool_start);
        let end = u32::from(self.pool_end);
        addr >= start && addr <= end
    }

    pub fn pool_size(&self) -> u32 {
        u32::from(self.pool_end) - u32::from(self.pool_start) + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_pool_start_greater_than_end() {
        let config = Config {
            pool_start: Ipv4Addr::new(192, 168, 0, 200),
            pool_end: Ipv4Addr::new(192, 168, 0, 100),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_server_ip_in_pool() {
        let config = Config {
            server_ip: Ipv4Addr::new(192, 168, 0, 150),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_gateway_in_pool() {
        let config = Config {
            gateway: Some(Ipv4Addr::new(192, 168, 0, 150)),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_lease_duration() {
        let config = Config {
            lease_duration_seconds: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bad_reservation_mac() {
        let config = Config {
            reservations: vec![StaticReservation {
                mac_address: "xx:yy:zz".to_string(),
                ip_address: Ipv4Addr::new(192, 168, 0, 33),
            }],
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_reservation_outside_pool_is_allowed() {
        let config = Config {
            reservations: vec![StaticReservation {
                mac_address: "42:79:99:bb:69:6f".to_string(),
                ip_address: Ipv4Addr::new(192, 168, 0, 33),
            }],
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_ip_in_pool() {
        let config = Config::default();
        assert!(config.ip_in_pool(Ipv4Addr::new(192, 168, 0, 150)));
        assert!(!config.ip_in_pool(Ipv4Addr::new(192, 168, 0, 50)));
        assert!(!config.ip_in_pool(Ipv4Addr::new(192, 168, 0, 250)));
    }

    #[test]
    fn test_pool_size() {
        let config = Config::default();
        assert_eq!(config.pool_size(), 101);
    }

    #[test]
    fn test_json_roundtrip() {
        let config = Config {
            reservations: vec![StaticReservation {
                mac_address: "42:79:99:bb:69:6f".to_string(),
                ip_address: Ipv4Addr::new(192, 168, 0, 33),
            }],
            ..Default::default()
        };
        let json = serde_json::to_string_pretty(&config).unwrap();
        let parsed: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.server_ip, config.server_ip);
        assert_eq!(parsed.reservations.len(), 1);
        assert_eq!(
            parsed.reservations[0].ip_address,
            Ipv4Addr::new(192, 168, 0, 33)
        );
    }
}
