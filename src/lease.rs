//! IP address allocation and lease tracking.
//!
//! This module owns the dynamic address pool, the static reservation table,
//! and the lease table. It implements the server-side allocation rules:
//!
//! - Static MAC-to-IP reservations (always win, excluded from the pool)
//! - First-fit allocation from the dynamic pool
//! - Lease creation, renewal, and release
//!
//! Expiry is evaluated lazily whenever a lease is consulted; there is no
//! background sweeper. An expired lease simply stops counting as live and
//! its address becomes allocatable again.
//!
//! # Thread Safety
//!
//! All mutation goes through a single [`Mutex`] around the lease table, so
//! two concurrent transactions can never hand out the same address.

use std::collections::HashMap;
use std::net::Ipv4Addr;

use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::Mutex;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::packet::MacAddr;

/// A binding between a hardware address and an IP address.
#[derive(Debug, Clone)]
pub struct Lease {
    /// The hardware address that owns this lease.
    pub owner: MacAddr,

    /// The IP address assigned to the owner.
    pub address: Ipv4Addr,

    /// When this lease expires (UTC).
    pub expires_at: DateTime<Utc>,
}

impl Lease {
    /// Creates a new lease expiring `duration_seconds` from now.
    pub fn new(owner: MacAddr, address: Ipv4Addr, duration_seconds: u32) -> Self {
        Self {
            owner,
            address,
            expires_at: Utc::now() + TimeDelta::seconds(duration_seconds as i64),
        }
    }

    /// Returns true if the lease has expired.
    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }

    /// Returns seconds remaining until expiration, or 0 if expired.
    pub fn remaining_seconds(&self) -> i64 {
        let remaining = self.expires_at - Utc::now();
        remaining.num_seconds().max(0)
    }
}

/// Mutable lease state, protected by the pool's mutex.
#[derive(Debug, Default)]
struct PoolState {
    /// Live and expired leases, indexed by owner.
    leases: HashMap<MacAddr, Lease>,
    /// Reverse lookup: address → last known owner.
    address_owner: HashMap<Ipv4Addr, MacAddr>,
}

/// Thread-safe allocator over a contiguous IPv4 pool plus reservations.
///
/// At most one live lease exists per address, and each hardware address
/// holds at most one lease. Reserved addresses are carved out of the
/// dynamic pool at construction and only ever go to their reserved owner.
#[derive(Debug)]
pub struct LeasePool {
    state: Mutex<PoolState>,
    /// Pool bounds as host-order integers, inclusive.
    pool_start: u32,
    pool_end: u32,
    /// Reservations: hardware address → its fixed IP.
    reserved_by_mac: HashMap<MacAddr, Ipv4Addr>,
    /// Reservations: fixed IP → its hardware address.
    reserved_addresses: HashMap<Ipv4Addr, MacAddr>,
    lease_duration_seconds: u32,
}

impl LeasePool {
    /// Builds a pool from the server configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if a reservation's MAC address
    /// string does not parse.
    pub fn new(config: &Config) -> Result<Self> {
        let mut reserved_by_mac = HashMap::new();
        let mut reserved_addresses = HashMap::new();
        for reservation in &config.reservations {
            let mac: MacAddr = reservation.mac_address.parse()?;
            reserved_by_mac.insert(mac, reservation.ip_address);
            reserved_addresses.insert(reservation.ip_address, mac);
        }

        Ok(Self {
            state: Mutex::new(PoolState::default()),
            pool_start: u32::from(config.pool_start),
            pool_end: u32::from(config.pool_end),
            reserved_by_mac,
            reserved_addresses,
            lease_duration_seconds: config.lease_duration_seconds,
        })
    }

    /// Returns the lease duration handed out with each ACK, in seconds.
    pub fn lease_duration_seconds(&self) -> u32 {
        self.lease_duration_seconds
    }

    /// Returns the reserved address for a hardware address, if any.
    pub fn reservation_for(&self, mac: MacAddr) -> Option<Ipv4Addr> {
        self.reserved_by_mac.get(&mac).copied()
    }

    fn in_pool(&self, ip: Ipv4Addr) -> bool {
        let ip = u32::from(ip);
        ip >= self.pool_start && ip <= self.pool_end
    }

    /// Returns the owner of a live (non-expired) lease on `address`.
    fn live_owner(state: &PoolState, address: Ipv4Addr) -> Option<MacAddr> {
        let owner = *state.address_owner.get(&address)?;
        let lease = state.leases.get(&owner)?;
        if lease.address == address && !lease.is_expired() {
            Some(owner)
        } else {
            None
        }
    }

    /// Selects an address to offer for DISCOVER handling.
    ///
    /// # Allocation Priority
    ///
    /// 1. Static reservation for this hardware address
    /// 2. Existing live lease for this hardware address
    /// 3. First pool address with no live lease (lowest first)
    ///
    /// An offer does not commit anything; the lease is created when the
    /// client comes back with a REQUEST.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PoolExhausted`] if every pool address carries a
    /// live lease.
    pub async fn offer_for(&self, mac: MacAddr) -> Result<Ipv4Addr> {
        if let Some(&ip) = self.reserved_by_mac.get(&mac) {
            return Ok(ip);
        }

        let state = self.state.lock().await;

        if let Some(lease) = state.leases.get(&mac)
            && !lease.is_expired()
        {
            return Ok(lease.address);
        }

        for ip_num in self.pool_start..=self.pool_end {
            let ip = Ipv4Addr::from(ip_num);
            if self.reserved_addresses.contains_key(&ip) {
                continue;
            }
            if Self::live_owner(&state, ip).is_none() {
                return Ok(ip);
            }
        }

        Err(Error::PoolExhausted)
    }

    /// Creates or refreshes a lease for REQUEST handling.
    ///
    /// A reservation for `mac` overrides `requested` entirely, and the
    /// reservation owner is granted its address regardless of any stale
    /// lease a previous occupant may hold on it. Otherwise the requested
    /// address must be managed by this server and must not be reserved
    /// for, or live-leased to, anyone else.
    ///
    /// # Errors
    ///
    /// - [`Error::AddressNotManaged`] if the resolved address is outside
    ///   the pool and not a reservation.
    /// - [`Error::AddressInUse`] if the resolved address belongs to a
    ///   different hardware address.
    pub async fn confirm(&self, mac: MacAddr, requested: Ipv4Addr) -> Result<Ipv4Addr> {
        let resolved = self.reserved_by_mac.get(&mac).copied().unwrap_or(requested);

        if !self.in_pool(resolved) && !self.reserved_addresses.contains_key(&resolved) {
            return Err(Error::AddressNotManaged(resolved));
        }

        let mut state = self.state.lock().await;

        match self.reserved_addresses.get(&resolved) {
            Some(owner) if *owner == mac => {}
            Some(_) => return Err(Error::AddressInUse(resolved)),
            None => {
                if let Some(owner) = Self::live_owner(&state, resolved)
                    && owner != mac
                {
                    return Err(Error::AddressInUse(resolved));
                }
            }
        }

        // A client moving to a new address gives up its old one.
        if let Some(old) = state.leases.get(&mac)
            && old.address != resolved
        {
            let old_address = old.address;
            state.address_owner.remove(&old_address);
        }

        state
            .leases
            .insert(mac, Lease::new(mac, resolved, self.lease_duration_seconds));
        state.address_owner.insert(resolved, mac);

        Ok(resolved)
    }

    /// Releases a lease if `mac` owns a lease on exactly `address`.
    ///
    /// Release is advisory: a mismatched owner or address is a silent
    /// no-op, and releasing twice is harmless.
    pub async fn release(&self, mac: MacAddr, address: Ipv4Addr) {
        let mut state = self.state.lock().await;

        let owns = state
            .leases
            .get(&mac)
            .is_some_and(|lease| lease.address == address);

        if owns {
            state.leases.remove(&mac);
            state.address_owner.remove(&address);
        }
    }

    /// Returns the lease held by a hardware address, expired or not.
    pub async fn lease_for(&self, mac: MacAddr) -> Option<Lease> {
        let state = self.state.lock().await;
        state.leases.get(&mac).cloned()
    }

    /// Returns the count of live (non-expired) leases.
    pub async fn active_lease_count(&self) -> usize {
        let state = self.state.lock().await;
        state
            .leases
            .values()
            .filter(|lease| !lease.is_expired())
            .count()
    }

    /// Returns the number of dynamically allocatable addresses.
    pub fn pool_size(&self) -> usize {
        let range = (self.pool_end - self.pool_start + 1) as usize;
        let reserved_inside = self
            .reserved_addresses
            .keys()
            .filter(|ip| self.in_pool(**ip))
            .count();
        range - reserved_inside
    }

    #[cfg(test)]
    async fn force_expire(&self, mac: MacAddr) {
        let mut state = self.state.lock().await;
        if let Some(lease) = state.leases.get_mut(&mac) {
            lease.expires_at = Utc::now() - TimeDelta::seconds(1);
        }
    }
}
