//! # Flood Guard
//!
//! Per-address datagram counting and banning, consulted by the binder
//! before a datagram reaches any connection.
//!
//! Every received datagram increments the current window of its source
//! address. Once per rate window [`TrafficStore::roll`] promotes the current
//! count to the peak when it is higher; a new peak above the ban threshold
//! bans the address. Closing a connection releases its record: quiet
//! addresses are forgotten, noisy ones keep their peak. A record that saw
//! no traffic for its whole history is released by the roll itself, and
//! dropped outright once its address is banned, so addresses that never
//! got a connection do not accumulate.
//!
//! Both collaborators are traits so a persistent store can replace the
//! in-memory implementations.

use std::collections::{HashMap, HashSet, VecDeque};
use std::net::IpAddr;
use std::sync::{Mutex, MutexGuard};

use tracing::{debug, error, warn};

use crate::config::GuardConfig;
use crate::error::constants;

/// Address → banned flag
pub trait BanList: Send + Sync {
    fn is_banned(&self, ip: IpAddr) -> bool;
    fn ban(&self, ip: IpAddr);
}

/// Address → rolling datagram counters
pub trait TrafficStore: Send + Sync {
    /// Count one datagram from `ip`
    fn record(&self, ip: IpAddr);

    /// Close the current window for every address. Returns newly banned addresses.
    fn roll(&self, bans: &dyn BanList) -> Vec<IpAddr>;

    /// Trim the record of an address whose connection closed
    fn release(&self, ip: IpAddr);
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| {
        error!("{}", constants::ERR_GUARD_LOCK);
        poisoned.into_inner()
    })
}

/// In-memory ban list
#[derive(Debug, Default)]
pub struct MemoryBanList {
    banned: Mutex<HashSet<IpAddr>>,
}

impl MemoryBanList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn unban(&self, ip: IpAddr) -> bool {
        lock(&self.banned).remove(&ip)
    }

    pub fn len(&self) -> usize {
        lock(&self.banned).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl BanList for MemoryBanList {
    fn is_banned(&self, ip: IpAddr) -> bool {
        lock(&self.banned).contains(&ip)
    }

    fn ban(&self, ip: IpAddr) {
        lock(&self.banned).insert(ip);
    }
}

/// Counters for one address
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrafficRecord {
    /// Datagrams per window, most recent first; empty after a release
    pub windows: VecDeque<u64>,
    /// Highest closed-window count observed
    pub peak: u64,
}

impl TrafficRecord {
    pub fn current(&self) -> u64 {
        self.windows.front().copied().unwrap_or(0)
    }
}

/// In-memory traffic counters with ban-on-peak
#[derive(Debug)]
pub struct TrafficMonitor {
    records: Mutex<HashMap<IpAddr, TrafficRecord>>,
    ban_threshold: u64,
    history_len: usize,
    noise_floor: u64,
}

impl TrafficMonitor {
    pub fn new(config: &GuardConfig) -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            ban_threshold: config.ban_threshold,
            history_len: config.history_len.max(1),
            noise_floor: config.noise_floor,
        }
    }

    pub fn snapshot(&self, ip: IpAddr) -> Option<TrafficRecord> {
        lock(&self.records).get(&ip).cloned()
    }

    pub fn tracked(&self) -> usize {
        lock(&self.records).len()
    }
}

impl TrafficStore for TrafficMonitor {
    fn record(&self, ip: IpAddr) {
        let mut records = lock(&self.records);
        let record = records.entry(ip).or_default();
        match record.windows.front_mut() {
            Some(current) => *current += 1,
            None => record.windows.push_front(1),
        }
    }

    fn roll(&self, bans: &dyn BanList) -> Vec<IpAddr> {
        let mut banned = Vec::new();
        let mut records = lock(&self.records);
        let before = records.len();
        records.retain(|ip, record| {
            if record.windows.is_empty() {
                return true;
            }
            let current = record.current();
            if current > record.peak {
                record.peak = current;
                if record.peak > self.ban_threshold && !bans.is_banned(*ip) {
                    warn!(%ip, peak = record.peak, threshold = self.ban_threshold, "Banning flooding address");
                    bans.ban(*ip);
                    banned.push(*ip);
                }
            }
            record.windows.push_front(0);
            record.windows.truncate(self.history_len);

            let quiet = record.windows.len() == self.history_len
                && record.windows.iter().all(|count| *count == 0);
            if !quiet {
                return true;
            }
            if record.peak < self.noise_floor || bans.is_banned(*ip) {
                return false;
            }
            record.windows.clear();
            true
        });
        let pruned = before - records.len();
        if pruned > 0 {
            debug!(pruned, tracked = records.len(), "Pruned quiet traffic records");
        }
        banned
    }

    fn release(&self, ip: IpAddr) {
        let mut records = lock(&self.records);
        let Some(record) = records.get_mut(&ip) else {
            return;
        };
        if record.peak < self.noise_floor {
            records.remove(&ip);
        } else {
            record.windows.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn ip(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(10, 0, 0, last))
    }

    fn monitor() -> TrafficMonitor {
        TrafficMonitor::new(&GuardConfig::default())
    }

    #[test]
    fn test_flood_is_banned_on_roll() {
        let traffic = monitor();
        let bans = MemoryBanList::new();
        for _ in 0..601 {
            traffic.record(ip(1));
        }
        for _ in 0..600 {
            traffic.record(ip(2));
        }
        assert!(!bans.is_banned(ip(1)));
        assert_eq!(traffic.roll(&bans), vec![ip(1)]);
        assert!(bans.is_banned(ip(1)));
        assert!(!bans.is_banned(ip(2)));
        assert_eq!(traffic.snapshot(ip(2)).map(|r| r.peak), Some(600));
    }

    #[test]
    fn test_history_is_bounded() {
        let traffic = monitor();
        let bans = MemoryBanList::new();
        for _ in 0..10 {
            traffic.record(ip(3));
            traffic.roll(&bans);
        }
        let record = traffic.snapshot(ip(3)).unwrap_or_default();
        assert_eq!(record.windows, VecDeque::from([0, 1, 1, 1, 1]));
        assert_eq!(record.peak, 1);
        assert_eq!(record.current(), 0);
    }

    #[test]
    fn test_quiet_records_are_pruned_on_roll() {
        let traffic = monitor();
        let bans = MemoryBanList::new();

        // below the noise floor: forgotten
        traffic.record(ip(6));
        // noisy: peak kept, windows released
        for _ in 0..50 {
            traffic.record(ip(7));
        }
        // banned while quiet: nothing left to track
        for _ in 0..50 {
            traffic.record(ip(8));
        }
        bans.ban(ip(8));

        for _ in 0..4 {
            traffic.roll(&bans);
        }
        assert_eq!(traffic.tracked(), 3);

        traffic.roll(&bans);
        assert!(traffic.snapshot(ip(6)).is_none());
        assert!(traffic.snapshot(ip(8)).is_none());
        let kept = traffic.snapshot(ip(7)).unwrap_or_default();
        assert_eq!(kept.peak, 50);
        assert!(kept.windows.is_empty());
        assert_eq!(traffic.tracked(), 1);
    }

    #[test]
    fn test_release_honours_noise_floor() {
        let traffic = monitor();
        let bans = MemoryBanList::new();

        traffic.record(ip(4));
        traffic.roll(&bans);
        traffic.release(ip(4));
        assert!(traffic.snapshot(ip(4)).is_none());

        for _ in 0..50 {
            traffic.record(ip(5));
        }
        traffic.roll(&bans);
        traffic.release(ip(5));
        let kept = traffic.snapshot(ip(5)).unwrap_or_default();
        assert_eq!(kept.peak, 50);
        assert!(kept.windows.is_empty());

        // released records are skipped by roll until traffic resumes
        traffic.roll(&bans);
        assert!(traffic.snapshot(ip(5)).unwrap_or_default().windows.is_empty());
        traffic.record(ip(5));
        assert_eq!(traffic.snapshot(ip(5)).unwrap_or_default().current(), 1);
    }
}
