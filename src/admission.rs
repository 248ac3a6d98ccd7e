//! Admission Control
//!
//! Sits in front of the coordinator: per-IP concurrent connection caps, a
//! one-second connect-rate ring, and per-event rate limits over a sliding
//! 60-second window. Loopback connections bypass the connection limits so
//! local tooling is never locked out.
//!
//! Critical sections are short and synchronous; the mutexes are never held
//! across an await point.

use std::collections::{HashMap, VecDeque};
use std::net::IpAddr;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::error::CoordError;

/// Sliding window for per-event rate limits.
const EVENT_WINDOW: Duration = Duration::from_secs(60);

/// Connect-rate ring window.
const CONNECT_WINDOW: Duration = Duration::from_secs(1);

/// Events per minute allowed for a single session. Unlisted events share the
/// default bucket, so arbitrary client strings never grow the rate map.
fn event_limit(event: &str) -> (&'static str, usize) {
    match event {
        "create_room" => ("create_room", 5),
        "create_digu_room" => ("create_digu_room", 5),
        "join_room" => ("join_room", 10),
        "join_digu_room" => ("join_digu_room", 10),
        "join_queue" => ("join_queue", 10),
        "card_played" => ("card_played", 120),
        "digu_draw_card" => ("digu_draw_card", 60),
        "digu_discard_card" => ("digu_discard_card", 60),
        "digu_declare" => ("digu_declare", 10),
        _ => ("default", 60),
    }
}

#[derive(Debug, Default)]
struct IpRecord {
    live: usize,
    recent: VecDeque<Instant>,
}

/// Per-IP and per-session admission state.
pub struct Admission {
    max_per_ip: usize,
    rate_limit: usize,
    ips: Mutex<HashMap<IpAddr, IpRecord>>,
    event_rates: Mutex<HashMap<String, HashMap<&'static str, VecDeque<Instant>>>>,
}

impl Admission {
    pub fn new(max_per_ip: usize, rate_limit: usize) -> Self {
        Self {
            max_per_ip,
            rate_limit,
            ips: Mutex::new(HashMap::new()),
            event_rates: Mutex::new(HashMap::new()),
        }
    }

    /// Admit or refuse a new transport connection. On success the connection
    /// is counted against its IP until [`Admission::release`].
    pub fn admit(&self, ip: IpAddr) -> Result<(), CoordError> {
        if ip.is_loopback() {
            return Ok(());
        }

        let now = Instant::now();
        let mut ips = self.ips.lock().expect("admission lock poisoned");
        let record = ips.entry(ip).or_default();

        if record.live >= self.max_per_ip {
            return Err(CoordError::TooManyConnections);
        }

        while let Some(front) = record.recent.front() {
            if now.duration_since(*front) >= CONNECT_WINDOW {
                record.recent.pop_front();
            } else {
                break;
            }
        }
        if record.recent.len() >= self.rate_limit {
            return Err(CoordError::RateLimited);
        }

        record.live += 1;
        record.recent.push_back(now);
        Ok(())
    }

    /// Release a connection slot on disconnect.
    pub fn release(&self, ip: IpAddr) {
        if ip.is_loopback() {
            return;
        }
        let mut ips = self.ips.lock().expect("admission lock poisoned");
        let mut drop_entry = false;
        if let Some(record) = ips.get_mut(&ip) {
            record.live = record.live.saturating_sub(1);
            drop_entry = record.live == 0 && record.recent.is_empty();
        }
        if drop_entry {
            ips.remove(&ip);
        }
    }

    /// Enforce the per-event rate limit for one session.
    pub fn check_event(&self, sid: &str, event: &str) -> Result<(), CoordError> {
        let (key, limit) = event_limit(event);

        let now = Instant::now();
        let mut rates = self.event_rates.lock().expect("admission lock poisoned");
        let per_event = rates.entry(sid.to_string()).or_default();
        let stamps = per_event.entry(key).or_default();

        while let Some(front) = stamps.front() {
            if now.duration_since(*front) >= EVENT_WINDOW {
                stamps.pop_front();
            } else {
                break;
            }
        }
        if stamps.len() >= limit {
            return Err(CoordError::RateLimited);
        }
        stamps.push_back(now);
        Ok(())
    }

    /// Drop rate-limit bookkeeping for a departed session.
    pub fn forget_session(&self, sid: &str) {
        let mut rates = self.event_rates.lock().expect("admission lock poisoned");
        rates.remove(sid);
    }

    /// Live connection count for an IP (admin snapshot).
    pub fn connections_for(&self, ip: IpAddr) -> usize {
        let ips = self.ips.lock().expect("admission lock poisoned");
        ips.get(&ip).map(|r| r.live).unwrap_or(0)
    }

    /// Number of distinct IPs with live connections.
    pub fn unique_ips(&self) -> usize {
        let ips = self.ips.lock().expect("admission lock poisoned");
        ips.values().filter(|r| r.live > 0).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn remote_ip() -> IpAddr {
        "203.0.113.9".parse().unwrap()
    }

    #[test]
    fn test_connection_cap() {
        // From one IP the eleventh concurrent connection is refused; the
        // ten existing ones are unaffected.
        let admission = Admission::new(10, 1000);
        let ip = remote_ip();

        for _ in 0..10 {
            admission.admit(ip).unwrap();
        }
        assert_eq!(admission.admit(ip), Err(CoordError::TooManyConnections));
        assert_eq!(admission.connections_for(ip), 10);

        // Releasing one frees a slot.
        admission.release(ip);
        admission.admit(ip).unwrap();
    }

    #[test]
    fn test_connect_rate_limit() {
        let admission = Admission::new(100, 5);
        let ip = remote_ip();

        for _ in 0..5 {
            admission.admit(ip).unwrap();
        }
        // Sixth connection within the same second is refused.
        assert_eq!(admission.admit(ip), Err(CoordError::RateLimited));
    }

    #[test]
    fn test_loopback_bypasses_limits() {
        let admission = Admission::new(1, 1);
        let ip: IpAddr = "127.0.0.1".parse().unwrap();

        for _ in 0..20 {
            admission.admit(ip).unwrap();
        }
    }

    #[test]
    fn test_per_event_rate_limit() {
        let admission = Admission::new(10, 5);

        for _ in 0..5 {
            admission.check_event("s1", "create_room").unwrap();
        }
        assert_eq!(
            admission.check_event("s1", "create_room"),
            Err(CoordError::RateLimited)
        );

        // Other events and other sessions are unaffected.
        admission.check_event("s1", "set_ready").unwrap();
        admission.check_event("s2", "create_room").unwrap();
    }

    #[test]
    fn test_forget_session_resets_rates() {
        let admission = Admission::new(10, 5);
        for _ in 0..5 {
            admission.check_event("s1", "create_room").unwrap();
        }
        admission.forget_session("s1");
        admission.check_event("s1", "create_room").unwrap();
    }

    #[test]
    fn test_release_unknown_ip_is_harmless() {
        let admission = Admission::new(10, 5);
        admission.release(remote_ip());
        assert_eq!(admission.unique_ips(), 0);
    }
}
