use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, Default)]
pub struct NetworkStats {
    pub packets_sent: u64,
    pub packets_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub send_failures: u64,
    pub malformed_dropped: u64,
    pub inbox_dropped: u64,
    pub foreign_dropped: u64,
    pub out_of_order: u64,
    pub last_remote_sequence: u32,
}

impl NetworkStats {
    pub fn record_sent(&mut self, bytes: usize) {
        self.packets_sent += 1;
        self.bytes_sent += bytes as u64;
    }

    pub fn record_received(&mut self, bytes: usize) {
        self.packets_received += 1;
        self.bytes_received += bytes as u64;
    }

    /// Tracks the highest remote sequence seen; returns false for late arrivals.
    pub fn record_sequence(&mut self, sequence: u32) -> bool {
        if self.last_remote_sequence == 0
            || super::protocol::sequence_greater_than(sequence, self.last_remote_sequence)
        {
            self.last_remote_sequence = sequence;
            true
        } else {
            self.out_of_order += 1;
            false
        }
    }
}

pub fn rand_u64() -> u64 {
    let mut hasher = DefaultHasher::new();
    Instant::now().hash(&mut hasher);
    unix_nanos().hash(&mut hasher);
    hasher.finish()
}

/// Non-cryptographic 64-bit digest of `value` mixed with a timestamp.
pub fn hash_with_time<T: Hash + ?Sized>(value: &T, unix_nanos: u128) -> u64 {
    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    unix_nanos.hash(&mut hasher);
    hasher.finish()
}

pub fn unix_nanos() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default()
}

/// Random identifier rendered as 16 lowercase hex digits.
pub fn random_hex_id() -> String {
    format!("{:016x}", rand_u64())
}
