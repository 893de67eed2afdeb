/*
 * @copyright (C) 2024 Ruslan Iusupov <https://github.com/rus0000>
 *
 * SPDX-License-Identifier: MIT
 */
use std::fmt;
use std::time::Instant;

use crate::{block_store::BlockStore, config::AssemblerConfig, sequence, tcp_connection::TcpConnection};

/// Why a connection left the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RetireReason {
    /// No segment accepted for longer than `idle_timeout`.
    Idle,
    /// FIN seen and there are no holes in the byte-stream.
    Finished,
    /// `total_len` went over `max_connection_bytes`.
    SizeCap,
    /// End of capture, see [crate::PcapStreamAssembler::finish()].
    Drained,
}

impl fmt::Display for RetireReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetireReason::Idle => write!(f, "idle timeout"),
            RetireReason::Finished => write!(f, "finished"),
            RetireReason::SizeCap => write!(f, "size cap"),
            RetireReason::Drained => write!(f, "drained"),
        }
    }
}

/// Reassembly state of one direction of a TCP session.
#[derive(Debug)]
pub struct ConnectionRecord {
    /// * Immutable.
    pub tcp_connection: TcpConnection,
    /// * Immutable.
    pub connection_id: u32,

    /// Raw sequence number from first segment seen in this TCP connection. Not necessarily ISN.
    /// * Immutable.
    /// * Offset zero of the byte-stream. Data sent before it is not recoverable.
    pub isn: u32,

    /// Highest offset reached so far, monotonic.
    /// * Mutable.
    pub total_len: u64,

    /// * Mutable.
    pub last_activity: Instant,

    /// FIN does not remove the connection, sweep does, once the byte-stream has no holes.
    /// * Mutable.
    pub fin_seen: bool,

    /// * Mutable.
    pub blocks: BlockStore,
}

impl ConnectionRecord {
    pub fn new(tcp_connection: TcpConnection, connection_id: u32, start_sequence_number: u32, now: Instant) -> Self {
        Self {
            tcp_connection,
            connection_id,
            isn: start_sequence_number,
            total_len: 0,
            last_activity: now,
            fin_seen: false,
            blocks: BlockStore::new(),
        }
    }

    pub fn relative_offset(&self, sequence_number: u32) -> u32 {
        sequence::relative_offset(sequence_number, self.isn)
    }

    /// Store payload at `offset`, advance `total_len` and activity timestamp.
    /// Caller is responsible for the wrap margin check.
    pub fn push(&mut self, offset: u32, tcp_payload: &[u8], now: Instant) -> usize {
        let offset = offset as u64;
        let stored = self.blocks.insert(offset, tcp_payload);
        self.total_len = self.total_len.max(offset + tcp_payload.len() as u64);
        self.last_activity = now;
        stored
    }

    /// First matching rule wins: idle, then finished, then size cap.
    pub fn retire_reason(&self, now: Instant, config: &AssemblerConfig) -> Option<RetireReason> {
        if now.saturating_duration_since(self.last_activity) > config.idle_timeout {
            Some(RetireReason::Idle)
        } else if self.fin_seen && self.blocks.is_contiguous() {
            Some(RetireReason::Finished)
        } else if self.total_len > config.max_connection_bytes {
            Some(RetireReason::SizeCap)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;
    use std::time::Duration;

    use super::*;

    fn new_record(isn: u32, now: Instant) -> ConnectionRecord {
        let tcp_connection = TcpConnection::new(Ipv4Addr::new(10, 0, 0, 1), 5000, Ipv4Addr::new(10, 0, 0, 2), 80);
        ConnectionRecord::new(tcp_connection, 1, isn, now)
    }

    #[test]
    fn test_push_advances_total_len() {
        let now = Instant::now();
        let mut record = new_record(100, now);
        record.push(record.relative_offset(100), &[0; 10], now);
        assert_eq!(record.total_len, 10);
        record.push(record.relative_offset(150), &[0; 10], now);
        assert_eq!(record.total_len, 60);
        // Filling the hole does not shrink total_len.
        record.push(record.relative_offset(110), &[0; 10], now);
        assert_eq!(record.total_len, 60);
        assert_eq!(record.blocks.len(), 2);
    }

    #[test]
    fn test_retire_reason_idle() {
        let now = Instant::now();
        let config = AssemblerConfig::default();
        let record = new_record(0, now);
        assert_eq!(record.retire_reason(now + Duration::from_secs(5), &config), None);
        assert_eq!(record.retire_reason(now + Duration::from_secs(6), &config), Some(RetireReason::Idle));
    }

    #[test]
    fn test_retire_reason_finished_requires_no_holes() {
        let now = Instant::now();
        let config = AssemblerConfig::default();
        let mut record = new_record(0, now);
        record.push(0, &[0; 50], now);
        record.push(60, &[0; 40], now);
        record.fin_seen = true;
        assert_eq!(record.retire_reason(now, &config), None);
        record.push(50, &[0; 10], now);
        assert_eq!(record.retire_reason(now, &config), Some(RetireReason::Finished));
    }

    #[test]
    fn test_retire_reason_size_cap() {
        let now = Instant::now();
        let config = AssemblerConfig {
            max_connection_bytes: 100,
            ..AssemblerConfig::default()
        };
        let mut record = new_record(0, now);
        record.push(0, &[0; 100], now);
        assert_eq!(record.retire_reason(now, &config), None);
        record.push(100, &[0; 1], now);
        assert_eq!(record.retire_reason(now, &config), Some(RetireReason::SizeCap));
    }
}
