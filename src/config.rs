/*
 * @copyright (C) 2024 Ruslan Iusupov <https://github.com/rus0000>
 *
 * SPDX-License-Identifier: MIT
 */
use std::path::PathBuf;
use std::time::Duration;

use crate::sequence::{SNAPLEN, WRAP_MARGIN};

pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_MAX_CONNECTION_BYTES: u64 = 8 * 1024 * 1024;
pub const DEFAULT_INITIAL_SLOTS: usize = 64;

/// Tunables of connection tracking and reassembly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssemblerConfig {
    /// Connection without accepted segments for longer than this is retired on next sweep.
    pub idle_timeout: Duration,
    /// Hard cap of `total_len` per connection, regardless of holes or FIN.
    pub max_connection_bytes: u64,
    /// Out-of-order tolerance past the highest offset seen.
    pub wrap_margin: u64,
    /// Initial amount of connection table slots. Doubled when exhausted.
    pub initial_slots: usize,
}

impl Default for AssemblerConfig {
    fn default() -> Self {
        Self {
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            max_connection_bytes: DEFAULT_MAX_CONNECTION_BYTES,
            wrap_margin: WRAP_MARGIN,
            initial_slots: DEFAULT_INITIAL_SLOTS,
        }
    }
}

/// Where packets come from.
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Live interface. `None` with no `dump_file` means the default device.
    pub interface: Option<String>,
    /// Recorded capture, could be a named pipe.
    pub dump_file: Option<PathBuf>,
    pub promiscuous: bool,
    pub snaplen: i32,
    /// Read timeout of a live capture. Bounds how long shutdown waits on an idle interface.
    pub timeout_ms: i32,
    /// BPF filter, applied to live captures only.
    pub filter: String,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            interface: None,
            dump_file: None,
            promiscuous: true,
            snaplen: SNAPLEN as i32,
            timeout_ms: 100,
            filter: build_filter(&[]),
        }
    }
}

/// Extracted objects output.
#[derive(Debug, Clone)]
pub struct OutputConfig {
    pub directory: PathBuf,
    pub prefix: String,
    /// Announce saved files on stdout, one path per line, for another process to pick up.
    pub adjunct: bool,
    /// Adjunct mode only. Objects are silently dropped while this many files are waiting in `directory`.
    pub max_files: Option<usize>,
    /// Ring the terminal bell for every saved file. Not in adjunct mode.
    pub beep: bool,
    pub announce_capacity: usize,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("."),
            prefix: String::from("driftnet-"),
            adjunct: false,
            max_files: None,
            beep: false,
            announce_capacity: 256,
        }
    }
}

/// Filter is always narrowed to TCP.
pub fn build_filter(words: &[String]) -> String {
    if words.is_empty() {
        String::from("tcp")
    } else {
        format!("tcp and ({})", words.join(" "))
    }
}
