/*
 * @copyright (C) 2024 Ruslan Iusupov <https://github.com/rus0000>
 *
 * SPDX-License-Identifier: MIT
 */
use thiserror::Error;

/// Reasons a single frame is dropped. Never affects any connection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("frame of {captured} bytes is shorter than link-level header of {header_length} bytes")]
    Truncated { captured: usize, header_length: usize },
    #[error("radiotap header length is not captured")]
    RadiotapTruncated,
    #[error("not an IPv4 packet")]
    NotIpv4,
    #[error("IP protocol {0} is not TCP")]
    NotTcp(u8),
    #[error("cannot parse IPv4 header: {0}")]
    Ipv4(String),
    #[error("cannot parse TCP header: {0}")]
    Tcp(String),
}
