/*
 * @copyright (C) 2024 Ruslan Iusupov <https://github.com/rus0000>
 *
 * SPDX-License-Identifier: MIT
 */

pub const MAX_SEQUENCE_NUMBER: u32 = u32::MAX;

/// Largest chunk of data accepted from the capture source.
pub const SNAPLEN: usize = 262144;

/// Out-of-order margin. Same as [SNAPLEN], so a burst reordered within one capture round is still accepted.
pub const WRAP_MARGIN: u64 = SNAPLEN as u64;

/// Map raw sequence number to an offset in the connection byte-stream.
/// * Modulo 2^32 subtraction, `sequence_number < isn` wraps over [MAX_SEQUENCE_NUMBER].
/// * A connection is assumed to never transfer anything close to 4 GiB, so the offset is meaningful for the whole lifetime.
pub fn relative_offset(sequence_number: u32, isn: u32) -> u32 {
    sequence_number.wrapping_sub(isn)
}

/// Segment is accepted only when it starts within `wrap_margin` after the highest offset seen so far.
/// Anything further away is treated as out-of-order noise and never retried.
pub fn is_acceptable(offset: u32, total_len: u64, wrap_margin: u64) -> bool {
    offset as u64 <= total_len + wrap_margin
}
