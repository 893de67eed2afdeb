/*
 * @copyright (C) 2024 Ruslan Iusupov <https://github.com/rus0000>
 *
 * SPDX-License-Identifier: MIT
 */
use crate::{connection_record::ConnectionRecord, tcp_connection::TcpConnection, trace_connection};

/// Offer the contiguous data at head of the byte-stream to the extractor, drop what it consumed.
/// * The extractor sees the whole head block every time, consumed bytes are never offered again.
/// * Nothing is offered while a hole separates the head block from consumed data, the hole may still be filled.
/// * Return consumed size.
pub fn consume_buffer(
    trace_connections: &[u32],
    record: &mut ConnectionRecord,
    try_consume_tcp_payload: &mut dyn FnMut(&[u8], u32, &TcpConnection) -> usize,
) -> usize {
    let Some(front) = record.blocks.contiguous_front() else {
        return 0;
    };

    let available = front.len();
    let consumed_size = try_consume_tcp_payload(&front.data, record.connection_id, &record.tcp_connection).min(available);
    if consumed_size == 0 {
        return 0;
    }

    if let Err(error) = record.blocks.consume_front(consumed_size) {
        trace_connection!(trace_connections, record.connection_id, "consume_buffer() {}", error);
        return 0;
    }
    trace_connection!(
        trace_connections,
        record.connection_id,
        "consumed {} of {} bytes, buffer {}",
        consumed_size,
        available,
        record.blocks
    );

    consumed_size
}

/// Final extraction when a connection leaves the table.
/// * Offer every block once, head first. Holes are skipped, unconsumed bytes are dropped.
/// * Return total consumed size.
pub fn drain_buffer(
    trace_connections: &[u32],
    record: &mut ConnectionRecord,
    try_consume_tcp_payload: &mut dyn FnMut(&[u8], u32, &TcpConnection) -> usize,
) -> usize {
    let mut consumed_total = 0;
    while let Some(front) = record.blocks.remove_front() {
        let consumed_size = try_consume_tcp_payload(&front.data, record.connection_id, &record.tcp_connection).min(front.len());
        consumed_total += consumed_size;
        if consumed_size < front.len() {
            trace_connection!(
                trace_connections,
                record.connection_id,
                "drain_buffer() dropped {} bytes at offset {}",
                front.len() - consumed_size,
                front.offset + consumed_size as u64
            );
        }
    }

    consumed_total
}
