/*
 * @copyright (C) 2024 Ruslan Iusupov <https://github.com/rus0000>
 *
 * SPDX-License-Identifier: MIT
 */
use std::fmt;
use std::time::Instant;

use etherparse::{IpNumber, Ipv4HeaderSlice, TcpHeaderSlice};

use crate::{
    block_store::BlockStore,
    config::AssemblerConfig,
    connection_record::{ConnectionRecord, RetireReason},
    connection_table::ConnectionTable,
    consume_buffer::{consume_buffer, drain_buffer},
    error::FrameError,
    link_layer::{LinkLayer, LinkLayerError},
    sequence::is_acceptable,
    tcp_connection::TcpConnection,
    trace_connection,
};

/// Counters of one capture session.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct AssemblerStats {
    pub frames: u64,
    /// Truncated, malformed, non IPv4 or non TCP.
    pub dropped_frames: u64,
    pub accepted_segments: u64,
    /// Beyond the wrap margin, never retried.
    pub out_of_order_segments: u64,
    pub connections_opened: u64,
    /// Records destroyed by RST, both directions counted.
    pub connections_reset: u64,
    pub retired_idle: u64,
    pub retired_finished: u64,
    pub retired_size_cap: u64,
    pub retired_drained: u64,
    /// Bytes the extractor consumed.
    pub consumed_bytes: u64,
}

impl AssemblerStats {
    fn count_retired(&mut self, reason: RetireReason) {
        match reason {
            RetireReason::Idle => self.retired_idle += 1,
            RetireReason::Finished => self.retired_finished += 1,
            RetireReason::SizeCap => self.retired_size_cap += 1,
            RetireReason::Drained => self.retired_drained += 1,
        }
    }

    pub fn retired(&self) -> u64 {
        self.retired_idle + self.retired_finished + self.retired_size_cap + self.retired_drained
    }
}

impl fmt::Display for AssemblerStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} frames ({} dropped), {} segments ({} out of order), {} connections ({} reset, retired: {} idle, {} finished, {} size cap, {} drained), {} bytes consumed",
            self.frames,
            self.dropped_frames,
            self.accepted_segments,
            self.out_of_order_segments,
            self.connections_opened,
            self.connections_reset,
            self.retired_idle,
            self.retired_finished,
            self.retired_size_cap,
            self.retired_drained,
            self.consumed_bytes
        )
    }
}

/// * Create single instance of [PcapStreamAssembler] per capture session, the datalink type is fixed for its lifetime.
/// * For each captured frame call [PcapStreamAssembler::handle_frame()], or [PcapStreamAssembler::handle_segment()] if headers are already parsed.
///     * Provide `try_consume_tcp_payload()` callback, usually [crate::MediaExtractor::extract()], which gets the contiguous head of a byte-stream
///       and returns amount of bytes which will never be needed again.
/// * Call [PcapStreamAssembler::finish()] at the end of capture to give every live connection a final extraction.
/// * Owned by the capture thread. Neither the assembler nor its table can be shared between threads.
#[derive(Debug)]
pub struct PcapStreamAssembler<'a> {
    config: AssemblerConfig,
    link_layer: LinkLayer,
    table: ConnectionTable,
    /// Empty slice: trace all connections, positive values: specific connection Ids, u32::MAX: disable tracing.
    trace_connections: &'a [u32],
    /// Connection id is sequentially generated on a first seen basis.
    last_connection_id: u32,
    stats: AssemblerStats,
}

impl<'a> PcapStreamAssembler<'a> {
    /// # Arguments
    /// * `datalink`: DLT_* value of the capture session.
    /// * `config`: timeouts and limits.
    /// * `trace_connections`: empty slice: trace all connections, list of values: specific connection Ids, None: disable tracing.
    pub fn new(datalink: i32, config: AssemblerConfig, trace_connections: Option<&'a [u32]>) -> Result<Self, LinkLayerError> {
        let link_layer = LinkLayer::from_datalink(datalink)?;
        Ok(Self {
            table: ConnectionTable::new(config.initial_slots),
            config,
            link_layer,
            trace_connections: trace_connections.unwrap_or(&[u32::MAX]),
            last_connection_id: 0,
            stats: AssemblerStats::default(),
        })
    }

    pub fn config(&self) -> &AssemblerConfig {
        &self.config
    }

    pub fn link_layer(&self) -> LinkLayer {
        self.link_layer
    }

    pub fn table(&self) -> &ConnectionTable {
        &self.table
    }

    pub fn stats(&self) -> &AssemblerStats {
        &self.stats
    }

    /// Parse a captured frame and assemble its TCP segment.
    /// * Malformed frame is dropped without touching any connection, error tells why.
    pub fn handle_frame(
        &mut self,
        frame: &[u8],
        now: Instant,
        try_consume_tcp_payload: &mut dyn FnMut(&[u8], u32, &TcpConnection) -> usize,
    ) -> Result<(), FrameError> {
        self.stats.frames += 1;
        let (ipv4_header_slice, tcp_header_slice, tcp_payload) = match self.parse_frame(frame) {
            Ok(parsed) => parsed,
            Err(error) => {
                self.stats.dropped_frames += 1;
                return Err(error);
            }
        };

        self.handle_segment(&ipv4_header_slice, &tcp_header_slice, tcp_payload, now, try_consume_tcp_payload);

        Ok(())
    }

    fn parse_frame<'f>(&self, frame: &'f [u8]) -> Result<(Ipv4HeaderSlice<'f>, TcpHeaderSlice<'f>, &'f [u8]), FrameError> {
        let header_length = self.link_layer.header_length(frame)?;
        let ip_packet = match frame.get(header_length..) {
            Some(ip_packet) if !ip_packet.is_empty() => ip_packet,
            _ => {
                return Err(FrameError::Truncated {
                    captured: frame.len(),
                    header_length,
                })
            }
        };
        if ip_packet[0] >> 4 != 4 {
            return Err(FrameError::NotIpv4);
        }

        let ipv4_header_slice = Ipv4HeaderSlice::from_slice(ip_packet).map_err(|error| FrameError::Ipv4(error.to_string()))?;
        let protocol = ipv4_header_slice.protocol();
        if protocol != IpNumber::TCP {
            return Err(FrameError::NotTcp(protocol.0));
        }

        // Link-level padding after the IP packet is not payload, neither is anything past the capture.
        let ip_header_length = ipv4_header_slice.slice().len();
        let ip_end = (ipv4_header_slice.total_len() as usize).clamp(ip_header_length, ip_packet.len());
        let tcp_segment = &ip_packet[ip_header_length..ip_end];

        let tcp_header_slice = TcpHeaderSlice::from_slice(tcp_segment).map_err(|error| FrameError::Tcp(error.to_string()))?;
        let tcp_payload = &tcp_segment[tcp_header_slice.slice().len()..];

        Ok((ipv4_header_slice, tcp_header_slice, tcp_payload))
    }

    /// Main function for assembling TCP segments.
    /// # Arguments
    /// * `ipv4_header_slice`: etherparse type
    /// * `tcp_header_slice`: etherparse type
    /// * `tcp_payload`: Payload of TCP segment to assemble it into TCP byte-stream
    /// * `now`: Time of processing, drives idle retirement.
    /// * `try_consume_tcp_payload`: Callback to detect media objects and consume them
    ///     * `consumable_tcp_payload`: Contiguous data from the head of the buffered byte-stream.
    ///         * Offered after every accepted segment and once more when the connection is retired.
    ///         * Return amount of bytes which could be dropped, they are never offered again.
    ///     * `connection_id`: TCP connection id, generated sequentially as it is found.
    ///     * `tcp_connection`: TCP connection tuple, two IPs + two ports
    pub fn handle_segment(
        &mut self,
        ipv4_header_slice: &Ipv4HeaderSlice,
        tcp_header_slice: &TcpHeaderSlice,
        tcp_payload: &[u8],
        now: Instant,
        try_consume_tcp_payload: &mut dyn FnMut(
            /* consumable_tcp_payload */ &[u8],
            /* connection_id */ u32,
            /* tcp_connection */ &TcpConnection,
        ) -> usize,
    ) {
        let tcp_connection = TcpConnection::from_headers(ipv4_header_slice, tcp_header_slice);
        if tcp_header_slice.rst() {
            // Bogus connection, so might be the other direction. Buffered data is not trusted, no extraction.
            self.reset(&tcp_connection);
            return;
        }

        let slot = match self.table.find(&tcp_connection) {
            Some(slot) => slot,
            None => {
                // Might be a SYN or the middle of a connection, either way its sequence number becomes offset zero.
                self.last_connection_id += 1;
                let connection_id = self.last_connection_id;
                trace_connection!(
                    self.trace_connections,
                    connection_id,
                    "new connection {}, raw sequence number {}{}",
                    tcp_connection,
                    tcp_header_slice.sequence_number(),
                    if tcp_header_slice.syn() { ", SYN" } else { "" }
                );
                self.stats.connections_opened += 1;
                let mut record = ConnectionRecord::new(tcp_connection, connection_id, tcp_header_slice.sequence_number(), now);
                if tcp_header_slice.syn() {
                    // SYN occupies offset zero, data starts right after it.
                    record.blocks = BlockStore::starting_at(1);
                }
                self.table.allocate(record)
            }
        };

        let trace_connections = self.trace_connections;
        let Some(record) = self.table.get_mut(slot) else {
            return;
        };

        if !tcp_payload.is_empty() {
            let offset = record.relative_offset(tcp_header_slice.sequence_number());
            if is_acceptable(offset, record.total_len, self.config.wrap_margin) {
                let stored = record.push(offset, tcp_payload, now);
                self.stats.accepted_segments += 1;
                trace_connection!(
                    trace_connections,
                    record.connection_id,
                    "{} bytes at offset {}, {} new, buffer {}",
                    tcp_payload.len(),
                    offset,
                    stored,
                    record.blocks
                );
                self.stats.consumed_bytes += consume_buffer(trace_connections, record, try_consume_tcp_payload) as u64;
            } else {
                self.stats.out_of_order_segments += 1;
                trace_connection!(
                    trace_connections,
                    record.connection_id,
                    "out of order segment at offset {}, {} bytes seen so far, drop {}",
                    offset,
                    record.total_len,
                    tcp_connection
                );
            }
        }

        if tcp_header_slice.fin() {
            record.fin_seen = true;
            trace_connection!(
                trace_connections,
                record.connection_id,
                "FIN, {} bytes transferred, buffer {}",
                record.total_len,
                record.blocks
            );
        }

        self.sweep(now, try_consume_tcp_payload);
    }

    /// Destroy the connection and its reverse if they exist, buffered data of both is discarded.
    fn reset(&mut self, tcp_connection: &TcpConnection) {
        for tcp_connection in [*tcp_connection, tcp_connection.get_reverse_connection()] {
            if let Some(record) = self.table.remove_connection(&tcp_connection) {
                self.stats.connections_reset += 1;
                trace_connection!(
                    self.trace_connections,
                    record.connection_id,
                    "RST, {} discarded, {} bytes buffered",
                    tcp_connection,
                    record.blocks.buffered_bytes()
                );
            }
        }
    }

    /// Retire idle, finished and oversized connections, each with a final extraction.
    /// Called after every segment, also useful on an idle capture.
    pub fn sweep(&mut self, now: Instant, try_consume_tcp_payload: &mut dyn FnMut(&[u8], u32, &TcpConnection) -> usize) -> usize {
        let trace_connections = self.trace_connections;
        let stats = &mut self.stats;
        self.table.sweep(now, &self.config, &mut |record, reason| {
            retire(trace_connections, stats, record, reason, try_consume_tcp_payload);
        })
    }

    /// * Drain all buffers.
    /// * Must be called at the end of capture, after last frame was assembled.
    /// * Same callback as for [PcapStreamAssembler::handle_segment].
    pub fn finish(&mut self, try_consume_tcp_payload: &mut dyn FnMut(&[u8], u32, &TcpConnection) -> usize) -> usize {
        let trace_connections = self.trace_connections;
        let stats = &mut self.stats;
        self.table.drain(&mut |record, reason| {
            retire(trace_connections, stats, record, reason, try_consume_tcp_payload);
        })
    }
}

fn retire(
    trace_connections: &[u32],
    stats: &mut AssemblerStats,
    mut record: ConnectionRecord,
    reason: RetireReason,
    try_consume_tcp_payload: &mut dyn FnMut(&[u8], u32, &TcpConnection) -> usize,
) {
    trace_connection!(
        trace_connections,
        record.connection_id,
        "retired ({}), {} bytes transferred, buffer {}",
        reason,
        record.total_len,
        record.blocks
    );
    stats.count_retired(reason);
    stats.consumed_bytes += drain_buffer(trace_connections, &mut record, try_consume_tcp_payload) as u64;
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use etherparse::PacketBuilder;

    use super::*;
    use crate::link_layer::{DLT_EN10MB, DLT_RAW};

    const CLIENT: [u8; 4] = [10, 0, 0, 1];
    const SERVER: [u8; 4] = [10, 0, 0, 2];

    fn segment(sequence_number: u32, payload: &[u8]) -> Vec<u8> {
        let builder = PacketBuilder::ethernet2([1, 2, 3, 4, 5, 6], [7, 8, 9, 10, 11, 12])
            .ipv4(SERVER, CLIENT, 64)
            .tcp(80, 5000, sequence_number, 65535);
        let mut frame = Vec::with_capacity(builder.size(payload.len()));
        builder.write(&mut frame, payload).unwrap();
        frame
    }

    fn flagged_segment(sequence_number: u32, syn: bool, rst: bool, payload: &[u8]) -> Vec<u8> {
        let mut builder = PacketBuilder::ethernet2([1, 2, 3, 4, 5, 6], [7, 8, 9, 10, 11, 12])
            .ipv4(SERVER, CLIENT, 64)
            .tcp(80, 5000, sequence_number, 65535);
        if syn {
            builder = builder.syn();
        }
        if rst {
            builder = builder.rst();
        }
        let mut frame = Vec::with_capacity(builder.size(payload.len()));
        builder.write(&mut frame, payload).unwrap();
        frame
    }

    /// Record every offered span.
    fn recorder(offered: &mut Vec<Vec<u8>>) -> impl FnMut(&[u8], u32, &TcpConnection) -> usize + '_ {
        move |payload, _, _| {
            offered.push(payload.to_vec());
            0
        }
    }

    #[test]
    fn test_unsupported_datalink() {
        assert_eq!(
            PcapStreamAssembler::new(9999, AssemblerConfig::default(), None).err(),
            Some(LinkLayerError::Unsupported(9999))
        );
    }

    #[test]
    fn test_accept_and_offer() {
        let mut assembler = PcapStreamAssembler::new(DLT_EN10MB, AssemblerConfig::default(), Some(&[])).unwrap();
        let now = Instant::now();
        let mut offered = Vec::new();
        assembler.handle_frame(&segment(1000, b"hello"), now, &mut recorder(&mut offered)).unwrap();
        assembler.handle_frame(&segment(1005, b" world"), now, &mut recorder(&mut offered)).unwrap();

        assert_eq!(offered, vec![b"hello".to_vec(), b"hello world".to_vec()]);
        assert_eq!(assembler.table().len(), 1);
        let record = assembler.table().iter().next().unwrap();
        assert_eq!(record.connection_id, 1);
        assert_eq!(record.isn, 1000);
        assert_eq!(record.total_len, 11);
        assert_eq!(assembler.stats().accepted_segments, 2);
    }

    #[test]
    fn test_consumed_bytes_not_offered_again() {
        let mut assembler = PcapStreamAssembler::new(DLT_EN10MB, AssemblerConfig::default(), None).unwrap();
        let now = Instant::now();
        let mut offered = Vec::new();
        let mut consume_all = |payload: &[u8], _: u32, _: &TcpConnection| {
            offered.push(payload.to_vec());
            payload.len()
        };
        assembler.handle_frame(&segment(0, b"abc"), now, &mut consume_all).unwrap();
        assembler.handle_frame(&segment(3, b"def"), now, &mut consume_all).unwrap();

        assert_eq!(offered, vec![b"abc".to_vec(), b"def".to_vec()]);
        assert_eq!(assembler.stats().consumed_bytes, 6);
    }

    #[test]
    fn test_out_of_order_dropped() {
        let config = AssemblerConfig {
            wrap_margin: 100,
            ..AssemblerConfig::default()
        };
        let mut assembler = PcapStreamAssembler::new(DLT_EN10MB, config, None).unwrap();
        let now = Instant::now();
        let mut offered = Vec::new();
        assembler.handle_frame(&segment(0, &[1; 10]), now, &mut recorder(&mut offered)).unwrap();
        assembler.handle_frame(&segment(111, &[2; 10]), now, &mut recorder(&mut offered)).unwrap();

        let record = assembler.table().iter().next().unwrap();
        assert_eq!(record.total_len, 10);
        assert_eq!(record.blocks.len(), 1);
        assert_eq!(offered.len(), 1);
        assert_eq!(assembler.stats().out_of_order_segments, 1);

        // Exactly at the margin is still accepted.
        assembler.handle_frame(&segment(110, &[3; 10]), now, &mut recorder(&mut offered)).unwrap();
        assert_eq!(assembler.table().iter().next().unwrap().total_len, 120);
    }

    #[test]
    fn test_malformed_frames_dropped() {
        let mut assembler = PcapStreamAssembler::new(DLT_EN10MB, AssemblerConfig::default(), None).unwrap();
        let now = Instant::now();
        let mut offered = Vec::new();

        let frame = segment(0, b"payload");
        assert!(matches!(
            assembler.handle_frame(&frame[..10], now, &mut recorder(&mut offered)),
            Err(FrameError::Truncated { .. })
        ));
        assert!(matches!(
            assembler.handle_frame(&frame[..14 + 20 + 4], now, &mut recorder(&mut offered)),
            Err(FrameError::Tcp(_))
        ));

        let mut ipv6 = frame.clone();
        ipv6[14] = 0x60;
        assert_eq!(assembler.handle_frame(&ipv6, now, &mut recorder(&mut offered)), Err(FrameError::NotIpv4));

        let udp = {
            let builder = PacketBuilder::ethernet2([1, 2, 3, 4, 5, 6], [7, 8, 9, 10, 11, 12]).ipv4(SERVER, CLIENT, 64).udp(53, 5353);
            let mut udp = Vec::new();
            builder.write(&mut udp, b"dns").unwrap();
            udp
        };
        assert_eq!(assembler.handle_frame(&udp, now, &mut recorder(&mut offered)), Err(FrameError::NotTcp(17)));

        assert!(assembler.table().is_empty());
        assert!(offered.is_empty());
        assert_eq!(assembler.stats().frames, 4);
        assert_eq!(assembler.stats().dropped_frames, 4);
    }

    #[test]
    fn test_ethernet_padding_is_not_payload() {
        let mut assembler = PcapStreamAssembler::new(DLT_EN10MB, AssemblerConfig::default(), None).unwrap();
        let mut frame = segment(0, b"ab");
        frame.extend_from_slice(&[0; 6]);
        let mut offered = Vec::new();
        assembler.handle_frame(&frame, Instant::now(), &mut recorder(&mut offered)).unwrap();
        assert_eq!(offered, vec![b"ab".to_vec()]);
    }

    #[test]
    fn test_raw_ip() {
        let mut assembler = PcapStreamAssembler::new(DLT_RAW, AssemblerConfig::default(), None).unwrap();
        let builder = PacketBuilder::ipv4(SERVER, CLIENT, 64).tcp(80, 5000, 7, 1024);
        let mut frame = Vec::new();
        builder.write(&mut frame, b"raw").unwrap();
        let mut offered = Vec::new();
        assembler.handle_frame(&frame, Instant::now(), &mut recorder(&mut offered)).unwrap();
        assert_eq!(offered, vec![b"raw".to_vec()]);
    }

    #[test]
    fn test_idle_sweep_and_finish() {
        let mut assembler = PcapStreamAssembler::new(DLT_EN10MB, AssemblerConfig::default(), None).unwrap();
        let now = Instant::now();
        let mut offered = Vec::new();
        assembler.handle_frame(&segment(0, b"first"), now, &mut recorder(&mut offered)).unwrap();

        assert_eq!(assembler.sweep(now + Duration::from_secs(5), &mut recorder(&mut offered)), 0);
        assert_eq!(assembler.sweep(now + Duration::from_secs(6), &mut recorder(&mut offered)), 1);
        assert_eq!(assembler.stats().retired_idle, 1);
        // Final extraction on retirement.
        assert_eq!(offered.len(), 2);

        assembler.handle_frame(&segment(500, b"second"), now, &mut recorder(&mut offered)).unwrap();
        assert_eq!(assembler.table().iter().next().unwrap().connection_id, 2);
        assert_eq!(assembler.finish(&mut recorder(&mut offered)), 1);
        assert!(assembler.table().is_empty());
        assert_eq!(assembler.stats().retired_drained, 1);
        assert_eq!(assembler.stats().retired(), 2);
        assert_eq!(offered.last().unwrap(), b"second");
    }

    #[test]
    fn test_syn_anchors_data_after_it() {
        let mut assembler = PcapStreamAssembler::new(DLT_EN10MB, AssemblerConfig::default(), None).unwrap();
        let now = Instant::now();
        let mut offered = Vec::new();
        assembler.handle_frame(&flagged_segment(4000, true, false, &[]), now, &mut recorder(&mut offered)).unwrap();
        assert_eq!(assembler.table().len(), 1);
        assert!(offered.is_empty());

        assembler.handle_frame(&segment(4001, b"data"), now, &mut recorder(&mut offered)).unwrap();
        assert_eq!(offered, vec![b"data".to_vec()]);
        assert_eq!(assembler.table().iter().next().unwrap().total_len, 5);
    }

    #[test]
    fn test_reset_of_unknown_connection() {
        let mut assembler = PcapStreamAssembler::new(DLT_EN10MB, AssemblerConfig::default(), None).unwrap();
        let now = Instant::now();
        let mut offered = Vec::new();
        assembler.handle_frame(&flagged_segment(1, false, true, &[]), now, &mut recorder(&mut offered)).unwrap();

        assert!(assembler.table().is_empty());
        assert_eq!(assembler.stats().connections_opened, 0);
        assert_eq!(assembler.stats().connections_reset, 0);

        assembler.handle_frame(&segment(9, b"next"), now, &mut recorder(&mut offered)).unwrap();
        assert_eq!(assembler.table().iter().next().unwrap().connection_id, 1);
    }
}
