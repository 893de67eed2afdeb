/*
 * @copyright (C) 2024 Ruslan Iusupov <https://github.com/rus0000>
 *
 * SPDX-License-Identifier: MIT
 */
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use pcap::{Activated, Capture, Device};
use thiserror::Error;

use crate::{config::CaptureConfig, link_layer::LinkLayerError, pcap_stream_assembler::PcapStreamAssembler, tcp_connection::TcpConnection};

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("pcap error: {0}")]
    Pcap(#[from] pcap::Error),
    #[error("no capture device: {0}")]
    NoDevice(String),
    #[error(transparent)]
    LinkLayer(#[from] LinkLayerError),
}

/// Open the dump file if one is configured, otherwise the live interface.
pub fn open(config: &CaptureConfig) -> Result<Capture<dyn Activated>, CaptureError> {
    match &config.dump_file {
        Some(dump_file) => {
            let capture = Capture::from_file(dump_file)?;
            tracing::info!(dump_file = %dump_file.display(), datalink = capture.get_datalink().0, "reading capture file");
            Ok(capture.into())
        }
        None => open_live(config),
    }
}

fn open_live(config: &CaptureConfig) -> Result<Capture<dyn Activated>, CaptureError> {
    let device = match &config.interface {
        Some(name) => Device::from(name.as_str()),
        None => Device::lookup()?.ok_or_else(|| CaptureError::NoDevice(String::from("no default device found")))?,
    };
    let device_name = device.name.clone();

    // Read timeout lets the capture loop notice shutdown on an idle interface.
    let mut capture = Capture::from_device(device)?
        .promisc(config.promiscuous)
        .snaplen(config.snaplen)
        .timeout(config.timeout_ms)
        .open()?;
    capture.filter(&config.filter, true)?;

    tracing::info!(
        interface = %device_name,
        promiscuous = config.promiscuous,
        filter = %config.filter,
        datalink = capture.get_datalink().0,
        "listening"
    );

    Ok(capture.into())
}

/// Ask [run()] to stop before its next frame. Return true if a stop was already requested.
/// * A live capture notices it within the read timeout.
/// * A dump file read from a named pipe has no read timeout and blocks until the writer sends more,
///   so a repeated request is the caller's cue to exit without waiting.
pub fn request_stop(running: &AtomicBool) -> bool {
    !running.swap(false, Ordering::SeqCst)
}

/// Feed every captured frame to the assembler until `running` is cleared or the dump file ends,
/// then give all remaining connections a final extraction.
/// * Per-frame errors are logged and skipped, only capture errors end the loop.
pub fn run(
    capture: &mut Capture<dyn Activated>,
    assembler: &mut PcapStreamAssembler,
    running: &AtomicBool,
    try_consume_tcp_payload: &mut dyn FnMut(&[u8], u32, &TcpConnection) -> usize,
) -> Result<(), CaptureError> {
    let result = loop {
        if !running.load(Ordering::SeqCst) {
            tracing::info!("capture stopped");
            break Ok(());
        }

        match capture.next_packet() {
            Ok(packet) => {
                if let Err(error) = assembler.handle_frame(packet.data, Instant::now(), try_consume_tcp_payload) {
                    tracing::trace!(%error, caplen = packet.header.caplen, "frame dropped");
                }
            }
            Err(pcap::Error::TimeoutExpired) => {
                // Nothing arrived, idle connections still have to go.
                assembler.sweep(Instant::now(), try_consume_tcp_payload);
            }
            Err(pcap::Error::NoMorePackets) => {
                tracing::info!("end of capture file");
                break Ok(());
            }
            Err(error) => {
                tracing::error!(%error, "capture error");
                break Err(CaptureError::Pcap(error));
            }
        }
    };

    let drained = assembler.finish(try_consume_tcp_payload);
    tracing::debug!("{} connections drained", drained);

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_stop() {
        let running = AtomicBool::new(true);
        assert!(!request_stop(&running));
        assert!(!running.load(Ordering::SeqCst));
        assert!(request_stop(&running));
    }
}
