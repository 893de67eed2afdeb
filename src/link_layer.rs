/*
 * @copyright (C) 2024 Ruslan Iusupov <https://github.com/rus0000>
 *
 * SPDX-License-Identifier: MIT
 */
use thiserror::Error;

use crate::error::FrameError;

// DLT_* values as found in pcap/dlt.h.
pub const DLT_NULL: i32 = 0;
pub const DLT_EN10MB: i32 = 1;
pub const DLT_IEEE802: i32 = 6;
pub const DLT_SLIP: i32 = 8;
pub const DLT_PPP: i32 = 9;
pub const DLT_FDDI: i32 = 10;
pub const DLT_ATM_RFC1483: i32 = 11;
pub const DLT_RAW: i32 = 12;
pub const DLT_SLIP_BSDOS: i32 = 15;
pub const DLT_PPP_BSDOS: i32 = 16;
pub const DLT_ATM_CLIP: i32 = 19;
pub const DLT_PPP_SERIAL: i32 = 50;
/// LINKTYPE_RAW, what DLT_RAW is mapped to in capture files.
pub const LINKTYPE_RAW: i32 = 101;
pub const DLT_C_HDLC: i32 = 104;
pub const DLT_IEEE802_11: i32 = 105;
pub const DLT_LOOP: i32 = 108;
pub const DLT_LINUX_SLL: i32 = 113;
pub const DLT_PRISM_HEADER: i32 = 119;
pub const DLT_IEEE802_11_RADIO: i32 = 127;

/// 802.11 data header plus LLC/SNAP.
const IEEE802_11_HEADER_LENGTH: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LinkLayerError {
    #[error("unknown data link type {0}")]
    Unsupported(i32),
}

/// How far into a frame the IP header starts, resolved once per capture session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkLayer {
    Fixed { datalink: i32, header_length: usize },
    /// Radiotap header length is carried by each frame, 802.11 follows.
    Radiotap,
}

impl LinkLayer {
    pub fn from_datalink(datalink: i32) -> Result<Self, LinkLayerError> {
        let header_length = match datalink {
            DLT_EN10MB => 14,
            DLT_SLIP => 16,
            DLT_SLIP_BSDOS | DLT_PPP_BSDOS => 24,
            DLT_NULL | DLT_LOOP => 4,
            DLT_PPP | DLT_C_HDLC | DLT_PPP_SERIAL => 4,
            DLT_FDDI => 21,
            DLT_IEEE802 => 22,
            DLT_ATM_RFC1483 | DLT_ATM_CLIP => 8,
            DLT_PRISM_HEADER => 32,
            DLT_RAW | LINKTYPE_RAW => 0,
            DLT_LINUX_SLL => 16,
            DLT_IEEE802_11 => IEEE802_11_HEADER_LENGTH,
            DLT_IEEE802_11_RADIO => return Ok(LinkLayer::Radiotap),
            unknown => return Err(LinkLayerError::Unsupported(unknown)),
        };

        Ok(LinkLayer::Fixed {
            datalink,
            header_length,
        })
    }

    /// Link-level header length of this particular frame.
    pub fn header_length(&self, frame: &[u8]) -> Result<usize, FrameError> {
        match *self {
            LinkLayer::Fixed { header_length, .. } => Ok(header_length),
            LinkLayer::Radiotap => {
                // it_version, it_pad, then it_len little-endian.
                let Some(it_len) = frame.get(2..4) else {
                    return Err(FrameError::RadiotapTruncated);
                };
                let it_len = u16::from_le_bytes([it_len[0], it_len[1]]) as usize;
                // 2 more bytes for the QoS control field of QoS data frames.
                Ok(it_len + 2 + IEEE802_11_HEADER_LENGTH)
            }
        }
    }
}
