/*
 * @copyright (C) 2024 Ruslan Iusupov <https://github.com/rus0000>
 *
 * SPDX-License-Identifier: MIT
 */
//! Byte signatures of recognised media formats.
//!
//! Each scanner looks at data starting exactly at a candidate position and tells whether a complete
//! object starts there, whether more bytes are needed to decide, or whether it is not an object at all.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scan {
    /// Complete object of this size at the beginning of the data.
    Complete(usize),
    /// Looks like a beginning of an object, but more data is needed.
    Incomplete,
    Invalid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaFormat {
    Gif,
    Jpeg,
    Png,
    /// Run of consecutive MPEG audio frames.
    Mpeg,
}

pub const IMAGE_FORMATS: [MediaFormat; 3] = [MediaFormat::Gif, MediaFormat::Jpeg, MediaFormat::Png];
pub const AUDIO_FORMATS: [MediaFormat; 1] = [MediaFormat::Mpeg];

impl MediaFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            MediaFormat::Gif => "gif",
            MediaFormat::Jpeg => "jpeg",
            MediaFormat::Png => "png",
            MediaFormat::Mpeg => "mp3",
        }
    }

    pub fn scan(&self, data: &[u8]) -> Scan {
        match self {
            MediaFormat::Gif => scan_gif(data),
            MediaFormat::Jpeg => scan_jpeg(data),
            MediaFormat::Png => scan_png(data),
            MediaFormat::Mpeg => scan_mpeg(data),
        }
    }
}

/// `None` when the signature matches and parsing can go on.
fn check_signature(data: &[u8], signature: &[u8]) -> Option<Scan> {
    if data.len() >= signature.len() {
        if data.starts_with(signature) {
            None
        } else {
            Some(Scan::Invalid)
        }
    } else if signature.starts_with(data) {
        Some(Scan::Incomplete)
    } else {
        Some(Scan::Invalid)
    }
}

const GIF87A: &[u8] = b"GIF87a";
const GIF89A: &[u8] = b"GIF89a";
const GIF_TRAILER: u8 = 0x3B;
const GIF_EXTENSION: u8 = 0x21;
const GIF_IMAGE_DESCRIPTOR: u8 = 0x2C;

fn gif_color_table_size(flags: u8) -> usize {
    if flags & 0x80 != 0 {
        3 * (1 << ((flags & 0x07) + 1))
    } else {
        0
    }
}

/// Skip data sub-blocks, each prefixed with its size, terminated by a zero size.
fn skip_gif_sub_blocks(data: &[u8], mut position: usize) -> Option<usize> {
    loop {
        let size = *data.get(position)? as usize;
        position += 1;
        if size == 0 {
            return Some(position);
        }
        position += size;
    }
}

fn scan_gif(data: &[u8]) -> Scan {
    let signature = if data.get(4) == Some(&b'7') { GIF87A } else { GIF89A };
    if let Some(scan) = check_signature(data, signature) {
        return scan;
    }

    // Logical screen descriptor.
    let Some(&flags) = data.get(10) else {
        return Scan::Incomplete;
    };
    let mut position = 13 + gif_color_table_size(flags);

    loop {
        let Some(&introducer) = data.get(position) else {
            return Scan::Incomplete;
        };
        match introducer {
            GIF_TRAILER => return Scan::Complete(position + 1),
            GIF_EXTENSION => {
                // Introducer and label.
                match skip_gif_sub_blocks(data, position + 2) {
                    Some(next) => position = next,
                    None => return Scan::Incomplete,
                }
            }
            GIF_IMAGE_DESCRIPTOR => {
                let Some(&flags) = data.get(position + 9) else {
                    return Scan::Incomplete;
                };
                // Descriptor, local color table, LZW minimum code size.
                position += 10 + gif_color_table_size(flags) + 1;
                match skip_gif_sub_blocks(data, position) {
                    Some(next) => position = next,
                    None => return Scan::Incomplete,
                }
            }
            _ => return Scan::Invalid,
        }
    }
}

const JPEG_SOI: &[u8] = &[0xFF, 0xD8, 0xFF];
const JPEG_EOI: u8 = 0xD9;
const JPEG_SOS: u8 = 0xDA;

fn is_jpeg_standalone_marker(marker: u8) -> bool {
    marker == 0x01 || (0xD0..=0xD7).contains(&marker)
}

fn scan_jpeg(data: &[u8]) -> Scan {
    if let Some(scan) = check_signature(data, JPEG_SOI) {
        return scan;
    }

    let mut position = 2;
    loop {
        let (Some(&prefix), Some(&marker)) = (data.get(position), data.get(position + 1)) else {
            return Scan::Incomplete;
        };
        if prefix != 0xFF {
            return Scan::Invalid;
        }
        match marker {
            0xFF => position += 1,
            JPEG_EOI => return Scan::Complete(position + 2),
            0x00 | 0xD8 => return Scan::Invalid,
            marker if is_jpeg_standalone_marker(marker) => position += 2,
            marker => {
                let Some(length) = data.get(position + 2..position + 4) else {
                    return Scan::Incomplete;
                };
                let length = u16::from_be_bytes([length[0], length[1]]) as usize;
                if length < 2 {
                    return Scan::Invalid;
                }
                position += 2 + length;

                if marker == JPEG_SOS {
                    // Entropy-coded data ends at the first marker which is not a stuffed byte or a restart marker.
                    loop {
                        let Some(&byte) = data.get(position) else {
                            return Scan::Incomplete;
                        };
                        if byte != 0xFF {
                            position += 1;
                            continue;
                        }
                        let Some(&next) = data.get(position + 1) else {
                            return Scan::Incomplete;
                        };
                        if next == 0x00 || (0xD0..=0xD7).contains(&next) {
                            position += 2;
                        } else if next == 0xFF {
                            position += 1;
                        } else {
                            break;
                        }
                    }
                }
            }
        }
    }
}

const PNG_SIGNATURE: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
const PNG_MAX_CHUNK_LENGTH: usize = 0x7FFF_FFFF;

fn scan_png(data: &[u8]) -> Scan {
    if let Some(scan) = check_signature(data, PNG_SIGNATURE) {
        return scan;
    }

    let mut position = PNG_SIGNATURE.len();
    loop {
        let Some(chunk_header) = data.get(position..position + 8) else {
            return Scan::Incomplete;
        };
        let length = u32::from_be_bytes([chunk_header[0], chunk_header[1], chunk_header[2], chunk_header[3]]) as usize;
        let chunk_type = &chunk_header[4..8];
        if length > PNG_MAX_CHUNK_LENGTH || !chunk_type.iter().all(u8::is_ascii_alphabetic) {
            return Scan::Invalid;
        }
        if position == PNG_SIGNATURE.len() && chunk_type != b"IHDR" {
            return Scan::Invalid;
        }
        // Length, type, data, CRC.
        position += 12 + length;
        if chunk_type == b"IEND" {
            return if position <= data.len() {
                Scan::Complete(position)
            } else {
                Scan::Incomplete
            };
        }
    }
}

/// Two frames in a row are required, a lone frame sync is too likely in random data.
const MPEG_MIN_FRAMES: usize = 2;

const MPEG1_LAYER1_BITRATES: [u32; 15] = [0, 32, 64, 96, 128, 160, 192, 224, 256, 288, 320, 352, 384, 416, 448];
const MPEG1_LAYER2_BITRATES: [u32; 15] = [0, 32, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320, 384];
const MPEG1_LAYER3_BITRATES: [u32; 15] = [0, 32, 40, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320];
const MPEG2_LAYER1_BITRATES: [u32; 15] = [0, 32, 48, 56, 64, 80, 96, 112, 128, 144, 160, 176, 192, 224, 256];
const MPEG2_LAYER23_BITRATES: [u32; 15] = [0, 8, 16, 24, 32, 40, 48, 56, 64, 80, 96, 112, 128, 144, 160];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MpegVersion {
    Mpeg1,
    Mpeg2,
    Mpeg25,
}

/// Frame length from a 4 byte frame header, `None` for anything which is not a valid header.
/// Free format bitrate is not supported.
pub fn mpeg_frame_length(header: &[u8; 4]) -> Option<usize> {
    if header[0] != 0xFF || header[1] & 0xE0 != 0xE0 {
        return None;
    }
    let version = match (header[1] >> 3) & 0x03 {
        0 => MpegVersion::Mpeg25,
        2 => MpegVersion::Mpeg2,
        3 => MpegVersion::Mpeg1,
        _ => return None,
    };
    let layer = match (header[1] >> 1) & 0x03 {
        1 => 3,
        2 => 2,
        3 => 1,
        _ => return None,
    };
    let bitrate_index = (header[2] >> 4) as usize;
    if bitrate_index == 0 || bitrate_index == 15 {
        return None;
    }
    let sample_rate_index = ((header[2] >> 2) & 0x03) as usize;
    if sample_rate_index == 3 {
        return None;
    }
    let padding = ((header[2] >> 1) & 0x01) as u32;

    let bitrate = match (version, layer) {
        (MpegVersion::Mpeg1, 1) => MPEG1_LAYER1_BITRATES[bitrate_index],
        (MpegVersion::Mpeg1, 2) => MPEG1_LAYER2_BITRATES[bitrate_index],
        (MpegVersion::Mpeg1, _) => MPEG1_LAYER3_BITRATES[bitrate_index],
        (_, 1) => MPEG2_LAYER1_BITRATES[bitrate_index],
        (_, _) => MPEG2_LAYER23_BITRATES[bitrate_index],
    } * 1000;
    let sample_rate = match version {
        MpegVersion::Mpeg1 => [44100, 48000, 32000][sample_rate_index],
        MpegVersion::Mpeg2 => [22050, 24000, 16000][sample_rate_index],
        MpegVersion::Mpeg25 => [11025, 12000, 8000][sample_rate_index],
    };

    let length = match (version, layer) {
        (_, 1) => (12 * bitrate / sample_rate + padding) * 4,
        (MpegVersion::Mpeg1, _) | (_, 2) => 144 * bitrate / sample_rate + padding,
        (_, _) => 72 * bitrate / sample_rate + padding,
    };

    Some(length as usize)
}

fn scan_mpeg(data: &[u8]) -> Scan {
    match data {
        [] => return Scan::Incomplete,
        [0xFF] => return Scan::Incomplete,
        [0xFF, second, ..] if second & 0xE0 == 0xE0 => {}
        _ => return Scan::Invalid,
    }

    let mut position = 0;
    let mut frames = 0;
    let out_of_data = loop {
        let Some(header) = data.get(position..position + 4) else {
            break true;
        };
        let header = [header[0], header[1], header[2], header[3]];
        let Some(length) = mpeg_frame_length(&header) else {
            break false;
        };
        if position + length > data.len() {
            break true;
        }
        position += length;
        frames += 1;
    };

    if frames >= MPEG_MIN_FRAMES {
        // An endless stream is emitted in pieces ending on a frame boundary.
        Scan::Complete(position)
    } else if out_of_data {
        Scan::Incomplete
    } else {
        Scan::Invalid
    }
}
