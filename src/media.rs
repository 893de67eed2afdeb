/*
 * @copyright (C) 2024 Ruslan Iusupov <https://github.com/rus0000>
 *
 * SPDX-License-Identifier: MIT
 */
use std::fmt;

use crate::{
    media_format::{MediaFormat, Scan, AUDIO_FORMATS, IMAGE_FORMATS},
    tcp_connection::TcpConnection,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Image,
    Audio,
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaKind::Image => write!(f, "image"),
            MediaKind::Audio => write!(f, "audio"),
        }
    }
}

/// Which kinds of media to look for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaKinds {
    pub images: bool,
    pub audio: bool,
}

impl Default for MediaKinds {
    fn default() -> Self {
        Self {
            images: true,
            audio: false,
        }
    }
}

impl MediaKinds {
    pub fn formats(&self) -> Vec<MediaFormat> {
        let mut formats = Vec::new();
        if self.images {
            formats.extend_from_slice(&IMAGE_FORMATS);
        }
        if self.audio {
            formats.extend_from_slice(&AUDIO_FORMATS);
        }
        formats
    }
}

impl MediaFormat {
    pub fn kind(&self) -> MediaKind {
        match self {
            MediaFormat::Mpeg => MediaKind::Audio,
            _ => MediaKind::Image,
        }
    }
}

/// Complete object found in a TCP byte-stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaObject {
    pub format: MediaFormat,
    pub data: Vec<u8>,
    pub connection_id: u32,
    pub tcp_connection: TcpConnection,
}

impl MediaObject {
    pub fn kind(&self) -> MediaKind {
        self.format.kind()
    }
}

/// Receives extracted objects. Must not block the capture thread.
pub trait MediaSink {
    fn deliver(&mut self, media_object: MediaObject);
}

impl MediaSink for Vec<MediaObject> {
    fn deliver(&mut self, media_object: MediaObject) {
        self.push(media_object);
    }
}

/// Scans consumable TCP payload for media signatures and hands complete objects to the sink.
/// Plugs into [crate::PcapStreamAssembler::handle_frame()] as `try_consume_tcp_payload`.
#[derive(Debug)]
pub struct MediaExtractor<S: MediaSink> {
    formats: Vec<MediaFormat>,
    sink: S,
    extracted_objects: u64,
}

impl<S: MediaSink> MediaExtractor<S> {
    pub fn new(media_kinds: MediaKinds, sink: S) -> Self {
        Self {
            formats: media_kinds.formats(),
            sink,
            extracted_objects: 0,
        }
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    pub fn into_sink(self) -> S {
        self.sink
    }

    pub fn extracted_objects(&self) -> u64 {
        self.extracted_objects
    }

    /// Return amount of bytes which will never be needed again:
    /// * up to the first object which is not yet complete, so it is offered again with more data,
    /// * otherwise everything scanned, including emitted objects.
    pub fn extract(&mut self, consumable_tcp_payload: &[u8], connection_id: u32, tcp_connection: &TcpConnection) -> usize {
        let mut position = 0;
        while position < consumable_tcp_payload.len() {
            let candidate = &consumable_tcp_payload[position..];
            match self.scan(candidate) {
                Some((format, Scan::Complete(size))) => {
                    tracing::debug!(
                        connection_id,
                        format = format.extension(),
                        size,
                        "[{}]: {} found in {}",
                        connection_id,
                        format.kind(),
                        tcp_connection
                    );
                    self.extracted_objects += 1;
                    self.sink.deliver(MediaObject {
                        format,
                        data: candidate[..size].to_vec(),
                        connection_id,
                        tcp_connection: *tcp_connection,
                    });
                    position += size;
                }
                Some((_, Scan::Incomplete)) => return position,
                _ => position += 1,
            }
        }

        position
    }

    /// First format which does not reject the candidate.
    fn scan(&self, candidate: &[u8]) -> Option<(MediaFormat, Scan)> {
        self.formats.iter().find_map(|format| match format.scan(candidate) {
            Scan::Invalid => None,
            scan => Some((*format, scan)),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use super::*;
    use crate::media_format::tests::{mpeg_frames, TINY_GIF, TINY_JPEG, TINY_PNG};

    fn tcp_connection() -> TcpConnection {
        TcpConnection::new(Ipv4Addr::new(10, 0, 0, 2), 80, Ipv4Addr::new(10, 0, 0, 1), 5000)
    }

    #[test]
    fn test_formats() {
        assert_eq!(MediaKinds::default().formats().len(), 3);
        assert_eq!(
            MediaKinds {
                images: false,
                audio: true
            }
            .formats(),
            vec![MediaFormat::Mpeg]
        );
    }

    #[test]
    fn test_extract_images_from_http_response() {
        let mut byte_stream = b"HTTP/1.1 200 OK\r\nContent-Type: image/gif\r\n\r\n".to_vec();
        byte_stream.extend_from_slice(TINY_GIF);
        byte_stream.extend_from_slice(b"HTTP/1.1 200 OK\r\n\r\n");
        byte_stream.extend_from_slice(TINY_JPEG);
        byte_stream.extend_from_slice(TINY_PNG);

        let mut extractor = MediaExtractor::new(MediaKinds::default(), Vec::new());
        let consumed = extractor.extract(&byte_stream, 3, &tcp_connection());
        assert_eq!(consumed, byte_stream.len());

        let objects = extractor.into_sink();
        let formats: Vec<MediaFormat> = objects.iter().map(|object| object.format).collect();
        assert_eq!(formats, vec![MediaFormat::Gif, MediaFormat::Jpeg, MediaFormat::Png]);
        assert_eq!(objects[0].data, TINY_GIF);
        assert_eq!(objects[1].data, TINY_JPEG);
        assert_eq!(objects[2].data, TINY_PNG);
        assert!(objects.iter().all(|object| object.connection_id == 3 && object.kind() == MediaKind::Image));
    }

    #[test]
    fn test_extract_stops_at_incomplete_object() {
        let mut byte_stream = b"garbage".to_vec();
        byte_stream.extend_from_slice(&TINY_PNG[..20]);

        let mut extractor = MediaExtractor::new(MediaKinds::default(), Vec::new());
        assert_eq!(extractor.extract(&byte_stream, 1, &tcp_connection()), 7);
        assert!(extractor.sink().is_empty());

        // Offered again from the object beginning with the rest of it.
        let consumed = extractor.extract(TINY_PNG, 1, &tcp_connection());
        assert_eq!(consumed, TINY_PNG.len());
        assert_eq!(extractor.extracted_objects(), 1);
    }

    #[test]
    fn test_extract_keeps_partial_signature_at_tail() {
        let mut extractor = MediaExtractor::new(MediaKinds::default(), Vec::new());
        assert_eq!(extractor.extract(b"abcdefGIF8", 1, &tcp_connection()), 6);
        assert_eq!(extractor.extract(b"abcdef", 1, &tcp_connection()), 6);
    }

    #[test]
    fn test_extract_audio_only() {
        let mut byte_stream = TINY_GIF.to_vec();
        byte_stream.extend_from_slice(&mpeg_frames(4));
        let media_kinds = MediaKinds {
            images: false,
            audio: true,
        };
        let mut extractor = MediaExtractor::new(media_kinds, Vec::new());
        assert_eq!(extractor.extract(&byte_stream, 1, &tcp_connection()), byte_stream.len());
        let objects = extractor.into_sink();
        assert_eq!(objects.len(), 1);
        assert_eq!(objects[0].kind(), MediaKind::Audio);
        assert_eq!(objects[0].data.len(), 417 * 4);
    }
}
