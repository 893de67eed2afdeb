/*
 * @copyright (C) 2024 Ruslan Iusupov <https://github.com/rus0000>
 *
 * SPDX-License-Identifier: MIT
 */

pub mod block_store;
pub mod capture;
pub mod config;
pub mod connection_record;
pub mod connection_table;
pub mod link_layer;
pub mod media_format;
pub mod output;
pub mod sequence;

#[doc(hidden)]
pub mod trace_macro;
mod cli;
mod consume_buffer;
mod error;
mod media;
mod pcap_stream_assembler;
mod tcp_connection;

pub use cli::Cli;
pub use error::FrameError;
pub use media::{MediaExtractor, MediaKind, MediaKinds, MediaObject, MediaSink};
pub use output::{FileOutput, OutputError};
pub use pcap_stream_assembler::*;
pub use tcp_connection::TcpConnection;
