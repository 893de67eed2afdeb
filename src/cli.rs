/*
 * @copyright (C) 2024 Ruslan Iusupov <https://github.com/rus0000>
 *
 * SPDX-License-Identifier: MIT
 */
use std::io::{self, IsTerminal};
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::{
    config::{build_filter, AssemblerConfig, CaptureConfig, OutputConfig},
    media::MediaKinds,
};

/// Reassemble TCP streams seen on the network and save images and MPEG audio carried in them.
#[derive(Parser, Debug)]
#[command(name = "pcap_media_sniffer", version, about)]
pub struct Cli {
    /// Listen on this interface instead of the default one.
    #[arg(short, long, conflicts_with = "dump_file")]
    pub interface: Option<String>,

    /// Read packets from a capture file (or a named pipe) instead of an interface.
    /// A pipe without traffic takes a second interrupt to stop.
    #[arg(short = 'f', long)]
    pub dump_file: Option<PathBuf>,

    /// Do not put the interface into promiscuous mode.
    #[arg(short = 'p', long)]
    pub no_promiscuous: bool,

    /// Adjunct mode: announce saved files on stdout, one path per line.
    #[arg(short, long)]
    pub adjunct: bool,

    /// Adjunct mode only: stop saving while this many files are waiting in the directory.
    #[arg(short, long, value_parser = clap::value_parser!(u64).range(1..))]
    pub max_files: Option<u64>,

    /// Save files into this directory. A temporary one is created if not given.
    #[arg(short, long)]
    pub directory: Option<PathBuf>,

    /// Beep for every saved file. Needs stdout to be a terminal, not available in adjunct mode.
    #[arg(short, long)]
    pub beep: bool,

    /// Prefix of saved file names.
    #[arg(short = 'x', long, default_value = "driftnet-")]
    pub prefix: String,

    /// Look for MPEG audio as well as images.
    #[arg(short = 's', long)]
    pub audio: bool,

    /// Look for MPEG audio only.
    #[arg(short = 'S', long)]
    pub audio_only: bool,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Retire connections without traffic for this long.
    #[arg(long, default_value_t = 5)]
    pub timeout_secs: u64,

    /// Retire connections after this many MiB.
    #[arg(long, default_value_t = 8)]
    pub max_connection_mib: u64,

    /// Trace only these connection ids. All connections are traced at -vv without it.
    #[arg(long = "trace-connection")]
    pub trace_connections: Vec<u32>,

    /// Additional capture filter, narrowed to TCP.
    #[arg(trailing_var_arg = true)]
    pub filter: Vec<String>,
}

impl Cli {
    pub fn media_kinds(&self) -> MediaKinds {
        MediaKinds {
            images: !self.audio_only,
            audio: self.audio || self.audio_only,
        }
    }

    pub fn assembler_config(&self) -> AssemblerConfig {
        AssemblerConfig {
            idle_timeout: Duration::from_secs(self.timeout_secs),
            max_connection_bytes: self.max_connection_mib.saturating_mul(1024 * 1024),
            ..AssemblerConfig::default()
        }
    }

    pub fn capture_config(&self) -> CaptureConfig {
        if self.dump_file.is_some() && !self.filter.is_empty() {
            tracing::warn!("filter is ignored when reading a capture file");
        }
        CaptureConfig {
            interface: self.interface.clone(),
            dump_file: self.dump_file.clone(),
            promiscuous: !self.no_promiscuous,
            filter: build_filter(&self.filter),
            ..CaptureConfig::default()
        }
    }

    /// `directory` is the resolved output directory, see [crate::output::prepare_directory()].
    pub fn output_config(&self, directory: PathBuf) -> OutputConfig {
        let max_files = match self.max_files {
            Some(_) if !self.adjunct => {
                tracing::warn!("--max-files only makes sense in adjunct mode, ignored");
                None
            }
            max_files => max_files.map(|max_files| max_files as usize),
        };
        OutputConfig {
            directory,
            prefix: self.prefix.clone(),
            adjunct: self.adjunct,
            max_files,
            beep: self.beep_enabled(io::stdout().is_terminal()),
            ..OutputConfig::default()
        }
    }

    fn beep_enabled(&self, stdout_is_terminal: bool) -> bool {
        if !self.beep {
            false
        } else if self.adjunct {
            tracing::warn!("cannot beep in adjunct mode");
            false
        } else if !stdout_is_terminal {
            tracing::warn!("cannot beep unless stdout is a terminal");
            false
        } else {
            true
        }
    }

    /// `None` disables per-connection tracing below DEBUG.
    pub fn trace_connections(&self) -> Option<&[u32]> {
        if !self.trace_connections.is_empty() {
            Some(self.trace_connections.as_slice())
        } else if self.verbose >= 2 {
            Some(&[][..])
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cli = Cli::parse_from(["pcap_media_sniffer"]);
        assert_eq!(cli.media_kinds(), MediaKinds::default());
        assert_eq!(cli.assembler_config(), AssemblerConfig::default());
        let capture_config = cli.capture_config();
        assert!(capture_config.promiscuous);
        assert_eq!(capture_config.filter, "tcp");
        assert_eq!(cli.trace_connections(), None);
    }

    #[test]
    fn test_options() {
        let cli = Cli::parse_from([
            "pcap_media_sniffer",
            "-i",
            "eth0",
            "-p",
            "-a",
            "-m",
            "10",
            "-S",
            "-vv",
            "--timeout-secs",
            "30",
            "port",
            "80",
        ]);
        assert_eq!(cli.interface.as_deref(), Some("eth0"));
        assert_eq!(
            cli.media_kinds(),
            MediaKinds {
                images: false,
                audio: true
            }
        );
        assert_eq!(cli.assembler_config().idle_timeout, Duration::from_secs(30));
        let capture_config = cli.capture_config();
        assert!(!capture_config.promiscuous);
        assert_eq!(capture_config.filter, "tcp and (port 80)");
        let output_config = cli.output_config(PathBuf::from("/tmp"));
        assert!(output_config.adjunct);
        assert_eq!(output_config.max_files, Some(10));
        assert_eq!(cli.trace_connections(), Some(&[][..]));
    }

    #[test]
    fn test_max_files_without_adjunct() {
        let cli = Cli::parse_from(["pcap_media_sniffer", "-m", "3"]);
        assert_eq!(cli.output_config(PathBuf::from(".")).max_files, None);
        assert!(Cli::try_parse_from(["pcap_media_sniffer", "-m", "0"]).is_err());
    }

    #[test]
    fn test_interface_conflicts_with_dump_file() {
        assert!(Cli::try_parse_from(["pcap_media_sniffer", "-i", "eth0", "-f", "dump.pcap"]).is_err());
        let cli = Cli::parse_from(["pcap_media_sniffer", "-f", "dump.pcap", "--trace-connection", "3"]);
        assert_eq!(cli.trace_connections(), Some(&[3][..]));
    }

    #[test]
    fn test_beep() {
        let cli = Cli::parse_from(["pcap_media_sniffer", "-b"]);
        assert!(cli.beep_enabled(true));
        assert!(!cli.beep_enabled(false));
        assert!(!Cli::parse_from(["pcap_media_sniffer", "-b", "-a"]).beep_enabled(true));
        assert!(!Cli::parse_from(["pcap_media_sniffer"]).beep_enabled(true));
    }
}
