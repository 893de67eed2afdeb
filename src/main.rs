/*
 * @copyright (C) 2024 Ruslan Iusupov <https://github.com/rus0000>
 *
 * SPDX-License-Identifier: MIT
 */
use std::error::Error;
use std::io;
use std::process;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::thread;

use clap::Parser;

use pcap_media_sniffer::{capture, output::prepare_directory, Cli, FileOutput, MediaExtractor, PcapStreamAssembler};

fn main() {
    let cli = Cli::parse();

    // stdout belongs to adjunct mode announcements.
    let log_level = match cli.verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    if let Err(error) = run(&cli) {
        eprintln!("error: {}", error);
        process::exit(1);
    }
}

fn run(cli: &Cli) -> Result<(), Box<dyn Error>> {
    let directory = prepare_directory(cli.directory.as_deref())?;
    let mut capture = capture::open(&cli.capture_config())?;
    let mut assembler = PcapStreamAssembler::new(capture.get_datalink().0, cli.assembler_config(), cli.trace_connections())?;

    let file_output = FileOutput::new(cli.output_config(directory));
    if !cli.adjunct {
        tracing::warn!("saving files in {}", file_output.directory().display());
    }
    let mut extractor = MediaExtractor::new(cli.media_kinds(), file_output);

    let running = Arc::new(AtomicBool::new(true));
    let running_clone = running.clone();
    ctrlc::set_handler(move || {
        if capture::request_stop(&running_clone) {
            // Capture thread is stuck in a blocking read, e.g. on a named pipe.
            tracing::warn!("second interrupt, exiting without draining connections");
            process::exit(130);
        }
        tracing::warn!("interrupt received, stopping capture, interrupt again to exit at once");
    })?;

    // Capture thread is the only one touching the assembler, the ctrlc handler thread only flips the flag.
    let capture_result = thread::scope(|scope| {
        let capture_thread = thread::Builder::new().name(String::from("capture")).spawn_scoped(scope, || {
            capture::run(&mut capture, &mut assembler, &running, &mut |consumable_tcp_payload, connection_id, tcp_connection| {
                extractor.extract(consumable_tcp_payload, connection_id, tcp_connection)
            })
        })?;
        capture_thread.join().map_err(|_| Box::<dyn Error>::from("capture thread panicked"))?.map_err(Box::<dyn Error>::from)
    });

    extractor.sink_mut().close();
    tracing::info!("{}", assembler.stats());
    tracing::info!(
        "{} objects extracted, {} saved, {} dropped",
        extractor.extracted_objects(),
        extractor.sink().saved_files(),
        extractor.sink().dropped_objects()
    );

    capture_result
}
