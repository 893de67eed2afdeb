/*
 * @copyright (C) 2024 Ruslan Iusupov <https://github.com/rus0000>
 *
 * SPDX-License-Identifier: MIT
 */
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender, TrySendError};
use thiserror::Error;

use crate::{
    config::OutputConfig,
    media::{MediaObject, MediaSink},
};

#[derive(Debug, Error)]
pub enum OutputError {
    #[error("output io error: {0}")]
    Io(#[from] io::Error),
    #[error("{0}: not a directory")]
    NotADirectory(PathBuf),
}

/// Existing output directory, or a fresh temporary one which is kept after exit.
pub fn prepare_directory(directory: Option<&Path>) -> Result<PathBuf, OutputError> {
    match directory {
        Some(directory) => {
            let metadata = fs::metadata(directory)?;
            if !metadata.is_dir() {
                return Err(OutputError::NotADirectory(directory.to_path_buf()));
            }
            if metadata.permissions().readonly() {
                return Err(OutputError::Io(io::Error::new(
                    io::ErrorKind::PermissionDenied,
                    format!("{}: not writable", directory.display()),
                )));
            }
            Ok(directory.to_path_buf())
        }
        None => Ok(tempfile::Builder::new().prefix("driftnet-").tempdir()?.into_path()),
    }
}

/// Writes each object into its own file and announces the path to a separate thread,
/// which prints it on stdout (adjunct mode) or logs it.
/// * Capture thread never waits for the announcer, the newest announcement is dropped when the channel is full.
#[derive(Debug)]
pub struct FileOutput {
    config: OutputConfig,
    sequence: u64,
    announce_sender: Option<Sender<PathBuf>>,
    announcer: Option<JoinHandle<()>>,
    saved_files: u64,
    dropped_objects: u64,
}

impl FileOutput {
    pub fn new(config: OutputConfig) -> Self {
        let (announce_sender, announce_receiver) = crossbeam_channel::bounded(config.announce_capacity.max(1));
        let (adjunct, beep) = (config.adjunct, config.beep && !config.adjunct);
        let announcer = thread::Builder::new()
            .name(String::from("announcer"))
            .spawn(move || announce(announce_receiver, adjunct, beep));
        let announcer = match announcer {
            Ok(announcer) => Some(announcer),
            Err(error) => {
                tracing::error!(%error, "cannot start announcer thread, saved files will not be announced");
                None
            }
        };

        Self {
            config,
            sequence: 0,
            announce_sender: announcer.as_ref().map(|_| announce_sender),
            announcer,
            saved_files: 0,
            dropped_objects: 0,
        }
    }

    pub fn directory(&self) -> &Path {
        &self.config.directory
    }

    pub fn saved_files(&self) -> u64 {
        self.saved_files
    }

    pub fn dropped_objects(&self) -> u64 {
        self.dropped_objects
    }

    /// Files with our prefix still waiting in the directory for another process to collect them.
    fn pending_files(&self) -> io::Result<usize> {
        let mut pending = 0;
        for entry in fs::read_dir(&self.config.directory)? {
            if entry?.file_name().to_string_lossy().starts_with(&self.config.prefix) {
                pending += 1;
            }
        }
        Ok(pending)
    }

    fn is_full(&self) -> bool {
        let Some(max_files) = self.config.max_files.filter(|_| self.config.adjunct) else {
            return false;
        };
        match self.pending_files() {
            Ok(pending) => pending >= max_files,
            Err(error) => {
                tracing::warn!(%error, "cannot count files in {}", self.config.directory.display());
                false
            }
        }
    }

    fn save(&mut self, media_object: &MediaObject) -> io::Result<PathBuf> {
        self.sequence += 1;
        let file_name = format!(
            "{}{:08}-{}.{}",
            self.config.prefix,
            self.sequence,
            media_object.connection_id,
            media_object.format.extension()
        );
        let path = self.config.directory.join(file_name);
        fs::write(&path, &media_object.data)?;

        Ok(path)
    }

    /// Stop the announcer after it printed everything queued.
    pub fn close(&mut self) {
        self.announce_sender.take();
        if let Some(announcer) = self.announcer.take() {
            if announcer.join().is_err() {
                tracing::error!("announcer thread panicked");
            }
        }
    }
}

impl Drop for FileOutput {
    fn drop(&mut self) {
        self.close();
    }
}

impl MediaSink for FileOutput {
    fn deliver(&mut self, media_object: MediaObject) {
        if self.is_full() {
            self.dropped_objects += 1;
            tracing::debug!("[{}]: too many files waiting, {} dropped", media_object.connection_id, media_object.kind());
            return;
        }

        let path = match self.save(&media_object) {
            Ok(path) => path,
            Err(error) => {
                self.dropped_objects += 1;
                tracing::warn!(%error, "[{}]: cannot save {}", media_object.connection_id, media_object.kind());
                return;
            }
        };
        self.saved_files += 1;

        let Some(announce_sender) = self.announce_sender.as_ref() else {
            return;
        };
        match announce_sender.try_send(path) {
            Ok(()) => {}
            Err(TrySendError::Full(path)) => {
                tracing::trace!("announce channel full, dropping {}", path.display());
            }
            Err(TrySendError::Disconnected(path)) => {
                tracing::warn!("announcer is gone, {} not announced", path.display());
            }
        }
    }
}

fn announce(announce_receiver: Receiver<PathBuf>, adjunct: bool, beep: bool) {
    let stdout = io::stdout();
    for path in announce_receiver.iter() {
        if adjunct {
            // One path per line, flushed right away for the process reading us.
            let mut stdout = stdout.lock();
            if writeln!(stdout, "{}", path.display()).and_then(|_| stdout.flush()).is_err() {
                tracing::warn!("stdout is closed, stop announcing");
                return;
            }
        } else {
            tracing::info!("saved {}", path.display());
            if beep {
                let mut stdout = stdout.lock();
                if stdout.write_all(b"\x07").and_then(|_| stdout.flush()).is_err() {
                    tracing::warn!("stdout is closed, stop beeping");
                }
            }
        }
    }
}
