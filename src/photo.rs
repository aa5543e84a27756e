// Copyright 2026 Daniel Pelikan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Resumable chunked photo streaming.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info};

use crate::bluetooth::{PhotoData, MAX_CHUNK_LEN};

/// Bytes per chunk.
pub const CHUNK_SIZE: usize = MAX_CHUNK_LEN;

/// Largest file whose chunk count still fits the u8 wire field.
pub const MAX_PHOTO_SIZE: u64 = (u8::MAX as u64) * CHUNK_SIZE as u64;

/// Problems reading the photo being streamed.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("photo {index} missing at {}", path.display())]
    Missing { index: u8, path: PathBuf },

    #[error("photo {index} is {size} bytes, too large to stream")]
    TooLarge { index: u8, size: u64 },

    #[error("reading photo {index}: {source}")]
    Io {
        index: u8,
        #[source]
        source: io::Error,
    },
}

/// Location of the thumbnail for photo `index`.
pub fn thumbnail_path(dir: &Path, index: u8) -> PathBuf {
    dir.join(format!("thumb_{:03}.jpg", index))
}

/// Count photos already captured into `dir`, stopping at the first gap.
pub fn count_existing(dir: &Path) -> u16 {
    (0..=u8::MAX)
        .take_while(|&index| thumbnail_path(dir, index).exists())
        .count() as u16
}

/// Number of chunks needed for a file of `file_size` bytes.
pub fn chunk_count(file_size: u64) -> u64 {
    file_size.div_ceil(CHUNK_SIZE as u64)
}

/// Progress of the photo currently being streamed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhotoTransferState {
    pub index: u8,
    /// Next chunk to send.
    pub chunk: u8,
    pub chunk_count: u8,
    pub file_size: u32,
    /// Length of the last chunk read.
    pub chunk_len: usize,
}

impl PhotoTransferState {
    fn new(index: u8) -> Self {
        Self {
            index,
            chunk: 0,
            chunk_count: 0,
            file_size: 0,
            chunk_len: 0,
        }
    }
}

/// Reads photo thumbnails one chunk at a time.
pub struct PhotoStreamer {
    dir: PathBuf,
    transfer: Option<PhotoTransferState>,
    buffer: Vec<u8>,
}

impl PhotoStreamer {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            transfer: None,
            buffer: Vec::with_capacity(CHUNK_SIZE),
        }
    }

    pub fn is_streaming(&self) -> bool {
        self.transfer.is_some()
    }

    pub fn transfer(&self) -> Option<&PhotoTransferState> {
        self.transfer.as_ref()
    }

    /// Start streaming photo `index` from its first chunk.
    ///
    /// A repeated start for the photo already streaming keeps its progress.
    /// Returns whether a new transfer began.
    pub fn start(&mut self, index: u8) -> bool {
        if self.transfer.as_ref().map(|t| t.index) == Some(index) {
            debug!("Photo {} already streaming", index);
            return false;
        }

        info!("Streaming photo {}", index);
        self.transfer = Some(PhotoTransferState::new(index));
        true
    }

    /// Stop streaming and retire the transfer.
    pub fn stop(&mut self) {
        if let Some(transfer) = self.transfer.take() {
            info!(
                "Stopped streaming photo {} at chunk {}",
                transfer.index, transfer.chunk
            );
        }
    }

    /// Read the next chunk of the active photo.
    ///
    /// After the last chunk the transfer wraps back to chunk 0. On error the
    /// transfer stays at its current chunk so it resumes once the file is
    /// readable again.
    pub fn next_chunk(&mut self) -> Result<Option<PhotoData>, CaptureError> {
        let Some(transfer) = self.transfer.as_mut() else {
            return Ok(None);
        };
        let index = transfer.index;
        let path = thumbnail_path(&self.dir, index);
        let io_err = |source| CaptureError::Io { index, source };

        let mut file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(CaptureError::Missing { index, path });
            }
            Err(e) => return Err(io_err(e)),
        };

        let size = file.metadata().map_err(io_err)?.len();
        if size > MAX_PHOTO_SIZE {
            return Err(CaptureError::TooLarge { index, size });
        }
        if size == 0 {
            info!("Photo {} is empty, retiring transfer", index);
            self.transfer = None;
            return Ok(None);
        }

        let chunk_count = chunk_count(size) as u8;
        if transfer.chunk >= chunk_count {
            // File shrank since the last chunk.
            transfer.chunk = 0;
        }

        file.seek(SeekFrom::Start(transfer.chunk as u64 * CHUNK_SIZE as u64))
            .map_err(io_err)?;
        self.buffer.clear();
        (&mut file)
            .take(CHUNK_SIZE as u64)
            .read_to_end(&mut self.buffer)
            .map_err(io_err)?;

        transfer.chunk_count = chunk_count;
        transfer.file_size = size as u32;
        transfer.chunk_len = self.buffer.len();

        let chunk = PhotoData {
            index,
            chunk: transfer.chunk,
            chunk_count,
            file_size: size as u32,
            data: self.buffer.clone(),
        };

        transfer.chunk = if transfer.chunk + 1 >= chunk_count {
            debug!("Photo {} complete, wrapping to chunk 0", index);
            0
        } else {
            transfer.chunk + 1
        };

        Ok(Some(chunk))
    }
}
