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

//! Peer-side reassembly of streamed photos.

use std::collections::HashMap;
use tracing::{debug, warn};

use super::protocol::{PhotoData, MAX_CHUNK_LEN};

struct PartialPhoto {
    file_size: u32,
    chunks: Vec<Option<Vec<u8>>>,
    received: usize,
}

impl PartialPhoto {
    fn new(file_size: u32, chunk_count: u8) -> Self {
        Self {
            file_size,
            chunks: vec![None; chunk_count as usize],
            received: 0,
        }
    }

    fn matches(&self, chunk: &PhotoData) -> bool {
        self.file_size == chunk.file_size && self.chunks.len() == chunk.chunk_count as usize
    }
}

/// Collects [`PhotoData`] chunks into complete files.
///
/// Chunks may arrive in any order and more than once, since the droid keeps
/// cycling through a photo until told to stop.
#[derive(Default)]
pub struct PhotoAssembler {
    photos: HashMap<u8, PartialPhoto>,
}

impl PhotoAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store one chunk.
    ///
    /// Returns the complete file once every chunk of the photo has arrived.
    pub fn process_chunk(&mut self, chunk: &PhotoData) -> Option<Vec<u8>> {
        if chunk.chunk_count == 0 || chunk.chunk >= chunk.chunk_count {
            warn!(
                "Chunk {} out of range for photo {} ({} chunks)",
                chunk.chunk, chunk.index, chunk.chunk_count
            );
            return None;
        }
        if chunk.data.len() > MAX_CHUNK_LEN {
            warn!("Oversized chunk for photo {}", chunk.index);
            return None;
        }

        let photo = self
            .photos
            .entry(chunk.index)
            .or_insert_with(|| PartialPhoto::new(chunk.file_size, chunk.chunk_count));

        if !photo.matches(chunk) {
            debug!("Photo {} changed size, restarting", chunk.index);
            *photo = PartialPhoto::new(chunk.file_size, chunk.chunk_count);
        }

        let slot = &mut photo.chunks[chunk.chunk as usize];
        if slot.is_none() {
            photo.received += 1;
        }
        *slot = Some(chunk.data.clone());

        if photo.received < photo.chunks.len() {
            return None;
        }

        let photo = self.photos.remove(&chunk.index)?;
        let bytes: Vec<u8> = photo.chunks.into_iter().flatten().flatten().collect();
        if bytes.len() != photo.file_size as usize {
            warn!(
                "Photo {} assembled to {} bytes, expected {}",
                chunk.index,
                bytes.len(),
                photo.file_size
            );
            return None;
        }

        debug!("Photo {} complete: {} bytes", chunk.index, bytes.len());
        Some(bytes)
    }

    /// Chunks of photo `index` still outstanding.
    pub fn missing(&self, index: u8) -> Vec<u8> {
        self.photos
            .get(&index)
            .map(|photo| {
                photo
                    .chunks
                    .iter()
                    .enumerate()
                    .filter(|(_, c)| c.is_none())
                    .map(|(i, _)| i as u8)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Drop all partial photos.
    pub fn reset(&mut self) {
        self.photos.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunks_of(index: u8, bytes: &[u8]) -> Vec<PhotoData> {
        let count = bytes.len().div_ceil(MAX_CHUNK_LEN) as u8;
        bytes
            .chunks(MAX_CHUNK_LEN)
            .enumerate()
            .map(|(i, data)| PhotoData {
                index,
                chunk: i as u8,
                chunk_count: count,
                file_size: bytes.len() as u32,
                data: data.to_vec(),
            })
            .collect()
    }

    #[test]
    fn test_in_order() {
        let bytes: Vec<u8> = (0..500).map(|i| i as u8).collect();
        let mut assembler = PhotoAssembler::new();
        let chunks = chunks_of(1, &bytes);

        assert!(assembler.process_chunk(&chunks[0]).is_none());
        assert!(assembler.process_chunk(&chunks[1]).is_none());
        assert_eq!(assembler.missing(1), vec![2]);
        assert_eq!(assembler.process_chunk(&chunks[2]), Some(bytes));
        assert!(assembler.missing(1).is_empty());
    }

    #[test]
    fn test_join_mid_stream() {
        // Listening starts partway through; the wrap fills in the rest.
        let bytes: Vec<u8> = (0..700).map(|i| (i % 13) as u8).collect();
        let mut assembler = PhotoAssembler::new();
        let chunks = chunks_of(0, &bytes);

        for chunk in &chunks[2..] {
            assert!(assembler.process_chunk(chunk).is_none());
        }
        assert!(assembler.process_chunk(&chunks[2]).is_none());
        assert!(assembler.process_chunk(&chunks[0]).is_none());
        assert_eq!(assembler.process_chunk(&chunks[1]), Some(bytes));
    }

    #[test]
    fn test_size_change_restarts() {
        let mut assembler = PhotoAssembler::new();
        let old = chunks_of(4, &[1u8; 300]);
        let new = chunks_of(4, &[2u8; 200]);

        assembler.process_chunk(&old[0]);
        assert!(assembler.process_chunk(&new[1]).is_none());
        assert_eq!(assembler.missing(4), vec![0]);
        assert_eq!(assembler.process_chunk(&new[0]), Some(vec![2u8; 200]));
    }

    #[test]
    fn test_rejects_out_of_range() {
        let mut assembler = PhotoAssembler::new();
        let mut chunk = chunks_of(0, &[0u8; 10]).remove(0);
        chunk.chunk = 1;
        assert!(assembler.process_chunk(&chunk).is_none());
        assert!(assembler.missing(0).is_empty());

        assembler.process_chunk(&chunks_of(0, &[0u8; 400])[0]);
        assembler.reset();
        assert!(assembler.missing(0).is_empty());
    }
}
