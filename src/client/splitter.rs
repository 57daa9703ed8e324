use std::io::SeekFrom;
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

/// One byte range of a source file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkRange {
    pub index: u32,
    pub offset: u64,
    pub len: u64,
}

/// Divide `size` bytes into consecutive ranges of `chunk_size` bytes.
///
/// Every range but the last is full. An empty file yields a single empty
/// range so it still goes through a session. A `chunk_size` of 0 is treated
/// as 1.
pub fn split(size: u64, chunk_size: u64) -> Vec<ChunkRange> {
    let chunk_size = chunk_size.max(1);
    if size == 0 {
        return vec![ChunkRange {
            index: 0,
            offset: 0,
            len: 0,
        }];
    }

    let count = size.div_ceil(chunk_size);
    (0..count)
        .map(|i| {
            let offset = i * chunk_size;
            ChunkRange {
                index: i as u32,
                offset,
                len: chunk_size.min(size - offset),
            }
        })
        .collect()
}

/// Read exactly the bytes of `range` from `path`
pub async fn read_chunk(path: &Path, range: &ChunkRange) -> std::io::Result<Vec<u8>> {
    let mut file = File::open(path).await?;
    file.seek(SeekFrom::Start(range.offset)).await?;
    let mut buf = vec![0u8; range.len as usize];
    file.read_exact(&mut buf).await?;
    Ok(buf)
}
