//! Splitting an image into erase and write commands.
//!
//! Flash is erased in 64-byte rows and written in 8-byte blocks. One erase
//! command covers at most [`MAX_ERASE_ROWS`] rows and one write command
//! carries at most one 64-byte cluster.

use crate::image::hex::ERASED_BYTE;

/// Smallest erasable unit.
pub const ERASE_ROW_SIZE: usize = 64;

/// Rows per erase command.
///
/// The controller misreads an erase whose low length byte is zero (it
/// drops to its prompt instead), so a single command stays below 256 rows.
pub const MAX_ERASE_ROWS: usize = 128;

/// Atomic write unit.
pub const WRITE_BLOCK_SIZE: usize = 8;

/// Bytes per write command.
pub const WRITE_CLUSTER_SIZE: usize = 64;

/// Blocks per write command.
pub const BLOCKS_PER_CLUSTER: usize = WRITE_CLUSTER_SIZE / WRITE_BLOCK_SIZE;

/// One erase command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EraseChunk {
    /// First address to erase.
    pub address: u32,
    /// Rows covered, `1..=MAX_ERASE_ROWS`.
    pub rows: u8,
}

impl EraseChunk {
    /// Bytes covered by this chunk.
    pub fn len(&self) -> usize {
        usize::from(self.rows) * ERASE_ROW_SIZE
    }

    /// Always false; a chunk covers at least one row.
    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }
}

/// One write command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteCluster {
    /// Block-aligned start address.
    pub address: u32,
    /// Blocks carried, `1..=BLOCKS_PER_CLUSTER`.
    pub blocks: u8,
    /// `blocks * WRITE_BLOCK_SIZE` bytes.
    pub data: Vec<u8>,
}

/// Rows needed to cover `length` bytes.
pub fn erase_rows_for(length: usize) -> usize {
    length.div_ceil(ERASE_ROW_SIZE)
}

/// Erase commands for `total_rows` rows starting at `address`, lowest
/// address first.
#[allow(clippy::cast_possible_truncation)]
pub fn plan_erase(address: u32, total_rows: usize) -> Vec<EraseChunk> {
    let mut chunks = Vec::with_capacity(total_rows.div_ceil(MAX_ERASE_ROWS));
    let mut remaining = total_rows;
    let mut current = address;

    while remaining > 0 {
        let rows = remaining.min(MAX_ERASE_ROWS);
        remaining -= rows;
        chunks.push(EraseChunk {
            address: current,
            rows: rows as u8,
        });
        current += (rows * ERASE_ROW_SIZE) as u32;
    }

    chunks
}

/// Pad `code` with erased bytes on both sides so it starts and ends on a
/// block boundary. Returns the aligned start address and the padded bytes.
///
/// Padding is harmless: writing `0xFF` over erased flash changes nothing.
#[allow(clippy::cast_possible_truncation)]
pub fn align_to_blocks(address: u32, code: &[u8]) -> (u32, Vec<u8>) {
    let lead = address as usize % WRITE_BLOCK_SIZE;
    let padded_len = (lead + code.len()).div_ceil(WRITE_BLOCK_SIZE) * WRITE_BLOCK_SIZE;

    let mut padded = Vec::with_capacity(padded_len);
    padded.resize(lead, ERASED_BYTE);
    padded.extend_from_slice(code);
    padded.resize(padded_len, ERASED_BYTE);

    (address - lead as u32, padded)
}

/// Write commands for `code` placed at `address`.
#[allow(clippy::cast_possible_truncation)]
pub fn plan_write(address: u32, code: &[u8]) -> Vec<WriteCluster> {
    let (aligned, padded) = align_to_blocks(address, code);

    padded
        .chunks(WRITE_CLUSTER_SIZE)
        .enumerate()
        .map(|(i, chunk)| WriteCluster {
            address: aligned + (i * WRITE_CLUSTER_SIZE) as u32,
            blocks: (chunk.len() / WRITE_BLOCK_SIZE) as u8,
            data: chunk.to_vec(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_erase_10000_bytes() {
        let rows = erase_rows_for(10_000);
        assert_eq!(rows, 157);

        let chunks = plan_erase(0x0800, rows);
        assert_eq!(
            chunks,
            vec![
                EraseChunk { address: 0x0800, rows: 128 },
                EraseChunk { address: 0x0800 + 128 * 64, rows: 29 },
            ]
        );
        assert!(chunks.iter().all(|c| usize::from(c.rows) <= MAX_ERASE_ROWS));
    }

    #[test]
    fn test_erase_exact_multiple() {
        let chunks = plan_erase(0x0800, 256);
        assert_eq!(chunks.len(), 2);
        assert!(chunks.iter().all(|c| c.rows == 128));
        assert_eq!(chunks[1].address, 0x2800);
    }

    #[test]
    fn test_erase_rounds_up_partial_row() {
        assert_eq!(erase_rows_for(1), 1);
        assert_eq!(erase_rows_for(64), 1);
        assert_eq!(erase_rows_for(65), 2);
        assert_eq!(erase_rows_for(0), 0);
        assert!(plan_erase(0x0800, 0).is_empty());
    }

    #[test]
    fn test_align_already_aligned() {
        let (address, padded) = align_to_blocks(0x0800, &[1; 16]);
        assert_eq!(address, 0x0800);
        assert_eq!(padded, vec![1; 16]);
    }

    #[test]
    fn test_write_130_bytes_mid_block() {
        let code: Vec<u8> = (0..130).map(|i| (i % 200) as u8).collect();
        let clusters = plan_write(0x0803, &code);

        // 3 lead bytes + 130 code bytes = 133, padded to 136 (17 blocks).
        let total: usize = clusters.iter().map(|c| c.data.len()).sum();
        assert_eq!(total, 136);
        assert_eq!(clusters.len(), 3);
        assert_eq!(
            clusters.iter().map(|c| c.blocks).collect::<Vec<_>>(),
            vec![8, 8, 1]
        );
        assert_eq!(
            clusters.iter().map(|c| c.address).collect::<Vec<_>>(),
            vec![0x0800, 0x0840, 0x0880]
        );

        let first = &clusters[0].data;
        assert_eq!(&first[..3], &[0xFF; 3]);
        assert_eq!(&first[3..8], &code[..5]);

        let last = &clusters[2].data;
        assert_eq!(last.len(), WRITE_BLOCK_SIZE);
        assert_eq!(&last[..5], &code[125..]);
        assert_eq!(&last[5..], &[0xFF; 3]);

        for cluster in &clusters {
            assert!(usize::from(cluster.blocks) <= BLOCKS_PER_CLUSTER);
            assert_eq!(cluster.data.len(), usize::from(cluster.blocks) * WRITE_BLOCK_SIZE);
            assert_eq!(cluster.address as usize % WRITE_BLOCK_SIZE, 0);
        }
    }

    #[test]
    fn test_write_single_byte() {
        let clusters = plan_write(0x0807, &[0x42]);
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].address, 0x0800);
        assert_eq!(clusters[0].blocks, 1);
        assert_eq!(clusters[0].data, vec![0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x42]);
    }

    #[test]
    fn test_write_full_clusters() {
        let clusters = plan_write(0x0800, &[0u8; 128]);
        assert_eq!(clusters.len(), 2);
        assert!(clusters.iter().all(|c| c.blocks == 8));
    }
}
