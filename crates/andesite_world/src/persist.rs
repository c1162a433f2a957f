//! Column serialization: the zlib-compressed grid payload shared by the
//! binary store and the column packet, plus the versioned blob wrapper.

use std::io::{Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use thiserror::Error;

use crate::block::{Block, ColumnId, BLOCKS_PER_COLUMN, COLUMN_WIDTH};
use crate::column::{ColumnGrid, ColumnState};

pub(crate) const BLOB_VERSION: u8 = 1;

const STATE_GENERATED: u8 = 0;
const STATE_POPULATED: u8 = 1;

const BIOME_BYTES: usize = COLUMN_WIDTH * COLUMN_WIDTH;
const RAW_GRID_BYTES: usize = BLOCKS_PER_COLUMN * 4 + BIOME_BYTES;

#[derive(Debug, Error)]
pub(crate) enum BlobError {
    #[error("unsupported column blob version {0}")]
    BadVersion(u8),
    #[error("unknown column state byte {0}")]
    BadState(u8),
    #[error("blob truncated")]
    Truncated,
    #[error("decompressed payload has wrong size {0}")]
    WrongSize(usize),
    #[error("inflate failed: {0}")]
    Inflate(#[from] std::io::Error),
}

/// Key of a column in the binary-blob namespace.
pub(crate) fn column_key(id: ColumnId) -> String {
    format!("col_{}_{}_{}", id.dimension, id.x, id.z)
}

/// The zlib-compressed packed grid, also used verbatim as the column
/// packet payload.
pub(crate) fn encode_grid(grid: &ColumnGrid) -> Vec<u8> {
    let mut raw = Vec::with_capacity(RAW_GRID_BYTES);

    if grid.blocks.is_empty() {
        let air = Block::AIR.pack();
        for _ in 0..BLOCKS_PER_COLUMN {
            raw.extend_from_slice(&air);
        }
    } else {
        for block in &grid.blocks {
            raw.extend_from_slice(&block.pack());
        }
    }

    raw.extend_from_slice(&grid.biomes);

    let mut z = ZlibEncoder::new(Vec::new(), Compression::new(4));
    // Writing into a Vec cannot fail.
    z.write_all(&raw).and_then(|()| z.finish()).unwrap_or_default()
}

pub(crate) fn decode_grid(data: &[u8]) -> Result<ColumnGrid, BlobError> {
    let mut raw = Vec::with_capacity(RAW_GRID_BYTES);
    // Bound reads so a hostile blob cannot balloon memory.
    let mut z = ZlibDecoder::new(data).take(RAW_GRID_BYTES as u64 + 1);
    z.read_to_end(&mut raw)?;

    if raw.len() != RAW_GRID_BYTES {
        return Err(BlobError::WrongSize(raw.len()));
    }

    let mut blocks = Vec::with_capacity(BLOCKS_PER_COLUMN);
    for chunk in raw[..BLOCKS_PER_COLUMN * 4].chunks_exact(4) {
        blocks.push(Block::unpack([chunk[0], chunk[1], chunk[2], chunk[3]]));
    }

    let mut biomes = [0; BIOME_BYTES];
    biomes.copy_from_slice(&raw[BLOCKS_PER_COLUMN * 4..]);

    Ok(ColumnGrid { blocks, biomes })
}

/// Serializes a column for the binary store: version byte, state byte,
/// compressed grid.
pub(crate) fn serialize_column(state: ColumnState, grid: &ColumnGrid) -> Vec<u8> {
    let state_byte = if state >= ColumnState::Populated {
        STATE_POPULATED
    } else {
        STATE_GENERATED
    };

    let mut out = vec![BLOB_VERSION, state_byte];
    out.extend_from_slice(&encode_grid(grid));
    out
}

pub(crate) fn deserialize_column(bytes: &[u8]) -> Result<(ColumnState, ColumnGrid), BlobError> {
    let [version, state_byte, payload @ ..] = bytes else {
        return Err(BlobError::Truncated);
    };

    if *version != BLOB_VERSION {
        return Err(BlobError::BadVersion(*version));
    }

    let state = match *state_byte {
        STATE_GENERATED => ColumnState::Generated,
        STATE_POPULATED => ColumnState::Populated,
        other => return Err(BlobError::BadState(other)),
    };

    Ok((state, decode_grid(payload)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_grid() -> ColumnGrid {
        let mut grid = ColumnGrid::air();
        grid.blocks[0] = Block::new(1, 0);
        grid.blocks[4095] = Block::new(3, 7);
        grid.biomes[17] = 4;
        grid
    }

    #[test]
    fn round_trip() {
        let grid = sample_grid();
        let blob = serialize_column(ColumnState::Populated, &grid);

        let (state, decoded) = deserialize_column(&blob).unwrap();
        assert_eq!(state, ColumnState::Populated);
        assert_eq!(decoded.blocks[0], Block::new(1, 0));
        assert_eq!(decoded.blocks[4095], Block::new(3, 7));
        assert_eq!(decoded.biomes[17], 4);
    }

    #[test]
    fn generated_state_survives() {
        let blob = serialize_column(ColumnState::Generated, &ColumnGrid::air());
        let (state, _) = deserialize_column(&blob).unwrap();
        assert_eq!(state, ColumnState::Generated);
    }

    #[test]
    fn rejects_junk() {
        assert!(matches!(
            deserialize_column(&[]),
            Err(BlobError::Truncated)
        ));
        assert!(matches!(
            deserialize_column(&[99, 0, 1, 2, 3]),
            Err(BlobError::BadVersion(99))
        ));
        assert!(matches!(
            deserialize_column(&[BLOB_VERSION, 9, 1, 2, 3]),
            Err(BlobError::BadState(9))
        ));
        assert!(deserialize_column(&[BLOB_VERSION, 0, 1, 2, 3]).is_err());
    }

    #[test]
    fn compression_actually_compresses() {
        // An all-air column is extremely repetitive; the blob must come in
        // far below the raw quarter-megabyte grid.
        let blob = serialize_column(ColumnState::Generated, &ColumnGrid::air());
        assert!(blob.len() < BLOCKS_PER_COLUMN / 10);
    }
}
