// Copyright PingCAP Inc. 2025.
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; version 2 of the License.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

use reed_solomon_erasure::galois_8::ReedSolomon;

use crate::observability::metrics;
use crate::storage::StorageError;

/// Reed-Solomon erasure codec over GF(2^8). A block becomes `k + m`
/// equal-length shards; any `k` of them reconstruct the block exactly.
pub struct Erasure {
    rs: Option<ReedSolomon>,
    data_shards: usize,
    parity_shards: usize,
}

impl Erasure {
    pub fn new(data_shards: usize, parity_shards: usize) -> Result<Self, StorageError> {
        if data_shards == 0 {
            return Err(StorageError::InvalidArgument(
                "data shard count must be > 0".into(),
            ));
        }
        if data_shards + parity_shards > 255 {
            return Err(StorageError::InvalidArgument(format!(
                "total shard count {} exceeds the GF(2^8) limit of 255",
                data_shards + parity_shards
            )));
        }
        // Zero parity degenerates to plain striping.
        let rs = if parity_shards == 0 {
            None
        } else {
            Some(
                ReedSolomon::new(data_shards, parity_shards)
                    .map_err(|e| StorageError::Codec(e.to_string()))?,
            )
        };
        Ok(Self {
            rs,
            data_shards,
            parity_shards,
        })
    }

    pub fn data_shards(&self) -> usize {
        self.data_shards
    }

    pub fn parity_shards(&self) -> usize {
        self.parity_shards
    }

    pub fn total_shards(&self) -> usize {
        self.data_shards + self.parity_shards
    }

    /// Shard length produced for a block of `block_len` bytes.
    pub fn encoded_shard_len(&self, block_len: usize) -> usize {
        block_len.div_ceil(self.data_shards)
    }

    /// Split a block into `k` zero-padded data shards and compute `m`
    /// parity shards. Deterministic for a given `(k, m, block)`.
    pub fn encode(&self, block: &[u8]) -> Result<Vec<Vec<u8>>, StorageError> {
        if block.is_empty() {
            return Err(StorageError::InvalidArgument(
                "cannot encode an empty block".into(),
            ));
        }
        let start = std::time::Instant::now();

        let shard_len = self.encoded_shard_len(block.len());
        let mut shards: Vec<Vec<u8>> = Vec::with_capacity(self.total_shards());
        for i in 0..self.data_shards {
            let lo = i * shard_len;
            let mut shard = if lo < block.len() {
                let hi = block.len().min(lo + shard_len);
                block[lo..hi].to_vec()
            } else {
                Vec::new()
            };
            shard.resize(shard_len, 0);
            shards.push(shard);
        }
        for _ in 0..self.parity_shards {
            shards.push(vec![0u8; shard_len]);
        }

        if let Some(rs) = &self.rs {
            rs.encode(&mut shards)
                .map_err(|e| StorageError::Codec(e.to_string()))?;
        }

        let duration = start.elapsed().as_secs_f64();
        metrics::record_erasure_encode(self.data_shards, self.parity_shards, duration);
        metrics::increment_erasure_bytes("encode", block.len() as u64);

        tracing::debug!(
            data_shards = self.data_shards,
            parity_shards = self.parity_shards,
            input_bytes = block.len(),
            shard_len,
            "encoded block"
        );
        Ok(shards)
    }

    /// Reconstruct the original `block_len` bytes from ≥ `k` shards at
    /// their correct indices; missing shards are `None` slots.
    pub fn decode(
        &self,
        shards: &mut [Option<Vec<u8>>],
        block_len: usize,
    ) -> Result<Vec<u8>, StorageError> {
        if shards.len() != self.total_shards() {
            return Err(StorageError::InvalidArgument(format!(
                "expected {} shard slots, got {}",
                self.total_shards(),
                shards.len()
            )));
        }
        let start = std::time::Instant::now();

        let available = shards.iter().filter(|s| s.is_some()).count();
        if available < self.data_shards {
            return Err(StorageError::InsufficientShards {
                available,
                required: self.data_shards,
            });
        }

        if let Some(rs) = &self.rs {
            rs.reconstruct_data(shards)
                .map_err(|e| StorageError::Codec(e.to_string()))?;
        }

        let mut block = Vec::with_capacity(block_len);
        for shard in shards.iter().take(self.data_shards) {
            let shard = shard.as_ref().ok_or(StorageError::InsufficientShards {
                available,
                required: self.data_shards,
            })?;
            block.extend_from_slice(shard);
        }
        block.truncate(block_len);

        let duration = start.elapsed().as_secs_f64();
        metrics::record_erasure_decode(self.data_shards, self.parity_shards, duration);
        metrics::increment_erasure_bytes("decode", block_len as u64);

        tracing::debug!(
            data_shards = self.data_shards,
            parity_shards = self.parity_shards,
            output_bytes = block_len,
            available,
            "decoded block"
        );
        Ok(block)
    }
}

/// Derive (data, parity) shard counts from the number of backing disks.
/// Odd counts favor data: k = ceil(N/2), m = floor(N/2).
pub fn data_and_parity(total_disks: usize) -> Result<(u8, u8), StorageError> {
    if total_disks <= 1 {
        return Err(StorageError::InvalidArgument(format!(
            "erasure coding requires more than one disk, got {total_disks}"
        )));
    }
    let quotient = total_disks / 2;
    if quotient > 127 {
        return Err(StorageError::ParityOverflow { parity: quotient });
    }
    let remainder = total_disks % 2;
    Ok(((quotient + remainder) as u8, quotient as u8))
}
