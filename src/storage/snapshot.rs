//! Single-graph binary snapshot format.
//!
//! Little-endian, packed: a 20-byte header (magic tag, version, flags with
//! the transient bits stripped, the two bucket-bit exponents), then one
//! record per bucket: `u64` entry count followed by 24-byte edge records
//! `(u64 source, u64 target, f32 weight, 4 pad bytes)`. The loader rebuilds
//! the bucket table directly from the header exponents and does not
//! re-optimize.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use tracing::debug;

use crate::error::{GraphError, Result};
use crate::model::{
    Entry2, FLAGS_TRANSIENT, FLAG_DIRECTED, FLAG_NONZERO, FLAG_POSITIVE, FLAG_STREAMING, MAX_BITS,
};
use crate::storage::bucket::{reserve_items, Bucket2};
use crate::storage::graph::Graph;

const FILE_TAG: u32 = 0x4747_5654; // "TVGG"
const FILE_VERSION: u32 = 1;
const FLAGS_PERSISTENT: u32 = FLAG_NONZERO | FLAG_POSITIVE | FLAG_DIRECTED | FLAG_STREAMING;

impl Graph {
    /// Writes the graph to `path`, stripping the transient load/readonly
    /// flag bits.
    pub fn save_binary(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let mut out = BufWriter::new(File::create(path)?);

        out.write_all(&FILE_TAG.to_le_bytes())?;
        out.write_all(&FILE_VERSION.to_le_bytes())?;
        out.write_all(&(self.flags() & !FLAGS_TRANSIENT).to_le_bytes())?;
        out.write_all(&self.bits_source().to_le_bytes())?;
        out.write_all(&self.bits_target().to_le_bytes())?;

        for bucket in self.buckets() {
            out.write_all(&(bucket.len() as u64).to_le_bytes())?;
            for entry in bucket.entries() {
                out.write_all(&entry.source.to_le_bytes())?;
                out.write_all(&entry.target.to_le_bytes())?;
                out.write_all(&entry.weight.to_le_bytes())?;
                out.write_all(&[0u8; 4])?;
            }
        }
        out.flush()?;

        debug!(
            path = %path.display(),
            edges = self.num_edges(),
            "graph.snapshot.saved"
        );
        Ok(())
    }

    /// Reads a graph previously written by [`Graph::save_binary`].
    pub fn load_binary(path: impl AsRef<Path>) -> Result<Graph> {
        let path = path.as_ref();
        let mut input = BufReader::new(File::open(path)?);

        let tag = read_u32(&mut input)?;
        if tag != FILE_TAG {
            return Err(GraphError::Corruption(format!(
                "expected snapshot tag {FILE_TAG:#010x}, got {tag:#010x}"
            )));
        }
        let version = read_u32(&mut input)?;
        if version != FILE_VERSION {
            return Err(GraphError::Corruption(format!(
                "unsupported snapshot version {version}"
            )));
        }
        let flags = read_u32(&mut input)?;
        if flags & !FLAGS_PERSISTENT != 0 {
            return Err(GraphError::Corruption(format!(
                "unsupported snapshot flags {flags:#x}"
            )));
        }
        let bits_source = read_u32(&mut input)?;
        let bits_target = read_u32(&mut input)?;
        if bits_source > MAX_BITS || bits_target > MAX_BITS {
            return Err(GraphError::Corruption(format!(
                "snapshot too large to map: {bits_source}+{bits_target} bucket bits"
            )));
        }

        let mut flags = flags;
        if flags & FLAG_POSITIVE != 0 {
            flags |= FLAG_NONZERO;
        }

        let num_buckets = 1usize << (bits_source + bits_target);
        let mut buckets = Vec::new();
        reserve_items(&mut buckets, num_buckets)?;
        for _ in 0..num_buckets {
            let num_entries = read_u64(&mut input)?;
            let num_entries = usize::try_from(num_entries)
                .map_err(|_| GraphError::Corruption("bucket entry count overflow".into()))?;
            let mut bucket = Bucket2::default();
            if num_entries > 0 {
                let mut entries = Vec::new();
                reserve_items(&mut entries, num_entries)?;
                for _ in 0..num_entries {
                    entries.push(read_entry(&mut input)?);
                }
                bucket = Bucket2::from_sorted(entries);
            }
            buckets.push(bucket);
        }

        let graph = Graph::from_raw_parts(flags, bits_source, bits_target, buckets);
        debug!(
            path = %path.display(),
            edges = graph.num_edges(),
            "graph.snapshot.loaded"
        );
        Ok(graph)
    }
}

fn read_u32(input: &mut impl Read) -> Result<u32> {
    let mut buf = [0u8; 4];
    input.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_u64(input: &mut impl Read) -> Result<u64> {
    let mut buf = [0u8; 8];
    input.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

fn read_entry(input: &mut impl Read) -> Result<Entry2> {
    let mut buf = [0u8; 24];
    input.read_exact(&mut buf)?;
    let source = u64::from_le_bytes([
        buf[0], buf[1], buf[2], buf[3], buf[4], buf[5], buf[6], buf[7],
    ]);
    let target = u64::from_le_bytes([
        buf[8], buf[9], buf[10], buf[11], buf[12], buf[13], buf[14], buf[15],
    ]);
    let weight = f32::from_le_bytes([buf[16], buf[17], buf[18], buf[19]]);
    Ok(Entry2 {
        source,
        target,
        weight,
    })
}
