/// Weights are never zero; mutations collapsing below `eps` delete the entry.
pub const FLAG_NONZERO: u32 = 0x0000_0001;
/// Weights are always strictly positive (implies [`FLAG_NONZERO`]).
pub const FLAG_POSITIVE: u32 = 0x0000_0002;
/// Edges are directed; without it every edge is mirrored.
pub const FLAG_DIRECTED: u32 = 0x0000_0004;
/// Object belongs to a streaming ingest source.
pub const FLAG_STREAMING: u32 = 0x0000_0008;
/// Timeline hint: the successor snapshot must be reloaded.
pub const FLAG_LOAD_NEXT: u32 = 0x0000_0010;
/// Timeline hint: the predecessor snapshot must be reloaded.
pub const FLAG_LOAD_PREV: u32 = 0x0000_0020;
/// All mutating operations fail with `ReadOnly`.
pub const FLAG_READONLY: u32 = 0x0000_0040;

/// Flags that describe transient state rather than content; stripped by
/// `save_binary` and by `Clone`.
pub(crate) const FLAGS_TRANSIENT: u32 = FLAG_LOAD_NEXT | FLAG_LOAD_PREV | FLAG_READONLY;

/// Upper bound on each bucket-bit exponent.
pub(crate) const MAX_BITS: u32 = 31;

/// A single sparse vector entry.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Entry1 {
    pub index: u64,
    pub weight: f32,
}

/// A single stored edge. Undirected graphs store both orientations of an
/// off-diagonal edge, so iteration over raw entries sees each pair twice.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Entry2 {
    pub source: u64,
    pub target: u64,
    pub weight: f32,
}
