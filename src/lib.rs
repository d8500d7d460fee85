//! # exflate
//!
//! An exhaustive DEFLATE (RFC 1951) encoder. It trades encoding time for
//! output size: a cost-driven shortest-path search over LZ77 parses,
//! iterated against its own Huffman statistics, with exact-size block
//! splitting and bit-exact emission. The output is a raw DEFLATE stream any
//! conformant inflater decodes.
//!
//! ## Features
//!
//! - **Zero runtime dependencies**
//! - **Optimal parsing**: shortest-path LZ77 over a rolling-hash match
//!   engine with a per-position match cache
//! - **Length-limited Huffman codes** via boundary package-merge
//! - **Cost-minimizing block splitting** and per-block type selection
//! - **Deterministic**: identical input and options give identical bytes
//!
//! ## Example
//!
//! ```rust
//! use exflate::{compress, Options};
//!
//! let data = b"hello hello hello hello";
//! let compressed = compress(data, &Options::default()).unwrap();
//! assert!(!compressed.is_empty());
//! ```
//!
//! Compression is batch: the whole input must be in memory. Decompression,
//! gzip/zlib framing, and streaming are out of scope.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod bits;
pub mod blocks;
pub mod cache;
pub mod deflate;
pub mod error;
pub mod hash;
pub mod huffman;
pub mod lz77;
pub mod squeeze;
pub mod symbols;

pub use bits::BitWriter;
pub use deflate::{compress, deflate, BlockType, Options};
pub use error::{Error, Result};
