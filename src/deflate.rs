//! DEFLATE stream emission and the outer compression pipeline.
//!
//! Turns optimized LZ77 stores into bit-exact RFC 1951 blocks: stored,
//! fixed, or dynamic with its run-length-encoded tree header. The
//! orchestration here splits the input, runs the iterated optimal parser per
//! range, picks the cheapest block type per sub-block, and emits.

use crate::bits::BitWriter;
use crate::blocks::{
    block_split, block_split_lz77, calculate_block_size, calculate_block_size_auto_type,
    get_dynamic_lengths,
};
use crate::error::{Error, Result};
use crate::huffman::{fixed_tree, length_limited_code_lengths, lengths_to_symbols};
use crate::lz77::{BlockState, Lz77Store, NUM_D, NUM_LL};
use crate::squeeze::{lz77_optimal, lz77_optimal_fixed};
use crate::symbols::{
    dist_extra_bits, dist_extra_value, dist_symbol, length_extra_bits, length_extra_value,
    length_symbol,
};

/// Inputs larger than this are compressed in independent master chunks to
/// bound the memory of per-position structures. Matches may still reach one
/// window back into the previous chunk.
const MASTER_BLOCK_SIZE: usize = 1_000_000;

/// Order in which code-length code lengths are stored (RFC 1951 §3.2.7).
const CLCL_ORDER: [usize; 19] = [16, 17, 18, 0, 8, 7, 9, 6, 10, 5, 11, 4, 12, 3, 13, 2, 14, 1, 15];

/// Encoder configuration.
#[derive(Debug, Clone)]
pub struct Options {
    /// Number of statistics-refinement passes of the optimal parser. More is
    /// slower and smaller; 15 is a good default, 5 still decent for big
    /// files.
    pub iterations: u32,
    /// Whether to search for block split points. Splitting gives better
    /// compression.
    pub block_splitting: bool,
    /// Maximum number of blocks to split into, 0 for unlimited. Extreme
    /// splitting can hurt on some files.
    pub block_splitting_max: usize,
    /// Budget for hash-chain walks in the longest-match search.
    pub max_chain_hits: usize,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            iterations: 15,
            block_splitting: true,
            block_splitting_max: 15,
            max_chain_hits: 8192,
        }
    }
}

impl Options {
    /// Checks that the configuration is usable.
    pub fn validate(&self) -> Result<()> {
        if self.iterations == 0 {
            return Err(Error::InvalidIterations(self.iterations));
        }
        if self.max_chain_hits == 0 {
            return Err(Error::InvalidChainHits(self.max_chain_hits));
        }
        Ok(())
    }
}

/// A DEFLATE block type. Passing `Stored` or `Fixed` to [`deflate`] forces
/// every block to that type; `Dynamic` enables the full search, which may
/// still choose stored or fixed blocks where they are smaller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockType {
    /// BTYPE 00: raw bytes with LEN/NLEN framing.
    Stored,
    /// BTYPE 01: the fixed Huffman trees of RFC 1951 §3.2.6.
    Fixed,
    /// BTYPE 10: per-block Huffman trees carried in the header.
    Dynamic,
}

/// Encodes the lit/len and distance code lengths (the dynamic block header
/// after HLIT/HDIST/HCLEN) with a chosen subset of the repeat symbols
/// {16, 17, 18}. Writes to `bw` when given; always returns the size in bits.
fn encode_tree(
    ll_lengths: &[u32; NUM_LL],
    d_lengths: &[u32; NUM_D],
    use_16: bool,
    use_17: bool,
    use_18: bool,
    mut bw: Option<&mut BitWriter>,
) -> usize {
    let size_only = bw.is_none();
    // (symbol, extra-bits value) pairs, in writing order.
    let mut rle: Vec<(usize, u32)> = Vec::new();
    let mut clcounts = [0usize; 19];

    let mut hlit = 29usize;
    while hlit > 0 && ll_lengths[257 + hlit - 1] == 0 {
        hlit -= 1;
    }
    let mut hdist = 29usize;
    while hdist > 0 && d_lengths[1 + hdist - 1] == 0 {
        hdist -= 1;
    }
    let hlit2 = hlit + 257;
    let lld_total = hlit2 + hdist + 1;

    let lengths_at = |i: usize| -> u32 {
        if i < hlit2 {
            ll_lengths[i]
        } else {
            d_lengths[i - hlit2]
        }
    };

    let mut i = 0usize;
    while i < lld_total {
        let symbol = lengths_at(i) as usize;
        let mut count = 1usize;
        if use_16 || (symbol == 0 && (use_17 || use_18)) {
            let mut j = i + 1;
            while j < lld_total && symbol as u32 == lengths_at(j) {
                count += 1;
                j += 1;
            }
        }
        i += count - 1;

        // Runs of zeros prefer the wide zero-repeat symbols.
        if symbol == 0 && count >= 3 {
            if use_18 {
                while count >= 11 {
                    let count2 = count.min(138);
                    if !size_only {
                        rle.push((18, (count2 - 11) as u32));
                    }
                    clcounts[18] += 1;
                    count -= count2;
                }
            }
            if use_17 {
                while count >= 3 {
                    let count2 = count.min(10);
                    if !size_only {
                        rle.push((17, (count2 - 3) as u32));
                    }
                    clcounts[17] += 1;
                    count -= count2;
                }
            }
        }

        // Repeats of any symbol; the first instance is coded verbatim.
        if use_16 && count >= 4 {
            count -= 1;
            clcounts[symbol] += 1;
            if !size_only {
                rle.push((symbol, 0));
            }
            while count >= 3 {
                let count2 = count.min(6);
                if !size_only {
                    rle.push((16, (count2 - 3) as u32));
                }
                clcounts[16] += 1;
                count -= count2;
            }
        }

        // Whatever remains is coded verbatim.
        clcounts[symbol] += count;
        while count > 0 {
            if !size_only {
                rle.push((symbol, 0));
            }
            count -= 1;
        }

        i += 1;
    }

    let clcl = length_limited_code_lengths(&clcounts, 7);

    let mut hclen = 15usize;
    while hclen > 0 && clcounts[CLCL_ORDER[hclen + 4 - 1]] == 0 {
        hclen -= 1;
    }

    if let Some(bw) = bw.as_deref_mut() {
        let clsymbols = lengths_to_symbols(&clcl, 7);

        bw.write_bits(hlit as u32, 5);
        bw.write_bits(hdist as u32, 5);
        bw.write_bits(hclen as u32, 4);

        for &o in &CLCL_ORDER[..hclen + 4] {
            bw.write_bits(clcl[o], 3);
        }

        for &(symbol, extra) in &rle {
            assert!(clcl[symbol] > 0, "used code-length symbol has no code");
            bw.write_huffman(clsymbols[symbol], clcl[symbol] as u8);
            match symbol {
                16 => bw.write_bits(extra, 2),
                17 => bw.write_bits(extra, 3),
                18 => bw.write_bits(extra, 7),
                _ => {}
            }
        }
    }

    let mut result = 14usize; // hlit, hdist, hclen
    result += (hclen + 4) * 3;
    for i in 0..19 {
        result += clcl[i] as usize * clcounts[i];
    }
    result += clcounts[16] * 2;
    result += clcounts[17] * 3;
    result += clcounts[18] * 7;
    result
}

/// The smallest tree-header size over the 8 repeat-symbol subsets.
pub(crate) fn calculate_tree_size(ll_lengths: &[u32; NUM_LL], d_lengths: &[u32; NUM_D]) -> usize {
    let mut result = usize::MAX;
    for mask in 0..8u8 {
        let size = encode_tree(
            ll_lengths,
            d_lengths,
            mask & 1 != 0,
            mask & 2 != 0,
            mask & 4 != 0,
            None,
        );
        result = result.min(size);
    }
    result
}

/// Writes the dynamic tree header using whichever repeat-symbol subset
/// encodes it smallest.
fn add_dynamic_tree(ll_lengths: &[u32; NUM_LL], d_lengths: &[u32; NUM_D], bw: &mut BitWriter) {
    let mut best = 0u8;
    let mut bestsize = usize::MAX;
    for mask in 0..8u8 {
        let size = encode_tree(
            ll_lengths,
            d_lengths,
            mask & 1 != 0,
            mask & 2 != 0,
            mask & 4 != 0,
            None,
        );
        if size < bestsize {
            bestsize = size;
            best = mask;
        }
    }
    encode_tree(
        ll_lengths,
        d_lengths,
        best & 1 != 0,
        best & 2 != 0,
        best & 4 != 0,
        Some(bw),
    );
}

/// Writes the Huffman-coded body of a block: every item plus the end symbol.
fn add_lz77_data(
    lz77: &Lz77Store,
    lstart: usize,
    lend: usize,
    ll_symbols: &[u32],
    ll_lengths: &[u32],
    d_symbols: &[u32],
    d_lengths: &[u32],
    bw: &mut BitWriter,
) {
    for i in lstart..lend {
        let dist = lz77.dists[i] as usize;
        let litlen = lz77.litlens[i] as usize;
        if dist == 0 {
            assert!(litlen < 256);
            assert!(ll_lengths[litlen] > 0, "used literal has no code");
            bw.write_huffman(ll_symbols[litlen], ll_lengths[litlen] as u8);
        } else {
            assert!((3..=258).contains(&litlen));
            let lsym = length_symbol(litlen);
            let dsym = dist_symbol(dist);
            assert!(ll_lengths[lsym] > 0, "used length symbol has no code");
            assert!(d_lengths[dsym] > 0, "used distance symbol has no code");

            bw.write_huffman(ll_symbols[lsym], ll_lengths[lsym] as u8);
            let lbits = length_extra_bits(litlen);
            if lbits > 0 {
                bw.write_bits(length_extra_value(litlen) as u32, lbits as u8);
            }

            bw.write_huffman(d_symbols[dsym], d_lengths[dsym] as u8);
            let dbits = dist_extra_bits(dist);
            if dbits > 0 {
                bw.write_bits(dist_extra_value(dist) as u32, dbits as u8);
            }
        }
    }
    assert!(ll_lengths[256] > 0);
    bw.write_huffman(ll_symbols[256], ll_lengths[256] as u8);
}

/// Writes `input[instart..inend)` as stored blocks, at most 65535 bytes
/// each. Only the last one carries BFINAL (when requested).
fn add_stored_block(
    final_block: bool,
    input: &[u8],
    instart: usize,
    inend: usize,
    bw: &mut BitWriter,
) {
    let mut pos = instart;
    loop {
        let blocksize = 65535.min(inend - pos);
        let currentfinal = pos + blocksize >= inend;
        let nlen = !(blocksize as u16);

        bw.write_bit(final_block && currentfinal);
        bw.write_bits(0, 2); // BTYPE 00
        // Bits up to the next byte boundary are ignored.
        bw.align_to_byte();

        bw.write_byte((blocksize & 0xFF) as u8);
        bw.write_byte((blocksize >> 8) as u8);
        bw.write_byte((nlen & 0xFF) as u8);
        bw.write_byte((nlen >> 8) as u8);
        bw.write_bytes(&input[pos..pos + blocksize]);

        if currentfinal {
            break;
        }
        pos += blocksize;
    }
}

/// Writes items `[lstart, lend)` as one block of the given type.
fn add_lz77_block(
    btype: BlockType,
    final_block: bool,
    input: &[u8],
    lz77: &Lz77Store,
    lstart: usize,
    lend: usize,
    bw: &mut BitWriter,
) {
    if btype == BlockType::Stored {
        let length = lz77.byte_range(lstart, lend);
        let pos = if lstart == lend { 0 } else { lz77.pos[lstart] };
        add_stored_block(final_block, input, pos, pos + length, bw);
        return;
    }

    bw.write_bit(final_block);
    match btype {
        BlockType::Stored => unreachable!(),
        BlockType::Fixed => bw.write_bits(1, 2),
        BlockType::Dynamic => bw.write_bits(2, 2),
    }

    let (ll_lengths, d_lengths) = if btype == BlockType::Fixed {
        fixed_tree()
    } else {
        let (_, ll_lengths, d_lengths) = get_dynamic_lengths(lz77, lstart, lend);
        add_dynamic_tree(&ll_lengths, &d_lengths, bw);
        (ll_lengths, d_lengths)
    };

    let ll_symbols = lengths_to_symbols(&ll_lengths, 15);
    let d_symbols = lengths_to_symbols(&d_lengths, 15);

    add_lz77_data(
        lz77, lstart, lend, &ll_symbols, &ll_lengths, &d_symbols, &d_lengths, bw,
    );
}

/// Writes items `[lstart, lend)` with whichever block type is smallest.
///
/// When a fixed block looks competitive, the range is re-parsed with the
/// fixed-tree cost model first; a parse optimized for the fixed tree is
/// often smaller than the statistics-optimized one re-coded with it.
fn add_lz77_block_auto_type(
    options: &Options,
    final_block: bool,
    input: &[u8],
    lz77: &Lz77Store,
    lstart: usize,
    lend: usize,
    bw: &mut BitWriter,
) {
    let uncompressedcost = calculate_block_size(lz77, lstart, lend, BlockType::Stored);
    let mut fixedcost = calculate_block_size(lz77, lstart, lend, BlockType::Fixed);
    let dyncost = calculate_block_size(lz77, lstart, lend, BlockType::Dynamic);

    let expensivefixed = lz77.len() < 1000 || fixedcost <= dyncost * 1.1;

    if lstart == lend {
        // The smallest empty block: fixed, with only the 7-bit end symbol.
        bw.write_bit(final_block);
        bw.write_bits(1, 2);
        bw.write_bits(0, 7);
        return;
    }

    let mut fixedstore = Lz77Store::new();
    if expensivefixed {
        let instart = lz77.pos[lstart];
        let inend = instart + lz77.byte_range(lstart, lend);
        let mut s = BlockState::new(options, instart, inend, true);
        lz77_optimal_fixed(&mut s, input, instart, inend, &mut fixedstore);
        fixedcost = calculate_block_size(&fixedstore, 0, fixedstore.len(), BlockType::Fixed);
    }

    if uncompressedcost < fixedcost && uncompressedcost < dyncost {
        add_lz77_block(BlockType::Stored, final_block, input, lz77, lstart, lend, bw);
    } else if fixedcost < dyncost {
        if expensivefixed {
            add_lz77_block(
                BlockType::Fixed,
                final_block,
                input,
                &fixedstore,
                0,
                fixedstore.len(),
                bw,
            );
        } else {
            add_lz77_block(BlockType::Fixed, final_block, input, lz77, lstart, lend, bw);
        }
    } else {
        add_lz77_block(BlockType::Dynamic, final_block, input, lz77, lstart, lend, bw);
    }
}

/// Compresses `input[instart..inend)` and appends the blocks to `bw`.
///
/// Forcing `Stored` or `Fixed` skips block splitting: neither carries a
/// dynamic tree, so there is nothing for a split to save.
fn deflate_part(
    options: &Options,
    btype: BlockType,
    final_block: bool,
    input: &[u8],
    instart: usize,
    inend: usize,
    bw: &mut BitWriter,
) {
    match btype {
        BlockType::Stored => {
            add_stored_block(final_block, input, instart, inend, bw);
            return;
        }
        BlockType::Fixed => {
            let mut store = Lz77Store::new();
            let mut s = BlockState::new(options, instart, inend, true);
            lz77_optimal_fixed(&mut s, input, instart, inend, &mut store);
            add_lz77_block(
                BlockType::Fixed,
                final_block,
                input,
                &store,
                0,
                store.len(),
                bw,
            );
            return;
        }
        BlockType::Dynamic => {}
    }

    let splitpoints_uncompressed = if options.block_splitting {
        block_split(options, input, instart, inend, options.block_splitting_max)
    } else {
        Vec::new()
    };
    let npoints = splitpoints_uncompressed.len();

    let mut lz77 = Lz77Store::new();
    let mut splitpoints = Vec::with_capacity(npoints);
    let mut totalcost = 0.0;

    for i in 0..=npoints {
        let start = if i == 0 {
            instart
        } else {
            splitpoints_uncompressed[i - 1]
        };
        let end = if i == npoints {
            inend
        } else {
            splitpoints_uncompressed[i]
        };

        let mut s = BlockState::new(options, start, end, true);
        let mut store = Lz77Store::new();
        lz77_optimal(&mut s, input, start, end, options.iterations, &mut store);
        totalcost += calculate_block_size_auto_type(&store, 0, store.len());

        store.append_to(&mut lz77);
        if i < npoints {
            splitpoints.push(lz77.len());
        }
    }

    // The optimized items may want different boundaries than the greedy
    // parse suggested; re-split them and keep whichever set is smaller.
    if options.block_splitting && npoints > 1 {
        let splitpoints2 = block_split_lz77(&lz77, options.block_splitting_max);
        let mut totalcost2 = 0.0;
        for i in 0..=splitpoints2.len() {
            let start = if i == 0 { 0 } else { splitpoints2[i - 1] };
            let end = if i == splitpoints2.len() {
                lz77.len()
            } else {
                splitpoints2[i]
            };
            totalcost2 += calculate_block_size_auto_type(&lz77, start, end);
        }
        if totalcost2 < totalcost {
            splitpoints = splitpoints2;
        }
    }

    let npoints = splitpoints.len();
    for i in 0..=npoints {
        let start = if i == 0 { 0 } else { splitpoints[i - 1] };
        let end = if i == npoints { lz77.len() } else { splitpoints[i] };
        add_lz77_block_auto_type(
            options,
            i == npoints && final_block,
            input,
            &lz77,
            start,
            end,
            bw,
        );
    }
}

/// Appends a raw DEFLATE stream for `input` to the bit writer.
///
/// `btype` forces stored or fixed blocks when not `Dynamic`. `final_block`
/// sets BFINAL on the last emitted block; leave it true unless more deflate
/// data will follow in the same stream. The writer's
/// [`bit_position`](BitWriter::bit_position) tells how far into its last
/// byte the stream ends.
pub fn deflate(
    options: &Options,
    btype: BlockType,
    final_block: bool,
    input: &[u8],
    bw: &mut BitWriter,
) -> Result<()> {
    options.validate()?;

    let mut i = 0usize;
    loop {
        let masterfinal = i + MASTER_BLOCK_SIZE >= input.len();
        let size = if masterfinal {
            input.len() - i
        } else {
            MASTER_BLOCK_SIZE
        };
        deflate_part(
            options,
            btype,
            final_block && masterfinal,
            input,
            i,
            i + size,
            bw,
        );
        i += size;
        if i >= input.len() {
            break;
        }
    }
    Ok(())
}

/// Compresses `data` into a standalone raw DEFLATE stream.
pub fn compress(data: &[u8], options: &Options) -> Result<Vec<u8>> {
    let mut bw = BitWriter::new();
    deflate(options, BlockType::Dynamic, true, data, &mut bw)?;
    Ok(bw.finish())
}
