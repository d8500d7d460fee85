//! Block size estimation and cost-minimizing block splitting.
//!
//! Every estimate here is the exact bit count the emitter would produce for
//! the same items, so the splitter and the block-type choice optimize the
//! real output size rather than a proxy.

use crate::deflate::{calculate_tree_size, BlockType, Options};
use crate::hash::RollingHash;
use crate::huffman::{fixed_tree, length_limited_code_lengths, optimize_for_rle};
use crate::lz77::{lz77_greedy, BlockState, Lz77Store, NUM_D, NUM_LL};
use crate::symbols::{dist_symbol_extra_bits, length_symbol_extra_bits};

/// Effectively-infinite cost.
const LARGE_FLOAT: f64 = 1e30;

/// Ensures at least two distance codes are defined. A dynamic header with
/// fewer trips up some inflaters, so a one-bit filler code is added even
/// though the data never uses it.
pub(crate) fn patch_distance_codes_for_buggy_decoders(d_lengths: &mut [u32; NUM_D]) {
    let mut num_dist_codes = 0;
    for &len in d_lengths.iter().take(30) {
        if len > 0 {
            num_dist_codes += 1;
        }
        if num_dist_codes >= 2 {
            return;
        }
    }

    if num_dist_codes == 0 {
        d_lengths[0] = 1;
        d_lengths[1] = 1;
    } else if num_dist_codes == 1 {
        if d_lengths[0] > 0 {
            d_lengths[1] = 1;
        } else {
            d_lengths[0] = 1;
        }
    }
}

/// Body size in bits for a short range, summing per item.
fn block_symbol_size_small(
    ll_lengths: &[u32; NUM_LL],
    d_lengths: &[u32; NUM_D],
    lz77: &Lz77Store,
    lstart: usize,
    lend: usize,
) -> usize {
    let mut result = 0;

    for i in lstart..lend {
        debug_assert!(i < lz77.len());
        debug_assert!(lz77.litlens[i] < 259);
        if lz77.dists[i] == 0 {
            result += ll_lengths[lz77.litlens[i] as usize] as usize;
        } else {
            let ll_symbol = lz77.ll_symbol(i);
            let d_symbol = lz77.d_symbol(i);
            result += ll_lengths[ll_symbol] as usize;
            result += d_lengths[d_symbol] as usize;
            result += length_symbol_extra_bits(ll_symbol);
            result += dist_symbol_extra_bits(d_symbol);
        }
    }

    result + ll_lengths[256] as usize // end symbol
}

/// Body size in bits from a precomputed histogram.
fn block_symbol_size_given_counts(
    ll_counts: &[usize; NUM_LL],
    d_counts: &[usize; NUM_D],
    ll_lengths: &[u32; NUM_LL],
    d_lengths: &[u32; NUM_D],
    lz77: &Lz77Store,
    lstart: usize,
    lend: usize,
) -> usize {
    if lstart + NUM_LL * 3 > lend {
        return block_symbol_size_small(ll_lengths, d_lengths, lz77, lstart, lend);
    }

    let mut result = 0;
    for i in 0..256 {
        result += ll_lengths[i] as usize * ll_counts[i];
    }
    for i in 257..286 {
        result += ll_lengths[i] as usize * ll_counts[i];
        result += length_symbol_extra_bits(i) * ll_counts[i];
    }
    for i in 0..30 {
        result += d_lengths[i] as usize * d_counts[i];
        result += dist_symbol_extra_bits(i) * d_counts[i];
    }

    result + ll_lengths[256] as usize // end symbol
}

/// Body size in bits for items `[lstart, lend)` under the given code lengths.
fn block_symbol_size(
    ll_lengths: &[u32; NUM_LL],
    d_lengths: &[u32; NUM_D],
    lz77: &Lz77Store,
    lstart: usize,
    lend: usize,
) -> usize {
    if lstart + NUM_LL * 3 > lend {
        block_symbol_size_small(ll_lengths, d_lengths, lz77, lstart, lend)
    } else {
        let mut ll_counts = [0usize; NUM_LL];
        let mut d_counts = [0usize; NUM_D];
        lz77.histogram(lstart, lend, &mut ll_counts, &mut d_counts);
        block_symbol_size_given_counts(
            &ll_counts, &d_counts, ll_lengths, d_lengths, lz77, lstart, lend,
        )
    }
}

/// Tries the RLE-quantized histogram as an alternative code; keeps whichever
/// of the two candidates encodes the block (tree + body) smaller and returns
/// that size in bits.
fn try_optimize_for_rle(
    lz77: &Lz77Store,
    lstart: usize,
    lend: usize,
    ll_counts: &[usize; NUM_LL],
    d_counts: &[usize; NUM_D],
    ll_lengths: &mut [u32; NUM_LL],
    d_lengths: &mut [u32; NUM_D],
) -> f64 {
    let treesize = calculate_tree_size(ll_lengths, d_lengths);
    let datasize =
        block_symbol_size_given_counts(ll_counts, d_counts, ll_lengths, d_lengths, lz77, lstart, lend);

    let mut ll_counts2 = *ll_counts;
    let mut d_counts2 = *d_counts;
    optimize_for_rle(&mut ll_counts2);
    optimize_for_rle(&mut d_counts2);

    let mut ll_lengths2 = [0u32; NUM_LL];
    ll_lengths2.copy_from_slice(&length_limited_code_lengths(&ll_counts2, 15));
    let mut d_lengths2 = [0u32; NUM_D];
    d_lengths2.copy_from_slice(&length_limited_code_lengths(&d_counts2, 15));
    patch_distance_codes_for_buggy_decoders(&mut d_lengths2);

    let treesize2 = calculate_tree_size(&ll_lengths2, &d_lengths2);
    let datasize2 = block_symbol_size_given_counts(
        ll_counts, d_counts, &ll_lengths2, &d_lengths2, lz77, lstart, lend,
    );

    if treesize2 + datasize2 < treesize + datasize {
        *ll_lengths = ll_lengths2;
        *d_lengths = d_lengths2;
        (treesize2 + datasize2) as f64
    } else {
        (treesize + datasize) as f64
    }
}

/// Builds the dynamic code lengths for a range and returns (tree + body
/// bits, lit/len lengths, distance lengths).
pub(crate) fn get_dynamic_lengths(
    lz77: &Lz77Store,
    lstart: usize,
    lend: usize,
) -> (f64, [u32; NUM_LL], [u32; NUM_D]) {
    let mut ll_counts = [0usize; NUM_LL];
    let mut d_counts = [0usize; NUM_D];
    lz77.histogram(lstart, lend, &mut ll_counts, &mut d_counts);
    ll_counts[256] = 1; // end symbol

    let mut ll_lengths = [0u32; NUM_LL];
    ll_lengths.copy_from_slice(&length_limited_code_lengths(&ll_counts, 15));
    let mut d_lengths = [0u32; NUM_D];
    d_lengths.copy_from_slice(&length_limited_code_lengths(&d_counts, 15));
    patch_distance_codes_for_buggy_decoders(&mut d_lengths);

    let cost = try_optimize_for_rle(
        lz77, lstart, lend, &ll_counts, &d_counts, &mut ll_lengths, &mut d_lengths,
    );
    (cost, ll_lengths, d_lengths)
}

/// Exact encoded size in bits of items `[lstart, lend)` as one block of the
/// given type, including the 3 header bits (stored blocks count their full
/// per-chunk framing instead).
pub fn calculate_block_size(lz77: &Lz77Store, lstart: usize, lend: usize, btype: BlockType) -> f64 {
    match btype {
        BlockType::Stored => {
            // Stored payloads over 65535 bytes split into several blocks,
            // each with 3 header bits, padding, LEN and NLEN.
            let length = lz77.byte_range(lstart, lend);
            let rem = length % 65535;
            let blocks = length / 65535 + usize::from(rem > 0);
            (blocks * 5 * 8 + length * 8) as f64
        }
        BlockType::Fixed => {
            let (ll_lengths, d_lengths) = fixed_tree();
            3.0 + block_symbol_size(&ll_lengths, &d_lengths, lz77, lstart, lend) as f64
        }
        BlockType::Dynamic => {
            let (cost, _, _) = get_dynamic_lengths(lz77, lstart, lend);
            3.0 + cost
        }
    }
}

/// Encoded size in bits with the cheapest block type for this range.
pub fn calculate_block_size_auto_type(lz77: &Lz77Store, lstart: usize, lend: usize) -> f64 {
    let uncompressedcost = calculate_block_size(lz77, lstart, lend, BlockType::Stored);
    // Skip the expensive fixed estimate for large blocks that will almost
    // never use it.
    let fixedcost = if lz77.len() > 1000 {
        uncompressedcost
    } else {
        calculate_block_size(lz77, lstart, lend, BlockType::Fixed)
    };
    let dyncost = calculate_block_size(lz77, lstart, lend, BlockType::Dynamic);

    if uncompressedcost < fixedcost && uncompressedcost < dyncost {
        uncompressedcost
    } else if fixedcost < dyncost {
        fixedcost
    } else {
        dyncost
    }
}

/// One-dimensional minimization over `[start, end)`: samples 9 evenly spaced
/// points and recurses into the winning neighborhood, switching to a linear
/// scan once the interval is small. Returns (position, value).
fn find_minimum<F: FnMut(usize) -> f64>(mut f: F, start: usize, end: usize) -> (usize, f64) {
    if end - start < 1024 {
        let mut best = LARGE_FLOAT;
        let mut result = start;
        for i in start..end {
            let v = f(i);
            if v < best {
                best = v;
                result = i;
            }
        }
        return (result, best);
    }

    const NUM: usize = 9;
    let mut start = start;
    let mut end = end;
    let mut p = [0usize; NUM];
    let mut vp = [0f64; NUM];
    let mut pos = start;
    let mut lastbest = LARGE_FLOAT;

    loop {
        if end - start <= NUM {
            break;
        }

        for i in 0..NUM {
            p[i] = start + (i + 1) * ((end - start) / (NUM + 1));
            vp[i] = f(p[i]);
        }
        let mut besti = 0;
        let mut best = vp[0];
        for i in 1..NUM {
            if vp[i] < best {
                best = vp[i];
                besti = i;
            }
        }
        if best > lastbest {
            break;
        }

        start = if besti == 0 { start } else { p[besti - 1] };
        end = if besti == NUM - 1 { end } else { p[besti + 1] };

        pos = p[besti];
        lastbest = best;
    }
    (pos, lastbest)
}

/// Estimated cost of items `[lstart, lend)` as one block, best type.
fn estimate_cost(lz77: &Lz77Store, lstart: usize, lend: usize) -> f64 {
    calculate_block_size_auto_type(lz77, lstart, lend)
}

/// Inserts `value` into an already-sorted vector.
fn add_sorted(value: usize, out: &mut Vec<usize>) {
    let idx = out.partition_point(|&x| x <= value);
    out.insert(idx, value);
}

/// Finds the largest interval between split points not yet marked done.
fn find_largest_splittable_block(
    lz77size: usize,
    done: &[bool],
    splitpoints: &[usize],
    lstart: &mut usize,
    lend: &mut usize,
) -> bool {
    let mut longest = 0;
    let mut found = false;
    for i in 0..=splitpoints.len() {
        let start = if i == 0 { 0 } else { splitpoints[i - 1] };
        let end = if i == splitpoints.len() {
            lz77size - 1
        } else {
            splitpoints[i]
        };
        if !done[start] && end - start > longest {
            *lstart = start;
            *lend = end;
            found = true;
            longest = end - start;
        }
    }
    found
}

/// Splits an LZ77 store into sub-blocks whose summed best-type sizes are
/// minimal, returning the item indices of the split points. At most
/// `maxblocks` blocks are produced (0 = unlimited).
pub fn block_split_lz77(lz77: &Lz77Store, maxblocks: usize) -> Vec<usize> {
    let mut splitpoints = Vec::new();
    if lz77.len() < 10 {
        return splitpoints; // Not worth splitting something this small.
    }

    let mut done = vec![false; lz77.len()];
    let mut lstart = 0;
    let mut lend = lz77.len();
    let mut numblocks = 1;

    loop {
        if maxblocks > 0 && numblocks >= maxblocks {
            break;
        }

        debug_assert!(lstart < lend);
        let (llpos, splitcost) = find_minimum(
            |i| estimate_cost(lz77, lstart, i) + estimate_cost(lz77, i, lend),
            lstart + 1,
            lend,
        );

        debug_assert!(llpos > lstart);
        debug_assert!(llpos < lend);

        let origcost = estimate_cost(lz77, lstart, lend);

        if splitcost > origcost || llpos == lstart + 1 || llpos == lend {
            done[lstart] = true;
        } else {
            add_sorted(llpos, &mut splitpoints);
            numblocks += 1;
        }

        if !find_largest_splittable_block(lz77.len(), &done, &splitpoints, &mut lstart, &mut lend) {
            break; // No further split will likely help.
        }
        if lend - lstart < 10 {
            break;
        }
    }

    splitpoints
}

/// Splits raw input bytes `[instart, inend)` into ranges worth encoding as
/// separate blocks, returning byte positions. A plain greedy parse stands in
/// for the final parse here; its block boundaries transfer well and cost a
/// fraction of an optimal pass.
pub fn block_split(
    options: &Options,
    input: &[u8],
    instart: usize,
    inend: usize,
    maxblocks: usize,
) -> Vec<usize> {
    let mut s = BlockState::new(options, instart, inend, false);
    let mut store = Lz77Store::new();
    let mut h = RollingHash::new();
    lz77_greedy(&mut s, input, instart, inend, &mut store, &mut h);

    let lz77splitpoints = block_split_lz77(&store, maxblocks);

    // Convert item indices back to byte positions.
    let mut splitpoints = Vec::with_capacity(lz77splitpoints.len());
    let mut pos = instart;
    if !lz77splitpoints.is_empty() {
        for i in 0..store.len() {
            let length = if store.dists[i] == 0 {
                1
            } else {
                store.litlens[i] as usize
            };
            if lz77splitpoints[splitpoints.len()] == i {
                splitpoints.push(pos);
                if splitpoints.len() == lz77splitpoints.len() {
                    break;
                }
            }
            pos += length;
        }
    }
    debug_assert_eq!(splitpoints.len(), lz77splitpoints.len());
    splitpoints
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deflate::Options;

    fn literal_store(data: &[u8]) -> Lz77Store {
        let mut store = Lz77Store::new();
        for (i, &b) in data.iter().enumerate() {
            store.push(b as u16, 0, i);
        }
        store
    }

    #[test]
    fn test_patch_distance_codes_zero() {
        let mut d_lengths = [0u32; NUM_D];
        patch_distance_codes_for_buggy_decoders(&mut d_lengths);
        assert_eq!(d_lengths[0], 1);
        assert_eq!(d_lengths[1], 1);
    }

    #[test]
    fn test_patch_distance_codes_one() {
        let mut d_lengths = [0u32; NUM_D];
        d_lengths[4] = 3;
        patch_distance_codes_for_buggy_decoders(&mut d_lengths);
        assert_eq!(d_lengths[0], 1);
        assert_eq!(d_lengths[4], 3);

        let mut d_lengths = [0u32; NUM_D];
        d_lengths[0] = 2;
        patch_distance_codes_for_buggy_decoders(&mut d_lengths);
        assert_eq!(d_lengths[0], 2);
        assert_eq!(d_lengths[1], 1);
    }

    #[test]
    fn test_patch_distance_codes_enough() {
        let mut d_lengths = [0u32; NUM_D];
        d_lengths[2] = 5;
        d_lengths[7] = 5;
        let before = d_lengths;
        patch_distance_codes_for_buggy_decoders(&mut d_lengths);
        assert_eq!(d_lengths, before);
    }

    #[test]
    fn test_stored_size() {
        let store = literal_store(&[0u8; 1000]);
        let size = calculate_block_size(&store, 0, store.len(), BlockType::Stored);
        assert_eq!(size, (5 * 8 + 1000 * 8) as f64);
    }

    #[test]
    fn test_stored_size_needs_two_chunks() {
        let store = literal_store(&vec![7u8; 70000]);
        let size = calculate_block_size(&store, 0, store.len(), BlockType::Stored);
        assert_eq!(size, (2 * 5 * 8 + 70000 * 8) as f64);
    }

    #[test]
    fn test_fixed_size_all_literals() {
        // 10 literals under 144 cost 8 bits each, plus header and 7-bit end.
        let store = literal_store(b"aaaaabbbbb");
        let size = calculate_block_size(&store, 0, store.len(), BlockType::Fixed);
        assert_eq!(size, 3.0 + 80.0 + 7.0);
    }

    #[test]
    fn test_dynamic_beats_fixed_on_skewed_data() {
        let data: Vec<u8> = std::iter::repeat(b'e').take(900).chain(b"xyz".iter().copied()).collect();
        let store = literal_store(&data);
        let fixed = calculate_block_size(&store, 0, store.len(), BlockType::Fixed);
        let dynamic = calculate_block_size(&store, 0, store.len(), BlockType::Dynamic);
        assert!(dynamic < fixed);
    }

    #[test]
    fn test_auto_type_is_min() {
        let data: Vec<u8> = (0..500u32).map(|i| (i % 256) as u8).collect();
        let store = literal_store(&data);
        let auto = calculate_block_size_auto_type(&store, 0, store.len());
        for btype in [BlockType::Stored, BlockType::Fixed, BlockType::Dynamic] {
            assert!(auto <= calculate_block_size(&store, 0, store.len(), btype));
        }
    }

    #[test]
    fn test_find_minimum_linear() {
        let (pos, value) = find_minimum(|i| ((i as f64) - 70.0).abs(), 10, 100);
        assert_eq!(pos, 70);
        assert_eq!(value, 0.0);
    }

    #[test]
    fn test_find_minimum_large_range_convex() {
        let target = 123_456.0;
        let (pos, _) = find_minimum(|i| (i as f64 - target).powi(2), 0, 1_000_000);
        assert!((pos as f64 - target).abs() < 2000.0, "found {}", pos);
    }

    #[test]
    fn test_add_sorted() {
        let mut v = Vec::new();
        add_sorted(5, &mut v);
        add_sorted(1, &mut v);
        add_sorted(9, &mut v);
        add_sorted(5, &mut v);
        assert_eq!(v, vec![1, 5, 5, 9]);
    }

    #[test]
    fn test_block_split_lz77_tiny_store() {
        let store = literal_store(b"abc");
        assert!(block_split_lz77(&store, 15).is_empty());
    }

    #[test]
    fn test_block_split_respects_max() {
        // Two very different halves invite a split.
        let mut data = vec![b'a'; 3000];
        data.extend((0..3000u32).map(|i| (i * 17 % 256) as u8));
        let options = Options::default();
        let splits = block_split(&options, &data, 0, data.len(), 2);
        assert!(splits.len() <= 1, "max 2 blocks means at most 1 split");
    }

    #[test]
    fn test_block_split_points_in_range_and_sorted() {
        let mut data = vec![0u8; 2000];
        data.extend((0..2000u32).map(|i| (i * 31 % 251) as u8));
        data.extend(std::iter::repeat(b'q').take(2000));
        let options = Options::default();
        let splits = block_split(&options, &data, 0, data.len(), 15);
        for w in splits.windows(2) {
            assert!(w[0] < w[1]);
        }
        for &p in &splits {
            assert!(p > 0 && p < data.len());
        }
    }
}
