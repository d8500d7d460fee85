//! LZ77 parsing: the item store, the longest-match engine, and the greedy
//! parser used to seed the optimizer.

use crate::cache::MatchCache;
use crate::deflate::Options;
use crate::hash::RollingHash;
use crate::symbols::{dist_symbol, length_symbol};

/// Minimum back-reference length.
pub const MIN_MATCH: usize = 3;

/// Maximum back-reference length.
pub const MAX_MATCH: usize = 258;

/// Sliding window size (power of two).
pub const WINDOW_SIZE: usize = 32768;

/// Mask for wrapping window positions.
pub const WINDOW_MASK: usize = WINDOW_SIZE - 1;

/// Number of literal/length symbols (including the two unused ones).
pub const NUM_LL: usize = 288;

/// Number of distance symbols (including the two unused ones).
pub const NUM_D: usize = 32;

/// An append-only sequence of LZ77 items with per-item source positions and
/// periodically snapshotted histograms for O(1)-ish range queries.
///
/// An item with `dists[i] == 0` is the literal byte `litlens[i]`; otherwise
/// `litlens[i]` is a match length in 3-258 and `dists[i]` a distance in
/// 1-32768.
#[derive(Debug, Clone, Default)]
pub struct Lz77Store {
    /// Literal byte or match length per item.
    pub litlens: Vec<u16>,
    /// 0 for literals, else the match distance.
    pub dists: Vec<u16>,
    /// Source position in the input where each item begins.
    pub pos: Vec<usize>,
    /// Literal/length symbol per item.
    ll_symbol: Vec<u16>,
    /// Distance symbol per item (0 for literals).
    d_symbol: Vec<u16>,
    /// Running lit/len histograms, one `NUM_LL` block per `NUM_LL` items.
    ll_counts: Vec<usize>,
    /// Running distance histograms, one `NUM_D` block per `NUM_D` items.
    d_counts: Vec<usize>,
}

impl Lz77Store {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of items.
    pub fn len(&self) -> usize {
        self.litlens.len()
    }

    /// Whether the store has no items.
    pub fn is_empty(&self) -> bool {
        self.litlens.is_empty()
    }

    /// Appends one literal or back-reference starting at input position `pos`.
    pub fn push(&mut self, litlen: u16, dist: u16, pos: usize) {
        let origsize = self.len();
        let llstart = NUM_LL * (origsize / NUM_LL);
        let dstart = NUM_D * (origsize / NUM_D);

        // Starting a new chunk snapshots the previous running histogram.
        if origsize % NUM_LL == 0 {
            for i in 0..NUM_LL {
                let v = if origsize == 0 {
                    0
                } else {
                    self.ll_counts[origsize - NUM_LL + i]
                };
                self.ll_counts.push(v);
            }
        }
        if origsize % NUM_D == 0 {
            for i in 0..NUM_D {
                let v = if origsize == 0 {
                    0
                } else {
                    self.d_counts[origsize - NUM_D + i]
                };
                self.d_counts.push(v);
            }
        }

        debug_assert!(litlen < 259);
        self.litlens.push(litlen);
        self.dists.push(dist);
        self.pos.push(pos);

        if dist == 0 {
            self.ll_symbol.push(litlen);
            self.d_symbol.push(0);
            self.ll_counts[llstart + litlen as usize] += 1;
        } else {
            let ll = length_symbol(litlen as usize) as u16;
            let d = dist_symbol(dist as usize) as u16;
            self.ll_symbol.push(ll);
            self.d_symbol.push(d);
            self.ll_counts[llstart + ll as usize] += 1;
            self.d_counts[dstart + d as usize] += 1;
        }
    }

    /// Appends every item of this store onto `other`.
    pub fn append_to(&self, other: &mut Lz77Store) {
        for i in 0..self.len() {
            other.push(self.litlens[i], self.dists[i], self.pos[i]);
        }
    }

    /// The literal/length symbol of item `i`.
    pub(crate) fn ll_symbol(&self, i: usize) -> usize {
        self.ll_symbol[i] as usize
    }

    /// The distance symbol of item `i` (meaningless for literals).
    pub(crate) fn d_symbol(&self, i: usize) -> usize {
        self.d_symbol[i] as usize
    }

    /// Histogram of all items up to and including `lpos`, reconstructed from
    /// the snapshot covering `lpos` minus the chunk items after it.
    fn histogram_at(
        &self,
        lpos: usize,
        ll_counts: &mut [usize; NUM_LL],
        d_counts: &mut [usize; NUM_D],
    ) {
        let llpos = NUM_LL * (lpos / NUM_LL);
        let dpos = NUM_D * (lpos / NUM_D);

        ll_counts.copy_from_slice(&self.ll_counts[llpos..llpos + NUM_LL]);
        for i in (lpos + 1)..(llpos + NUM_LL).min(self.len()) {
            ll_counts[self.ll_symbol[i] as usize] -= 1;
        }

        d_counts.copy_from_slice(&self.d_counts[dpos..dpos + NUM_D]);
        for i in (lpos + 1)..(dpos + NUM_D).min(self.len()) {
            if self.dists[i] != 0 {
                d_counts[self.d_symbol[i] as usize] -= 1;
            }
        }
    }

    /// Histogram of lit/len and distance symbols over items `[lstart, lend)`.
    /// Does not count the end-of-block symbol.
    pub fn histogram(
        &self,
        lstart: usize,
        lend: usize,
        ll_counts: &mut [usize; NUM_LL],
        d_counts: &mut [usize; NUM_D],
    ) {
        if lstart + NUM_LL * 3 > lend {
            // Short range: recounting beats prefix reconstruction.
            ll_counts.fill(0);
            d_counts.fill(0);
            for i in lstart..lend {
                ll_counts[self.ll_symbol[i] as usize] += 1;
                if self.dists[i] != 0 {
                    d_counts[self.d_symbol[i] as usize] += 1;
                }
            }
        } else {
            self.histogram_at(lend - 1, ll_counts, d_counts);
            if lstart > 0 {
                let mut ll2 = [0usize; NUM_LL];
                let mut d2 = [0usize; NUM_D];
                self.histogram_at(lstart - 1, &mut ll2, &mut d2);
                for i in 0..NUM_LL {
                    ll_counts[i] -= ll2[i];
                }
                for i in 0..NUM_D {
                    d_counts[i] -= d2[i];
                }
            }
        }
    }

    /// Number of raw input bytes the items `[lstart, lend)` span.
    pub fn byte_range(&self, lstart: usize, lend: usize) -> usize {
        if lstart == lend {
            return 0;
        }
        let l = lend - 1;
        let end = self.pos[l]
            + if self.dists[l] == 0 {
                1
            } else {
                self.litlens[l] as usize
            };
        end - self.pos[lstart]
    }
}

/// Mutable state for compressing one block: the configuration, the block
/// bounds in the input, and (optionally) the longest-match cache.
#[derive(Debug)]
pub struct BlockState<'a> {
    /// Encoder configuration.
    pub options: &'a Options,
    /// Cache of matches found so far in this block, if enabled.
    cache: Option<MatchCache>,
    /// Start of the block in the input (inclusive).
    pub blockstart: usize,
    /// End of the block in the input (exclusive).
    pub blockend: usize,
}

impl<'a> BlockState<'a> {
    /// Creates state for the block `[blockstart, blockend)`, allocating a
    /// match cache when `add_cache` is set.
    pub fn new(options: &'a Options, blockstart: usize, blockend: usize, add_cache: bool) -> Self {
        Self {
            options,
            cache: add_cache.then(|| MatchCache::new(blockend - blockstart)),
            blockstart,
            blockend,
        }
    }

    /// Answers a longest-match query from the cache if it can. May instead
    /// shrink `limit` when the cache only knows where to stop.
    fn try_cached_match(
        &self,
        pos: usize,
        limit: &mut usize,
        sublen: Option<&mut [u16]>,
    ) -> Option<(u16, u16)> {
        let lmc = self.cache.as_ref()?;
        let lmcpos = pos - self.blockstart;
        if !lmc.is_filled(lmcpos) {
            return None;
        }

        let (clen, cdist) = lmc.best(lmcpos);
        let max_sublen = lmc.max_cached_sublen(lmcpos);
        let limit_ok = *limit == MAX_MATCH
            || clen as usize <= *limit
            || (sublen.is_some() && max_sublen >= *limit);
        if !limit_ok {
            return None;
        }

        if sublen.is_none() || clen as usize <= max_sublen {
            let length = (clen as usize).min(*limit) as u16;
            let dist = match sublen {
                Some(sublen_arr) => {
                    lmc.load_sublen(lmcpos, length as usize, sublen_arr);
                    let d = sublen_arr[length as usize];
                    if *limit == MAX_MATCH && length as usize >= MIN_MATCH {
                        debug_assert_eq!(d, cdist, "cached sublen contradicts cached best");
                    }
                    d
                }
                None => cdist,
            };
            return Some((length, dist));
        }

        // The sublens must be recomputed, but the best length bounds the
        // search.
        *limit = clen as usize;
        None
    }

    /// Stores a fresh longest-match result, when the query was complete
    /// enough to be worth caching.
    fn store_cached_match(
        &mut self,
        pos: usize,
        limit: usize,
        sublen: Option<&[u16]>,
        dist: u16,
        length: u16,
    ) {
        let blockstart = self.blockstart;
        let Some(lmc) = self.cache.as_mut() else {
            return;
        };
        let lmcpos = pos - blockstart;
        let Some(sublen) = sublen else {
            return;
        };
        if limit != MAX_MATCH || lmc.is_filled(lmcpos) {
            return;
        }

        debug_assert_eq!(lmc.best(lmcpos), (1, 0));
        if (length as usize) < MIN_MATCH {
            lmc.set_best(lmcpos, 0, 0);
        } else {
            lmc.set_best(lmcpos, length, dist);
        }
        lmc.store_sublen(sublen, lmcpos, length as usize);
    }
}

/// Asserts that `length` bytes at `pos` equal the bytes `dist` back.
/// A failure means the match engine or its cache is corrupt, which must
/// abort rather than emit an undecodable stream.
pub fn verify_len_dist(data: &[u8], datasize: usize, pos: usize, dist: u16, length: u16) {
    assert!(pos + length as usize <= datasize);
    let d = dist as usize;
    for i in 0..length as usize {
        assert_eq!(
            data[pos - d + i],
            data[pos + i],
            "corrupt match: length {} distance {} at position {}",
            length,
            dist,
            pos
        );
    }
}

/// Counts how many bytes starting at `scan` match the bytes at `matched`,
/// stopping at `end` (an input index past `scan`). Compares eight bytes at a
/// time, locating the first difference with XOR + trailing zeros.
fn match_extent(data: &[u8], matched: usize, scan: usize, end: usize) -> usize {
    let max_len = end - scan;
    let mut length = 0;

    while length + 8 <= max_len {
        let a = u64::from_le_bytes(data[matched + length..matched + length + 8].try_into().unwrap());
        let b = u64::from_le_bytes(data[scan + length..scan + length + 8].try_into().unwrap());
        if a != b {
            length += ((a ^ b).trailing_zeros() / 8) as usize;
            return length;
        }
        length += 8;
    }

    while length < max_len && data[matched + length] == data[scan + length] {
        length += 1;
    }

    length
}

/// Finds the longest match at `pos`, searching distances up to the window
/// size with at most `Options::max_chain_hits` chain steps.
///
/// Returns (length, distance); (1, 0) or (0, 0) when no match of 3+ bytes
/// exists. `length` never exceeds `limit` or the bytes remaining. When a
/// `sublen` array (length 259) is given, entry ℓ receives the distance that
/// first achieved length ℓ.
pub fn find_longest_match(
    s: &mut BlockState,
    h: &RollingHash,
    data: &[u8],
    pos: usize,
    size: usize,
    limit: usize,
    mut sublen: Option<&mut [u16]>,
) -> (u16, u16) {
    let mut limit = limit;

    if let Some((length, dist)) = s.try_cached_match(pos, &mut limit, sublen.as_deref_mut()) {
        debug_assert!(pos + length as usize <= size);
        return (length, dist);
    }

    debug_assert!(limit <= MAX_MATCH);
    debug_assert!(limit >= MIN_MATCH);
    debug_assert!(pos < size);

    if size - pos < MIN_MATCH {
        // The code below assumes at least three bytes to try.
        return (0, 0);
    }
    if pos + limit > size {
        limit = size - pos;
    }

    let hpos = (pos & WINDOW_MASK) as u16;
    let mut bestdist = 0u16;
    let mut bestlength = 1u16;

    let mut hprev = &h.prev;
    let mut hhashval = &h.hashval;
    let mut hval = h.val;
    let mut on_second_chain = false;

    debug_assert!((hval as usize) < WINDOW_SIZE);
    debug_assert_eq!(h.head[hval as usize], hpos as i32, "position was not hashed");

    // Invariant through the walk: p == hprev[pp].
    let mut pp = hpos;
    let mut p = hprev[pp as usize];
    let mut dist = if p < pp {
        (pp - p) as u32
    } else {
        (WINDOW_SIZE as u32 - p as u32) + pp as u32
    };

    let mut chain_counter = s.options.max_chain_hits;

    while (dist as usize) < WINDOW_SIZE {
        debug_assert!((p as usize) < WINDOW_SIZE);
        debug_assert_eq!(hhashval[p as usize], hval);

        if dist > 0 {
            debug_assert!(dist as usize <= pos);
            let scan = pos;
            let matched = pos - dist as usize;

            // Most candidates die at the byte that would beat the current
            // best, so probe it first.
            if pos + (bestlength as usize) >= size
                || data[scan + bestlength as usize] == data[matched + bestlength as usize]
            {
                let mut skip = 0usize;
                let same0 = h.same[pos & WINDOW_MASK];
                if same0 > 2 && data[scan] == data[matched] {
                    // Both sides sit inside runs of one byte; jump over the
                    // shared prefix in one step.
                    let same1 = h.same[(pos - dist as usize) & WINDOW_MASK];
                    skip = (same0.min(same1) as usize).min(limit);
                }
                let currentlength = skip + match_extent(data, matched + skip, scan + skip, pos + limit);

                if currentlength > bestlength as usize {
                    if let Some(sublen_arr) = sublen.as_deref_mut() {
                        for entry in sublen_arr
                            .iter_mut()
                            .take(currentlength + 1)
                            .skip(bestlength as usize + 1)
                        {
                            *entry = dist as u16;
                        }
                    }
                    bestdist = dist as u16;
                    bestlength = currentlength as u16;
                    if currentlength >= limit {
                        break;
                    }
                }
            }
        }

        // Once the best length covers the local run, the run-keyed chain
        // skips straight between runs of that shape.
        if !on_second_chain && bestlength >= h.same[hpos as usize] && h.val2 == h.hashval2[p as usize]
        {
            on_second_chain = true;
            hprev = &h.prev2;
            hhashval = &h.hashval2;
            hval = h.val2;
        }

        pp = p;
        p = hprev[p as usize];
        if p == pp {
            break; // Reached the start of the chain.
        }

        dist += if p < pp {
            (pp - p) as u32
        } else {
            (WINDOW_SIZE as u32 - p as u32) + pp as u32
        };

        chain_counter -= 1;
        if chain_counter == 0 {
            break;
        }
    }

    s.store_cached_match(pos, limit, sublen.as_deref(), bestdist, bestlength);

    debug_assert!(bestlength as usize <= limit);
    debug_assert!(pos + bestlength as usize <= size);
    (bestlength, bestdist)
}

/// Scores a candidate match for the greedy parser. Length dominates at a
/// 1024x scale; distances past 1024 need 9+ extra bits and pay a penalty
/// growing with how far past they reach. Matches too short to encode
/// score 0.
fn length_score(length: u16, dist: u16) -> i32 {
    if (length as usize) < MIN_MATCH {
        return 0;
    }
    let dist_penalty = if dist > 1024 {
        (dist as i32 - 1024) / 32
    } else {
        0
    };
    length as i32 * 1024 - dist_penalty
}

/// Parses `input[instart..inend)` with gzip-style lazy matching, appending
/// the items to `store`. The hash is rewound far enough before `instart`
/// that matches may reach back into the preceding window.
pub fn lz77_greedy(
    s: &mut BlockState,
    input: &[u8],
    instart: usize,
    inend: usize,
    store: &mut Lz77Store,
    h: &mut RollingHash,
) {
    if instart == inend {
        return;
    }

    let windowstart = instart.saturating_sub(WINDOW_SIZE);
    let mut dummysublen = [0u16; 259];

    h.reset();
    h.warmup(input, windowstart, inend);
    for i in windowstart..instart {
        h.update(input, i, inend);
    }

    let mut prev_length: u16 = 0;
    let mut prev_match: u16 = 0;
    let mut match_available = false;

    let mut i = instart;
    while i < inend {
        h.update(input, i, inend);

        let (mut leng, mut dist) =
            find_longest_match(s, h, input, i, inend, MAX_MATCH, Some(&mut dummysublen));
        let lengthscore = length_score(leng, dist);

        if match_available {
            // A match is pending at i-1; emit whichever of the two wins.
            match_available = false;
            let prevlengthscore = length_score(prev_length, prev_match);
            if lengthscore > prevlengthscore + 1 {
                store.push(input[i - 1] as u16, 0, i - 1);
                if lengthscore >= MIN_MATCH as i32 && (leng as usize) < MAX_MATCH {
                    match_available = true;
                    prev_length = leng;
                    prev_match = dist;
                    i += 1;
                    continue;
                }
            } else {
                leng = prev_length;
                dist = prev_match;
                verify_len_dist(input, inend, i - 1, dist, leng);
                store.push(leng, dist, i - 1);
                for _ in 2..leng {
                    debug_assert!(i < inend);
                    i += 1;
                    h.update(input, i, inend);
                }
                i += 1;
                continue;
            }
        } else if lengthscore >= MIN_MATCH as i32 && (leng as usize) < MAX_MATCH {
            match_available = true;
            prev_length = leng;
            prev_match = dist;
            i += 1;
            continue;
        }

        if lengthscore >= MIN_MATCH as i32 {
            verify_len_dist(input, inend, i, dist, leng);
            store.push(leng, dist, i);
        } else {
            leng = 1;
            store.push(input[i] as u16, 0, i);
        }
        for _ in 1..leng {
            debug_assert!(i < inend);
            i += 1;
            h.update(input, i, inend);
        }
        i += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deflate::Options;

    fn greedy_store(data: &[u8]) -> Lz77Store {
        let options = Options::default();
        let mut s = BlockState::new(&options, 0, data.len(), true);
        let mut store = Lz77Store::new();
        let mut h = RollingHash::new();
        lz77_greedy(&mut s, data, 0, data.len(), &mut store, &mut h);
        store
    }

    #[test]
    fn test_store_literal() {
        let mut store = Lz77Store::new();
        store.push(b't' as u16, 0, 0);
        assert_eq!(store.len(), 1);
        assert_eq!(store.litlens[0], b't' as u16);
        assert_eq!(store.dists[0], 0);
        assert_eq!(store.ll_symbol(0), b't' as usize);
    }

    #[test]
    fn test_store_match_symbols() {
        let mut store = Lz77Store::new();
        store.push(10, 100, 0);
        assert_eq!(store.ll_symbol(0), length_symbol(10));
        assert_eq!(store.d_symbol(0), dist_symbol(100));
    }

    #[test]
    fn test_byte_range() {
        let mut store = Lz77Store::new();
        store.push(b'a' as u16, 0, 0);
        store.push(b'b' as u16, 0, 1);
        store.push(20, 2, 2);
        assert_eq!(store.byte_range(0, 3), 22);
        assert_eq!(store.byte_range(0, 2), 2);
        assert_eq!(store.byte_range(2, 3), 20);
        assert_eq!(store.byte_range(1, 1), 0);
    }

    #[test]
    fn test_histogram_matches_recount() {
        // Build a store long enough to cross several histogram chunks.
        let mut store = Lz77Store::new();
        let mut pos = 0;
        for i in 0..2000usize {
            if i % 5 == 4 {
                store.push(3 + (i % 250) as u16, 1 + (i % 3000) as u16, pos);
                pos += 3 + i % 250;
            } else {
                store.push((i % 256) as u16, 0, pos);
                pos += 1;
            }
        }

        for &(lstart, lend) in &[(0, 2000), (0, 5), (1, 1999), (700, 1700), (950, 1000)] {
            let mut ll_fast = [0usize; NUM_LL];
            let mut d_fast = [0usize; NUM_D];
            store.histogram(lstart, lend, &mut ll_fast, &mut d_fast);

            let mut ll_slow = [0usize; NUM_LL];
            let mut d_slow = [0usize; NUM_D];
            for i in lstart..lend {
                ll_slow[store.ll_symbol(i)] += 1;
                if store.dists[i] != 0 {
                    d_slow[store.d_symbol(i)] += 1;
                }
            }

            assert_eq!(ll_fast[..], ll_slow[..], "ll mismatch for [{}, {})", lstart, lend);
            assert_eq!(d_fast[..], d_slow[..], "d mismatch for [{}, {})", lstart, lend);
        }
    }

    #[test]
    fn test_append_to() {
        let mut a = Lz77Store::new();
        a.push(b'x' as u16, 0, 0);
        a.push(5, 1, 1);
        let mut b = Lz77Store::new();
        b.push(b'y' as u16, 0, 0);
        a.append_to(&mut b);
        assert_eq!(b.len(), 3);
        assert_eq!(b.litlens[1], b'x' as u16);
        assert_eq!(b.dists[2], 1);
    }

    #[test]
    fn test_find_longest_match_repetition() {
        let data = b"hello world hello world";
        let options = Options::default();
        let mut s = BlockState::new(&options, 0, data.len(), false);
        let mut h = RollingHash::new();
        h.reset();
        h.warmup(data, 0, data.len());
        for i in 0..=12 {
            h.update(data, i, data.len());
        }

        // At position 12 ("hello world" again), an 11-byte match at
        // distance 12 must be found.
        let (length, dist) = find_longest_match(&mut s, &h, data, 12, data.len(), MAX_MATCH, None);
        assert_eq!(dist, 12);
        assert_eq!(length as usize, 11);
    }

    #[test]
    fn test_find_longest_match_respects_limit() {
        let data = b"abcdefgh abcdefgh";
        let options = Options::default();
        let mut s = BlockState::new(&options, 0, data.len(), false);
        let mut h = RollingHash::new();
        h.reset();
        h.warmup(data, 0, data.len());
        for i in 0..=9 {
            h.update(data, i, data.len());
        }

        let (length, dist) = find_longest_match(&mut s, &h, data, 9, data.len(), 5, None);
        assert_eq!(dist, 9);
        assert_eq!(length, 5);
    }

    #[test]
    fn test_find_longest_match_none_at_tail() {
        let data = b"xyxy";
        let options = Options::default();
        let mut s = BlockState::new(&options, 0, data.len(), false);
        let mut h = RollingHash::new();
        h.reset();
        h.warmup(data, 0, data.len());
        for i in 0..=2 {
            h.update(data, i, data.len());
        }

        // Fewer than MIN_MATCH bytes remain at position 2.
        let (length, dist) = find_longest_match(&mut s, &h, data, 2, data.len(), MAX_MATCH, None);
        assert_eq!((length, dist), (0, 0));
    }

    #[test]
    fn test_cached_query_equals_fresh_search() {
        let mut data = Vec::new();
        for i in 0..400u32 {
            data.push((i % 7) as u8 * 13);
        }
        data.extend_from_slice(&data.clone());
        let options = Options::default();

        // First pass fills the cache, second pass must answer identically.
        let mut cached = BlockState::new(&options, 0, data.len(), true);
        let mut fresh = BlockState::new(&options, 0, data.len(), false);
        let mut h = RollingHash::new();
        h.reset();
        h.warmup(&data, 0, data.len());

        let mut first = Vec::new();
        for pos in 0..data.len() {
            h.update(&data, pos, data.len());
            let mut sublen = [0u16; 259];
            first.push(find_longest_match(
                &mut cached,
                &h,
                &data,
                pos,
                data.len(),
                MAX_MATCH,
                Some(&mut sublen),
            ));
        }

        let mut h = RollingHash::new();
        h.reset();
        h.warmup(&data, 0, data.len());
        for pos in 0..data.len() {
            h.update(&data, pos, data.len());
            let mut sublen = [0u16; 259];
            let expected = find_longest_match(
                &mut fresh,
                &h,
                &data,
                pos,
                data.len(),
                MAX_MATCH,
                Some(&mut sublen),
            );
            // Re-query the cache-backed state: everything is cached now.
            let mut sublen2 = [0u16; 259];
            let got = find_longest_match(
                &mut cached,
                &h,
                &data,
                pos,
                data.len(),
                MAX_MATCH,
                Some(&mut sublen2),
            );
            assert_eq!(got, expected, "cache diverged at position {}", pos);
            assert_eq!(got, first[pos]);
        }
    }

    #[test]
    fn test_length_score() {
        assert_eq!(length_score(2, 1), 0);
        assert_eq!(length_score(3, 1), 3 * 1024);
        assert_eq!(length_score(3, 1024), 3 * 1024);
        // Past 1024 the penalty grows with the overshoot.
        assert_eq!(length_score(3, 1056), 3 * 1024 - 1);
        assert!(length_score(10, 32768) < length_score(10, 5));
        // The penalty never outweighs one unit of length.
        assert!(length_score(10, 32768) > length_score(9, 1));
    }

    #[test]
    fn test_greedy_all_literals() {
        let store = greedy_store(b"abcdefgh");
        assert_eq!(store.len(), 8);
        assert!(store.dists.iter().all(|&d| d == 0));
    }

    #[test]
    fn test_greedy_finds_repetition() {
        let store = greedy_store(b"hello worldhello world");
        assert!(store.len() < 22);
        assert!(store.dists.iter().any(|&d| d > 0), "expected a back-reference");
    }

    #[test]
    fn test_greedy_run_of_zeros() {
        let store = greedy_store(&vec![0u8; 1000]);
        // One literal then long matches at distance 1.
        assert!(store.len() <= 6);
        assert_eq!(store.dists[1], 1);
    }

    #[test]
    fn test_greedy_covers_input() {
        let data = b"the quick brown fox jumps over the lazy dog the quick brown fox";
        let store = greedy_store(data);
        let total: usize = store
            .litlens
            .iter()
            .zip(&store.dists)
            .map(|(&l, &d)| if d == 0 { 1 } else { l as usize })
            .sum();
        assert_eq!(total, data.len());
    }

    #[test]
    fn test_verify_len_dist_accepts_valid() {
        let data = b"abcabc";
        verify_len_dist(data, data.len(), 3, 3, 3);
    }

    #[test]
    #[should_panic]
    fn test_verify_len_dist_rejects_invalid() {
        let data = b"abcdef";
        verify_len_dist(data, data.len(), 3, 3, 3);
    }
}
