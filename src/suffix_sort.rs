//! Suffix array construction with the Larsson-Sadakane prefix-doubling sort
//! over an integer alphabet.
//!
//! The reference bytes are first ranked into a dense alphabet, with the
//! sentinel strictly smallest. Sorted groups are marked in the work array by
//! their negated length, which is why the index type has to be signed.

use rayon::prelude::*;

use crate::alphabet::SENTINEL;
use crate::error::reserve_exact;
use crate::{Error, IndexInt, Result};

const HISTOGRAM_CHUNK: usize = 1 << 20;

/// Builds the suffix array and inverse suffix array over `bases`, which must
/// end with the sentinel byte.
///
/// Runs in `O(N log N)` time and `O(N)` extra space beyond the two returned
/// arrays.
pub(crate) fn build_suffix_array<I: IndexInt>(bases: &[u8]) -> Result<(Vec<I>, Vec<I>)> {
    let n_total = bases.len();
    if n_total < 2 {
        return Err(Error::Range("reference is too short to index".into()));
    }
    if I::max_value().to_usize().is_some_and(|max| n_total > max) {
        return Err(Error::Range(format!(
            "reference length {n_total} does not fit the index integer type"
        )));
    }
    if bases[n_total - 1] != SENTINEL {
        return Err(Error::Range("reference does not end with the sentinel".into()));
    }

    let (ranks, alphabet_size) = rank_alphabet::<I>(bases)?;

    let mut isa = reserve_exact::<I>("inverse suffix array", n_total)?;
    isa.extend(bases.iter().map(|&b| ranks[b as usize]));

    let mut sa = reserve_exact::<I>("suffix array", n_total)?;
    sa.resize(n_total, I::zero());

    let mut sorter = Sorter {
        sa: &mut sa,
        isa: &mut isa,
        h: 0,
    };
    sorter.run(n_total - 1, alphabet_size);

    Ok((sa, isa))
}

/// Maps each occurring byte value to a dense rank, in byte order, so the
/// sentinel gets rank zero.
fn rank_alphabet<I: IndexInt>(bases: &[u8]) -> Result<([I; 256], usize)> {
    let seen = bases
        .par_chunks(HISTOGRAM_CHUNK)
        .map(|chunk| {
            let mut seen = [false; 256];
            for &byte in chunk {
                seen[byte as usize] = true;
            }
            seen
        })
        .reduce(
            || [false; 256],
            |mut left, right| {
                for (l, r) in left.iter_mut().zip(right) {
                    *l |= r;
                }
                left
            },
        );

    let smallest = seen
        .iter()
        .position(|&occurs| occurs)
        .expect("a non-empty reference has occurring bytes");
    if smallest as u8 != SENTINEL {
        return Err(Error::Range(format!(
            "byte {smallest:#04x} in the reference sorts below the sentinel"
        )));
    }

    let mut ranks = [I::zero(); 256];
    let mut alphabet_size = 0;
    for byte in 0..256 {
        if seen[byte] {
            ranks[byte] = I::from_index(alphabet_size);
            alphabet_size += 1;
        }
    }

    Ok((ranks, alphabet_size))
}

/// The doubling sort. `sa` starts as workspace and ends as the suffix array;
/// `isa` starts holding alphabet ranks and ends as the inverse suffix array.
/// Group numbers in `isa` are the index of the last member of the group;
/// sorted spans in `sa` carry their negated length at the first position.
struct Sorter<'a, I> {
    sa: &'a mut [I],
    isa: &'a mut [I],
    h: usize,
}

impl<I: IndexInt> Sorter<'_, I> {
    /// `n` is the index of the sentinel, so `n + 1` elements take part.
    fn run(&mut self, n: usize, alphabet_size: usize) {
        if n >= alphabet_size {
            self.bucket_sort(n, alphabet_size);
        } else {
            for i in 0..=n {
                self.sa[i] = I::from_index(i);
            }
            self.h = 0;
            self.sort_split(0, n + 1);
        }
        self.h = 1;

        let neg_n = I::zero() - I::from_index(n);
        while self.sa[0] >= neg_n {
            let mut pi = 0usize;
            let mut sorted_len = 0isize;
            loop {
                let first = self.sa[pi];
                if first < I::zero() {
                    let skip = (-first.to_isize().expect("group length fits isize")) as usize;
                    pi += skip;
                    sorted_len -= skip as isize;
                } else {
                    if sorted_len != 0 {
                        // combine the sorted groups just skipped into one
                        self.sa[(pi as isize + sorted_len) as usize] =
                            <I as num_traits::NumCast>::from(sorted_len)
                                .expect("group length fits the index type");
                        sorted_len = 0;
                    }
                    let group_end = self.isa[first.index()].index() + 1;
                    self.sort_split(pi, group_end - pi);
                    pi = group_end;
                }
                if pi > n {
                    break;
                }
            }
            if sorted_len != 0 {
                self.sa[(pi as isize + sorted_len) as usize] =
                    <I as num_traits::NumCast>::from(sorted_len)
                        .expect("group length fits the index type");
            }
            self.h *= 2;
        }

        // reconstruct the suffix array from its inverse
        for i in 0..=n {
            self.sa[self.isa[i].index()] = I::from_index(i);
        }
    }

    fn key(&self, i: usize) -> I {
        self.isa[self.sa[i].index() + self.h]
    }

    fn update_group(&mut self, pl: usize, pm: usize) {
        let group = I::from_index(pm);
        self.isa[self.sa[pl].index()] = group;
        if pl == pm {
            self.sa[pl] = I::zero() - I::one();
        } else {
            for j in pl + 1..=pm {
                self.isa[self.sa[j].index()] = group;
            }
        }
    }

    /// First round only: one pass of counting by symbol, threading each
    /// bucket through a linked list spliced into the work arrays.
    fn bucket_sort(&mut self, n: usize, alphabet_size: usize) {
        let minus_one = I::zero() - I::one();
        for head in self.sa[..alphabet_size].iter_mut() {
            *head = minus_one;
        }
        for i in 0..=n {
            let c = self.isa[i].index();
            self.isa[i] = self.sa[c];
            self.sa[c] = I::from_index(i);
        }

        let mut slot = n as isize;
        for bucket in (0..alphabet_size).rev() {
            let mut position = self.sa[bucket];
            let mut next = self.isa[position.index()];
            let group = I::from_index(slot as usize);
            self.isa[position.index()] = group;
            if next >= I::zero() {
                self.sa[slot as usize] = position;
                slot -= 1;
                loop {
                    position = next;
                    next = self.isa[position.index()];
                    self.isa[position.index()] = group;
                    self.sa[slot as usize] = position;
                    slot -= 1;
                    if next < I::zero() {
                        break;
                    }
                }
            } else {
                self.sa[slot as usize] = minus_one;
                slot -= 1;
            }
        }
    }

    /// Ternary-split quicksort of one group by the key at the current depth.
    fn sort_split(&mut self, p: usize, n: usize) {
        if n < 7 {
            self.select_sort_split(p, n);
            return;
        }

        let pivot = self.choose_pivot(p, n);

        let mut pa = p as isize;
        let mut pb = p as isize;
        let mut pc = (p + n - 1) as isize;
        let mut pd = (p + n - 1) as isize;

        loop {
            while pb <= pc {
                let key = self.key(pb as usize);
                if key > pivot {
                    break;
                }
                if key == pivot {
                    self.sa.swap(pa as usize, pb as usize);
                    pa += 1;
                }
                pb += 1;
            }
            while pc >= pb {
                let key = self.key(pc as usize);
                if key < pivot {
                    break;
                }
                if key == pivot {
                    self.sa.swap(pc as usize, pd as usize);
                    pd -= 1;
                }
                pc -= 1;
            }
            if pb > pc {
                break;
            }
            self.sa.swap(pb as usize, pc as usize);
            pb += 1;
            pc -= 1;
        }

        // move the pivot-equal runs from the edges into the middle
        let pn = (p + n) as isize;
        let mut swap_len = (pa - p as isize).min(pb - pa);
        let (mut pl, mut pm) = (p as isize, pb - swap_len);
        while swap_len > 0 {
            self.sa.swap(pl as usize, pm as usize);
            pl += 1;
            pm += 1;
            swap_len -= 1;
        }
        let mut swap_len = (pd - pc).min(pn - pd - 1);
        let (mut pl, mut pm) = (pb, pn - swap_len);
        while swap_len > 0 {
            self.sa.swap(pl as usize, pm as usize);
            pl += 1;
            pm += 1;
            swap_len -= 1;
        }

        let smaller = (pb - pa) as usize;
        let larger = (pd - pc) as usize;
        if smaller > 0 {
            self.sort_split(p, smaller);
        }
        self.update_group(p + smaller, p + n - larger - 1);
        if larger > 0 {
            self.sort_split(p + n - larger, larger);
        }
    }

    /// Selection sort for the smallest groups, peeling off one key class at a
    /// time.
    fn select_sort_split(&mut self, p: usize, n: usize) {
        let mut pa = p;
        let pn = p + n - 1;
        while pa < pn {
            let mut pb = pa + 1;
            let mut smallest = self.key(pa);
            for pi in pa + 1..=pn {
                let key = self.key(pi);
                if key < smallest {
                    smallest = key;
                    self.sa.swap(pi, pa);
                    pb = pa + 1;
                } else if key == smallest {
                    self.sa.swap(pi, pb);
                    pb += 1;
                }
            }
            self.update_group(pa, pb - 1);
            pa = pb;
        }
        if pa == pn {
            self.isa[self.sa[pa].index()] = I::from_index(pa);
            self.sa[pa] = I::zero() - I::one();
        }
    }

    fn median3(&self, a: usize, b: usize, c: usize) -> usize {
        let (ka, kb, kc) = (self.key(a), self.key(b), self.key(c));
        if ka < kb {
            if kb < kc {
                b
            } else if ka < kc {
                c
            } else {
                a
            }
        } else if kb > kc {
            b
        } else if ka > kc {
            c
        } else {
            a
        }
    }

    fn choose_pivot(&self, p: usize, n: usize) -> I {
        let mut pm = p + n / 2;
        if n > 7 {
            let mut pl = p;
            let mut pn = p + n - 1;
            if n > 40 {
                // pseudo-median of nine for the big groups
                let s = n >> 3;
                pl = self.median3(pl, pl + s, pl + 2 * s);
                pm = self.median3(pm - s, pm, pm + s);
                pn = self.median3(pn - 2 * s, pn - s, pn);
            }
            pm = self.median3(pl, pm, pn);
        }
        self.key(pm)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn naive_suffix_array(bases: &[u8]) -> Vec<usize> {
        let mut sa: Vec<usize> = (0..bases.len()).collect();
        sa.sort_by(|&a, &b| bases[a..].cmp(&bases[b..]));
        sa
    }

    fn check(bases: &[u8]) {
        let (sa, isa) = build_suffix_array::<i32>(bases).unwrap();
        let expected = naive_suffix_array(bases);

        let sa_usize: Vec<usize> = sa.iter().map(|&v| v as usize).collect();
        assert_eq!(sa_usize, expected, "suffix order for {:?}", bases);

        for (rank, &suffix) in sa.iter().enumerate() {
            assert_eq!(isa[suffix as usize] as usize, rank);
        }
    }

    #[test]
    fn tiny_references() {
        check(b"a$");
        check(b"ba$");
        check(b"aaaa$");
    }

    #[test]
    fn repetitive_reference() {
        check(b"acacacac$");
        check(b"abracadabra$");
    }

    #[test]
    fn reference_with_separators() {
        check(b"acgt`acgt$");
        check(b"acgtacgtn`xacgtacgty$");
    }

    #[test]
    fn long_mixed_reference() {
        let mut bases = Vec::new();
        for i in 0..2_000u32 {
            bases.push(b"acgt"[(i % 7 % 4) as usize]);
        }
        bases.push(b'$');
        check(&bases);
    }

    #[test]
    fn sentinel_must_be_smallest() {
        assert!(build_suffix_array::<i32>(b"ac!gt$").is_err());
        assert!(build_suffix_array::<i32>(b"acgt").is_err());
    }

    #[test]
    fn works_with_wide_indices() {
        let bases = b"gattaca`gattaca$";
        let (sa32, _) = build_suffix_array::<i32>(bases).unwrap();
        let (sa64, _) = build_suffix_array::<i64>(bases).unwrap();
        let widened: Vec<i64> = sa32.iter().map(|&v| v as i64).collect();
        assert_eq!(widened, sa64);
    }
}
