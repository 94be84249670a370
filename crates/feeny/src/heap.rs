//! The garbage-collected heap: bump allocation over a semi-space arena and
//! a Cheney-style copying collector.
//!
//! Both semi-spaces live in one contiguous word arena; the from-space base
//! alternates between the arena's two halves on every collection. Pointer
//! words carry arena-global byte offsets, so a from-space pointer and a
//! to-space pointer are distinguishable by a range check — the same trick
//! the classic two-mmap layout gets from distinct address ranges, without
//! the unsafe code.
//!
//! Object layout (in words):
//!
//! ```text
//! array:    [ ARRAY_TYPE, length, slot0, slot1, ... ]
//! instance: [ type_tag,   parent, var0,  var1,  ... ]
//! ```
//!
//! Every object is at least two words, which is exactly what forwarding
//! needs: a moved object's header becomes [`BROKEN_HEART`] and the word
//! after it holds the tagged forwarding pointer.
//!
//! The collector is precise: the VM hands it an iterator over every root
//! word (the global object pointer, every frame local, every operand stack
//! slot), each of which is rewritten in place. Template classes are not
//! heap objects; the range check in `copy` rejects anything outside
//! from-space, so off-heap referents survive untouched.
//!
//! Growth policy: when a post-collection heap is still more than 70% full
//! (or the pending allocation does not fit), both semi-spaces double into a
//! fresh arena and the live data is evacuated once more. The old arena is
//! dropped afterwards.

use crate::{
    classes::{ARRAY_TYPE, BROKEN_HEART, ClassTable},
    value::Word,
};

/// Default semi-space size: 1 MiB per space, as words.
pub const DEFAULT_SEMI_WORDS: usize = (1024 * 1024) / 8;

/// Collect when usage crosses 90% of a semi-space.
const COLLECT_NUM: usize = 9;
/// Grow when post-collection usage still exceeds 70%.
const GROW_NUM: usize = 7;
const THRESHOLD_DEN: usize = 10;

/// A point-in-time snapshot of heap occupancy and collector activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapStats {
    /// Words per semi-space (the usable capacity).
    pub semi_space_words: usize,
    /// Words currently allocated in from-space.
    pub used_words: usize,
    /// Collections run so far, including those triggered by growth.
    pub collections: u64,
    /// Times the heap doubled.
    pub growths: u64,
}

/// The semi-space heap.
#[derive(Debug)]
pub struct Heap {
    /// Both semi-spaces, back to back.
    words: Box<[i64]>,
    /// Words per semi-space.
    semi: usize,
    /// Arena word index of the from-space base: 0 or `semi`.
    from: usize,
    /// Bump pointer: arena word index of the next free word.
    alloc: usize,
    collections: u64,
    growths: u64,
}

impl Heap {
    /// Creates a heap with `semi_words` words per semi-space.
    #[must_use]
    pub fn new(semi_words: usize) -> Self {
        // Two words is the smallest object; anything less than that per
        // space could never allocate.
        let semi = semi_words.max(2);
        Self {
            words: vec![0; semi * 2].into_boxed_slice(),
            semi,
            from: 0,
            alloc: 0,
            collections: 0,
            growths: 0,
        }
    }

    /// Words currently in use in from-space.
    #[must_use]
    pub fn used(&self) -> usize {
        self.alloc - self.from
    }

    /// Whether an allocation of `nwords` fits without collecting.
    #[must_use]
    pub fn fits(&self, nwords: usize) -> bool {
        self.used() + nwords <= self.semi
    }

    /// Whether the allocator should collect before satisfying `nwords`.
    #[must_use]
    pub fn should_collect(&self, nwords: usize) -> bool {
        !self.fits(nwords) || self.used() * THRESHOLD_DEN > self.semi * COLLECT_NUM
    }

    /// Whether a just-collected heap should grow before `nwords` lands.
    #[must_use]
    pub fn should_grow(&self, nwords: usize) -> bool {
        !self.fits(nwords) || self.used() * THRESHOLD_DEN > self.semi * GROW_NUM
    }

    /// Bump-allocates `nwords` and returns the arena word index of the new
    /// object. The caller must have ensured the space (see
    /// [`Heap::fits`]); the words are not initialized.
    pub fn bump(&mut self, nwords: usize) -> usize {
        debug_assert!(self.fits(nwords), "bump without room");
        let index = self.alloc;
        self.alloc += nwords;
        index
    }

    /// Reads an arena word.
    #[inline]
    #[must_use]
    pub fn get(&self, index: usize) -> i64 {
        self.words[index]
    }

    /// Writes an arena word.
    #[inline]
    pub fn set(&mut self, index: usize, value: i64) {
        self.words[index] = value;
    }

    /// Arena word index behind a pointer word.
    #[inline]
    #[must_use]
    pub fn index_of(w: Word) -> usize {
        w.addr() / 8
    }

    /// Pointer word for an arena word index.
    #[inline]
    #[must_use]
    pub fn word_at(index: usize) -> Word {
        Word::from_addr(index * 8)
    }

    #[must_use]
    pub fn stats(&self) -> HeapStats {
        HeapStats {
            semi_space_words: self.semi,
            used_words: self.used(),
            collections: self.collections,
            growths: self.growths,
        }
    }

    /// Runs one collection: copies every root into to-space, scans the
    /// copied prefix rewriting interior pointers, then flips the spaces.
    pub fn collect<'a, I>(&mut self, classes: &ClassTable, roots: I)
    where
        I: IntoIterator<Item = &'a mut Word>,
    {
        let (lo, hi) = self.words.split_at_mut(self.semi);
        let (src, src_base, dst, dst_base) = if self.from == 0 {
            (lo, 0, hi, self.semi)
        } else {
            (hi, self.semi, lo, 0)
        };
        let mut evac = Evacuator {
            src,
            src_base,
            dst,
            dst_base,
            to_ptr: 0,
            classes,
        };
        for root in roots {
            *root = evac.copy(*root);
        }
        evac.scan();
        let live = evac.to_ptr;

        self.from = dst_base;
        self.alloc = dst_base + live;
        self.collections += 1;
    }

    /// Doubles both semi-spaces into a fresh arena and evacuates the live
    /// data into it. The old arena is freed on return.
    pub fn grow_and_collect<'a, I>(&mut self, classes: &ClassTable, roots: I)
    where
        I: IntoIterator<Item = &'a mut Word>,
    {
        let new_semi = self.semi * 2;
        let mut new_words = vec![0i64; new_semi * 2].into_boxed_slice();
        let live = {
            let src = &mut self.words[self.from..self.from + self.semi];
            let dst = &mut new_words[..new_semi];
            let mut evac = Evacuator {
                src,
                src_base: self.from,
                dst,
                dst_base: 0,
                to_ptr: 0,
                classes,
            };
            for root in roots {
                *root = evac.copy(*root);
            }
            evac.scan();
            evac.to_ptr
        };

        self.words = new_words;
        self.semi = new_semi;
        self.from = 0;
        self.alloc = live;
        self.collections += 1;
        self.growths += 1;
    }
}

/// Size in words of the object whose header and second word are given.
///
/// Panics on a forwarded or unknown header: both mean the heap is corrupt,
/// which is an interpreter bug rather than a user error.
fn object_size(header: i64, second: i64, classes: &ClassTable) -> usize {
    if header == ARRAY_TYPE {
        let length = usize::try_from(second).expect("negative array length in heap");
        return 2 + length;
    }
    assert!(header != BROKEN_HEART, "attempted to size a forwarded object");
    let nvars = classes
        .nvars(header)
        .unwrap_or_else(|| panic!("unknown object type {header} in heap"));
    2 + nvars
}

/// One evacuation pass: from `src` (the old from-space) into `dst` (the new
/// to-space). The two slices address disjoint memory; `src_base` and
/// `dst_base` map slice positions back to arena-global word indices so
/// pointer words can be range-checked and rebuilt.
struct Evacuator<'a> {
    src: &'a mut [i64],
    src_base: usize,
    dst: &'a mut [i64],
    dst_base: usize,
    /// Words used in `dst` so far.
    to_ptr: usize,
    classes: &'a ClassTable,
}

impl Evacuator<'_> {
    /// Copies one word's referent if it is an unmoved from-space object.
    ///
    /// Immediates and pointers outside from-space pass through unchanged;
    /// already-moved objects resolve through their forwarding word.
    fn copy(&mut self, w: Word) -> Word {
        if !w.is_ptr() {
            return w;
        }
        let global = Heap::index_of(w);
        if global < self.src_base || global >= self.src_base + self.src.len() {
            return w;
        }
        let s = global - self.src_base;

        if self.src[s] == BROKEN_HEART {
            return Word::from_raw(self.src[s + 1]);
        }

        let size = object_size(self.src[s], self.src[s + 1], self.classes);
        self.dst[self.to_ptr..self.to_ptr + size].copy_from_slice(&self.src[s..s + size]);
        let forwarded = Heap::word_at(self.dst_base + self.to_ptr);
        self.to_ptr += size;

        self.src[s] = BROKEN_HEART;
        self.src[s + 1] = forwarded.raw();
        forwarded
    }

    /// Cheney scan: walk the copied prefix of to-space, copying everything
    /// each object references. `to_ptr` advances as `copy` appends, so the
    /// loop naturally runs until the transitive closure is complete.
    fn scan(&mut self) {
        let mut scan = 0;
        while scan < self.to_ptr {
            let header = self.dst[scan];
            let size = object_size(header, self.dst[scan + 1], self.classes);
            let fields = if header == ARRAY_TYPE {
                // Elements start after the length word.
                scan + 2..scan + size
            } else {
                // Parent word plus var slots.
                scan + 1..scan + size
            };
            for i in fields {
                let field = Word::from_raw(self.dst[i]);
                let moved = self.copy(field);
                self.dst[i] = moved.raw();
            }
            scan += size;
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{bytecode::compile, classes::OBJECT_TYPE, parser::parse};

    /// A class table with one user class of two var slots.
    fn test_classes() -> ClassTable {
        let ast = parse("var o = object:\n    var a = 1\n    var b = 2\n").expect("parse failed");
        let program = compile(&ast).expect("compile failed");
        ClassTable::build(&program).expect("class table build failed")
    }

    fn alloc_array(heap: &mut Heap, values: &[Word]) -> Word {
        let base = heap.bump(2 + values.len());
        heap.set(base, ARRAY_TYPE);
        heap.set(base + 1, i64::try_from(values.len()).expect("length"));
        for (i, v) in values.iter().enumerate() {
            heap.set(base + 2 + i, v.raw());
        }
        Heap::word_at(base)
    }

    fn alloc_instance(heap: &mut Heap, parent: Word, slots: &[Word]) -> Word {
        let base = heap.bump(2 + slots.len());
        heap.set(base, OBJECT_TYPE);
        heap.set(base + 1, parent.raw());
        for (i, v) in slots.iter().enumerate() {
            heap.set(base + 2 + i, v.raw());
        }
        Heap::word_at(base)
    }

    fn array_elem(heap: &Heap, array: Word, i: usize) -> Word {
        Word::from_raw(heap.get(Heap::index_of(array) + 2 + i))
    }

    #[test]
    fn test_collect_preserves_rooted_array() {
        let classes = test_classes();
        let mut heap = Heap::new(64);
        let mut root = alloc_array(&mut heap, &[Word::from_int(10), Word::NULL]);
        let old = root;

        heap.collect(&classes, std::iter::once(&mut root));

        assert_ne!(root, old, "object should have moved to the other space");
        assert_eq!(array_elem(&heap, root, 0), Word::from_int(10));
        assert_eq!(array_elem(&heap, root, 1), Word::NULL);
        assert_eq!(heap.used(), 4);
    }

    #[test]
    fn test_collect_reclaims_garbage() {
        let classes = test_classes();
        let mut heap = Heap::new(64);
        let _garbage = alloc_array(&mut heap, &[Word::from_int(1); 8]);
        let mut root = alloc_array(&mut heap, &[Word::from_int(2)]);
        assert_eq!(heap.used(), 13);

        heap.collect(&classes, std::iter::once(&mut root));

        assert_eq!(heap.used(), 3, "only the rooted array should survive");
    }

    #[test]
    fn test_shared_object_copied_once() {
        let classes = test_classes();
        let mut heap = Heap::new(64);
        let shared = alloc_array(&mut heap, &[Word::from_int(5)]);
        let mut a = shared;
        let mut b = shared;

        heap.collect(&classes, [&mut a, &mut b]);

        assert_eq!(a, b, "both roots must resolve through the same forwarding word");
        assert_eq!(heap.used(), 3);
    }

    #[test]
    fn test_interior_pointers_rewritten() {
        let classes = test_classes();
        let mut heap = Heap::new(64);
        let inner = alloc_array(&mut heap, &[Word::from_int(9)]);
        let mut outer = alloc_array(&mut heap, &[inner, Word::from_int(1)]);

        heap.collect(&classes, std::iter::once(&mut outer));

        let moved_inner = array_elem(&heap, outer, 0);
        assert!(moved_inner.is_ptr());
        assert_eq!(array_elem(&heap, moved_inner, 0), Word::from_int(9));
        assert_eq!(heap.used(), 7);
    }

    #[test]
    fn test_instance_parent_chain_survives() {
        let classes = test_classes();
        let mut heap = Heap::new(64);
        let parent = alloc_instance(&mut heap, Word::NULL, &[Word::from_int(1), Word::from_int(2)]);
        let mut child = alloc_instance(&mut heap, parent, &[Word::from_int(3), Word::from_int(4)]);

        heap.collect(&classes, std::iter::once(&mut child));

        let child_idx = Heap::index_of(child);
        let moved_parent = Word::from_raw(heap.get(child_idx + 1));
        assert!(moved_parent.is_ptr());
        let parent_idx = Heap::index_of(moved_parent);
        assert_eq!(Word::from_raw(heap.get(parent_idx + 1)), Word::NULL);
        assert_eq!(Word::from_raw(heap.get(parent_idx + 2)), Word::from_int(1));
        assert_eq!(Word::from_raw(heap.get(child_idx + 3)), Word::from_int(4));
    }

    #[test]
    fn test_cycle_terminates() {
        let classes = test_classes();
        let mut heap = Heap::new(64);
        let a = alloc_array(&mut heap, &[Word::NULL]);
        let b = alloc_array(&mut heap, &[a]);
        // Close the cycle: a[0] = b.
        heap.set(Heap::index_of(a) + 2, b.raw());
        let mut root = a;

        heap.collect(&classes, std::iter::once(&mut root));

        assert_eq!(heap.used(), 6);
        let b_moved = array_elem(&heap, root, 0);
        assert_eq!(array_elem(&heap, b_moved, 0), root);
    }

    #[test]
    fn test_immediates_pass_through() {
        let classes = test_classes();
        let mut heap = Heap::new(64);
        let mut int_root = Word::from_int(1234);
        let mut null_root = Word::NULL;

        heap.collect(&classes, [&mut int_root, &mut null_root]);

        assert_eq!(int_root, Word::from_int(1234));
        assert_eq!(null_root, Word::NULL);
        assert_eq!(heap.used(), 0);
    }

    #[test]
    fn test_two_collections_flip_back() {
        let classes = test_classes();
        let mut heap = Heap::new(64);
        let mut root = alloc_array(&mut heap, &[Word::from_int(7)]);

        heap.collect(&classes, std::iter::once(&mut root));
        heap.collect(&classes, std::iter::once(&mut root));

        assert_eq!(array_elem(&heap, root, 0), Word::from_int(7));
        assert_eq!(heap.stats().collections, 2);
    }

    #[test]
    fn test_grow_doubles_semi_space() {
        let classes = test_classes();
        let mut heap = Heap::new(32);
        let mut root = alloc_array(&mut heap, &[Word::from_int(1); 20]);
        assert!(!heap.fits(22));

        heap.grow_and_collect(&classes, std::iter::once(&mut root));

        assert_eq!(heap.stats().semi_space_words, 64);
        assert_eq!(heap.stats().growths, 1);
        assert!(heap.fits(22));
        assert_eq!(array_elem(&heap, root, 19), Word::from_int(1));
    }

    #[test]
    fn test_collection_thresholds() {
        let mut heap = Heap::new(100);
        heap.bump(89);
        assert!(!heap.should_collect(1));
        heap.bump(2);
        assert!(heap.should_collect(1), "over 90% should trigger collection");
        assert!(heap.should_grow(1), "over 70% after collection should trigger growth");
    }
}
