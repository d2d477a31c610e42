//! Bounded, partially sorted candidate set used by greedy search and robust
//! prune.
//!
//! Membership is tracked in a visited set sized from the current maximum node
//! id: a pooled fixed-size bitmap when the hint fits one of the pre-allocated
//! size classes, otherwise a hash set. Bitmaps are recycled through a
//! process-wide pool; exceeding the largest class falls back to hashing
//! rather than allocating multi-megabyte bitmaps per search.

use std::cmp::Ordering;
use std::sync::OnceLock;

use parking_lot::Mutex;
use rustc_hash::FxHashSet;

use crate::error::Result;

/// Distance closure resolving a node id to its distance from the query.
pub type DistFn<'a> = Box<dyn Fn(u64) -> Result<f32> + 'a>;

/// Visited-bitmap size classes in bits.
const BITMAP_SIZE_CLASSES: [usize; 7] = [
    110_000, 260_000, 520_000, 1_300_000, 2_600_000, 5_200_000, 10_500_000,
];

/// Maximum recycled bitmaps kept per size class.
const POOL_DEPTH: usize = 8;

struct BitmapPool {
    classes: Vec<Mutex<Vec<Vec<u64>>>>,
}

impl BitmapPool {
    fn global() -> &'static Self {
        static POOL: OnceLock<BitmapPool> = OnceLock::new();
        POOL.get_or_init(|| BitmapPool {
            classes: BITMAP_SIZE_CLASSES
                .iter()
                .map(|_| Mutex::new(Vec::new()))
                .collect(),
        })
    }

    /// Checks out a zeroed bitmap covering `hint` bits, or `None` when the
    /// hint exceeds the largest class.
    fn checkout(&self, hint: u64) -> Option<Vec<u64>> {
        let class = BITMAP_SIZE_CLASSES
            .iter()
            .position(|&bits| (bits as u64) > hint)?;
        let words = BITMAP_SIZE_CLASSES[class].div_ceil(64);
        let mut pool = self.classes[class].lock();
        match pool.pop() {
            Some(mut bitmap) => {
                bitmap.iter_mut().for_each(|w| *w = 0);
                Some(bitmap)
            }
            None => Some(vec![0u64; words]),
        }
    }

    fn give_back(&self, bitmap: Vec<u64>) {
        let bits = bitmap.len() * 64;
        let Some(class) = BITMAP_SIZE_CLASSES
            .iter()
            .position(|&c| c.div_ceil(64) * 64 == bits)
        else {
            return; // grown past its class, let it drop
        };
        let mut pool = self.classes[class].lock();
        if pool.len() < POOL_DEPTH {
            pool.push(bitmap);
        }
    }
}

enum VisitedSet {
    Bitmap(Vec<u64>),
    Hash(FxHashSet<u64>),
}

impl VisitedSet {
    fn new(hint: Option<u64>) -> Self {
        match hint.and_then(|h| BitmapPool::global().checkout(h)) {
            Some(bitmap) => Self::Bitmap(bitmap),
            None => Self::Hash(FxHashSet::default()),
        }
    }

    /// Inserts the id, returning true if it was not present.
    fn insert(&mut self, id: u64) -> bool {
        match self {
            Self::Bitmap(words) => {
                let word = (id / 64) as usize;
                if word >= words.len() {
                    // Ids appended by concurrent inserters can outgrow the
                    // hint taken at search start.
                    words.resize(word + 1, 0);
                }
                let mask = 1u64 << (id % 64);
                let seen = words[word] & mask != 0;
                words[word] |= mask;
                !seen
            }
            Self::Hash(set) => set.insert(id),
        }
    }
}

impl Drop for VisitedSet {
    fn drop(&mut self) {
        if let Self::Bitmap(words) = self {
            BitmapPool::global().give_back(std::mem::take(words));
        }
    }
}

/// An element of a [`DistSet`].
#[derive(Debug, Clone)]
pub struct DistSetElem {
    /// Node id.
    pub id: u64,
    /// Distance from the query.
    pub distance: f32,
    /// Explored by greedy search.
    pub visited: bool,
    /// Discarded by robust prune.
    pub prune_removed: bool,
}

impl DistSetElem {
    /// Creates an unexplored element.
    #[must_use]
    pub fn new(id: u64, distance: f32) -> Self {
        Self {
            id,
            distance,
            visited: false,
            prune_removed: false,
        }
    }
}

/// Fixed-capacity candidate set, kept ascending by distance.
///
/// Equal distances tie-break towards earlier insertion (stable ordering).
/// Dropping the set returns any pooled visited bitmap; [`DistSet::release`]
/// does so explicitly.
pub struct DistSet<'a> {
    items: Vec<DistSetElem>,
    sorted_until: usize,
    capacity: usize,
    dist_fn: Option<DistFn<'a>>,
    visited: VisitedSet,
}

impl<'a> DistSet<'a> {
    /// Creates a set with a distance closure and a visited set sized by
    /// `max_node_id_hint`.
    #[must_use]
    pub fn new(capacity: usize, dist_fn: DistFn<'a>, max_node_id_hint: Option<u64>) -> Self {
        Self {
            items: Vec::with_capacity(capacity.saturating_add(1)),
            sorted_until: 0,
            capacity,
            dist_fn: Some(dist_fn),
            visited: VisitedSet::new(max_node_id_hint),
        }
    }

    /// Creates a set that only accepts pre-computed elements
    /// ([`DistSet::add_already_unique`] and [`DistSet::add_elem_with_limit`]).
    #[must_use]
    pub fn without_distances(capacity: usize) -> Self {
        Self {
            items: Vec::with_capacity(capacity.saturating_add(1)),
            sorted_until: 0,
            capacity,
            dist_fn: None,
            visited: VisitedSet::Hash(FxHashSet::default()),
        }
    }

    /// Number of elements held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns true if the set holds no elements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Configured capacity `K`.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Appends ids not yet seen, without enforcing the capacity.
    ///
    /// The array becomes partially sorted; call [`DistSet::sort`] before
    /// ordered traversal.
    ///
    /// # Errors
    ///
    /// Propagates distance closure failures.
    pub fn add(&mut self, ids: &[u64]) -> Result<()> {
        for &id in ids {
            if !self.visited.insert(id) {
                continue;
            }
            let distance = self.distance(id)?;
            self.items.push(DistSetElem::new(id, distance));
        }
        Ok(())
    }

    /// Adds ids not yet seen, keeping the set sorted and bounded by its
    /// capacity.
    ///
    /// # Errors
    ///
    /// Propagates distance closure failures.
    pub fn add_with_limit(&mut self, ids: &[u64]) -> Result<()> {
        for &id in ids {
            if !self.visited.insert(id) {
                continue;
            }
            let distance = self.distance(id)?;
            self.add_elem_with_limit(DistSetElem::new(id, distance));
        }
        Ok(())
    }

    /// Adds one pre-computed element, keeping the set sorted and bounded.
    pub fn add_elem_with_limit(&mut self, elem: DistSetElem) {
        debug_assert_eq!(
            self.sorted_until,
            self.items.len(),
            "add_elem_with_limit requires a sorted set"
        );
        if self.items.len() >= self.capacity {
            match self.items.last() {
                Some(worst) if elem.distance >= worst.distance => return,
                _ => {
                    self.items.pop();
                }
            }
        }
        // The array is sorted, so a single insertion pass from the tail
        // suffices.
        let mut i = self.items.len();
        self.items.push(elem);
        while i > 0
            && self.items[i - 1].distance.total_cmp(&self.items[i].distance) == Ordering::Greater
        {
            self.items.swap(i - 1, i);
            i -= 1;
        }
        self.sorted_until = self.items.len();
    }

    /// Appends an element known to be absent, skipping the visited check.
    ///
    /// Used by greedy search for elements just popped from the sorted
    /// frontier.
    pub fn add_already_unique(&mut self, elem: DistSetElem) {
        self.items.push(elem);
    }

    /// Insertion-sorts the unsorted tail into the array.
    pub fn sort(&mut self) {
        for i in self.sorted_until..self.items.len() {
            let mut j = i;
            while j > 0
                && self.items[j - 1].distance.total_cmp(&self.items[j].distance)
                    == Ordering::Greater
            {
                self.items.swap(j - 1, j);
                j -= 1;
            }
        }
        self.sorted_until = self.items.len();
    }

    /// Elements in their current order.
    #[must_use]
    pub fn items(&self) -> &[DistSetElem] {
        &self.items
    }

    /// Index of the first unexplored element within the first `limit`
    /// positions.
    #[must_use]
    pub fn first_unvisited(&self, limit: usize) -> Option<usize> {
        self.items
            .iter()
            .take(limit)
            .position(|elem| !elem.visited)
    }

    /// Marks the element at `idx` as explored and returns a copy.
    pub fn mark_visited(&mut self, idx: usize) -> DistSetElem {
        self.items[idx].visited = true;
        self.items[idx].clone()
    }

    /// Flags the element at `idx` as removed by robust prune.
    pub fn mark_prune_removed(&mut self, idx: usize) {
        self.items[idx].prune_removed = true;
    }

    /// Returns the pooled visited bitmap, if any, to its pool.
    ///
    /// Equivalent to dropping the set; provided for call sites that want the
    /// hand-back to be explicit.
    pub fn release(self) {
        drop(self);
    }

    fn distance(&self, id: u64) -> Result<f32> {
        match &self.dist_fn {
            Some(f) => f(id),
            None => Err(crate::error::Error::Internal(
                "distance set has no distance closure".into(),
            )),
        }
    }
}
