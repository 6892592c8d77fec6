#![allow(missing_docs)]

use core::fmt;
use core::iter::FusedIterator;
use core::mem::{swap, ManuallyDrop};
use core::ptr;

use std::collections::TryReserveError;
use std::slice;

use log::{debug, trace};
use thiserror::Error;

/// Errors raised while constructing a [`MinBinaryHeap`].
///
/// Every other failure (full heap, empty heap, missing key) is reported
/// through the `bool` / `Option` return value of the operation itself.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HeapError {
    #[error("heap capacity must be positive, got {0}")]
    InvalidCapacity(i64),
    #[error("failed to allocate heap storage: {0}")]
    Allocation(#[from] TryReserveError),
}

#[derive(Debug, Clone)]
pub struct HeapNode<K, V> {
    pub key: K,
    pub value: V,
}

impl<K: PartialEq, V> PartialEq for HeapNode<K, V> {
    fn eq(&self, other: &Self) -> bool {
        self.key.eq(&other.key)
    }
}

impl<K: Eq, V> Eq for HeapNode<K, V> {}

impl<K: PartialOrd + Eq, V> PartialOrd for HeapNode<K, V> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        self.key.partial_cmp(&other.key)
    }
}

impl<K: Ord, V> Ord for HeapNode<K, V> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.key.cmp(&other.key)
    }
}

impl<K: Copy, V: Copy> Copy for HeapNode<K, V> {}

/// A fixed-capacity priority queue implemented with a binary min-heap.
///
/// Every node carries an ordering `key` and an associated `value`. The node
/// with the smallest key is always at the root. The storage for `capacity`
/// nodes is allocated once in [`new`] and never grows: inserting into a full
/// heap is rejected instead of reallocating.
///
/// Several nodes may share a key. Lookups by key ([`search`], [`contains`],
/// [`remove`]) scan the storage front to back and act on the first match,
/// which is the lowest index, not necessarily the oldest node.
///
/// # Examples
///
/// ```
/// use bounded_kv_heap::MinBinaryHeap;
///
/// let mut heap = MinBinaryHeap::new(5).unwrap();
///
/// assert!(heap.insert(10, "A"));
/// assert!(heap.insert(5, "B"));
/// assert!(heap.insert(7, "C"));
///
/// // Lookups do not disturb the heap.
/// assert_eq!(heap.search(&7), Some(&"C"));
/// assert!(!heap.contains(&42));
///
/// // Values come back in ascending key order.
/// assert_eq!(heap.extract(), Some("B"));
/// assert_eq!(heap.extract(), Some("C"));
/// assert_eq!(heap.extract(), Some("A"));
/// assert_eq!(heap.extract(), None);
/// ```
///
/// A heap refuses to be built without room for at least one node:
///
/// ```
/// use bounded_kv_heap::{HeapError, MinBinaryHeap};
///
/// assert_eq!(
///     MinBinaryHeap::<i32, i32>::new(0).unwrap_err(),
///     HeapError::InvalidCapacity(0)
/// );
/// assert!(MinBinaryHeap::<i32, i32>::try_from(-3_i64).is_err());
/// ```
///
/// # Time complexity
///
/// | [insert]      | [extract]     | [remove] | [search]/[contains] | [peek] |
/// |---------------|---------------|----------|---------------------|--------|
/// | *O*(log(*n*)) | *O*(log(*n*)) | *O*(*n*) | *O*(*n*)            | *O*(1) |
///
/// [`new`]: MinBinaryHeap::new
/// [`search`]: MinBinaryHeap::search
/// [`contains`]: MinBinaryHeap::contains
/// [`remove`]: MinBinaryHeap::remove
/// [insert]: MinBinaryHeap::insert
/// [extract]: MinBinaryHeap::extract
/// [remove]: MinBinaryHeap::remove
/// [search]: MinBinaryHeap::search
/// [contains]: MinBinaryHeap::contains
/// [peek]: MinBinaryHeap::peek
pub struct MinBinaryHeap<K, V> {
    data: Vec<HeapNode<K, V>>,
    capacity: usize,
}

impl<K: Clone, V: Clone> Clone for MinBinaryHeap<K, V> {
    fn clone(&self) -> Self {
        // `Vec::clone` only reserves `len` slots; keep the full ceiling.
        let mut data = Vec::with_capacity(self.capacity);
        data.extend(self.data.iter().cloned());
        MinBinaryHeap {
            data,
            capacity: self.capacity,
        }
    }
}

impl<K: fmt::Debug, V: fmt::Debug> fmt::Debug for MinBinaryHeap<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MinBinaryHeap")
            .field("capacity", &self.capacity)
            .field("nodes", &self.data)
            .finish()
    }
}

impl<K: Ord, V> TryFrom<i64> for MinBinaryHeap<K, V> {
    type Error = HeapError;

    /// Builds a heap from a signed capacity, rejecting zero and negative values.
    fn try_from(capacity: i64) -> Result<Self, HeapError> {
        match usize::try_from(capacity) {
            Ok(capacity) if capacity > 0 => MinBinaryHeap::new(capacity),
            _ => {
                debug!("rejecting heap construction with capacity {capacity}");
                Err(HeapError::InvalidCapacity(capacity))
            }
        }
    }
}

#[allow(unused_unsafe)]
impl<K: Ord, V> MinBinaryHeap<K, V> {
    /// Creates an empty heap able to hold exactly `capacity` nodes.
    ///
    /// The storage is reserved up front; no later operation reallocates it.
    ///
    /// # Errors
    ///
    /// Returns [`HeapError::InvalidCapacity`] if `capacity` is zero and
    /// [`HeapError::Allocation`] if the storage cannot be reserved.
    ///
    /// # Examples
    ///
    /// ```
    /// use bounded_kv_heap::MinBinaryHeap;
    /// let heap = MinBinaryHeap::<i32, i32>::new(10).unwrap();
    /// assert_eq!(heap.capacity(), 10);
    /// assert!(heap.is_empty());
    /// ```
    pub fn new(capacity: usize) -> Result<MinBinaryHeap<K, V>, HeapError> {
        if capacity == 0 {
            debug!("rejecting heap construction with capacity 0");
            return Err(HeapError::InvalidCapacity(0));
        }

        let mut data = Vec::new();
        data.try_reserve_exact(capacity)?;
        Ok(MinBinaryHeap { data, capacity })
    }

    /// Inserts a node, returning `false` without touching the heap if it is
    /// already full.
    ///
    /// Keys are not deduplicated.
    ///
    /// # Examples
    ///
    /// ```
    /// use bounded_kv_heap::MinBinaryHeap;
    /// let mut heap = MinBinaryHeap::new(2).unwrap();
    ///
    /// assert!(heap.insert(1, 'x'));
    /// assert!(heap.insert(2, 'y'));
    /// assert!(!heap.insert(3, 'z'));
    /// assert_eq!(heap.len(), 2);
    /// ```
    ///
    /// # Time complexity
    ///
    /// *O*(log(*n*)) in the worst case. The storage never reallocates.
    pub fn insert(&mut self, key: K, value: V) -> bool {
        if self.is_full() {
            trace!("heap is full at capacity {}, rejecting insert", self.capacity);
            return false;
        }

        let old_len = self.len();
        self.data.push(HeapNode { key, value });
        // SAFETY: Since we pushed a new item it means that
        //  old_len = self.len() - 1 < self.len()
        unsafe { self.sift_up(old_len) };
        true
    }

    /// Removes the node with the smallest key and returns its value, or
    /// `None` if the heap is empty.
    ///
    /// # Examples
    ///
    /// ```
    /// use bounded_kv_heap::MinBinaryHeap;
    /// let mut heap = MinBinaryHeap::new(4).unwrap();
    /// heap.insert(3, "three");
    /// heap.insert(1, "one");
    ///
    /// assert_eq!(heap.extract(), Some("one"));
    /// assert_eq!(heap.extract(), Some("three"));
    /// assert_eq!(heap.extract(), None);
    /// ```
    pub fn extract(&mut self) -> Option<V> {
        self.pop().map(|node| node.value)
    }

    /// Removes the node with the smallest key and returns it whole, or `None`
    /// if the heap is empty.
    ///
    /// The last occupied node takes the root's place and is sifted down.
    ///
    /// # Time complexity
    ///
    /// The worst case cost of `pop` on a heap containing *n* elements is *O*(log(*n*)).
    pub fn pop(&mut self) -> Option<HeapNode<K, V>> {
        self.data.pop().map(|mut item| {
            if !self.is_empty() {
                swap(&mut item, &mut self.data[0]);
                // SAFETY: !self.is_empty() means that self.len() > 0
                unsafe { self.sift_down(0) };
            }

            item
        })
    }

    /// Deletes the first node (in storage order) whose key equals `key`.
    ///
    /// Returns `false` and leaves the heap untouched if no node matches. The
    /// removed node's value is dropped; use [`search`] beforehand if it is
    /// still needed.
    ///
    /// When several nodes share `key` exactly one of them is removed.
    ///
    /// # Examples
    ///
    /// ```
    /// use bounded_kv_heap::MinBinaryHeap;
    /// let mut heap = MinBinaryHeap::new(5).unwrap();
    /// heap.insert(4, "W");
    /// heap.insert(2, "V");
    ///
    /// assert!(heap.remove(&4));
    /// assert_eq!(heap.len(), 1);
    /// assert_eq!(heap.search(&4), None);
    /// assert!(!heap.remove(&4));
    /// assert_eq!(heap.extract(), Some("V"));
    /// ```
    ///
    /// [`search`]: MinBinaryHeap::search
    pub fn remove(&mut self, key: &K) -> bool {
        let Some(index) = self.search_index(key) else {
            trace!("remove found no node with the requested key");
            return false;
        };

        // SAFETY: search_index only yields indices below self.len().
        unsafe { self.climb_to_root(index) };
        self.pop();
        true
    }

    /// Returns the value of the first node (in storage order) whose key
    /// equals `key`.
    ///
    /// # Examples
    ///
    /// ```
    /// use bounded_kv_heap::MinBinaryHeap;
    /// let mut heap = MinBinaryHeap::new(3).unwrap();
    /// heap.insert(8, "eight");
    ///
    /// assert_eq!(heap.search(&8), Some(&"eight"));
    /// assert_eq!(heap.search(&9), None);
    /// ```
    #[must_use]
    pub fn search(&self, key: &K) -> Option<&V> {
        self.search_index(key).map(|index| &self.data[index].value)
    }

    /// Returns `true` if some node has key `key`.
    #[must_use]
    pub fn contains(&self, key: &K) -> bool {
        self.search(key).is_some()
    }

    /// Consumes the heap and returns its nodes in ascending key order.
    ///
    /// # Examples
    ///
    /// ```
    /// use bounded_kv_heap::MinBinaryHeap;
    ///
    /// let mut heap = MinBinaryHeap::new(4).unwrap();
    /// heap.insert(3, 'c');
    /// heap.insert(1, 'a');
    /// heap.insert(2, 'b');
    ///
    /// let values: Vec<char> = heap.into_sorted_vec().into_iter().map(|n| n.value).collect();
    /// assert_eq!(values, ['a', 'b', 'c']);
    /// ```
    #[must_use = "`self` will be dropped if the result is not used"]
    pub fn into_sorted_vec(mut self) -> Vec<HeapNode<K, V>> {
        let mut sorted = Vec::with_capacity(self.len());
        while let Some(node) = self.pop() {
            sorted.push(node);
        }
        sorted
    }

    /// Verifies `key(i) >= key(parent(i))` for every occupied slot.
    #[must_use]
    pub fn check_integrity(&self) -> bool {
        self.data.len() <= self.capacity
            && (1..self.data.len()).all(|i| self.data[i].key >= self.data[(i - 1) / 2].key)
    }

    fn search_index(&self, key: &K) -> Option<usize> {
        self.data.iter().position(|node| node.key == *key)
    }

    // The sifts move the element out of the vector (leaving behind a hole),
    // shift the others along and write the element back at the final
    // position of the hole. `Hole` refills the slot on drop, even on panic.

    /// Move the node at `pos` towards the root while its key is strictly
    /// smaller than its parent's.
    ///
    /// # Safety
    ///
    /// The caller must guarantee that `pos < self.len()`.
    unsafe fn sift_up(&mut self, pos: usize) {
        // SAFETY: The caller guarantees that pos < self.len()
        let mut hole = unsafe { Hole::new(&mut self.data, pos) };

        while hole.pos() > 0 {
            let parent = (hole.pos() - 1) / 2;

            // SAFETY: hole.pos() > 0 so parent < hole.pos(), which makes
            //  it a valid index distinct from hole.pos().
            if &hole.element().key >= unsafe { &hole.get(parent).key } {
                break;
            }

            // SAFETY: Same as above
            unsafe { hole.move_to(parent) };
        }
    }

    /// Move the node at `pos` all the way to the root regardless of keys.
    ///
    /// Equivalent to lowering its key below every other key and sifting up.
    ///
    /// # Safety
    ///
    /// The caller must guarantee that `pos < self.len()`.
    unsafe fn climb_to_root(&mut self, pos: usize) {
        // SAFETY: The caller guarantees that pos < self.len()
        let mut hole = unsafe { Hole::new(&mut self.data, pos) };

        while hole.pos() != 0 {
            let parent = (hole.pos() - 1) / 2;
            // SAFETY: parent < hole.pos() < self.len()
            unsafe { hole.move_to(parent) };
        }
    }

    /// Take the node at `pos` and move it down the heap while one of its
    /// children has a strictly smaller key. Ties between the children go
    /// to the left one.
    ///
    /// # Safety
    ///
    /// The caller must guarantee that `pos < self.len()`.
    unsafe fn sift_down(&mut self, pos: usize) {
        let end = self.len();
        // SAFETY: The caller guarantees that pos < self.len().
        let mut hole = unsafe { Hole::new(&mut self.data, pos) };
        let mut child = 2 * hole.pos() + 1;

        // Loop invariant: child == 2 * hole.pos() + 1.
        // No left child means no right child either.
        while child < end {
            // SAFETY: child < end and child + 1 < end are valid indexes
            //  and both differ from hole.pos().
            if child + 1 < end && unsafe { hole.get(child + 1).key < hole.get(child).key } {
                child += 1;
            }

            // SAFETY: child is a valid index distinct from hole.pos().
            if &hole.element().key <= unsafe { &hole.get(child).key } {
                return;
            }

            // SAFETY: same as above.
            unsafe { hole.move_to(child) };
            child = 2 * hole.pos() + 1;
        }
    }
}

impl<K, V> MinBinaryHeap<K, V> {
    /// Returns an iterator over the occupied nodes in storage order.
    ///
    /// Storage order is level order of the heap tree; only the first node is
    /// guaranteed to hold the smallest key.
    ///
    /// # Examples
    ///
    /// ```
    /// use bounded_kv_heap::MinBinaryHeap;
    /// let mut heap = MinBinaryHeap::new(4).unwrap();
    /// heap.insert(2, "b");
    /// heap.insert(1, "a");
    ///
    /// let keys: Vec<i32> = heap.iter().map(|node| node.key).collect();
    /// assert_eq!(keys, [1, 2]);
    /// ```
    pub fn iter(&self) -> Iter<'_, K, V> {
        Iter {
            iter: self.data.iter(),
        }
    }

    /// Returns the node with the smallest key, or `None` if the heap is empty.
    ///
    /// # Time complexity
    ///
    /// Cost is *O*(1) in the worst case.
    #[must_use]
    pub fn peek(&self) -> Option<&HeapNode<K, V>> {
        self.data.first()
    }

    /// Returns the fixed number of nodes the heap can hold.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the number of occupied slots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns `true` once `len() == capacity()`; further inserts are rejected.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.len() == self.capacity
    }

    /// Drops all nodes. The storage is kept, so the capacity is unchanged.
    ///
    /// # Examples
    ///
    /// ```
    /// use bounded_kv_heap::MinBinaryHeap;
    /// let mut heap = MinBinaryHeap::new(3).unwrap();
    /// heap.insert(1, ());
    ///
    /// heap.clear();
    ///
    /// assert!(heap.is_empty());
    /// assert_eq!(heap.capacity(), 3);
    /// ```
    pub fn clear(&mut self) {
        self.data.clear();
    }
}

/// Hole represents a hole in a slice i.e., an index without valid value
/// (because it was moved from or duplicated).
/// In drop, `Hole` will restore the slice by filling the hole
/// position with the value that was originally removed.
struct Hole<'a, T: 'a> {
    data: &'a mut [T],
    elt: ManuallyDrop<T>,
    pos: usize,
}

#[allow(unused_unsafe)]
impl<'a, T> Hole<'a, T> {
    /// Create a new `Hole` at index `pos`.
    ///
    /// Unsafe because pos must be within the data slice.
    #[inline]
    unsafe fn new(data: &'a mut [T], pos: usize) -> Self {
        debug_assert!(pos < data.len());
        // SAFE: pos should be inside the slice
        let elt = unsafe { ptr::read(data.get_unchecked(pos)) };
        Hole {
            data,
            elt: ManuallyDrop::new(elt),
            pos,
        }
    }

    #[inline]
    fn pos(&self) -> usize {
        self.pos
    }

    /// Returns a reference to the element removed.
    #[inline]
    fn element(&self) -> &T {
        &self.elt
    }

    /// Returns a reference to the element at `index`.
    ///
    /// Unsafe because index must be within the data slice and not equal to pos.
    #[inline]
    unsafe fn get(&self, index: usize) -> &T {
        debug_assert!(index != self.pos);
        debug_assert!(index < self.data.len());
        unsafe { self.data.get_unchecked(index) }
    }

    /// Move hole to new location
    ///
    /// Unsafe because index must be within the data slice and not equal to pos.
    #[inline]
    unsafe fn move_to(&mut self, index: usize) {
        debug_assert!(index != self.pos);
        debug_assert!(index < self.data.len());
        unsafe {
            let ptr = self.data.as_mut_ptr();
            let index_ptr: *const _ = ptr.add(index);
            let hole_ptr = ptr.add(self.pos);
            ptr::copy_nonoverlapping(index_ptr, hole_ptr, 1);
        }
        self.pos = index;
    }
}

impl<T> Drop for Hole<'_, T> {
    #[inline]
    fn drop(&mut self) {
        // fill the hole again
        unsafe {
            let pos = self.pos;
            ptr::copy_nonoverlapping(&*self.elt, self.data.get_unchecked_mut(pos), 1);
        }
    }
}

/// An iterator over the occupied nodes of a `MinBinaryHeap`.
///
/// This `struct` is created by [`MinBinaryHeap::iter()`]. See its
/// documentation for more.
#[must_use = "iterators are lazy and do nothing unless consumed"]
pub struct Iter<'a, K: 'a, V: 'a> {
    iter: slice::Iter<'a, HeapNode<K, V>>,
}

impl<K: fmt::Debug, V: fmt::Debug> fmt::Debug for Iter<'_, K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Iter").field(&self.iter.as_slice()).finish()
    }
}

impl<K, V> Clone for Iter<'_, K, V> {
    fn clone(&self) -> Self {
        Iter {
            iter: self.iter.clone(),
        }
    }
}

impl<'a, K, V> Iterator for Iter<'a, K, V> {
    type Item = &'a HeapNode<K, V>;

    #[inline]
    fn next(&mut self) -> Option<&'a HeapNode<K, V>> {
        self.iter.next()
    }

    #[inline]
    fn size_hint(&self) -> (usize, Option<usize>) {
        self.iter.size_hint()
    }

    #[inline]
    fn last(self) -> Option<&'a HeapNode<K, V>> {
        self.iter.last()
    }
}

impl<'a, K, V> DoubleEndedIterator for Iter<'a, K, V> {
    #[inline]
    fn next_back(&mut self) -> Option<&'a HeapNode<K, V>> {
        self.iter.next_back()
    }
}

impl<K, V> ExactSizeIterator for Iter<'_, K, V> {}

impl<K, V> FusedIterator for Iter<'_, K, V> {}

impl<'a, K, V> IntoIterator for &'a MinBinaryHeap<K, V> {
    type Item = &'a HeapNode<K, V>;
    type IntoIter = Iter<'a, K, V>;

    fn into_iter(self) -> Iter<'a, K, V> {
        self.iter()
    }
}
