//! The ordered map facade over the red-black tree engine.
//!
//! Every operation here is a thin orchestration of engine calls; the
//! engine never calls back up. The facade is also where key uniqueness is
//! enforced: the engine inserts unconditionally, [`TreeMap`] resolves a
//! duplicate as an update (or a no-op, for the `try_*` family).

use std::borrow::Borrow;
use std::cmp::Ordering;
use std::fmt;
use std::ops::{Bound, Index, RangeBounds};

use log::warn;

use crate::alloc::{HeapAllocator, NodeAllocator};
use crate::error::{Error, InsertError};
use crate::tree::{self, Link, RbTree};

mod iter;

pub use iter::{IntoIter, Iter, IterMut, Keys, Range, Values, ValuesMut};

/// An ordered map with unique keys, O(log n) search/insert/remove and
/// in-order iteration, backed by a red-black tree.
///
/// Keys are ordered by `Ord`; lookups accept any borrowed form of the key
/// (`K: Borrow<Q>`), so a `TreeMap<String, _>` can be queried with `&str`.
/// The node-allocation strategy is pluggable through [`NodeAllocator`].
///
/// ```
/// use rbmap::TreeMap;
///
/// let mut m = TreeMap::new();
/// m.insert(2, "two");
/// m.insert(1, "one");
/// m.insert(3, "three");
///
/// assert_eq!(m.get(&2), Some(&"two"));
/// let keys: Vec<_> = m.keys().copied().collect();
/// assert_eq!(keys, [1, 2, 3]);
/// ```
pub struct TreeMap<K, V, A: NodeAllocator = HeapAllocator> {
    tree: RbTree<K, V, A>,
}

impl<K, V> TreeMap<K, V, HeapAllocator> {
    /// An empty map using plain heap allocation.
    pub fn new() -> Self {
        Self::with_allocator(HeapAllocator)
    }
}

impl<K, V, A: NodeAllocator> TreeMap<K, V, A> {
    /// An empty map obtaining node storage from `alloc`.
    pub fn with_allocator(alloc: A) -> Self {
        Self {
            tree: RbTree::new(alloc),
        }
    }

    pub fn len(&self) -> usize {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes every entry, releasing all nodes.
    pub fn clear(&mut self) {
        self.tree.clear();
    }

    /// In-order iterator over `(&key, &value)` pairs.
    pub fn iter(&self) -> Iter<'_, K, V> {
        Iter::new(self.tree.first(), self.tree.last(), self.len())
    }

    /// In-order iterator with exclusive access to the values.
    pub fn iter_mut(&mut self) -> IterMut<'_, K, V> {
        IterMut::new(self.tree.first(), self.tree.last(), self.len())
    }

    pub fn keys(&self) -> Keys<'_, K, V> {
        Keys { inner: self.iter() }
    }

    pub fn values(&self) -> Values<'_, K, V> {
        Values { inner: self.iter() }
    }

    pub fn values_mut(&mut self) -> ValuesMut<'_, K, V> {
        ValuesMut {
            inner: self.iter_mut(),
        }
    }

    /// Entry with the smallest key, if any.
    pub fn first_key_value(&self) -> Option<(&K, &V)> {
        // SAFETY: `first` returns a live node; the borrow is tied to `self`.
        self.tree
            .first()
            .map(|n| unsafe { (&(*n.as_ptr()).key, &(*n.as_ptr()).value) })
    }

    /// Entry with the largest key, if any.
    pub fn last_key_value(&self) -> Option<(&K, &V)> {
        // SAFETY: as in `first_key_value`.
        self.tree
            .last()
            .map(|n| unsafe { (&(*n.as_ptr()).key, &(*n.as_ptr()).value) })
    }
}

impl<K: Ord, V, A: NodeAllocator> TreeMap<K, V, A> {
    pub fn get<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        // SAFETY: `search` returns live nodes; the borrow is tied to `self`.
        self.tree
            .search(key)
            .map(|n| unsafe { &(*n.as_ptr()).value })
    }

    pub fn get_mut<Q>(&mut self, key: &Q) -> Option<&mut V>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        // SAFETY: as in `get`; `&mut self` makes the access exclusive.
        self.tree
            .search(key)
            .map(|n| unsafe { &mut (*n.as_ptr()).value })
    }

    pub fn get_key_value<Q>(&self, key: &Q) -> Option<(&K, &V)>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        // SAFETY: as in `get`.
        self.tree
            .search(key)
            .map(|n| unsafe { (&(*n.as_ptr()).key, &(*n.as_ptr()).value) })
    }

    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        self.tree.search(key).is_some()
    }

    /// Like [`get`], but an absent key is an observable failure
    /// ([`Error::KeyNotFound`]) instead of `None`.
    ///
    /// [`get`]: TreeMap::get
    pub fn at<Q>(&self, key: &Q) -> Result<&V, Error>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        self.get(key).ok_or(Error::KeyNotFound)
    }

    /// Mutable counterpart of [`at`].
    ///
    /// [`at`]: TreeMap::at
    pub fn at_mut<Q>(&mut self, key: &Q) -> Result<&mut V, Error>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        self.get_mut(key).ok_or(Error::KeyNotFound)
    }

    /// Inserts `value` under `key`, returning the previous value if the key
    /// was already present (duplicates resolve as an update, never as a
    /// second entry).
    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        if let Some(n) = self.tree.search(&key) {
            // SAFETY: live node, exclusive access through `&mut self`.
            let slot = unsafe { &mut (*n.as_ptr()).value };
            return Some(std::mem::replace(slot, value));
        }
        self.tree.insert_infallible(key, value);
        None
    }

    /// Fallible find-or-insert: if `key` is present its value is returned
    /// untouched and `make` never runs; otherwise node storage is obtained,
    /// `make` constructs the value, and a failure (or panic) releases the
    /// storage and leaves the map unchanged.
    pub fn try_insert_with<E, F>(&mut self, key: K, make: F) -> Result<&mut V, InsertError<E>>
    where
        F: FnOnce() -> Result<V, E>,
    {
        let node = match self.tree.search(&key) {
            Some(n) => n,
            None => self.tree.insert_with(key, make)?,
        };
        // SAFETY: either a pre-existing live node or the one just inserted.
        Ok(unsafe { &mut (*node.as_ptr()).value })
    }

    /// Find-or-insert: returns the value under `key`, inserting `make()`
    /// first if the key is absent.
    pub fn get_or_insert_with<F>(&mut self, key: K, make: F) -> &mut V
    where
        F: FnOnce() -> V,
    {
        let node = match self.tree.search(&key) {
            Some(n) => n,
            None => self.tree.insert_infallible(key, make()),
        };
        // SAFETY: as in `try_insert_with`.
        unsafe { &mut (*node.as_ptr()).value }
    }

    /// Find-or-insert-default (the `map[key]` access of the C++-style API).
    pub fn get_or_insert_default(&mut self, key: K) -> &mut V
    where
        V: Default,
    {
        self.get_or_insert_with(key, V::default)
    }

    /// Removes `key` and returns its value.
    ///
    /// An absent key is a no-op reported on the diagnostic channel (a
    /// `warn!`), not a failure; [`extract`] is the variant that fails with
    /// [`Error::KeyNotFound`].
    ///
    /// [`extract`]: TreeMap::extract
    pub fn remove<Q>(&mut self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        self.remove_entry(key).map(|(_, v)| v)
    }

    /// Removes `key` and returns the whole entry; see [`remove`].
    ///
    /// [`remove`]: TreeMap::remove
    pub fn remove_entry<Q>(&mut self, key: &Q) -> Option<(K, V)>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        let out = self.tree.remove(key);
        if out.is_none() {
            warn!("remove: key not found in map");
        }
        out
    }

    /// Removes `key` and returns the entry, failing observably when the key
    /// is absent.
    pub fn extract<Q>(&mut self, key: &Q) -> Result<(K, V), Error>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        self.tree.remove(key).ok_or(Error::KeyNotFound)
    }

    /// Keeps only the entries for which `pred` returns `true`, in order.
    pub fn retain<F>(&mut self, mut pred: F)
    where
        F: FnMut(&K, &mut V) -> bool,
    {
        let mut cur = self.tree.first();
        while let Some(n) = cur {
            // SAFETY: the successor is taken before a removal; the node the
            //         engine frees is always `n` itself (in the two-children
            //         case the successor node is moved, not freed).
            unsafe {
                let next = tree::successor(n);
                let node = &mut *n.as_ptr();
                if !pred(&node.key, &mut node.value) {
                    drop(self.tree.remove_node(n));
                }
                cur = next;
            }
        }
    }

    /// Moves every entry of `other` whose key is absent here into `self`.
    /// Entries whose keys collide stay in `other`.
    pub fn merge(&mut self, other: &mut Self) {
        let mut cur = other.tree.first();
        while let Some(n) = cur {
            // SAFETY: as in `retain`, on `other`'s nodes.
            unsafe {
                let next = tree::successor(n);
                if self.tree.search(&(*n.as_ptr()).key).is_none() {
                    let (k, v) = other.tree.remove_node(n);
                    self.tree.insert_infallible(k, v);
                }
                cur = next;
            }
        }
    }

    /// First node with key `>= key` (or `> key` when not `inclusive`):
    /// best-candidate descent, independent of the engine's `search`.
    fn bound_front<Q>(&self, key: &Q, inclusive: bool) -> Link<K, V>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        let mut candidate = None;
        let mut cur = self.tree.root();
        while let Some(n) = cur {
            // SAFETY: reachable links are live.
            let node = unsafe { &*n.as_ptr() };
            let above = match node.key.borrow().cmp(key) {
                Ordering::Greater => true,
                Ordering::Equal => inclusive,
                Ordering::Less => false,
            };
            if above {
                candidate = Some(n);
                cur = node.left;
            } else {
                cur = node.right;
            }
        }
        candidate
    }

    /// Last node with key `<= key` (or `< key`); mirror of [`bound_front`].
    ///
    /// [`bound_front`]: TreeMap::bound_front
    fn bound_back<Q>(&self, key: &Q, inclusive: bool) -> Link<K, V>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        let mut candidate = None;
        let mut cur = self.tree.root();
        while let Some(n) = cur {
            // SAFETY: reachable links are live.
            let node = unsafe { &*n.as_ptr() };
            let below = match node.key.borrow().cmp(key) {
                Ordering::Less => true,
                Ordering::Equal => inclusive,
                Ordering::Greater => false,
            };
            if below {
                candidate = Some(n);
                cur = node.right;
            } else {
                cur = node.left;
            }
        }
        candidate
    }

    /// Iterator starting at the first entry with key `>= key`.
    pub fn lower_bound<Q>(&self, key: &Q) -> Range<'_, K, V>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        match self.bound_front(key, true) {
            Some(front) => Range::new(Some(front), self.tree.last()),
            None => Range::new(None, None),
        }
    }

    /// Iterator starting at the first entry with key `> key`.
    pub fn upper_bound<Q>(&self, key: &Q) -> Range<'_, K, V>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        match self.bound_front(key, false) {
            Some(front) => Range::new(Some(front), self.tree.last()),
            None => Range::new(None, None),
        }
    }

    /// In-order iterator over the entries whose keys fall inside `range`.
    /// An inverted or empty window yields nothing.
    pub fn range<Q, R>(&self, range: R) -> Range<'_, K, V>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
        R: RangeBounds<Q>,
    {
        let front = match range.start_bound() {
            Bound::Included(s) => self.bound_front(s, true),
            Bound::Excluded(s) => self.bound_front(s, false),
            Bound::Unbounded => self.tree.first(),
        };
        let back = match range.end_bound() {
            Bound::Included(e) => self.bound_back(e, true),
            Bound::Excluded(e) => self.bound_back(e, false),
            Bound::Unbounded => self.tree.last(),
        };
        match (front, back) {
            (Some(f), Some(b)) => {
                // SAFETY: both bounds are live nodes of this tree.
                let ordered = unsafe { (*f.as_ptr()).key <= (*b.as_ptr()).key };
                if ordered {
                    Range::new(front, back)
                } else {
                    Range::new(None, None)
                }
            }
            _ => Range::new(None, None),
        }
    }

    #[cfg(test)]
    fn validate(&self) -> bool {
        self.tree.validate()
    }
}

impl<K, V, A: NodeAllocator + Default> Default for TreeMap<K, V, A> {
    fn default() -> Self {
        Self::with_allocator(A::default())
    }
}

impl<K: Clone, V: Clone, A: NodeAllocator + Clone> Clone for TreeMap<K, V, A> {
    fn clone(&self) -> Self {
        match self.tree.try_clone() {
            Ok(tree) => Self { tree },
            Err(_) => std::alloc::handle_alloc_error(RbTree::<K, V, A>::node_layout()),
        }
    }
}

impl<K: fmt::Debug, V: fmt::Debug, A: NodeAllocator> fmt::Debug for TreeMap<K, V, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

// Structural comparisons: size check, then synchronized in-order traversal;
// ordering is lexicographic over the in-order (key, value) sequence.

impl<K: PartialEq, V: PartialEq, A: NodeAllocator> PartialEq for TreeMap<K, V, A> {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.iter().eq(other.iter())
    }
}

impl<K: Eq, V: Eq, A: NodeAllocator> Eq for TreeMap<K, V, A> {}

impl<K: PartialOrd, V: PartialOrd, A: NodeAllocator> PartialOrd for TreeMap<K, V, A> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        self.iter().partial_cmp(other.iter())
    }
}

impl<K: Ord, V: Ord, A: NodeAllocator> Ord for TreeMap<K, V, A> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.iter().cmp(other.iter())
    }
}

impl<K, Q, V, A> Index<&Q> for TreeMap<K, V, A>
where
    K: Borrow<Q> + Ord,
    Q: Ord + ?Sized,
    A: NodeAllocator,
{
    type Output = V;

    /// Panics if the key is absent, like the standard map types; the
    /// inserting variant is [`TreeMap::get_or_insert_default`].
    fn index(&self, key: &Q) -> &V {
        self.get(key).expect("no entry found for key")
    }
}

impl<K: Ord, V, A: NodeAllocator + Default> FromIterator<(K, V)> for TreeMap<K, V, A> {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = Self::default();
        map.extend(iter);
        map
    }
}

impl<K: Ord, V, A: NodeAllocator> Extend<(K, V)> for TreeMap<K, V, A> {
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        for (k, v) in iter {
            self.insert(k, v);
        }
    }
}

impl<K: Ord, V, const N: usize> From<[(K, V); N]> for TreeMap<K, V, HeapAllocator> {
    fn from(entries: [(K, V); N]) -> Self {
        entries.into_iter().collect()
    }
}

impl<K, V, A: NodeAllocator> IntoIterator for TreeMap<K, V, A> {
    type Item = (K, V);
    type IntoIter = IntoIter<K, V, A>;

    fn into_iter(self) -> Self::IntoIter {
        IntoIter::new(self.tree)
    }
}

impl<'a, K, V, A: NodeAllocator> IntoIterator for &'a TreeMap<K, V, A> {
    type Item = (&'a K, &'a V);
    type IntoIter = Iter<'a, K, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<'a, K, V, A: NodeAllocator> IntoIterator for &'a mut TreeMap<K, V, A> {
    type Item = (&'a K, &'a mut V);
    type IntoIter = IterMut<'a, K, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::alloc::Layout;
    use std::cell::Cell;
    use std::ptr::NonNull;
    use std::rc::Rc;

    fn init_logging() {
        use simplelog::*;
        let _ = TermLogger::init(
            LevelFilter::Trace,
            Config::default(),
            TerminalMode::Mixed,
            ColorChoice::Auto,
        );
    }

    fn sample() -> TreeMap<i32, &'static str> {
        TreeMap::from([(10, "ten"), (20, "twenty"), (5, "five"), (15, "fifteen")])
    }

    #[test]
    fn insert_get_update() {
        let mut m = TreeMap::new();
        assert_eq!(m.insert(1, "a"), None);
        assert_eq!(m.insert(2, "b"), None);
        assert_eq!(m.insert(1, "A"), Some("a"));
        assert_eq!(m.len(), 2);
        assert_eq!(m.get(&1), Some(&"A"));
        assert!(m.validate());
    }

    #[test]
    fn heterogeneous_lookup() {
        let mut m: TreeMap<String, i32> = TreeMap::new();
        m.insert("alpha".to_owned(), 1);
        m.insert("beta".to_owned(), 2);
        assert_eq!(m.get("beta"), Some(&2));
        assert!(m.contains_key("alpha"));
        assert_eq!(m.remove("alpha"), Some(1));
    }

    #[test]
    fn at_fails_where_get_is_none() {
        let m = sample();
        assert_eq!(m.at(&100), Err(Error::KeyNotFound));
        assert_eq!(m.get(&100), None);
        assert_eq!(m.at(&10), Ok(&"ten"));
    }

    #[test]
    fn remove_absent_is_reported_not_failed() {
        init_logging();
        let mut m = sample();
        assert_eq!(m.remove(&42), None);
        assert_eq!(m.len(), 4);
        assert!(m.validate());
    }

    #[test]
    fn extract_present_and_absent() {
        let mut m = sample();
        assert_eq!(m.extract(&5), Ok((5, "five")));
        assert_eq!(m.extract(&5), Err(Error::KeyNotFound));
        assert_eq!(m.len(), 3);
    }

    #[test]
    fn ordered_iteration_and_reverse() {
        let m = sample();
        let keys: Vec<_> = m.keys().copied().collect();
        assert_eq!(keys, [5, 10, 15, 20]);
        let rev: Vec<_> = m.keys().rev().copied().collect();
        assert_eq!(rev, [20, 15, 10, 5]);
        assert_eq!(m.iter().len(), 4);
        assert_eq!(m.first_key_value(), Some((&5, &"five")));
        assert_eq!(m.last_key_value(), Some((&20, &"twenty")));
    }

    #[test]
    fn iter_mut_and_values_mut() {
        let mut m = TreeMap::from([(1, 10), (2, 20), (3, 30)]);
        for (_, v) in m.iter_mut() {
            *v += 1;
        }
        m.values_mut().for_each(|v| *v *= 10);
        let values: Vec<_> = m.values().copied().collect();
        assert_eq!(values, [110, 210, 310]);
    }

    #[test]
    fn into_iter_both_ends() {
        let m = sample();
        let mut it = m.into_iter();
        assert_eq!(it.len(), 4);
        assert_eq!(it.next(), Some((5, "five")));
        assert_eq!(it.next_back(), Some((20, "twenty")));
        assert_eq!(it.next(), Some((10, "ten")));
        assert_eq!(it.next(), Some((15, "fifteen")));
        assert_eq!(it.next(), None);
        // Dropping a partially consumed iterator must release the rest.
        let m = sample();
        let mut it = m.into_iter();
        it.next();
        drop(it);
    }

    #[test]
    fn bounds() {
        let m = TreeMap::from([(10, "a"), (20, "b"), (30, "c")]);
        assert_eq!(m.lower_bound(&15).next(), Some((&20, &"b")));
        assert_eq!(m.lower_bound(&20).next(), Some((&20, &"b")));
        assert_eq!(m.upper_bound(&20).next(), Some((&30, &"c")));
        assert_eq!(m.upper_bound(&30).next(), None);
        assert_eq!(m.lower_bound(&31).next(), None);
    }

    #[test]
    fn range_windows() {
        let m: TreeMap<i32, i32> = (0..10).map(|k| (k, k)).collect();
        let window: Vec<_> = m.range(3..7).map(|(k, _)| *k).collect();
        assert_eq!(window, [3, 4, 5, 6]);
        let window: Vec<_> = m.range(3..=7).map(|(k, _)| *k).collect();
        assert_eq!(window, [3, 4, 5, 6, 7]);
        let window: Vec<_> = m.range(..).map(|(k, _)| *k).collect();
        assert_eq!(window, (0..10).collect::<Vec<_>>());
        let backwards: Vec<_> = m.range(2..5).rev().map(|(k, _)| *k).collect();
        assert_eq!(backwards, [4, 3, 2]);
        assert_eq!(m.range(7..3).next(), None);
        assert_eq!(m.range(20..).next(), None);
    }

    #[test]
    fn structural_equality_ignores_insertion_order() {
        let a = TreeMap::from([(1, "a"), (2, "b")]);
        let b = TreeMap::from([(2, "b"), (1, "a")]);
        assert_eq!(a, b);
        let smaller = TreeMap::from([(1, "a")]);
        assert_ne!(a, smaller);
        assert!(smaller < a);
    }

    #[test]
    fn get_or_insert_family() {
        let mut m: TreeMap<&str, Vec<i32>> = TreeMap::new();
        m.get_or_insert_default("xs").push(1);
        m.get_or_insert_default("xs").push(2);
        assert_eq!(m["xs"], [1, 2]);
        let v = m.get_or_insert_with("ys", || vec![9]);
        assert_eq!(v, &[9]);
        assert_eq!(m.len(), 2);
    }

    #[test]
    #[should_panic = "no entry found for key"]
    fn index_panics_on_absent_key() {
        let m = sample();
        let _ = m[&99];
    }

    #[test]
    fn retain_in_order() {
        let mut m: TreeMap<i32, i32> = (0..20).map(|k| (k, k)).collect();
        m.retain(|k, _| k % 3 == 0);
        let keys: Vec<_> = m.keys().copied().collect();
        assert_eq!(keys, [0, 3, 6, 9, 12, 15, 18]);
        assert!(m.validate());
    }

    #[test]
    fn merge_moves_only_missing_keys() {
        let mut a = TreeMap::from([(1, "a"), (2, "a")]);
        let mut b = TreeMap::from([(2, "b"), (3, "b"), (4, "b")]);
        a.merge(&mut b);
        assert_eq!(a.len(), 4);
        assert_eq!(a.get(&2), Some(&"a"));
        assert_eq!(a.get(&3), Some(&"b"));
        // The colliding entry stays behind.
        assert_eq!(b.len(), 1);
        assert_eq!(b.get(&2), Some(&"b"));
        assert!(a.validate() && b.validate());
    }

    #[test]
    fn clone_is_deep() {
        let mut a = sample();
        let b = a.clone();
        a.clear();
        assert_eq!(b.len(), 4);
        assert_eq!(b.get(&15), Some(&"fifteen"));
        assert!(b.validate());
    }

    #[test]
    fn debug_formatting() {
        let m = TreeMap::from([(2, 'b'), (1, 'a')]);
        assert_eq!(format!("{m:?}"), "{1: 'a', 2: 'b'}");
    }

    /// Forwards to the heap while enforcing an allocation budget and
    /// balancing allocate/deallocate calls.
    #[derive(Clone)]
    struct FaultAlloc {
        state: Rc<FaultState>,
    }

    struct FaultState {
        budget: Cell<usize>,
        live: Cell<usize>,
    }

    impl FaultAlloc {
        fn with_budget(budget: usize) -> Self {
            Self {
                state: Rc::new(FaultState {
                    budget: Cell::new(budget),
                    live: Cell::new(0),
                }),
            }
        }
    }

    impl NodeAllocator for FaultAlloc {
        fn allocate(&self, layout: Layout) -> Result<NonNull<u8>, Error> {
            if self.state.budget.get() == 0 {
                return Err(Error::AllocationFailed);
            }
            self.state.budget.set(self.state.budget.get() - 1);
            self.state.live.set(self.state.live.get() + 1);
            HeapAllocator.allocate(layout)
        }

        unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
            self.state.live.set(self.state.live.get() - 1);
            // SAFETY: forwarded from `allocate` above.
            unsafe { HeapAllocator.deallocate(ptr, layout) }
        }
    }

    #[test]
    fn allocation_failure_is_atomic() {
        let alloc = FaultAlloc::with_budget(3);
        let state = Rc::clone(&alloc.state);
        let mut m: TreeMap<i32, i32, FaultAlloc> = TreeMap::with_allocator(alloc);
        for k in 0..3 {
            assert!(m.try_insert_with::<(), _>(k, || Ok(k)).is_ok());
        }
        let res = m.try_insert_with::<(), _>(7, || Ok(7));
        assert_eq!(res.unwrap_err(), InsertError::Alloc(Error::AllocationFailed));
        assert_eq!(m.len(), 3);
        assert!(m.validate());
        drop(m);
        assert_eq!(state.live.get(), 0);
    }

    #[test]
    fn construction_failure_releases_storage() {
        let alloc = FaultAlloc::with_budget(usize::MAX);
        let state = Rc::clone(&alloc.state);
        let mut m: TreeMap<i32, i32, FaultAlloc> = TreeMap::with_allocator(alloc);
        for k in 0..3 {
            assert!(m.try_insert_with::<(), _>(k, || Ok(k)).is_ok());
        }
        let res = m.try_insert_with(9, || Err("nope"));
        assert_eq!(res.unwrap_err(), InsertError::Construct("nope"));
        assert_eq!(m.len(), 3);
        // The block obtained for the failed insert went straight back.
        assert_eq!(state.live.get(), 3);
        assert!(m.validate());
        drop(m);
        assert_eq!(state.live.get(), 0);
    }
}
