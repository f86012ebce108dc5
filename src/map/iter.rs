//! Iterators over a [`TreeMap`].
//!
//! The borrowing iterators hold raw node pointers plus a lifetime tied to
//! the map, so the borrow checker rules out iterating a map while mutating
//! it, so the "iterator invalidated by deletion" hazard is a compile error
//! here. The owning iterator consumes the tree by structurally detaching
//! the minimum/maximum, so a node is never revisited after it is freed.
//!
//! [`TreeMap`]: crate::map::TreeMap

use std::iter::FusedIterator;
use std::marker::PhantomData;

use crate::alloc::NodeAllocator;
use crate::tree::{self, Link, RbTree};

/// Shared in-order iterator, double-ended and exact-size.
pub struct Iter<'a, K, V> {
    front: Link<K, V>,
    back: Link<K, V>,
    remaining: usize,
    marker: PhantomData<(&'a K, &'a V)>,
}

// SAFETY: an `Iter` only ever hands out `&K`/`&V`, so sending or sharing it
//         is sharing the referenced keys and values.
unsafe impl<K: Sync, V: Sync> Send for Iter<'_, K, V> {}
unsafe impl<K: Sync, V: Sync> Sync for Iter<'_, K, V> {}

impl<K, V> Clone for Iter<'_, K, V> {
    fn clone(&self) -> Self {
        Self {
            front: self.front,
            back: self.back,
            remaining: self.remaining,
            marker: PhantomData,
        }
    }
}

impl<'a, K, V> Iter<'a, K, V> {
    pub(crate) fn new(front: Link<K, V>, back: Link<K, V>, remaining: usize) -> Self {
        Self {
            front,
            back,
            remaining,
            marker: PhantomData,
        }
    }
}

impl<'a, K, V> Iterator for Iter<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let n = self.front.expect("counted iterator has a front node");
        self.remaining -= 1;
        if self.remaining == 0 {
            self.front = None;
            self.back = None;
        } else {
            // SAFETY: the map is borrowed for 'a, so the node and everything
            //         it links to stay live and unmoved.
            self.front = unsafe { tree::successor(n) };
        }
        // SAFETY: as above; the reference is valid for 'a.
        let node = unsafe { &*n.as_ptr() };
        Some((&node.key, &node.value))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }

    fn last(mut self) -> Option<Self::Item> {
        self.next_back()
    }
}

impl<'a, K, V> DoubleEndedIterator for Iter<'a, K, V> {
    fn next_back(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let n = self.back.expect("counted iterator has a back node");
        self.remaining -= 1;
        if self.remaining == 0 {
            self.front = None;
            self.back = None;
        } else {
            // SAFETY: as in `next`.
            self.back = unsafe { tree::predecessor(n) };
        }
        // SAFETY: as in `next`.
        let node = unsafe { &*n.as_ptr() };
        Some((&node.key, &node.value))
    }
}

impl<K, V> ExactSizeIterator for Iter<'_, K, V> {}
impl<K, V> FusedIterator for Iter<'_, K, V> {}

/// Mutable in-order iterator; keys stay shared, values are exclusive.
pub struct IterMut<'a, K, V> {
    front: Link<K, V>,
    back: Link<K, V>,
    remaining: usize,
    marker: PhantomData<(&'a K, &'a mut V)>,
}

// SAFETY: `IterMut` hands out `&K` and `&mut V` to distinct nodes, so the
//         bounds are those of sharing keys and sending value references.
unsafe impl<K: Sync, V: Send> Send for IterMut<'_, K, V> {}
unsafe impl<K: Sync, V: Sync> Sync for IterMut<'_, K, V> {}

impl<'a, K, V> IterMut<'a, K, V> {
    pub(crate) fn new(front: Link<K, V>, back: Link<K, V>, remaining: usize) -> Self {
        Self {
            front,
            back,
            remaining,
            marker: PhantomData,
        }
    }
}

impl<'a, K, V> Iterator for IterMut<'a, K, V> {
    type Item = (&'a K, &'a mut V);

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let n = self.front.expect("counted iterator has a front node");
        self.remaining -= 1;
        if self.remaining == 0 {
            self.front = None;
            self.back = None;
        } else {
            // SAFETY: the map is exclusively borrowed for 'a.
            self.front = unsafe { tree::successor(n) };
        }
        // SAFETY: in-order traversal visits each node once, so no value is
        //         handed out twice; the key reference never aliases a value.
        let node = unsafe { &mut *n.as_ptr() };
        Some((&node.key, &mut node.value))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<'a, K, V> DoubleEndedIterator for IterMut<'a, K, V> {
    fn next_back(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let n = self.back.expect("counted iterator has a back node");
        self.remaining -= 1;
        if self.remaining == 0 {
            self.front = None;
            self.back = None;
        } else {
            // SAFETY: as in `next`.
            self.back = unsafe { tree::predecessor(n) };
        }
        // SAFETY: as in `next`.
        let node = unsafe { &mut *n.as_ptr() };
        Some((&node.key, &mut node.value))
    }
}

impl<K, V> ExactSizeIterator for IterMut<'_, K, V> {}
impl<K, V> FusedIterator for IterMut<'_, K, V> {}

/// Owning in-order iterator.
///
/// Consumes the tree front and/or back via structural detachment; whatever
/// is left when the iterator is dropped is released by the tree's own drop.
pub struct IntoIter<K, V, A: NodeAllocator> {
    tree: RbTree<K, V, A>,
}

impl<K, V, A: NodeAllocator> IntoIter<K, V, A> {
    pub(crate) fn new(tree: RbTree<K, V, A>) -> Self {
        Self { tree }
    }
}

impl<K, V, A: NodeAllocator> Iterator for IntoIter<K, V, A> {
    type Item = (K, V);

    fn next(&mut self) -> Option<Self::Item> {
        self.tree.detach_min()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.tree.len(), Some(self.tree.len()))
    }
}

impl<K, V, A: NodeAllocator> DoubleEndedIterator for IntoIter<K, V, A> {
    fn next_back(&mut self) -> Option<Self::Item> {
        self.tree.detach_max()
    }
}

impl<K, V, A: NodeAllocator> ExactSizeIterator for IntoIter<K, V, A> {}
impl<K, V, A: NodeAllocator> FusedIterator for IntoIter<K, V, A> {}

/// Iterator over the keys.
pub struct Keys<'a, K, V> {
    pub(crate) inner: Iter<'a, K, V>,
}

impl<K, V> Clone for Keys<'_, K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<'a, K, V> Iterator for Keys<'a, K, V> {
    type Item = &'a K;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|(k, _)| k)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<K, V> DoubleEndedIterator for Keys<'_, K, V> {
    fn next_back(&mut self) -> Option<Self::Item> {
        self.inner.next_back().map(|(k, _)| k)
    }
}

impl<K, V> ExactSizeIterator for Keys<'_, K, V> {}
impl<K, V> FusedIterator for Keys<'_, K, V> {}

/// Iterator over the values.
pub struct Values<'a, K, V> {
    pub(crate) inner: Iter<'a, K, V>,
}

impl<K, V> Clone for Values<'_, K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<'a, K, V> Iterator for Values<'a, K, V> {
    type Item = &'a V;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|(_, v)| v)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<K, V> DoubleEndedIterator for Values<'_, K, V> {
    fn next_back(&mut self) -> Option<Self::Item> {
        self.inner.next_back().map(|(_, v)| v)
    }
}

impl<K, V> ExactSizeIterator for Values<'_, K, V> {}
impl<K, V> FusedIterator for Values<'_, K, V> {}

/// Iterator over mutable values.
pub struct ValuesMut<'a, K, V> {
    pub(crate) inner: IterMut<'a, K, V>,
}

impl<'a, K, V> Iterator for ValuesMut<'a, K, V> {
    type Item = &'a mut V;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|(_, v)| v)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<K, V> DoubleEndedIterator for ValuesMut<'_, K, V> {
    fn next_back(&mut self) -> Option<Self::Item> {
        self.inner.next_back().map(|(_, v)| v)
    }
}

impl<K, V> ExactSizeIterator for ValuesMut<'_, K, V> {}
impl<K, V> FusedIterator for ValuesMut<'_, K, V> {}

/// In-order iterator over a key window ([`TreeMap::range`],
/// [`TreeMap::lower_bound`], [`TreeMap::upper_bound`]).
///
/// Unlike [`Iter`] the element count is not known up front, so this is
/// double-ended but not exact-size. An empty window is both links `None`.
///
/// [`TreeMap::range`]: crate::map::TreeMap::range
/// [`TreeMap::lower_bound`]: crate::map::TreeMap::lower_bound
/// [`TreeMap::upper_bound`]: crate::map::TreeMap::upper_bound
pub struct Range<'a, K, V> {
    front: Link<K, V>,
    back: Link<K, V>,
    marker: PhantomData<(&'a K, &'a V)>,
}

// SAFETY: as for `Iter`.
unsafe impl<K: Sync, V: Sync> Send for Range<'_, K, V> {}
unsafe impl<K: Sync, V: Sync> Sync for Range<'_, K, V> {}

impl<K, V> Clone for Range<'_, K, V> {
    fn clone(&self) -> Self {
        Self {
            front: self.front,
            back: self.back,
            marker: PhantomData,
        }
    }
}

impl<'a, K, V> Range<'a, K, V> {
    /// `front`/`back` bound the window inclusively; both `None` means empty.
    /// The caller guarantees `front` does not come after `back` in order.
    pub(crate) fn new(front: Link<K, V>, back: Link<K, V>) -> Self {
        debug_assert_eq!(front.is_none(), back.is_none());
        Self {
            front,
            back,
            marker: PhantomData,
        }
    }
}

impl<'a, K, V> Iterator for Range<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        let n = self.front?;
        if Some(n) == self.back {
            self.front = None;
            self.back = None;
        } else {
            // SAFETY: the map is borrowed for 'a; the window lies between
            //         two live nodes of it.
            self.front = unsafe { tree::successor(n) };
        }
        // SAFETY: as above.
        let node = unsafe { &*n.as_ptr() };
        Some((&node.key, &node.value))
    }
}

impl<'a, K, V> DoubleEndedIterator for Range<'a, K, V> {
    fn next_back(&mut self) -> Option<Self::Item> {
        let n = self.back?;
        if Some(n) == self.front {
            self.front = None;
            self.back = None;
        } else {
            // SAFETY: as in `next`.
            self.back = unsafe { tree::predecessor(n) };
        }
        // SAFETY: as in `next`.
        let node = unsafe { &*n.as_ptr() };
        Some((&node.key, &node.value))
    }
}

impl<K, V> FusedIterator for Range<'_, K, V> {}
