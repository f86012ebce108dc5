//! The red-black tree engine.
//!
//! Owns every node, keeps the red-black invariants, and exposes the raw
//! structural operations the map facade builds on. All links are raw
//! [`NonNull`] pointers; the soundness argument is that the tree is the sole
//! owner of every reachable node, each node is created by exactly one insert
//! and released by exactly one remove/teardown, and no link to a released
//! node survives the operation that released it.
//!
//! Invariants restored after every completed insert/remove:
//! - BST order under `Ord`,
//! - the root is Black,
//! - no Red node has a Red parent,
//! - every root-to-`None` path crosses the same number of Black nodes.

use std::alloc::Layout;
use std::borrow::Borrow;
use std::cmp::Ordering;
use std::marker::PhantomData;
use std::ptr::NonNull;

use log::trace;

use crate::alloc::NodeAllocator;
use crate::error::{Error, InsertError};

mod node;

pub(crate) use node::{Color, Link, Node};
pub(crate) use node::{maximum, minimum, predecessor, successor};

use node::{color, set_color};

pub(crate) struct RbTree<K, V, A: NodeAllocator> {
    root: Link<K, V>,
    count: usize,
    alloc: A,
    // Owns the nodes for dropck purposes.
    marker: PhantomData<Box<Node<K, V>>>,
}

// SAFETY: the tree exclusively owns all of its nodes; moving it to (or
//         sharing it with) another thread moves/shares the keys and values
//         and nothing else, so the bounds are those of `K`, `V` and the
//         allocator.
unsafe impl<K: Send, V: Send, A: NodeAllocator + Send> Send for RbTree<K, V, A> {}
unsafe impl<K: Sync, V: Sync, A: NodeAllocator + Sync> Sync for RbTree<K, V, A> {}

/// Releases a raw node-sized block on drop unless disarmed.
///
/// Covers the window between obtaining node storage and constructing the
/// payload in it: if the constructor fails or panics, the block goes back to
/// the allocator and the tree is left unchanged.
struct StorageGuard<'a, A: NodeAllocator> {
    alloc: &'a A,
    ptr: Option<NonNull<u8>>,
    layout: Layout,
}

impl<A: NodeAllocator> Drop for StorageGuard<'_, A> {
    fn drop(&mut self) {
        if let Some(ptr) = self.ptr {
            // SAFETY: `ptr` came from this allocator with this layout and
            //         nothing was constructed in it.
            unsafe { self.alloc.deallocate(ptr, self.layout) }
        }
    }
}

impl<K, V, A: NodeAllocator> RbTree<K, V, A> {
    pub(crate) fn new(alloc: A) -> Self {
        Self {
            root: None,
            count: 0,
            alloc,
            marker: PhantomData,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.count
    }

    pub(crate) fn root(&self) -> Link<K, V> {
        self.root
    }

    pub(crate) fn node_layout() -> Layout {
        Layout::new::<Node<K, V>>()
    }

    /// Leftmost node of the whole tree.
    pub(crate) fn first(&self) -> Link<K, V> {
        // SAFETY: the root and everything below it are live.
        self.root.map(|r| unsafe { minimum(r) })
    }

    /// Rightmost node of the whole tree.
    pub(crate) fn last(&self) -> Link<K, V> {
        // SAFETY: as in `first`.
        self.root.map(|r| unsafe { maximum(r) })
    }

    /// Standard BST descent. O(log n) by virtue of balance.
    ///
    /// Lookup by any `Q` the key type borrows as: the compile-time
    /// counterpart of a transparent comparator.
    pub(crate) fn search<Q>(&self, key: &Q) -> Link<K, V>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        let mut cur = self.root;
        while let Some(n) = cur {
            // SAFETY: every link reachable from the root is a live node.
            let node = unsafe { &*n.as_ptr() };
            cur = match key.cmp(node.key.borrow()) {
                Ordering::Less => node.left,
                Ordering::Greater => node.right,
                Ordering::Equal => return Some(n),
            };
        }
        None
    }

    /// Allocates and initializes one node. The tree is untouched on failure.
    fn create_node(
        &self,
        key: K,
        value: V,
        color: Color,
        parent: Link<K, V>,
    ) -> Result<NonNull<Node<K, V>>, Error> {
        let storage = self.alloc.allocate(Self::node_layout())?;
        let ptr = storage.cast::<Node<K, V>>();
        // SAFETY: freshly allocated storage with the layout of a node.
        unsafe {
            ptr.as_ptr().write(Node {
                key,
                value,
                color,
                parent,
                left: None,
                right: None,
            });
        }
        Ok(ptr)
    }

    /// Moves the payload out of a node and releases its storage.
    ///
    /// # Safety
    /// `n` must be a live node of this tree that is no longer linked from
    /// anywhere; after this call the pointer is dangling.
    unsafe fn free_node(&self, n: NonNull<Node<K, V>>) -> (K, V) {
        let ptr = n.as_ptr();
        // SAFETY: the node is live, so both fields are initialized; after the
        //         reads the storage is handed back without dropping them again.
        unsafe {
            let key = std::ptr::read(&raw const (*ptr).key);
            let value = std::ptr::read(&raw const (*ptr).value);
            self.alloc.deallocate(n.cast(), Self::node_layout());
            (key, value)
        }
    }

    /// Replaces the subtree rooted at `u` (as seen from `u`'s parent, or the
    /// root) with the subtree rooted at `v`. The sole rewiring primitive of
    /// deletion. `u`'s own links are left untouched.
    ///
    /// # Safety
    /// `u` must be a live node of this tree; `v`, if `Some`, a live node.
    unsafe fn transplant(&mut self, u: NonNull<Node<K, V>>, v: Link<K, V>) {
        unsafe {
            let p = (*u.as_ptr()).parent;
            match p {
                None => self.root = v,
                Some(parent) => {
                    if (*parent.as_ptr()).left == Some(u) {
                        (*parent.as_ptr()).left = v;
                    } else {
                        (*parent.as_ptr()).right = v;
                    }
                }
            }
            if let Some(vn) = v {
                (*vn.as_ptr()).parent = p;
            }
        }
    }

    /// Left rotation around `x`; a no-op if `x` has no right child.
    ///
    /// Rewires exactly three parent/child relationships plus the link from
    /// `x`'s original parent (or the root). BST order is preserved.
    ///
    /// # Safety
    /// `x` must be a live node of this tree.
    unsafe fn rotate_left(&mut self, x: NonNull<Node<K, V>>) {
        unsafe {
            let Some(y) = (*x.as_ptr()).right else {
                return;
            };
            let yl = (*y.as_ptr()).left;
            (*x.as_ptr()).right = yl;
            if let Some(b) = yl {
                (*b.as_ptr()).parent = Some(x);
            }
            let p = (*x.as_ptr()).parent;
            (*y.as_ptr()).parent = p;
            match p {
                None => self.root = Some(y),
                Some(parent) => {
                    if (*parent.as_ptr()).left == Some(x) {
                        (*parent.as_ptr()).left = Some(y);
                    } else {
                        (*parent.as_ptr()).right = Some(y);
                    }
                }
            }
            (*y.as_ptr()).left = Some(x);
            (*x.as_ptr()).parent = Some(y);
        }
    }

    /// Right rotation around `y`; mirror of [`rotate_left`].
    ///
    /// # Safety
    /// `y` must be a live node of this tree.
    ///
    /// [`rotate_left`]: RbTree::rotate_left
    unsafe fn rotate_right(&mut self, y: NonNull<Node<K, V>>) {
        unsafe {
            let Some(x) = (*y.as_ptr()).left else {
                return;
            };
            let xr = (*x.as_ptr()).right;
            (*y.as_ptr()).left = xr;
            if let Some(b) = xr {
                (*b.as_ptr()).parent = Some(y);
            }
            let p = (*y.as_ptr()).parent;
            (*x.as_ptr()).parent = p;
            match p {
                None => self.root = Some(x),
                Some(parent) => {
                    if (*parent.as_ptr()).left == Some(y) {
                        (*parent.as_ptr()).left = Some(x);
                    } else {
                        (*parent.as_ptr()).right = Some(x);
                    }
                }
            }
            (*x.as_ptr()).right = Some(y);
            (*y.as_ptr()).parent = Some(x);
        }
    }

    /// Unlinks `z`, rebalances, and returns its payload.
    ///
    /// The node actually spliced out is `z` itself when it has at most one
    /// child, otherwise `z`'s in-order successor, which is transplanted into
    /// `z`'s structural position and takes over `z`'s color. If the spliced
    /// node was Black, the fixup runs at the replacement position, whose
    /// parent is carried explicitly, because the replacement may be `None`
    /// (a "double black" at a null position still has to be repaired).
    ///
    /// # Safety
    /// `z` must be a live node of this tree.
    pub(crate) unsafe fn remove_node(&mut self, z: NonNull<Node<K, V>>) -> (K, V) {
        unsafe {
            let zl = (*z.as_ptr()).left;
            let zr = (*z.as_ptr()).right;
            let spliced_color;
            let x;
            let x_parent;
            match (zl, zr) {
                (None, r) => {
                    spliced_color = (*z.as_ptr()).color;
                    x = r;
                    x_parent = (*z.as_ptr()).parent;
                    self.transplant(z, r);
                }
                (l @ Some(_), None) => {
                    spliced_color = (*z.as_ptr()).color;
                    x = l;
                    x_parent = (*z.as_ptr()).parent;
                    self.transplant(z, l);
                }
                (Some(l), Some(r)) => {
                    let y = minimum(r);
                    spliced_color = (*y.as_ptr()).color;
                    x = (*y.as_ptr()).right;
                    if (*y.as_ptr()).parent == Some(z) {
                        // x (possibly None) stays below y after the transplant.
                        x_parent = Some(y);
                    } else {
                        x_parent = (*y.as_ptr()).parent;
                        self.transplant(y, (*y.as_ptr()).right);
                        (*y.as_ptr()).right = Some(r);
                        (*r.as_ptr()).parent = Some(y);
                    }
                    self.transplant(z, Some(y));
                    (*y.as_ptr()).left = Some(l);
                    (*l.as_ptr()).parent = Some(y);
                    (*y.as_ptr()).color = (*z.as_ptr()).color;
                }
            }
            if spliced_color == Color::Black {
                self.remove_fixup(x, x_parent);
            }
            self.count -= 1;
            self.free_node(z)
        }
    }

    /// Restores the invariants after a Black node was spliced out.
    ///
    /// `x` carries a black deficiency ("double black"); `parent` is `x`'s
    /// parent, passed separately since `x` may be `None`. Terminates within
    /// O(height) steps: each iteration either moves the deficiency one level
    /// up or resolves it with at most three rotations.
    ///
    /// # Safety
    /// `x`/`parent` must describe a real position of this tree: either
    /// `parent` is `None` and `x` is the root link, or `x` is one of
    /// `parent`'s child links.
    unsafe fn remove_fixup(&mut self, mut x: Link<K, V>, mut parent: Link<K, V>) {
        unsafe {
            while x != self.root && color(x) == Color::Black {
                let Some(p) = parent else {
                    break;
                };
                if x == (*p.as_ptr()).left {
                    // The sibling exists: the path through x is one Black
                    // short, so the other side holds at least one real node.
                    let mut w = (*p.as_ptr()).right.expect("black-deficient node has a sibling");
                    if (*w.as_ptr()).color == Color::Red {
                        (*w.as_ptr()).color = Color::Black;
                        (*p.as_ptr()).color = Color::Red;
                        self.rotate_left(p);
                        w = (*p.as_ptr()).right.expect("rotation keeps a right child here");
                    }
                    if color((*w.as_ptr()).left) == Color::Black
                        && color((*w.as_ptr()).right) == Color::Black
                    {
                        // Both nephews Black: drain one Black from this level
                        // and push the deficiency up to the parent.
                        (*w.as_ptr()).color = Color::Red;
                        x = Some(p);
                        parent = (*p.as_ptr()).parent;
                    } else {
                        if color((*w.as_ptr()).right) == Color::Black {
                            // Near nephew Red, far Black: turn it into the
                            // far-Red case.
                            set_color((*w.as_ptr()).left, Color::Black);
                            (*w.as_ptr()).color = Color::Red;
                            self.rotate_right(w);
                            w = (*p.as_ptr()).right.expect("rotation keeps a right child here");
                        }
                        (*w.as_ptr()).color = (*p.as_ptr()).color;
                        (*p.as_ptr()).color = Color::Black;
                        set_color((*w.as_ptr()).right, Color::Black);
                        self.rotate_left(p);
                        x = self.root;
                        parent = None;
                    }
                } else {
                    let mut w = (*p.as_ptr()).left.expect("black-deficient node has a sibling");
                    if (*w.as_ptr()).color == Color::Red {
                        (*w.as_ptr()).color = Color::Black;
                        (*p.as_ptr()).color = Color::Red;
                        self.rotate_right(p);
                        w = (*p.as_ptr()).left.expect("rotation keeps a left child here");
                    }
                    if color((*w.as_ptr()).right) == Color::Black
                        && color((*w.as_ptr()).left) == Color::Black
                    {
                        (*w.as_ptr()).color = Color::Red;
                        x = Some(p);
                        parent = (*p.as_ptr()).parent;
                    } else {
                        if color((*w.as_ptr()).left) == Color::Black {
                            set_color((*w.as_ptr()).right, Color::Black);
                            (*w.as_ptr()).color = Color::Red;
                            self.rotate_left(w);
                            w = (*p.as_ptr()).left.expect("rotation keeps a left child here");
                        }
                        (*w.as_ptr()).color = (*p.as_ptr()).color;
                        (*p.as_ptr()).color = Color::Black;
                        set_color((*w.as_ptr()).left, Color::Black);
                        self.rotate_right(p);
                        x = self.root;
                        parent = None;
                    }
                }
            }
            set_color(x, Color::Black);
        }
    }

    /// Structurally unlinks the minimum without rebalancing.
    ///
    /// Only used while draining the tree into an owning iterator: BST order
    /// is preserved for the remaining nodes, the color invariants are not;
    /// balance is irrelevant for a tree that only shrinks to nothing.
    pub(crate) fn detach_min(&mut self) -> Option<(K, V)> {
        let root = self.root?;
        // SAFETY: the minimum is live and has no left child, so its right
        //         link (possibly None) can take its place directly.
        unsafe {
            let m = minimum(root);
            let right = (*m.as_ptr()).right;
            self.transplant(m, right);
            self.count -= 1;
            Some(self.free_node(m))
        }
    }

    /// Mirror of [`detach_min`].
    ///
    /// [`detach_min`]: RbTree::detach_min
    pub(crate) fn detach_max(&mut self) -> Option<(K, V)> {
        let root = self.root?;
        // SAFETY: as in `detach_min`, mirrored.
        unsafe {
            let m = maximum(root);
            let left = (*m.as_ptr()).left;
            self.transplant(m, left);
            self.count -= 1;
            Some(self.free_node(m))
        }
    }

    /// Releases every node (children before parents) and resets the count.
    pub(crate) fn clear(&mut self) {
        let released = self.count;
        let mut pending = Vec::new();
        let mut order = Vec::new();
        if let Some(root) = self.root.take() {
            pending.push(root);
        }
        while let Some(n) = pending.pop() {
            // SAFETY: nodes are visited once; nothing is freed until the
            //         traversal is done.
            unsafe {
                if let Some(l) = (*n.as_ptr()).left {
                    pending.push(l);
                }
                if let Some(r) = (*n.as_ptr()).right {
                    pending.push(r);
                }
            }
            order.push(n);
        }
        // Reverse pre-order is a post-order: children precede their parents.
        for n in order.into_iter().rev() {
            // SAFETY: every node appears exactly once and is unreachable now
            //         that the root link is gone.
            drop(unsafe { self.free_node(n) });
        }
        self.count = 0;
        if released > 0 {
            trace!("released {released} nodes");
        }
    }

    /// Structural copy preserving shape and colors, via an explicit work
    /// stack. Payloads are cloned *before* storage is obtained, so a
    /// panicking `Clone` never leaves a half-built node; a failed allocation
    /// drops the partial copy and reports the error.
    pub(crate) fn try_clone(&self) -> Result<Self, Error>
    where
        K: Clone,
        V: Clone,
        A: Clone,
    {
        let mut new = Self::new(self.alloc.clone());
        let mut stack: Vec<(NonNull<Node<K, V>>, Link<K, V>, bool)> = Vec::new();
        if let Some(root) = self.root {
            stack.push((root, None, false));
        }
        while let Some((src, dst_parent, is_left)) = stack.pop() {
            // SAFETY: `src` walks the source tree, which is live and unmoved;
            //         `dst_parent` is a node `new` created earlier.
            unsafe {
                let s = &*src.as_ptr();
                let node = new.create_node(s.key.clone(), s.value.clone(), s.color, dst_parent)?;
                match dst_parent {
                    None => new.root = Some(node),
                    Some(p) => {
                        if is_left {
                            (*p.as_ptr()).left = Some(node);
                        } else {
                            (*p.as_ptr()).right = Some(node);
                        }
                    }
                }
                new.count += 1;
                if let Some(l) = s.left {
                    stack.push((l, Some(node), true));
                }
                if let Some(r) = s.right {
                    stack.push((r, Some(node), false));
                }
            }
        }
        Ok(new)
    }
}

impl<K: Ord, V, A: NodeAllocator> RbTree<K, V, A> {
    /// Unconditional BST insertion of a new Red leaf, then fixup.
    ///
    /// Duplicate keys descend to the right; keeping keys unique is the
    /// facade's job, not the engine's. On allocation failure the tree is
    /// exactly as it was.
    pub(crate) fn insert(&mut self, key: K, value: V) -> Result<NonNull<Node<K, V>>, Error> {
        let parent = self.descend(&key);
        let node = self.create_node(key, value, Color::Red, parent)?;
        // SAFETY: `node` is fresh and `parent` is the insertion point the
        //         descent just found.
        unsafe { self.attach(node, parent) };
        Ok(node)
    }

    /// Like [`insert`], but aborts the process on allocation failure, the way
    /// the standard collections do. Backs the facade's infallible surface.
    ///
    /// [`insert`]: RbTree::insert
    pub(crate) fn insert_infallible(&mut self, key: K, value: V) -> NonNull<Node<K, V>> {
        match self.insert(key, value) {
            Ok(node) => node,
            Err(_) => std::alloc::handle_alloc_error(Self::node_layout()),
        }
    }

    /// Allocate-then-construct insertion.
    ///
    /// Node storage is obtained first; then the payload constructor runs. If
    /// it fails (or panics) the storage goes straight back to the allocator
    /// and the tree is unchanged, so no partial insert is ever observable.
    pub(crate) fn insert_with<E, F>(
        &mut self,
        key: K,
        make: F,
    ) -> Result<NonNull<Node<K, V>>, InsertError<E>>
    where
        F: FnOnce() -> Result<V, E>,
    {
        let parent = self.descend(&key);
        let layout = Self::node_layout();
        let storage = self.alloc.allocate(layout).map_err(InsertError::Alloc)?;
        let value = {
            let mut guard = StorageGuard {
                alloc: &self.alloc,
                ptr: Some(storage),
                layout,
            };
            let value = make().map_err(InsertError::Construct)?;
            guard.ptr = None;
            value
        };
        let node = storage.cast::<Node<K, V>>();
        // SAFETY: freshly allocated storage with the layout of a node.
        unsafe {
            node.as_ptr().write(Node {
                key,
                value,
                color: Color::Red,
                parent,
                left: None,
                right: None,
            });
            self.attach(node, parent);
        }
        Ok(node)
    }

    /// Finds the parent a new leaf with `key` hangs under (`None` for an
    /// empty tree). Pure read, no structural change.
    fn descend(&self, key: &K) -> Link<K, V> {
        let mut parent = None;
        let mut cur = self.root;
        while let Some(c) = cur {
            parent = cur;
            // SAFETY: reachable links are live.
            let n = unsafe { &*c.as_ptr() };
            cur = if *key < n.key { n.left } else { n.right };
        }
        parent
    }

    /// Links a fresh Red leaf under `parent` and restores the invariants.
    ///
    /// # Safety
    /// `node` must be a fully initialized, unlinked node whose `parent`
    /// field is `parent`, and `parent` the position [`descend`] returned for
    /// `node`'s key with no intervening mutation.
    ///
    /// [`descend`]: RbTree::descend
    unsafe fn attach(&mut self, node: NonNull<Node<K, V>>, parent: Link<K, V>) {
        unsafe {
            match parent {
                None => self.root = Some(node),
                Some(p) => {
                    if (*node.as_ptr()).key < (*p.as_ptr()).key {
                        (*p.as_ptr()).left = Some(node);
                    } else {
                        (*p.as_ptr()).right = Some(node);
                    }
                }
            }
            self.insert_fixup(node);
        }
        self.count += 1;
    }

    /// Restores the invariants after inserting the Red leaf `z`.
    ///
    /// While `z`'s parent is Red: a Red uncle means recolor and ascend to
    /// the grandparent; a Black (or absent) uncle means at most two
    /// rotations around the parent/grandparent, which terminates the loop.
    ///
    /// # Safety
    /// `z` must be a live node of this tree.
    unsafe fn insert_fixup(&mut self, mut z: NonNull<Node<K, V>>) {
        unsafe {
            while let Some(p) = (*z.as_ptr()).parent {
                if (*p.as_ptr()).color == Color::Black {
                    break;
                }
                // A Red parent is never the root, so the grandparent exists.
                let g = (*p.as_ptr()).parent.expect("red node is not the root");
                if Some(p) == (*g.as_ptr()).left {
                    let uncle = (*g.as_ptr()).right;
                    if color(uncle) == Color::Red {
                        (*p.as_ptr()).color = Color::Black;
                        set_color(uncle, Color::Black);
                        (*g.as_ptr()).color = Color::Red;
                        z = g;
                    } else {
                        if Some(z) == (*p.as_ptr()).right {
                            // Inner ("zigzag") child: rotate it outward first.
                            z = p;
                            self.rotate_left(z);
                        }
                        let p = (*z.as_ptr()).parent.expect("outer case has a parent");
                        let g = (*p.as_ptr()).parent.expect("and a grandparent");
                        (*p.as_ptr()).color = Color::Black;
                        (*g.as_ptr()).color = Color::Red;
                        self.rotate_right(g);
                    }
                } else {
                    let uncle = (*g.as_ptr()).left;
                    if color(uncle) == Color::Red {
                        (*p.as_ptr()).color = Color::Black;
                        set_color(uncle, Color::Black);
                        (*g.as_ptr()).color = Color::Red;
                        z = g;
                    } else {
                        if Some(z) == (*p.as_ptr()).left {
                            z = p;
                            self.rotate_right(z);
                        }
                        let p = (*z.as_ptr()).parent.expect("outer case has a parent");
                        let g = (*p.as_ptr()).parent.expect("and a grandparent");
                        (*p.as_ptr()).color = Color::Black;
                        (*g.as_ptr()).color = Color::Red;
                        self.rotate_left(g);
                    }
                }
            }
            // The fixup may have recolored the root Red on its way up.
            set_color(self.root, Color::Black);
        }
    }

    /// Removes by key; an absent key is a normal `None`, not a failure.
    pub(crate) fn remove<Q>(&mut self, key: &Q) -> Option<(K, V)>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        let node = self.search(key)?;
        // SAFETY: `search` only returns live nodes of this tree.
        Some(unsafe { self.remove_node(node) })
    }

    /// Diagnostic invariant check; not on any hot path, test-suite fodder.
    ///
    /// Confirms the root is Black, there is no Red-Red parent/child pair,
    /// every root-to-`None` path crosses the same number of Black nodes,
    /// parent links mirror child links, and the in-order key sequence is
    /// strictly increasing.
    pub(crate) fn validate(&self) -> bool {
        // SAFETY: the whole reachable structure is live.
        unsafe {
            if color(self.root) == Color::Red {
                return false;
            }
            if !links_consistent(self.root, None) {
                return false;
            }
            if black_height(self.root).is_none() {
                return false;
            }
            let mut cur = self.first();
            while let Some(n) = cur {
                let next = successor(n);
                if let Some(m) = next
                    && (*n.as_ptr()).key >= (*m.as_ptr()).key
                {
                    return false;
                }
                cur = next;
            }
            true
        }
    }

}

impl<K, V, A: NodeAllocator> Drop for RbTree<K, V, A> {
    fn drop(&mut self) {
        self.clear();
    }
}

/// Black-height of the subtree, or `None` on a Red-Red pair or a
/// black-height mismatch. Recursion depth is the tree height, which the
/// invariant being checked keeps at O(log n).
///
/// # Safety
/// `node`, if `Some`, must root a live, structurally consistent subtree.
unsafe fn black_height<K, V>(node: Link<K, V>) -> Option<usize> {
    let Some(n) = node else {
        return Some(0);
    };
    unsafe {
        let nref = &*n.as_ptr();
        if nref.color == Color::Red
            && (color(nref.left) == Color::Red || color(nref.right) == Color::Red)
        {
            return None;
        }
        let lh = black_height(nref.left)?;
        let rh = black_height(nref.right)?;
        if lh != rh {
            return None;
        }
        Some(lh + usize::from(nref.color == Color::Black))
    }
}

/// Checks that every node's parent link points at the node it hangs under.
///
/// # Safety
/// As for [`black_height`].
unsafe fn links_consistent<K, V>(node: Link<K, V>, parent: Link<K, V>) -> bool {
    let Some(n) = node else {
        return true;
    };
    unsafe {
        let nref = &*n.as_ptr();
        nref.parent == parent
            && links_consistent(nref.left, Some(n))
            && links_consistent(nref.right, Some(n))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc::HeapAllocator;

    fn tree_of(keys: &[i32]) -> RbTree<i32, i32, HeapAllocator> {
        let mut t = RbTree::new(HeapAllocator);
        for &k in keys {
            t.insert(k, k * 10).unwrap();
        }
        t
    }

    fn in_order(t: &RbTree<i32, i32, HeapAllocator>) -> Vec<i32> {
        let mut out = Vec::new();
        let mut cur = t.first();
        while let Some(n) = cur {
            unsafe {
                out.push((*n.as_ptr()).key);
                cur = successor(n);
            }
        }
        out
    }

    #[test]
    fn insert_keeps_invariants_and_order() {
        let t = tree_of(&[10, 20, 5, 15, 25, 1]);
        assert_eq!(in_order(&t), [1, 5, 10, 15, 20, 25]);
        assert_eq!(t.len(), 6);
        assert!(t.validate());
        unsafe {
            let root = t.root().unwrap();
            assert_eq!((*root.as_ptr()).color, Color::Black);
        }
    }

    #[test]
    fn remove_node_with_two_children() {
        let mut t = tree_of(&[10, 20, 5, 15, 25, 1]);
        let (k, v) = t.remove(&10).unwrap();
        assert_eq!((k, v), (10, 100));
        assert_eq!(in_order(&t), [1, 5, 15, 20, 25]);
        assert_eq!(t.len(), 5);
        assert!(t.validate());
    }

    #[test]
    fn remove_absent_is_none() {
        let mut t = tree_of(&[1, 2, 3]);
        assert_eq!(t.remove(&7), None);
        assert_eq!(t.len(), 3);
        assert!(t.validate());
    }

    #[test]
    fn remove_black_leaf_restores_black_height() {
        // Deleting a black leaf leaves a double black at a None position;
        // the fixup has to run with only the parent context.
        let mut t = tree_of(&[2, 1, 3, 4]);
        assert!(t.validate());
        t.remove(&1).unwrap();
        assert!(t.validate());
        t.remove(&4).unwrap();
        assert!(t.validate());
        assert_eq!(in_order(&t), [2, 3]);
    }

    #[test]
    fn successor_predecessor_roundtrip() {
        let t = tree_of(&[8, 3, 10, 1, 6, 14, 4, 7, 13]);
        let keys = in_order(&t);
        unsafe {
            for pair in keys.windows(2) {
                let a = t.search(&pair[0]).unwrap();
                let b = t.search(&pair[1]).unwrap();
                assert_eq!(successor(a), Some(b));
                assert_eq!(predecessor(b), Some(a));
            }
            assert_eq!(successor(t.last().unwrap()), None);
            assert_eq!(predecessor(t.first().unwrap()), None);
        }
    }

    #[test]
    fn search_present_and_absent() {
        let t = tree_of(&[2, 4, 6, 8]);
        for k in [2, 4, 6, 8] {
            let n = t.search(&k).unwrap();
            unsafe { assert_eq!((*n.as_ptr()).value, k * 10) };
        }
        for k in [1, 3, 5, 7, 9] {
            assert!(t.search(&k).is_none());
        }
    }

    #[test]
    fn clear_resets() {
        let mut t = tree_of(&[5, 3, 9, 7]);
        t.clear();
        assert_eq!(t.len(), 0);
        assert!(t.root().is_none());
        t.insert(1, 10).unwrap();
        assert_eq!(in_order(&t), [1]);
        assert!(t.validate());
    }

    #[test]
    fn detach_min_and_max_drain_in_order() {
        let mut t = tree_of(&[4, 2, 6, 1, 3, 5, 7]);
        assert_eq!(t.detach_min(), Some((1, 10)));
        assert_eq!(t.detach_max(), Some((7, 70)));
        assert_eq!(t.detach_min(), Some((2, 20)));
        assert_eq!(in_order(&t), [3, 4, 5, 6]);
        assert_eq!(t.len(), 4);
    }

    #[test]
    fn try_clone_matches_and_is_independent() {
        let mut t = tree_of(&[10, 5, 15, 3, 7]);
        let c = t.try_clone().unwrap();
        assert_eq!(in_order(&c), in_order(&t));
        assert!(c.validate());
        t.remove(&5).unwrap();
        assert_eq!(in_order(&c), [3, 5, 7, 10, 15]);
    }

    #[test]
    fn randomized_ops_preserve_invariants() {
        use rand::Rng;
        let mut rng = rand::rng();
        let mut t: RbTree<u16, u16, HeapAllocator> = RbTree::new(HeapAllocator);
        let mut model = std::collections::BTreeMap::new();
        for _ in 0..2000 {
            let k: u16 = rng.random_range(0..300);
            if rng.random_bool(0.6) {
                if !model.contains_key(&k) {
                    t.insert(k, k).unwrap();
                    model.insert(k, k);
                }
            } else if model.remove(&k).is_some() {
                assert!(t.remove(&k).is_some());
            } else {
                assert!(t.remove(&k).is_none());
            }
            assert_eq!(t.len(), model.len());
            assert!(t.validate());
        }
        let mut keys = Vec::new();
        let mut cur = t.first();
        while let Some(n) = cur {
            unsafe {
                keys.push((*n.as_ptr()).key);
                cur = successor(n);
            }
        }
        assert_eq!(keys, model.keys().copied().collect::<Vec<_>>());
    }
}
