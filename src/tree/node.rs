use std::ptr::NonNull;

/// Node color. Absent children (`None` links) count as [`Black`].
///
/// [`Black`]: Color::Black
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Color {
    Red,
    Black,
}

/// A possibly-absent edge between nodes.
///
/// Links carry no ownership by themselves; the tree owns every node it can
/// reach from its root, and releases each one exactly once through the
/// allocator seam. `parent` links point back up the same owned structure.
pub(crate) type Link<K, V> = Option<NonNull<Node<K, V>>>;

pub(crate) struct Node<K, V> {
    pub(crate) key: K,
    pub(crate) value: V,
    pub(crate) color: Color,
    pub(crate) parent: Link<K, V>,
    pub(crate) left: Link<K, V>,
    pub(crate) right: Link<K, V>,
}

/// Color of a possibly-absent node; `None` is Black.
///
/// # Safety
/// `link`, if `Some`, must point to a live node.
pub(crate) unsafe fn color<K, V>(link: Link<K, V>) -> Color {
    link.map_or(Color::Black, |n| unsafe { (*n.as_ptr()).color })
}

/// Recolors a node if present; a no-op on `None`.
///
/// # Safety
/// `link`, if `Some`, must point to a live node.
pub(crate) unsafe fn set_color<K, V>(link: Link<K, V>, color: Color) {
    if let Some(n) = link {
        unsafe { (*n.as_ptr()).color = color }
    }
}

/// Leftmost node of the subtree rooted at `node`.
///
/// # Safety
/// `node` must point to a live node whose reachable links are all live.
pub(crate) unsafe fn minimum<K, V>(mut node: NonNull<Node<K, V>>) -> NonNull<Node<K, V>> {
    unsafe {
        while let Some(l) = (*node.as_ptr()).left {
            node = l;
        }
    }
    node
}

/// Rightmost node of the subtree rooted at `node`.
///
/// # Safety
/// Same as [`minimum`].
pub(crate) unsafe fn maximum<K, V>(mut node: NonNull<Node<K, V>>) -> NonNull<Node<K, V>> {
    unsafe {
        while let Some(r) = (*node.as_ptr()).right {
            node = r;
        }
    }
    node
}

/// In-order successor: minimum of the right subtree if there is one,
/// otherwise the first ancestor of which `node` is a left descendant.
///
/// Amortized O(1) per step across a full in-order traversal.
///
/// # Safety
/// `node` must point to a live node inside a structurally consistent tree.
pub(crate) unsafe fn successor<K, V>(node: NonNull<Node<K, V>>) -> Link<K, V> {
    unsafe {
        if let Some(r) = (*node.as_ptr()).right {
            return Some(minimum(r));
        }
        let mut n = node;
        let mut p = (*n.as_ptr()).parent;
        while let Some(parent) = p {
            if (*parent.as_ptr()).right != Some(n) {
                break;
            }
            n = parent;
            p = (*parent.as_ptr()).parent;
        }
        p
    }
}

/// In-order predecessor; mirror of [`successor`].
///
/// # Safety
/// Same as [`successor`].
pub(crate) unsafe fn predecessor<K, V>(node: NonNull<Node<K, V>>) -> Link<K, V> {
    unsafe {
        if let Some(l) = (*node.as_ptr()).left {
            return Some(maximum(l));
        }
        let mut n = node;
        let mut p = (*n.as_ptr()).parent;
        while let Some(parent) = p {
            if (*parent.as_ptr()).left != Some(n) {
                break;
            }
            n = parent;
            p = (*parent.as_ptr()).parent;
        }
        p
    }
}
