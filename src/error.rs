use std::fmt;

/// Failures that map operations can report to the caller.
///
/// Lookup-style operations that promise a value (`at`, `extract`) fail with
/// [`KeyNotFound`]; `get`/`contains_key`/`remove` treat an absent key as a
/// normal negative result instead. Insertion fails with
/// [`AllocationFailed`] if node storage cannot be obtained, leaving the tree
/// exactly as it was before the call.
///
/// [`KeyNotFound`]: Error::KeyNotFound
/// [`AllocationFailed`]: Error::AllocationFailed
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    KeyNotFound,
    AllocationFailed,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::KeyNotFound => write!(f, "key not found"),
            Error::AllocationFailed => write!(f, "failed to allocate node storage"),
        }
    }
}

impl std::error::Error for Error {}

/// Failure of an allocate-then-construct insertion
/// ([`TreeMap::try_insert_with`]).
///
/// Either node storage could not be obtained, or the payload constructor
/// itself failed, in which case the storage was already handed back. In
/// both cases the map is exactly as it was before the call.
///
/// [`TreeMap::try_insert_with`]: crate::map::TreeMap::try_insert_with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertError<E> {
    Alloc(Error),
    Construct(E),
}

impl<E: fmt::Display> fmt::Display for InsertError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InsertError::Alloc(e) => e.fmt(f),
            InsertError::Construct(e) => write!(f, "failed to construct value: {e}"),
        }
    }
}

impl<E: std::error::Error> std::error::Error for InsertError<E> {}
