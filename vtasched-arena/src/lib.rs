use std::{fmt::Debug, hash::Hash, marker::PhantomData, ops::{Index, IndexMut}};

/// Typed handle, only meaningful for the arena that issued it.
pub struct Idx<T> {
    raw: u32,
    _ty: PhantomData<fn() -> T>,
}

impl<T> Idx<T> {
    fn new(raw: usize) -> Self {
        assert!(raw < u32::MAX as usize, "arena overflow");
        Idx { raw: raw as u32, _ty: PhantomData }
    }
    // position in the owning arena, usable for dense side tables
    pub fn index(self) -> usize {
        self.raw as usize
    }
}

// derives would put bounds on T, so spell them out
impl<T> Clone for Idx<T> {
    fn clone(&self) -> Self { *self }
}
impl<T> Copy for Idx<T> {}
impl<T> PartialEq for Idx<T> {
    fn eq(&self, other: &Self) -> bool { self.raw == other.raw }
}
impl<T> Eq for Idx<T> {}
impl<T> PartialOrd for Idx<T> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> { Some(self.cmp(other)) }
}
impl<T> Ord for Idx<T> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering { self.raw.cmp(&other.raw) }
}
impl<T> Hash for Idx<T> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) { self.raw.hash(state) }
}
impl<T> Debug for Idx<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.raw)
    }
}

/// Append-only arena. Items are never removed, so handles stay valid.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Arena<T> {
    items: Vec<T>,
}

impl<T> Default for Arena<T> {
    fn default() -> Self { Self::new() }
}

impl<T> Arena<T> {
    pub fn new() -> Self {
        Self { items: vec![] }
    }
    pub fn alloc(&mut self, x: T) -> Idx<T> {
        self.items.push(x);
        Idx::new(self.items.len() - 1)
    }
    // allocate a run of items, returning their handles in order
    pub fn alloc_ext(&mut self, xs: impl IntoIterator<Item = T>) -> Vec<Idx<T>> {
        let start = self.items.len();
        self.items.extend(xs);
        (start..self.items.len()).map(Idx::new).collect()
    }
    pub fn get(&self, idx: Idx<T>) -> Option<&T> {
        self.items.get(idx.index())
    }
    pub fn get_mut(&mut self, idx: Idx<T>) -> Option<&mut T> {
        self.items.get_mut(idx.index())
    }
    pub fn len(&self) -> usize {
        self.items.len()
    }
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
    pub fn iter(&self) -> impl ExactSizeIterator<Item = (Idx<T>, &T)> + '_ {
        self.items.iter().enumerate().map(|(i, x)| (Idx::new(i), x))
    }
    pub fn iter_mut(&mut self) -> impl ExactSizeIterator<Item = (Idx<T>, &mut T)> + '_ {
        self.items.iter_mut().enumerate().map(|(i, x)| (Idx::new(i), x))
    }
    pub fn keys(&self) -> impl ExactSizeIterator<Item = Idx<T>> {
        (0..self.items.len()).map(Idx::new)
    }
}

impl<T> Index<Idx<T>> for Arena<T> {
    type Output = T;
    fn index(&self, idx: Idx<T>) -> &T {
        &self.items[idx.index()]
    }
}

impl<T> IndexMut<Idx<T>> for Arena<T> {
    fn index_mut(&mut self, idx: Idx<T>) -> &mut T {
        &mut self.items[idx.index()]
    }
}
