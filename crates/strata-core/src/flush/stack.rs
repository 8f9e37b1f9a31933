//! LIFO stack of nodes awaiting flush.

/// Last-in, first-out flush stack.
#[derive(Debug, Clone)]
pub struct FlushStack<T> {
    items: Vec<T>,
}

impl<T> Default for FlushStack<T> {
    fn default() -> Self {
        Self { items: Vec::new() }
    }
}

impl<T> FlushStack<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, item: T) {
        self.items.push(item);
    }

    pub fn pop(&mut self) -> Option<T> {
        self.items.pop()
    }

    pub fn peek(&self) -> Option<&T> {
        self.items.last()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    /// Items in pop order (top first).
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter().rev()
    }
}
