use std::num::NonZeroUsize;

pub const DEFAULT_PAGE_SIZE: usize = 10;

/// Page state over an in-memory list. The list itself is passed in on every
/// call so the paginator never holds a stale length.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Paginator {
    page: usize,
    page_size: NonZeroUsize,
}

impl Default for Paginator {
    fn default() -> Self {
        Self::new(NonZeroUsize::new(DEFAULT_PAGE_SIZE).unwrap_or(NonZeroUsize::MIN))
    }
}

impl Paginator {
    pub fn new(page_size: NonZeroUsize) -> Self {
        Self { page: 1, page_size }
    }

    pub fn page(&self) -> usize {
        self.page
    }

    pub fn page_size(&self) -> usize {
        self.page_size.get()
    }

    pub fn total_pages(&self, len: usize) -> usize {
        len.div_ceil(self.page_size.get()).max(1)
    }

    /// Moves to `page`, clamped into `[1, total_pages]`. Returns the page
    /// actually selected.
    pub fn set_page(&mut self, page: usize, len: usize) -> usize {
        self.page = page.clamp(1, self.total_pages(len));
        self.page
    }

    pub fn prev(&mut self) -> usize {
        if self.page > 1 {
            self.page -= 1;
        }
        self.page
    }

    pub fn next(&mut self, len: usize) -> usize {
        if self.page < self.total_pages(len) {
            self.page += 1;
        }
        self.page
    }

    /// Pulls the current page back into range after the list shrank.
    pub fn clamp(&mut self, len: usize) {
        self.page = self.page.clamp(1, self.total_pages(len));
    }

    pub fn range(&self, len: usize) -> std::ops::Range<usize> {
        let size = self.page_size.get();
        let start = (self.page - 1).saturating_mul(size).min(len);
        let end = start.saturating_add(size).min(len);
        start..end
    }

    pub fn window<'a, T>(&self, items: &'a [T]) -> &'a [T] {
        &items[self.range(items.len())]
    }
}
