//! Fixed-size page windows over the listing and the compressed page-number
//! strip shown under it. Everything here is pure.

pub const DEFAULT_PAGE_SIZE: usize = 21;
pub const MAX_VISIBLE_PAGES: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageLabel {
    Page(usize),
    Ellipsis,
}

impl std::fmt::Display for PageLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PageLabel::Page(n) => write!(f, "{}", n),
            PageLabel::Ellipsis => write!(f, "..."),
        }
    }
}

/// Never less than one, so an empty listing still has page 1.
pub fn total_pages(total_items: usize, page_size: usize) -> usize {
    if page_size == 0 {
        return 1;
    }
    total_items.div_ceil(page_size).max(1)
}

/// Items on `current_page` (1-based), clipped to the end of `items`.
pub fn window<T>(items: &[T], page_size: usize, current_page: usize) -> &[T] {
    let start = current_page
        .saturating_sub(1)
        .saturating_mul(page_size)
        .min(items.len());
    let end = start.saturating_add(page_size).min(items.len());
    &items[start..end]
}

/// Page strip for `current` of `total`. The compressed forms always show five
/// page slots, so a `max_visible` below [`MAX_VISIBLE_PAGES`] is raised to it.
pub fn page_number_labels(current: usize, total: usize, max_visible: usize) -> Vec<PageLabel> {
    if total <= max_visible.max(MAX_VISIBLE_PAGES) {
        return (1..=total).map(PageLabel::Page).collect();
    }

    let mut labels = Vec::with_capacity(7);
    if current <= 3 {
        labels.extend((1..=4).map(PageLabel::Page));
        labels.push(PageLabel::Ellipsis);
        labels.push(PageLabel::Page(total));
    } else if current >= total - 2 {
        labels.push(PageLabel::Page(1));
        labels.push(PageLabel::Ellipsis);
        labels.extend((total - 3..=total).map(PageLabel::Page));
    } else {
        labels.push(PageLabel::Page(1));
        labels.push(PageLabel::Ellipsis);
        labels.extend((current - 1..=current + 1).map(PageLabel::Page));
        labels.push(PageLabel::Ellipsis);
        labels.push(PageLabel::Page(total));
    }
    labels
}

/// Current page over a listing of known length. Moves that would leave
/// `1..=total_pages` are refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageCursor {
    current: usize,
    page_size: usize,
    total_items: usize,
}

impl PageCursor {
    pub fn new(page_size: usize, total_items: usize) -> Self {
        Self {
            current: 1,
            page_size: page_size.max(1),
            total_items,
        }
    }

    pub fn current(&self) -> usize {
        self.current
    }

    pub fn total_pages(&self) -> usize {
        total_pages(self.total_items, self.page_size)
    }

    pub fn has_next(&self) -> bool {
        self.current < self.total_pages()
    }

    pub fn has_prev(&self) -> bool {
        self.current > 1
    }

    pub fn next(&mut self) -> bool {
        self.go_to(self.current + 1)
    }

    pub fn prev(&mut self) -> bool {
        self.current > 1 && self.go_to(self.current - 1)
    }

    pub fn go_to(&mut self, page: usize) -> bool {
        if page == 0 || page > self.total_pages() || page == self.current {
            return false;
        }
        self.current = page;
        true
    }

    pub fn window<'a, T>(&self, items: &'a [T]) -> &'a [T] {
        window(items, self.page_size, self.current)
    }

    pub fn labels(&self) -> Vec<PageLabel> {
        page_number_labels(self.current, self.total_pages(), MAX_VISIBLE_PAGES)
    }

    /// 1-based first and last item on this page; `(0, 0)` when empty.
    pub fn range(&self) -> (usize, usize) {
        if self.total_items == 0 {
            return (0, 0);
        }
        let start = (self.current - 1) * self.page_size + 1;
        let end = (self.current * self.page_size).min(self.total_items);
        (start, end)
    }
}
