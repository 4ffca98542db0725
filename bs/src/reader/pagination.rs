//! Pagination of moniker location lists

use tracing::debug;

/// Which slice of a location list to return
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Pagination {
    /// The whole list
    #[default]
    Unpaginated,
    /// `take` items starting at `skip`
    Window { skip: usize, take: usize },
}

impl Pagination {
    /// Translate wire-level skip/take, where `(0, 0)` means "no pagination"
    pub fn from_skip_take(skip: usize, take: usize) -> Self {
        if skip == 0 && take == 0 {
            Self::Unpaginated
        } else {
            Self::Window { skip, take }
        }
    }

    /// Slice `items`, returning the window and the full length
    ///
    /// Windows starting past the end are empty; windows running past the end
    /// are clamped.
    pub fn apply<T>(self, mut items: Vec<T>) -> (Vec<T>, usize) {
        let total = items.len();
        match self {
            Self::Unpaginated => (items, total),
            Self::Window { skip, take } => {
                if skip >= total {
                    debug!(skip, total, "apply: skip past end of result set");
                    return (Vec::new(), total);
                }
                let hi = skip.saturating_add(take).min(total);
                items.truncate(hi);
                let window = items.split_off(skip);
                (window, total)
            }
        }
    }
}
