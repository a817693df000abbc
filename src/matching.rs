use crate::allocation::UnsignedInt;
use num_iter;
use tracing::trace;

/// Maximum bipartite matching over a dense 0/1 eligibility grid
/// of N row slots (agents) -> M column slots (goods), via augmenting path search.
///
/// Rows are processed in increasing index order and columns are scanned in
/// increasing index order, so ties always resolve to the lowest index. The
/// matcher knows nothing about agents, goods or rounds - callers map row and
/// column slots back to their own identifier space.
#[derive(Clone)]
pub struct BipartiteMatcher<I: UnsignedInt> {
    num_rows: I,
    num_cols: I,
    // row-major eligibility grid
    grid: Vec<bool>,
    // per-row-attempt visit flags of columns
    visited: Vec<bool>,
}

impl<I: UnsignedInt> BipartiteMatcher<I> {
    pub fn new(row_capacity: usize, column_capacity: usize) -> Self {
        Self {
            num_rows: I::zero(),
            num_cols: I::zero(),
            grid: Vec::with_capacity(row_capacity * column_capacity),
            visited: Vec::with_capacity(column_capacity),
        }
    }

    /// Resets the matcher to an all-ineligible grid of the given shape.
    ///
    /// A zero-row or zero-column shape is valid and yields an empty matching.
    pub fn init(&mut self, num_rows: I, num_cols: I) {
        self.num_rows = num_rows;
        self.num_cols = num_cols;
        let num_rows_usize: usize = num_rows.as_();
        let num_cols_usize: usize = num_cols.as_();
        self.grid.clear();
        self.grid.resize(num_rows_usize * num_cols_usize, false);
    }

    #[inline]
    pub fn set_eligible(&mut self, row: I, col: I) {
        let num_cols: usize = self.num_cols.as_();
        let row_usize: usize = row.as_();
        let col_usize: usize = col.as_();
        debug_assert!(row < self.num_rows && col < self.num_cols);
        self.grid[row_usize * num_cols + col_usize] = true;
    }

    /// Computes a maximum matching of the current grid.
    ///
    /// `assignment` is resized to the number of columns; index j gives the row
    /// matched to column j, or `I::max_value()` for unmatched columns. Returns
    /// the matching size. An all-ineligible grid leaves every column unmatched.
    pub fn solve(&mut self, assignment: &mut Vec<I>) -> I {
        let num_cols: usize = self.num_cols.as_();
        assignment.clear();
        assignment.resize(num_cols, I::max_value());

        let mut num_matched = I::zero();
        for row in num_iter::range(I::zero(), self.num_rows) {
            // fresh visit flags per augmenting attempt
            self.visited.clear();
            self.visited.resize(num_cols, false);
            if augment(
                &self.grid,
                num_cols,
                row,
                assignment.as_mut_slice(),
                &mut self.visited,
            ) {
                num_matched += I::one();
            }
        }
        trace!("matched {} of {} rows", num_matched, self.num_rows);
        assignment.iter().for_each(|row_ref| {
            debug_assert!(*row_ref == I::max_value() || *row_ref < self.num_rows)
        });
        num_matched
    }
}

fn augment<I: UnsignedInt>(
    grid: &[bool],
    num_cols: usize,
    row: I,
    assignment: &mut [I],
    visited: &mut [bool],
) -> bool {
    // Scan the row's eligible columns in increasing order. An unvisited column is
    // taken if it is unmatched, or if its current owner can be re-routed to some
    // other column under the same visit flags.
    let row_usize: usize = row.as_();
    for col in 0..num_cols {
        if grid[row_usize * num_cols + col] && !visited[col] {
            visited[col] = true;
            let owner = assignment[col];
            if owner == I::max_value() || augment(grid, num_cols, owner, assignment, visited) {
                assignment[col] = row;
                return true;
            }
        }
    }
    false
}
