//! Dense two-dimensional value tables.
//!
//! The filter subsystem combines per-dimension classifications by
//! intersecting them through a dense `rows x cols -> u32` table. Like
//! the trie, the table is built in process memory and frozen into a
//! flat arena block for workers.

use std::ptr::NonNull;

use riptide_shm::{Arena, MemoryContext};

use crate::error::{LpmError, LpmResult};

/// Builder for a dense two-dimensional table.
pub struct ValueTable {
    rows: u32,
    cols: u32,
    values: Vec<u32>,
}

impl ValueTable {
    /// A table of `rows x cols`, zero-filled.
    pub fn new(rows: u32, cols: u32) -> LpmResult<Self> {
        let cells = (rows as u64).checked_mul(cols as u64);
        match cells {
            Some(n) if rows > 0 && cols > 0 && n <= u64::from(u32::MAX) => Ok(Self {
                rows,
                cols,
                values: vec![0; n as usize],
            }),
            _ => Err(LpmError::BadDimensions { rows, cols }),
        }
    }

    /// Number of rows.
    #[must_use]
    pub fn rows(&self) -> u32 {
        self.rows
    }

    /// Number of columns.
    #[must_use]
    pub fn cols(&self) -> u32 {
        self.cols
    }

    /// Set one cell; out-of-range indices are a caller bug.
    pub fn set(&mut self, row: u32, col: u32, value: u32) {
        debug_assert!(row < self.rows && col < self.cols);
        self.values[(row as usize) * self.cols as usize + col as usize] = value;
    }

    /// Read one cell.
    #[must_use]
    pub fn get(&self, row: u32, col: u32) -> u32 {
        debug_assert!(row < self.rows && col < self.cols);
        self.values[(row as usize) * self.cols as usize + col as usize]
    }

    /// Freeze into an arena block: `rows, cols` header then the dense
    /// cell array.
    pub fn freeze(&self, arena: &Arena, ctx: &MemoryContext) -> LpmResult<NonNull<u8>> {
        let size = 2 * size_of::<u32>() + self.values.len() * size_of::<u32>();
        let block = arena.alloc_in(ctx, size)?;
        // SAFETY: fresh block of exactly `size` bytes.
        unsafe {
            let words = block.cast::<u32>().as_ptr();
            words.write(self.rows);
            words.add(1).write(self.cols);
            std::ptr::copy_nonoverlapping(self.values.as_ptr(), words.add(2), self.values.len());
        }
        Ok(block)
    }
}

/// Read-only view over a frozen table block.
#[derive(Clone, Copy)]
pub struct ValueTableView<'a> {
    words: &'a [u32],
}

impl<'a> ValueTableView<'a> {
    /// Wrap a frozen block.
    ///
    /// # Safety
    ///
    /// `block` must point at a block produced by [`ValueTable::freeze`]
    /// that outlives the view.
    #[must_use]
    pub unsafe fn from_ptr(block: NonNull<u8>) -> Self {
        // SAFETY: per contract: header + rows*cols cells, frozen.
        unsafe {
            let words = block.cast::<u32>();
            let rows = words.as_ptr().read();
            let cols = words.as_ptr().add(1).read();
            Self {
                words: std::slice::from_raw_parts(
                    words.as_ptr(),
                    2 + rows as usize * cols as usize,
                ),
            }
        }
    }

    /// Number of rows.
    #[must_use]
    pub fn rows(&self) -> u32 {
        self.words[0]
    }

    /// Number of columns.
    #[must_use]
    pub fn cols(&self) -> u32 {
        self.words[1]
    }

    /// Read one cell.
    #[must_use]
    pub fn get(&self, row: u32, col: u32) -> u32 {
        debug_assert!(row < self.rows() && col < self.cols());
        self.words[2 + (row as usize) * self.cols() as usize + col as usize]
    }
}

#[cfg(test)]
mod tests {
    use riptide_shm::{Arena, ArenaOptions, NO_LIMIT};

    use super::*;

    #[test]
    fn set_get_roundtrip() {
        let mut t = ValueTable::new(4, 8).unwrap();
        t.set(0, 0, 5);
        t.set(3, 7, 9);
        assert_eq!(t.get(0, 0), 5);
        assert_eq!(t.get(3, 7), 9);
        assert_eq!(t.get(1, 1), 0);
    }

    #[test]
    fn bad_dimensions_rejected() {
        assert!(ValueTable::new(0, 5).is_err());
        assert!(ValueTable::new(5, 0).is_err());
        assert!(ValueTable::new(u32::MAX, u32::MAX).is_err());
    }

    #[test]
    fn frozen_matches_builder() {
        let arena = Arena::anonymous(&ArenaOptions {
            size: 4 << 20,
            ..ArenaOptions::default()
        })
        .unwrap();
        let agent = arena.attach_agent("filter", 1, NO_LIMIT).unwrap();

        let mut t = ValueTable::new(3, 3).unwrap();
        for row in 0..3 {
            for col in 0..3 {
                t.set(row, col, row * 10 + col);
            }
        }
        let block = t.freeze(&arena, agent.context()).unwrap();
        // SAFETY: just frozen, arena outlives the view.
        let view = unsafe { ValueTableView::from_ptr(block) };
        assert_eq!(view.rows(), 3);
        assert_eq!(view.cols(), 3);
        for row in 0..3 {
            for col in 0..3 {
                assert_eq!(view.get(row, col), t.get(row, col));
            }
        }
    }
}
