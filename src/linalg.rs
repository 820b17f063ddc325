//! Rank-local storage for distributed sparse matrices and vectors.
//!
//! Each rank owns a contiguous range of global rows. Contributions to rows owned by other ranks
//! are kept in a stash until the rank-local parts are merged. The finalized local part is
//! exported as a [`CsrMatrix`], which is what external solvers consume.
use crate::error::{Error, Result};
use itertools::izip;
use nalgebra::DVector;
use nalgebra_sparse::{CooMatrix, CsrMatrix};
use std::ops::Range;

/// Whether a value replaces or accumulates into an existing entry.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum InsertMode {
    Insert,
    Add,
}

/// An entry destined for a row owned by another rank.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct StashedEntry {
    pub row: usize,
    pub col: usize,
    pub value: f64,
    pub mode: InsertMode,
}

/// The rows `row_range` of a `global_rows x global_cols` sparse matrix.
///
/// The columns in `col_range` form the diagonal block of the owning rank, all other columns the
/// off-diagonal block. Preallocation reserves per-row storage for both blocks; every insertion
/// that exceeds the reserved storage is counted in [`additional_allocations`](Self::additional_allocations).
#[derive(Debug, Clone)]
pub struct DistributedSparseMatrix {
    global_rows: usize,
    global_cols: usize,
    row_range: Range<usize>,
    col_range: Range<usize>,
    // Sorted by column
    rows: Vec<Vec<(usize, f64)>>,
    stash: Vec<StashedEntry>,
    additional_allocations: usize,
    finalized: bool,
}

impl DistributedSparseMatrix {
    pub fn new(global_rows: usize, global_cols: usize, row_range: Range<usize>, col_range: Range<usize>) -> Self {
        assert!(row_range.end <= global_rows, "Row range exceeds the global row count");
        assert!(col_range.end <= global_cols, "Column range exceeds the global column count");
        Self {
            global_rows,
            global_cols,
            rows: vec![Vec::new(); row_range.len()],
            row_range,
            col_range,
            stash: Vec::new(),
            additional_allocations: 0,
            finalized: false,
        }
    }

    /// A square matrix whose rows and columns share the same ownership range.
    pub fn square(global_size: usize, owned_range: Range<usize>) -> Self {
        Self::new(global_size, global_size, owned_range.clone(), owned_range)
    }

    pub fn global_rows(&self) -> usize {
        self.global_rows
    }

    pub fn global_cols(&self) -> usize {
        self.global_cols
    }

    pub fn row_range(&self) -> Range<usize> {
        self.row_range.clone()
    }

    pub fn col_range(&self) -> Range<usize> {
        self.col_range.clone()
    }

    pub fn local_rows(&self) -> usize {
        self.row_range.len()
    }

    /// Reserves storage for `d_nnz[i]` diagonal-block and `o_nnz[i]` off-diagonal-block entries
    /// in local row `i`, discarding any previous content.
    pub fn preallocate(&mut self, d_nnz: &[usize], o_nnz: &[usize]) -> Result<()> {
        if d_nnz.len() != self.local_rows() || o_nnz.len() != self.local_rows() {
            return Err(Error::configuration(format!(
                "preallocation covers {} diagonal and {} off-diagonal rows, but {} rows are owned",
                d_nnz.len(),
                o_nnz.len(),
                self.local_rows()
            )));
        }
        self.rows = d_nnz
            .iter()
            .zip(o_nnz)
            .map(|(d, o)| Vec::with_capacity(d + o))
            .collect();
        self.stash.clear();
        self.additional_allocations = 0;
        self.finalized = false;
        Ok(())
    }

    /// Number of insertions that required storage beyond the preallocation.
    pub fn additional_allocations(&self) -> usize {
        self.additional_allocations
    }

    pub fn add_value(&mut self, row: usize, col: usize, value: f64) {
        self.set(row, col, value, InsertMode::Add);
    }

    pub fn insert_value(&mut self, row: usize, col: usize, value: f64) {
        self.set(row, col, value, InsertMode::Insert);
    }

    fn set(&mut self, row: usize, col: usize, value: f64, mode: InsertMode) {
        assert!(row < self.global_rows, "Row {row} out of bounds");
        assert!(col < self.global_cols, "Column {col} out of bounds");
        self.finalized = false;
        if !self.row_range.contains(&row) {
            self.stash.push(StashedEntry { row, col, value, mode });
            return;
        }

        let entries = &mut self.rows[row - self.row_range.start];
        match entries.binary_search_by_key(&col, |&(c, _)| c) {
            Ok(idx) => match mode {
                InsertMode::Insert => entries[idx].1 = value,
                InsertMode::Add => entries[idx].1 += value,
            },
            Err(idx) => {
                if entries.len() == entries.capacity() {
                    self.additional_allocations += 1;
                }
                entries.insert(idx, (col, value));
            }
        }
    }

    /// The value stored at a locally owned `(row, col)`, or `None` if no entry exists.
    pub fn get(&self, row: usize, col: usize) -> Option<f64> {
        if !self.row_range.contains(&row) {
            return None;
        }
        let entries = &self.rows[row - self.row_range.start];
        entries
            .binary_search_by_key(&col, |&(c, _)| c)
            .ok()
            .map(|idx| entries[idx].1)
    }

    /// Entries destined for rows owned by other ranks.
    pub fn stashed_entries(&self) -> &[StashedEntry] {
        &self.stash
    }

    /// Applies entries received from other ranks. Every entry must target an owned row.
    pub fn apply_entries(&mut self, entries: &[StashedEntry]) {
        for entry in entries {
            assert!(
                self.row_range.contains(&entry.row),
                "Received entry for row {} outside the owned range {:?}",
                entry.row,
                self.row_range
            );
            self.set(entry.row, entry.col, entry.value, entry.mode);
        }
    }

    /// Marks the local part as complete. Further insertions reopen the matrix.
    pub fn finalize(&mut self) {
        if !self.stash.is_empty() {
            log::debug!(
                "Matrix rows {:?} finalized with {} stashed off-rank entries",
                self.row_range,
                self.stash.len()
            );
        }
        self.finalized = true;
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    pub fn nnz(&self) -> usize {
        self.rows.iter().map(Vec::len).sum()
    }

    /// The owned rows as a `local_rows x global_cols` CSR matrix.
    pub fn to_local_csr(&self) -> CsrMatrix<f64> {
        let mut offsets = Vec::with_capacity(self.local_rows() + 1);
        let mut indices = Vec::with_capacity(self.nnz());
        let mut values = Vec::with_capacity(self.nnz());
        offsets.push(0);
        for entries in &self.rows {
            for &(col, value) in entries {
                indices.push(col);
                values.push(value);
            }
            offsets.push(indices.len());
        }
        CsrMatrix::try_from_csr_data(self.local_rows(), self.global_cols, offsets, indices, values)
            .expect("Rows are kept sorted and within bounds")
    }

    /// Assembles the global matrix from the parts of all ranks, routing stashed entries to their
    /// owners first.
    ///
    /// # Panics
    ///
    /// Panics if the parts do not tile the global rows or disagree on the global shape.
    pub fn merge_parts(mut parts: Vec<Self>) -> CsrMatrix<f64> {
        assert!(!parts.is_empty(), "Cannot merge an empty set of matrix parts");
        parts.sort_by_key(|part| part.row_range.start);
        let (global_rows, global_cols) = (parts[0].global_rows, parts[0].global_cols);
        let stash: Vec<StashedEntry> = parts.iter_mut().flat_map(|part| part.stash.drain(..)).collect();
        for entry in stash {
            let owner = parts
                .iter_mut()
                .find(|part| part.row_range.contains(&entry.row))
                .expect("Every stashed row must be owned by some rank");
            owner.set(entry.row, entry.col, entry.value, entry.mode);
        }

        let mut coo = CooMatrix::new(global_rows, global_cols);
        let mut next_row = 0;
        for part in &parts {
            assert_eq!((part.global_rows, part.global_cols), (global_rows, global_cols));
            assert_eq!(part.row_range.start, next_row, "Matrix parts must tile the global rows");
            next_row = part.row_range.end;
            for (local_row, entries) in part.rows.iter().enumerate() {
                for &(col, value) in entries {
                    coo.push(part.row_range.start + local_row, col, value);
                }
            }
        }
        assert_eq!(next_row, global_rows, "Matrix parts must tile the global rows");
        CsrMatrix::from(&coo)
    }
}

/// The entries `range` of a distributed dense vector of length `global_len`.
#[derive(Debug, Clone)]
pub struct DistributedVector {
    global_len: usize,
    range: Range<usize>,
    values: DVector<f64>,
    stash: Vec<(usize, f64, InsertMode)>,
}

impl DistributedVector {
    pub fn new(global_len: usize, range: Range<usize>) -> Self {
        assert!(range.end <= global_len, "Owned range exceeds the global length");
        Self {
            global_len,
            values: DVector::zeros(range.len()),
            range,
            stash: Vec::new(),
        }
    }

    pub fn global_len(&self) -> usize {
        self.global_len
    }

    pub fn range(&self) -> Range<usize> {
        self.range.clone()
    }

    pub fn local_values(&self) -> &DVector<f64> {
        &self.values
    }

    pub fn add_value(&mut self, index: usize, value: f64) {
        self.set(index, value, InsertMode::Add);
    }

    pub fn insert_value(&mut self, index: usize, value: f64) {
        self.set(index, value, InsertMode::Insert);
    }

    fn set(&mut self, index: usize, value: f64, mode: InsertMode) {
        assert!(index < self.global_len, "Index {index} out of bounds");
        if self.range.contains(&index) {
            let entry = &mut self.values[index - self.range.start];
            match mode {
                InsertMode::Insert => *entry = value,
                InsertMode::Add => *entry += value,
            }
        } else {
            self.stash.push((index, value, mode));
        }
    }

    pub fn get(&self, index: usize) -> Option<f64> {
        self.range
            .contains(&index)
            .then(|| self.values[index - self.range.start])
    }

    pub fn stashed_entries(&self) -> &[(usize, f64, InsertMode)] {
        &self.stash
    }

    /// Concatenates the parts of all ranks after routing stashed entries to their owners.
    pub fn merge_parts(mut parts: Vec<Self>) -> DVector<f64> {
        assert!(!parts.is_empty(), "Cannot merge an empty set of vector parts");
        parts.sort_by_key(|part| part.range.start);
        let global_len = parts[0].global_len;
        let stash: Vec<_> = parts.iter_mut().flat_map(|part| part.stash.drain(..)).collect();
        for (index, value, mode) in stash {
            let owner = parts
                .iter_mut()
                .find(|part| part.range.contains(&index))
                .expect("Every stashed index must be owned by some rank");
            owner.set(index, value, mode);
        }

        let mut merged = DVector::zeros(global_len);
        for part in &parts {
            merged
                .rows_mut(part.range.start, part.range.len())
                .copy_from(&part.values);
        }
        merged
    }
}

/// Relative residual below which [`has_constant_null_space`] reports a null space.
pub const NULL_SPACE_TOLERANCE: f64 = 1e-7;

/// Checks whether the constant vector lies (numerically) in the null space of `matrix`.
///
/// With $r_i = 1/N$, the test is $\lVert A r \rVert_1 / \lVert A \rVert_1 < 10^{-7}$, where
/// $\lVert A \rVert_1$ is the maximum absolute column sum. A zero matrix trivially has the
/// constant null space. A detected null space is reported with a warning, since the caller may
/// want to configure the solver accordingly.
pub fn has_constant_null_space(matrix: &CsrMatrix<f64>) -> bool {
    let n = matrix.ncols();
    if n == 0 {
        return false;
    }
    let r = 1.0 / n as f64;
    let mut column_sums = vec![0.0; n];
    let mut residual_norm = 0.0;
    for row in matrix.row_iter() {
        let mut row_product = 0.0;
        for (&col, &value) in izip!(row.col_indices(), row.values()) {
            row_product += value * r;
            column_sums[col] += value.abs();
        }
        residual_norm += f64::abs(row_product);
    }
    let matrix_norm = column_sums.into_iter().fold(0.0, f64::max);

    let has_null_space = matrix_norm == 0.0 || residual_norm / matrix_norm < NULL_SPACE_TOLERANCE;
    if has_null_space {
        log::warn!(
            "Operator of size {}x{} appears to have a constant null space (|Ar|_1 = {:e}, |A|_1 = {:e})",
            matrix.nrows(),
            n,
            residual_norm,
            matrix_norm
        );
    }
    has_null_space
}
