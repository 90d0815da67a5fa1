//! Sparse adjacency in COO form with sparse-dense multiplication.
//!
//! Candle has no sparse kernels, so `A × X` is computed as a gather over the
//! non-zero columns followed by a scatter-add into the non-zero rows:
//!
//! ```text
//! out[row_k] += value_k * X[col_k]      for every non-zero k
//! ```
//!
//! Both `index_select` and `index_add` are differentiable, so gradients flow
//! back into `X`.
//!
//! For message passing the adjacency is stored transposed: rows are
//! destination nodes, columns are source nodes.

use candle_core::{DType, Device, Tensor};

use crate::error::{Error, Result};
use crate::hetero::EdgeIndex;

/// Immutable sparse matrix of shape `(num_rows, num_cols)`.
#[derive(Debug, Clone)]
pub struct SparseAdjacency {
    rows: Tensor,
    cols: Tensor,
    values: Tensor,
    num_rows: usize,
    num_cols: usize,
    nnz: usize,
}

impl SparseAdjacency {
    /// Build from explicit `(row, col, value)` triplets.
    ///
    /// Duplicate coordinates are kept and summed by [`matmul`](Self::matmul).
    pub fn from_triplets(
        rows: &[u32],
        cols: &[u32],
        values: &[f32],
        shape: (usize, usize),
        device: &Device,
    ) -> Result<Self> {
        let (num_rows, num_cols) = shape;
        if rows.len() != cols.len() {
            return Err(Error::dims("sparse column indices", rows.len(), cols.len()));
        }
        if rows.len() != values.len() {
            return Err(Error::dims("sparse values", rows.len(), values.len()));
        }
        check_bounds(rows, num_rows)?;
        check_bounds(cols, num_cols)?;

        let nnz = rows.len();
        Ok(Self {
            rows: Tensor::from_slice(rows, nnz, device)?,
            cols: Tensor::from_slice(cols, nnz, device)?,
            values: Tensor::from_slice(values, nnz, device)?,
            num_rows,
            num_cols,
            nnz,
        })
    }

    /// Transposed, unweighted adjacency of an edge batch.
    ///
    /// Edge `(s, d)` becomes entry `(d, s)` with value 1, giving a
    /// `(num_dst, num_src)` matrix that pulls source features into
    /// destinations.
    pub fn from_edge_index(
        edges: &EdgeIndex,
        num_src: usize,
        num_dst: usize,
        device: &Device,
    ) -> Result<Self> {
        let values = vec![1f32; edges.num_edges()];
        Self::from_triplets(&edges.dst, &edges.src, &values, (num_dst, num_src), device)
    }

    /// Build from a dense matrix, keeping its non-zero entries.
    pub fn from_dense(dense: &Tensor) -> Result<Self> {
        let (num_rows, num_cols) = dense.dims2()?;
        let data = dense.to_dtype(DType::F32)?.to_vec2::<f32>()?;

        let mut rows = Vec::new();
        let mut cols = Vec::new();
        let mut values = Vec::new();
        for (i, row) in data.iter().enumerate() {
            for (j, &v) in row.iter().enumerate() {
                if v != 0.0 {
                    rows.push(i as u32);
                    cols.push(j as u32);
                    values.push(v);
                }
            }
        }
        Self::from_triplets(&rows, &cols, &values, (num_rows, num_cols), dense.device())
    }

    /// Matrix shape `(rows, cols)`.
    pub fn shape(&self) -> (usize, usize) {
        (self.num_rows, self.num_cols)
    }

    pub fn num_rows(&self) -> usize {
        self.num_rows
    }

    pub fn num_cols(&self) -> usize {
        self.num_cols
    }

    /// Number of stored entries.
    pub fn nnz(&self) -> usize {
        self.nnz
    }

    /// Sparse-dense product `self × dense`.
    ///
    /// `dense` must have `num_cols` rows; the result is `(num_rows, d)`.
    pub fn matmul(&self, dense: &Tensor) -> Result<Tensor> {
        let (n, d) = dense.dims2()?;
        if n != self.num_cols {
            return Err(Error::dims("sparse matmul operand rows", self.num_cols, n));
        }

        let out = Tensor::zeros((self.num_rows, d), dense.dtype(), dense.device())?;
        if self.nnz == 0 {
            return Ok(out);
        }

        let gathered = dense.index_select(&self.cols, 0)?;
        let values = self
            .values
            .to_dtype(dense.dtype())?
            .reshape((self.nnz, 1))?;
        let messages = gathered.broadcast_mul(&values)?;
        Ok(out.index_add(&self.rows, &messages, 0)?)
    }

    /// Materialize as a dense F32 matrix.
    pub fn to_dense(&self) -> Result<Tensor> {
        let device = self.values.device();
        let mut data = vec![0f32; self.num_rows * self.num_cols];
        let rows = self.rows.to_vec1::<u32>()?;
        let cols = self.cols.to_vec1::<u32>()?;
        let values = self.values.to_vec1::<f32>()?;
        for ((r, c), v) in rows.iter().zip(&cols).zip(&values) {
            data[*r as usize * self.num_cols + *c as usize] += v;
        }
        Ok(Tensor::from_vec(data, (self.num_rows, self.num_cols), device)?)
    }
}

fn check_bounds(indices: &[u32], bound: usize) -> Result<()> {
    match indices.iter().find(|&&i| i as usize >= bound) {
        Some(&index) => Err(Error::IndexOutOfBounds {
            index: index as usize,
            bound,
        }),
        None => Ok(()),
    }
}
