//! Dense weight matrices shared between worker threads without locks.
//!
//! Every element is an [`AtomicU32`] holding the bits of a `real`, read and
//! written with `Ordering::Relaxed`. Two threads adding into the same cell may
//! lose one of the updates; training tolerates that, and the program never
//! has a data race in the Rust sense.

use std::sync::atomic::{AtomicU32, Ordering};

use aligned_box::AlignedBox;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::{real, Error, Result};

#[derive(Default)]
#[repr(transparent)]
struct Real {
    bits: AtomicU32,
}

impl Real {
    fn get(&self) -> real {
        real::from_bits(self.bits.load(Ordering::Relaxed))
    }

    fn set(&self, value: real) {
        self.bits.store(value.to_bits(), Ordering::Relaxed);
    }

    /// Not atomic: a concurrent `add` to the same cell can be lost.
    fn add(&self, x: real) {
        let a = self.get();
        self.set(a + x);
    }
}

pub struct Matrix {
    rows: usize,
    cols: usize,
    /// `data[i * cols..(i+1) * cols]` is row `i`.
    data: AlignedBox<[Real]>,
}

impl Matrix {
    /// A `rows × cols` matrix of zeros.
    pub fn new(rows: usize, cols: usize) -> Result<Self> {
        if rows == 0 || cols == 0 {
            return Err(Error::InvalidConfig(format!(
                "can't allocate a {rows}x{cols} weight matrix"
            )));
        }
        let data = AlignedBox::slice_from_default(128, rows * cols).map_err(|err| {
            Error::InvalidConfig(format!("failed to allocate {rows}x{cols} matrix: {err}"))
        })?;
        Ok(Matrix { rows, cols, data })
    }

    /// Rebuild a matrix from row-major values, e.g. from a saved model.
    pub fn from_vec(rows: usize, cols: usize, values: &[real]) -> Result<Self> {
        if values.len() != rows * cols {
            return Err(Error::Format(format!(
                "expected {} values for a {rows}x{cols} matrix, got {}",
                rows * cols,
                values.len()
            )));
        }
        let m = Matrix::new(rows, cols)?;
        for (cell, &v) in m.data.iter().zip(values) {
            cell.set(v);
        }
        Ok(m)
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    fn row(&self, i: usize) -> &[Real] {
        &self.data[i * self.cols..][..self.cols]
    }

    pub fn zero(&self) {
        for cell in self.data.iter() {
            cell.set(0.0);
        }
    }

    /// Fill with values drawn uniformly from `-bound..bound`.
    pub fn uniform(&self, bound: real, seed: u64) {
        let mut rng = StdRng::seed_from_u64(seed);
        for cell in self.data.iter() {
            cell.set(rng.gen_range(-bound..bound));
        }
    }

    /// Dot product of row `i` with `v`.
    pub fn dot_row(&self, v: &[real], i: usize) -> real {
        assert_eq!(v.len(), self.cols);
        self.row(i)
            .iter()
            .zip(v)
            .map(|(cell, &x)| cell.get() * x)
            .sum()
    }

    /// `v += scale * row(i)`
    pub fn add_row_to(&self, v: &mut [real], i: usize, scale: real) {
        assert_eq!(v.len(), self.cols);
        for (x, cell) in v.iter_mut().zip(self.row(i)) {
            *x += scale * cell.get();
        }
    }

    /// `row(i) += scale * v`
    pub fn add_vector_to_row(&self, v: &[real], i: usize, scale: real) {
        assert_eq!(v.len(), self.cols);
        for (cell, &x) in self.row(i).iter().zip(v) {
            cell.add(scale * x);
        }
    }

    /// `out[i] = row(i) · v` for every row.
    pub fn mul_vector(&self, v: &[real], out: &mut [real]) {
        assert_eq!(out.len(), self.rows);
        for (i, y) in out.iter_mut().enumerate() {
            *y = self.dot_row(v, i);
        }
    }

    /// Snapshot of row `i`. Other threads may be writing to it.
    pub fn row_to_vec(&self, i: usize) -> Vec<real> {
        self.row(i).iter().map(Real::get).collect()
    }

    pub fn to_vec(&self) -> Vec<real> {
        self.data.iter().map(Real::get).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_arithmetic() {
        let m = Matrix::from_vec(2, 3, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        assert_eq!(m.dot_row(&[1.0, 0.0, -1.0], 1), -2.0);

        let mut v = vec![1.0, 1.0, 1.0];
        m.add_row_to(&mut v, 0, 2.0);
        assert_eq!(v, [3.0, 5.0, 7.0]);

        m.add_vector_to_row(&[1.0, -1.0, 0.5], 0, 2.0);
        assert_eq!(m.row_to_vec(0), [3.0, 0.0, 4.0]);
        assert_eq!(m.row_to_vec(1), [4.0, 5.0, 6.0]);

        let mut out = vec![0.0; 2];
        m.mul_vector(&[1.0, 1.0, 1.0], &mut out);
        assert_eq!(out, [7.0, 15.0]);

        m.zero();
        assert!(m.to_vec().iter().all(|&x| x == 0.0));
    }

    #[test]
    fn uniform_is_bounded_and_seeded() {
        let a = Matrix::new(10, 8).unwrap();
        let b = Matrix::new(10, 8).unwrap();
        a.uniform(0.125, 7);
        b.uniform(0.125, 7);
        let values = a.to_vec();
        assert_eq!(values, b.to_vec());
        assert!(values.iter().all(|x| x.abs() <= 0.125));
        assert!(values.iter().any(|&x| x != 0.0));
    }

    #[test]
    fn rejects_empty_and_mismatched_shapes() {
        assert!(matches!(Matrix::new(0, 4), Err(Error::InvalidConfig(_))));
        assert!(matches!(
            Matrix::from_vec(2, 2, &[1.0; 3]),
            Err(Error::Format(_))
        ));
    }

    #[test]
    fn concurrent_writers_leave_finite_values() {
        let m = Matrix::new(4, 16).unwrap();
        std::thread::scope(|s| {
            for t in 0..4 {
                let m = &m;
                s.spawn(move || {
                    let v = vec![0.001 * (t + 1) as real; 16];
                    for i in 0..1000 {
                        m.add_vector_to_row(&v, i % 4, 1.0);
                    }
                });
            }
        });
        assert!(m.to_vec().iter().all(|x| x.is_finite() && *x > 0.0));
    }
}
