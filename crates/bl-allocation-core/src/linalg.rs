//! Dense Decimal matrix helpers shared by the estimator, the view
//! translators, the posterior engine and the optimizer.
//!
//! All arithmetic uses `rust_decimal::Decimal`. No `f64`.

use rust_decimal::Decimal;
use rust_decimal::MathematicalOps;
use rust_decimal_macros::dec;

use crate::error::AllocationError;
use crate::types::Matrix;
use crate::AllocationResult;

/// Pivots below this magnitude are treated as exact zeros.
const PIVOT_FLOOR: Decimal = dec!(0.000000000000000000000001);

const JACOBI_MAX_SWEEPS: usize = 100;

// ---------------------------------------------------------------------------
// Construction
// ---------------------------------------------------------------------------

pub fn zeros(rows: usize, cols: usize) -> Matrix {
    vec![vec![Decimal::ZERO; cols]; rows]
}

pub fn identity(n: usize) -> Matrix {
    let mut m = zeros(n, n);
    for (i, row) in m.iter_mut().enumerate() {
        row[i] = Decimal::ONE;
    }
    m
}

pub fn diagonal(values: &[Decimal]) -> Matrix {
    let mut m = zeros(values.len(), values.len());
    for (i, v) in values.iter().enumerate() {
        m[i][i] = *v;
    }
    m
}

pub fn diagonal_of(a: &[Vec<Decimal>]) -> Vec<Decimal> {
    a.iter().enumerate().map(|(i, row)| row[i]).collect()
}

/// Place `a` and `b` on the diagonal of a zero matrix.
pub fn block_diagonal(a: &[Vec<Decimal>], b: &[Vec<Decimal>]) -> Matrix {
    let (na, nb) = (a.len(), b.len());
    let mut m = zeros(na + nb, na + nb);
    for (i, row) in a.iter().enumerate() {
        m[i][..na].copy_from_slice(row);
    }
    for (i, row) in b.iter().enumerate() {
        m[na + i][na..].copy_from_slice(row);
    }
    m
}

// ---------------------------------------------------------------------------
// Arithmetic
// ---------------------------------------------------------------------------

/// Dot product of two vectors.
pub fn vec_dot(a: &[Decimal], b: &[Decimal]) -> Decimal {
    a.iter().zip(b.iter()).map(|(x, y)| *x * *y).sum()
}

/// Matrix-vector multiplication.
pub fn mat_vec_multiply(mat: &[Vec<Decimal>], v: &[Decimal]) -> Vec<Decimal> {
    mat.iter().map(|row| vec_dot(row, v)).collect()
}

/// Multiply two matrices: C = A * B.
/// A is (m x p), B is (p x n_cols), result is (m x n_cols).
#[allow(clippy::needless_range_loop)]
pub fn mat_multiply(a: &[Vec<Decimal>], b: &[Vec<Decimal>]) -> Matrix {
    let m = a.len();
    let p = if m > 0 { a[0].len() } else { 0 };
    let n_cols = if !b.is_empty() { b[0].len() } else { 0 };
    let mut c = zeros(m, n_cols);
    for i in 0..m {
        for k in 0..p {
            let aik = a[i][k];
            if aik.is_zero() {
                continue;
            }
            for j in 0..n_cols {
                c[i][j] += aik * b[k][j];
            }
        }
    }
    c
}

/// Transpose a matrix.
pub fn mat_transpose(a: &[Vec<Decimal>]) -> Matrix {
    let m = a.len();
    if m == 0 {
        return Vec::new();
    }
    let n = a[0].len();
    let mut t = zeros(n, m);
    for (i, row) in a.iter().enumerate() {
        for (j, v) in row.iter().enumerate() {
            t[j][i] = *v;
        }
    }
    t
}

/// Element-wise addition of two matrices.
pub fn mat_add(a: &[Vec<Decimal>], b: &[Vec<Decimal>]) -> Matrix {
    a.iter()
        .zip(b.iter())
        .map(|(ra, rb)| ra.iter().zip(rb.iter()).map(|(x, y)| *x + *y).collect())
        .collect()
}

/// Scale every element of a matrix by a scalar.
pub fn mat_scale(a: &[Vec<Decimal>], s: Decimal) -> Matrix {
    a.iter()
        .map(|row| row.iter().map(|v| *v * s).collect())
        .collect()
}

/// (A + A') / 2, removing round-off asymmetry.
pub fn symmetrize(a: &[Vec<Decimal>]) -> Matrix {
    let n = a.len();
    let mut s = zeros(n, n);
    for i in 0..n {
        for j in 0..n {
            s[i][j] = (a[i][j] + a[j][i]) / dec!(2);
        }
    }
    s
}

/// Quadratic form w' A w.
pub fn quadratic_form(a: &[Vec<Decimal>], w: &[Decimal]) -> Decimal {
    vec_dot(w, &mat_vec_multiply(a, w))
}

pub fn sqrt_decimal(val: Decimal) -> Decimal {
    if val <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    val.sqrt().unwrap_or(Decimal::ZERO)
}

// ---------------------------------------------------------------------------
// Structure checks
// ---------------------------------------------------------------------------

pub fn is_square(a: &[Vec<Decimal>]) -> bool {
    a.iter().all(|row| row.len() == a.len())
}

pub fn is_symmetric(a: &[Vec<Decimal>], tolerance: Decimal) -> bool {
    let n = a.len();
    for i in 0..n {
        for j in (i + 1)..n {
            if (a[i][j] - a[j][i]).abs() > tolerance {
                return false;
            }
        }
    }
    true
}

pub fn is_diagonal(a: &[Vec<Decimal>]) -> bool {
    a.iter()
        .enumerate()
        .all(|(i, row)| row.iter().enumerate().all(|(j, v)| i == j || v.is_zero()))
}

/// Positive-definiteness via symmetric Gaussian elimination (LDL'):
/// a symmetric matrix is PD iff every pivot is strictly positive.
#[allow(clippy::needless_range_loop)]
pub fn is_positive_definite(a: &[Vec<Decimal>]) -> bool {
    let n = a.len();
    let mut m: Matrix = a.to_vec();
    for k in 0..n {
        let pivot = m[k][k];
        if pivot <= Decimal::ZERO {
            return false;
        }
        for i in (k + 1)..n {
            let factor = m[i][k] / pivot;
            if factor.is_zero() {
                continue;
            }
            for j in k..n {
                let delta = factor * m[k][j];
                m[i][j] -= delta;
            }
        }
    }
    true
}

/// Induced 1-norm: the largest absolute column sum.
pub fn norm_1(a: &[Vec<Decimal>]) -> Decimal {
    let cols = a.first().map(|r| r.len()).unwrap_or(0);
    (0..cols)
        .map(|j| a.iter().map(|row| row[j].abs()).sum::<Decimal>())
        .fold(Decimal::ZERO, |acc, s| if s > acc { s } else { acc })
}

/// 1-norm condition number from a matrix and its inverse.
pub fn condition_number(a: &[Vec<Decimal>], inverse: &[Vec<Decimal>]) -> Decimal {
    norm_1(a) * norm_1(inverse)
}

// ---------------------------------------------------------------------------
// Inversion
// ---------------------------------------------------------------------------

/// Invert a square matrix using Gauss-Jordan elimination with partial
/// pivoting. A vanishing pivot is reported as numerical instability with
/// an infinite condition number.
#[allow(clippy::needless_range_loop)]
pub fn mat_inverse(a: &[Vec<Decimal>], context: &str) -> AllocationResult<Matrix> {
    let n = a.len();
    if n == 0 {
        return Ok(Vec::new());
    }
    if !is_square(a) {
        return Err(AllocationError::invalid(
            context,
            format!("Cannot invert a non-square {}-row matrix", n),
        ));
    }

    // Augmented matrix [A | I]
    let mut aug: Matrix = Vec::with_capacity(n);
    for (i, a_row) in a.iter().enumerate() {
        let mut row = Vec::with_capacity(2 * n);
        row.extend_from_slice(a_row);
        for j in 0..n {
            row.push(if i == j { Decimal::ONE } else { Decimal::ZERO });
        }
        aug.push(row);
    }

    for col in 0..n {
        let mut max_val = aug[col][col].abs();
        let mut max_row = col;
        for row in (col + 1)..n {
            let val = aug[row][col].abs();
            if val > max_val {
                max_val = val;
                max_row = row;
            }
        }

        if max_val < PIVOT_FLOOR {
            return Err(AllocationError::NumericalInstability {
                context: context.to_string(),
                condition_number: None,
                threshold: Decimal::ZERO,
            });
        }

        if max_row != col {
            aug.swap(col, max_row);
        }

        let pivot = aug[col][col];
        for cell in aug[col].iter_mut() {
            *cell /= pivot;
        }

        // Clone the pivot row to avoid simultaneous borrow.
        let pivot_row = aug[col].clone();
        for row in 0..n {
            if row == col {
                continue;
            }
            let factor = aug[row][col];
            if factor.is_zero() {
                continue;
            }
            for (cell, &pv) in aug[row].iter_mut().zip(pivot_row.iter()) {
                *cell -= factor * pv;
            }
        }
    }

    Ok(aug.iter().map(|row| row[n..].to_vec()).collect())
}

/// Eigen-decomposition of a symmetric matrix by cyclic Jacobi rotations.
/// Returns the eigenvalues and a matrix whose columns are the eigenvectors.
#[allow(clippy::needless_range_loop)]
pub fn symmetric_eigen(a: &[Vec<Decimal>]) -> (Vec<Decimal>, Matrix) {
    let n = a.len();
    let mut m: Matrix = a.to_vec();
    let mut v = identity(n);

    for _ in 0..JACOBI_MAX_SWEEPS {
        let off: Decimal = (0..n)
            .flat_map(|i| ((i + 1)..n).map(move |j| (i, j)))
            .map(|(i, j)| m[i][j].abs())
            .sum();
        if off < PIVOT_FLOOR {
            break;
        }

        for p in 0..n {
            for q in (p + 1)..n {
                let apq = m[p][q];
                if apq.abs() < PIVOT_FLOOR {
                    continue;
                }
                let theta = (m[q][q] - m[p][p]) / (dec!(2) * apq);
                let t = if theta.abs() > dec!(1000000000000) {
                    Decimal::ONE / (dec!(2) * theta)
                } else {
                    let sign = if theta < Decimal::ZERO {
                        -Decimal::ONE
                    } else {
                        Decimal::ONE
                    };
                    sign / (theta.abs() + sqrt_decimal(theta * theta + Decimal::ONE))
                };
                let c = Decimal::ONE / sqrt_decimal(t * t + Decimal::ONE);
                let s = t * c;

                m[p][p] -= t * apq;
                m[q][q] += t * apq;
                m[p][q] = Decimal::ZERO;
                m[q][p] = Decimal::ZERO;

                for r in 0..n {
                    if r != p && r != q {
                        let arp = m[r][p];
                        let arq = m[r][q];
                        m[r][p] = c * arp - s * arq;
                        m[p][r] = m[r][p];
                        m[r][q] = s * arp + c * arq;
                        m[q][r] = m[r][q];
                    }
                    let vrp = v[r][p];
                    let vrq = v[r][q];
                    v[r][p] = c * vrp - s * vrq;
                    v[r][q] = s * vrp + c * vrq;
                }
            }
        }
    }

    (diagonal_of(&m), v)
}

/// Moore-Penrose pseudo-inverse of a symmetric matrix: V diag(1/l) V',
/// dropping eigenvalues with |l| <= tolerance.
#[allow(clippy::needless_range_loop)]
pub fn pseudo_inverse_symmetric(a: &[Vec<Decimal>], tolerance: Decimal) -> Matrix {
    let n = a.len();
    let (values, vectors) = symmetric_eigen(a);
    let mut inv = zeros(n, n);
    for (k, lambda) in values.iter().enumerate() {
        if lambda.abs() <= tolerance {
            continue;
        }
        let recip = Decimal::ONE / *lambda;
        for i in 0..n {
            let vik = vectors[i][k] * recip;
            for j in 0..n {
                inv[i][j] += vik * vectors[j][k];
            }
        }
    }
    inv
}
