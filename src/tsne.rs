/// Exact t-SNE (van der Maaten & Hinton, 2008) for projecting embeddings to 2D.
///
/// This is the O(N^2) formulation: every pairwise affinity is computed, which is fine for the
/// few thousand points an evaluation plot holds. The affinity and gradient passes are
/// parallelized over rows with rayon, and everything random is drawn from a seeded RNG, so a
/// given input and seed always produce the same layout.

use log::{debug, info, warn};
use ndarray::{Array1, Array2, ArrayView1, Axis, Zip};
use rand::{rngs::StdRng, Rng, SeedableRng};
use rayon::prelude::*;

use crate::config::TsneConfig;
use crate::error::{Error, Result};

const PERPLEXITY_TOLERANCE: f64 = 1e-5;
const PERPLEXITY_STEPS: usize = 100;
const MACHINE_EPSILON: f64 = f64::EPSILON;
const MIN_AFFINITY: f64 = 1e-12;
const MIN_GAIN: f64 = 0.01;
const INITIAL_MOMENTUM: f64 = 0.5;
const FINAL_MOMENTUM: f64 = 0.8;
// The PCA initialisation is rescaled so the first coordinate has this standard deviation.
const INIT_STD: f64 = 1e-4;
const LOG_EVERY: usize = 50;

/// Something that projects a set of points into two dimensions.
pub trait DimensionReducer
{
    /// Projects the rows of `data` (n_points x n_dims) and returns an n_points x 2 array.
    fn fit_transform(&self, data: &Array2<f64>) -> Result<Array2<f64>>;
}

pub struct Tsne
{
    config: TsneConfig,
}

impl Tsne
{
    pub fn new(config: TsneConfig) -> Self
    {
        Tsne { config }
    }

    /// The perplexity actually used for `n_points` points.
    /// Anything above `max((n_points - 1) / 3, 1)` cannot be honoured, so it is clamped to that.
    pub fn effective_perplexity(&self, n_points: usize) -> f64
    {
        let limit = ((n_points as f64 - 1.0) / 3.0).max(1.0);
        if self.config.perplexity > limit {
            warn!("Perplexity {} is too large for {} points; using {:.2}", self.config.perplexity, n_points, limit);
            limit
        } else {
            self.config.perplexity
        }
    }

    pub fn learning_rate(&self, n_points: usize) -> f64
    {
        match self.config.learning_rate {
            Some(rate) => rate,
            None => (n_points as f64 / self.config.early_exaggeration / 4.0).max(50.0),
        }
    }
}

impl DimensionReducer for Tsne
{
    fn fit_transform(&self, data: &Array2<f64>) -> Result<Array2<f64>>
    {
        let n_points = data.nrows();
        if n_points == 0 {
            return Err(Error::EmptyFeatures);
        }
        if n_points == 1 {
            return Ok(Array2::zeros((1, 2)));
        }

        let mut rng = StdRng::seed_from_u64(self.config.seed);

        let p = {
            let distances = squared_distances(data);
            let conditional = conditional_probabilities(&distances, self.effective_perplexity(n_points));
            joint_probabilities(&conditional)
        };

        let mut embedding = pca_initialisation(data, &mut rng);
        let learning_rate = self.learning_rate(n_points);

        let mut update = Array2::<f64>::zeros((n_points, 2));
        let mut gains = Array2::<f64>::ones((n_points, 2));
        let mut kernel = Array2::<f64>::zeros((n_points, n_points));
        let mut grad = Array2::<f64>::zeros((n_points, 2));
        let mut kl_divergence = 0.0;
        let mut iterations = 0;

        for iteration in 0..self.config.max_iter
        {
            let exaggerating = iteration < self.config.exaggeration_iter;
            let exaggeration = if exaggerating { self.config.early_exaggeration } else { 1.0 };
            let momentum = if exaggerating { INITIAL_MOMENTUM } else { FINAL_MOMENTUM };

            // The second phase starts from rest, with fresh gains.
            if iteration == self.config.exaggeration_iter {
                update.fill(0.0);
                gains.fill(1.0);
            }

            let kl = kl_gradient(&p, &embedding, exaggeration, &mut kernel, &mut grad);
            kl_divergence = kl;
            iterations = iteration + 1;

            Zip::from(&mut gains).and(&update).and(&grad).for_each(|gain, &u, &g| {
                *gain = if u * g < 0.0 { *gain + 0.2 } else { *gain * 0.8 };
                *gain = gain.max(MIN_GAIN);
            });
            Zip::from(&mut update).and(&gains).and(&grad).for_each(|u, &gain, &g| {
                *u = momentum * *u - learning_rate * gain * g;
            });
            embedding += &update;

            let grad_norm = grad.iter().map(|g| g * g).sum::<f64>().sqrt();
            if (iteration + 1) % LOG_EVERY == 0 {
                debug!("[t-SNE] Iteration {}: KL divergence = {:.6}, gradient norm = {:.7}", iteration + 1, kl, grad_norm);
            }
            // Keep going through the exaggeration phase even if it has settled.
            if !exaggerating && grad_norm < self.config.min_grad_norm {
                debug!("[t-SNE] Iteration {}: gradient norm {} below threshold", iteration + 1, grad_norm);
                break;
            }
        }

        info!("[t-SNE] KL divergence after {} iterations: {:.6}", iterations, kl_divergence);

        Ok(embedding)
    }
}

/// Pairwise squared Euclidean distances between the rows of `data`.
pub fn squared_distances(data: &Array2<f64>) -> Array2<f64>
{
    let n_points = data.nrows();
    let mut distances = Array2::<f64>::zeros((n_points, n_points));
    distances
        .axis_iter_mut(Axis(0))
        .into_par_iter()
        .enumerate()
        .for_each(|(i, mut row)| {
            let x_i = data.row(i);
            for (j, d) in row.iter_mut().enumerate() {
                *d = x_i
                    .iter()
                    .zip(data.row(j).iter())
                    .map(|(a, b)| (a - b) * (a - b))
                    .sum();
            }
        });
    distances
}

/// Row-conditional Gaussian affinities P(j|i), each row calibrated by binary search so its
/// entropy equals ln(perplexity).
pub fn conditional_probabilities(distances: &Array2<f64>, perplexity: f64) -> Array2<f64>
{
    let n_points = distances.nrows();
    let desired_entropy = perplexity.ln();
    let mut conditional = Array2::<f64>::zeros((n_points, n_points));

    conditional
        .axis_iter_mut(Axis(0))
        .into_par_iter()
        .enumerate()
        .for_each(|(i, mut row)| {
            let distances_i = distances.row(i);
            let mut beta = 1.0;
            let mut beta_min = f64::NEG_INFINITY;
            let mut beta_max = f64::INFINITY;

            for _ in 0..PERPLEXITY_STEPS
            {
                let entropy = fill_row(&mut row.view_mut(), distances_i, i, beta);
                let entropy_diff = entropy - desired_entropy;
                if entropy_diff.abs() <= PERPLEXITY_TOLERANCE {
                    break;
                }

                if entropy_diff > 0.0 {
                    beta_min = beta;
                    beta = if beta_max == f64::INFINITY { beta * 2.0 } else { (beta + beta_max) / 2.0 };
                } else {
                    beta_max = beta;
                    beta = if beta_min == f64::NEG_INFINITY { beta / 2.0 } else { (beta + beta_min) / 2.0 };
                }
            }
            // The loop may exit on the step count; make sure the row matches the final beta.
            fill_row(&mut row.view_mut(), distances_i, i, beta);
        });

    conditional
}

// Writes the normalized affinities of point `i` at precision `beta` into `row`
// and returns the row's entropy in nats.
fn fill_row(row: &mut ndarray::ArrayViewMut1<f64>, distances: ArrayView1<f64>, i: usize, beta: f64) -> f64
{
    let mut sum = 0.0;
    for (j, (p, d)) in row.iter_mut().zip(distances.iter()).enumerate() {
        *p = if j == i { 0.0 } else { (-d * beta).exp() };
        sum += *p;
    }
    if sum == 0.0 {
        sum = MACHINE_EPSILON;
    }

    let mut weighted_distance_sum = 0.0;
    for (p, d) in row.iter_mut().zip(distances.iter()) {
        *p /= sum;
        weighted_distance_sum += *d * *p;
    }

    sum.ln() + beta * weighted_distance_sum
}

/// Symmetrized joint probabilities P = (P(j|i) + P(i|j)) / 2N, floored to stay strictly positive.
pub fn joint_probabilities(conditional: &Array2<f64>) -> Array2<f64>
{
    let n_points = conditional.nrows() as f64;
    let mut joint = conditional + &conditional.t();
    joint.mapv_inplace(|p| (p / (2.0 * n_points)).max(MIN_AFFINITY));
    joint.diag_mut().fill(0.0);
    joint
}

// Returns the KL divergence between P and the Student-t affinities of `embedding`, and writes
// its gradient with respect to `embedding` into `grad`. `kernel` is n_points x n_points scratch
// space; its previous contents are ignored.
fn kl_gradient(
    p: &Array2<f64>,
    embedding: &Array2<f64>,
    exaggeration: f64,
    kernel: &mut Array2<f64>,
    grad: &mut Array2<f64>,
) -> f64
{
    let n_points = embedding.nrows();

    // Unnormalized Student-t kernel: 1 / (1 + |y_i - y_j|^2).
    kernel
        .axis_iter_mut(Axis(0))
        .into_par_iter()
        .enumerate()
        .for_each(|(i, mut row)| {
            let (y_i0, y_i1) = (embedding[[i, 0]], embedding[[i, 1]]);
            for (j, value) in row.iter_mut().enumerate() {
                if j == i {
                    *value = 0.0;
                    continue;
                }
                let d0 = y_i0 - embedding[[j, 0]];
                let d1 = y_i1 - embedding[[j, 1]];
                *value = 1.0 / (1.0 + d0 * d0 + d1 * d1);
            }
        });
    let num = &*kernel;
    let num_sum = num.sum().max(MACHINE_EPSILON);

    grad.axis_iter_mut(Axis(0))
        .into_par_iter()
        .enumerate()
        .map(|(i, mut grad_i)| {
            grad_i.fill(0.0);
            let mut kl_i = 0.0;
            for j in 0..n_points {
                if j == i {
                    continue;
                }
                let p_ij = p[[i, j]];
                let q_ij = (num[[i, j]] / num_sum).max(MIN_AFFINITY);
                kl_i += p_ij * (p_ij.max(MIN_AFFINITY) / q_ij).ln();

                let coefficient = 4.0 * (exaggeration * p_ij - q_ij) * num[[i, j]];
                grad_i[0] += coefficient * (embedding[[i, 0]] - embedding[[j, 0]]);
                grad_i[1] += coefficient * (embedding[[i, 1]] - embedding[[j, 1]]);
            }
            kl_i
        })
        .sum()
}

// Projects the centered data onto its top two principal components, then rescales the result.
// The components are found by power iteration on the covariance X^T X / n, applied as
// X^T (X v) / n so the n_dims x n_dims matrix is never formed.
fn pca_initialisation(data: &Array2<f64>, rng: &mut StdRng) -> Array2<f64>
{
    let n_points = data.nrows();
    let n_dims = data.ncols();

    let mean = data.mean_axis(Axis(0)).unwrap_or_else(|| Array1::zeros(n_dims));
    let centered = data - &mean;

    let mut components: Vec<(f64, Array1<f64>)> = Vec::with_capacity(2);
    let mut embedding = Array2::<f64>::zeros((n_points, 2));
    for component in 0..2
    {
        let start = Array1::from_iter((0..n_dims).map(|_| rng.gen::<f64>() - 0.5));
        let (eigenvalue, eigenvector) = power_iteration(&centered, &components, start, 200, 1e-10);

        embedding.column_mut(component).assign(&centered.dot(&eigenvector));
        components.push((eigenvalue, eigenvector));
    }

    let std = embedding.column(0).std(0.0);
    if std > 0.0 {
        embedding *= INIT_STD / std;
    } else {
        // Every point is identical along the leading direction; spread them randomly.
        embedding.mapv_inplace(|_| (rng.gen::<f64>() - 0.5) * INIT_STD);
    }
    embedding
}

// Covariance of `centered` times `v`, with the already found components deflated out.
fn covariance_product(centered: &Array2<f64>, deflated: &[(f64, Array1<f64>)], v: &Array1<f64>) -> Array1<f64>
{
    let n_points = centered.nrows() as f64;
    let mut product = centered.t().dot(&centered.dot(v)) / n_points;
    for (eigenvalue, eigenvector) in deflated {
        product.scaled_add(-eigenvalue * eigenvector.dot(v), eigenvector);
    }
    product
}

fn power_iteration(
    centered: &Array2<f64>,
    deflated: &[(f64, Array1<f64>)],
    start: Array1<f64>,
    max_iter: usize,
    tol: f64,
) -> (f64, Array1<f64>)
{
    let mut v = normalized(start);
    let mut eigenvalue = 0.0;

    for _ in 0..max_iter
    {
        let next = covariance_product(centered, deflated, &v);
        let new_eigenvalue = v.dot(&next);
        let norm = next.dot(&next).sqrt();
        if norm == 0.0 {
            return (0.0, v);
        }
        v = next / norm;

        if (new_eigenvalue - eigenvalue).abs() < tol {
            eigenvalue = new_eigenvalue;
            break;
        }
        eigenvalue = new_eigenvalue;
    }

    (eigenvalue, v)
}

fn normalized(v: Array1<f64>) -> Array1<f64>
{
    let norm = v.dot(&v).sqrt();
    if norm == 0.0 { v } else { v / norm }
}
