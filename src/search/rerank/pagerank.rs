
use tracing::debug;

/// Convergence epsilon for the L1 delta between iterations.
pub const CONVERGENCE_EPSILON: f64 = 1e-6;

#[derive(Debug, Clone)]
pub struct PageRankResult {
    pub scores: Vec<f64>,
    pub converged: bool,
    pub iterations: u32,
}

/// Sparse power iteration over an adjacency list. Dangling mass is
/// redistributed uniformly, so the scores always sum to 1. Terminates at
/// `max_iterations` regardless of graph shape and returns best-effort
/// scores when it does.
pub fn power_iteration(adjacency: &[Vec<usize>], damping: f64, max_iterations: u32) -> PageRankResult {
    let n = adjacency.len();
    if n == 0 {
        return PageRankResult {
            scores: Vec::new(),
            converged: true,
            iterations: 0,
        };
    }

    let uniform = 1.0 / n as f64;
    let mut scores = vec![uniform; n];
    let out_degree: Vec<usize> = adjacency.iter().map(Vec::len).collect();

    for iteration in 1..=max_iterations {
        let mut next = vec![(1.0 - damping) * uniform; n];

        let mut dangling_mass = 0.0;
        for (node, neighbors) in adjacency.iter().enumerate() {
            if neighbors.is_empty() {
                dangling_mass += scores[node];
                continue;
            }
            let share = scores[node] / out_degree[node] as f64;
            for &neighbor in neighbors {
                next[neighbor] += damping * share;
            }
        }
        let dangling_share = damping * dangling_mass * uniform;
        for value in &mut next {
            *value += dangling_share;
        }

        let delta: f64 = scores
            .iter()
            .zip(&next)
            .map(|(old, new)| (old - new).abs())
            .sum();
        scores = next;

        if delta < CONVERGENCE_EPSILON {
            debug!("PageRank converged after {} iterations (delta={})", iteration, delta);
            return PageRankResult {
                scores,
                converged: true,
                iterations: iteration,
            };
        }
    }

    debug!("PageRank hit the iteration cap ({})", max_iterations);
    PageRankResult {
        scores,
        converged: false,
        iterations: max_iterations,
    }
}
