//! Limited-memory BFGS minimizer driven by reverse communication.
//!
//! The caller owns function evaluation. Each [`LbfgsMinimizer::run`] call
//! hands in the value and gradient at the current point and receives the next
//! point to evaluate in the same buffer:
//!
//! ```text
//! loop {
//!     let (f, g) = evaluate(&x);
//!     if !minimizer.run(&mut x, f, &g) && minimizer.converged() {
//!         break;
//!     }
//! }
//! ```
//!
//! Steps use a backtracking Armijo line search. Curvature pairs with
//! `s'y` below a small threshold are discarded.

use std::collections::VecDeque;

/// Sufficient-decrease constant for the Armijo condition.
const ARMIJO_C1: f64 = 1e-4;

/// Minimum curvature `s'y` for a correction pair to be stored.
const MIN_CURVATURE: f64 = 1e-14;

/// Relative gradient norm treated as converged.
const GRADIENT_TOLERANCE: f64 = 1e-5;

/// Line search in progress.
#[derive(Debug, Clone)]
struct LineSearch {
    x0: Vec<f64>,
    f0: f64,
    g0: Vec<f64>,
    direction: Vec<f64>,
    step: f64,
    trials: usize,
}

/// L-BFGS state between calls.
#[derive(Debug, Clone)]
pub struct LbfgsMinimizer {
    n: usize,
    memory: usize,
    max_line_search: usize,
    s: VecDeque<Vec<f64>>,
    y: VecDeque<Vec<f64>>,
    search: Option<LineSearch>,
    nfun: usize,
    iter: usize,
    converged: bool,
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn norm(a: &[f64]) -> f64 {
    dot(a, a).sqrt()
}

impl LbfgsMinimizer {
    /// Minimizer over `n` variables keeping `memory` corrections and trying at
    /// most `max_line_search` points per line search.
    pub fn new(n: usize, memory: usize, max_line_search: usize) -> Self {
        Self {
            n,
            memory: memory.max(1),
            max_line_search: max_line_search.max(1),
            s: VecDeque::with_capacity(memory),
            y: VecDeque::with_capacity(memory),
            search: None,
            nfun: 0,
            iter: 0,
            converged: false,
        }
    }

    pub fn n(&self) -> usize {
        self.n
    }

    /// Function values consumed so far.
    pub fn nfun(&self) -> usize {
        self.nfun
    }

    /// Completed iterations.
    pub fn iter(&self) -> usize {
        self.iter
    }

    pub fn converged(&self) -> bool {
        self.converged
    }

    /// Consume `f` and `g` at `x` and write the next trial point into `x`.
    ///
    /// Returns true when `x` was moved. Returns false when `x` is unchanged,
    /// either because the gradient vanished (see [`Self::converged`]) or
    /// because a line search ran out of trials and the memory was reset.
    pub fn run(&mut self, x: &mut [f64], f: f64, g: &[f64]) -> bool {
        self.nfun += 1;

        if norm(g) <= GRADIENT_TOLERANCE * norm(x).max(1.0) {
            self.converged = true;
            self.search = None;
            return false;
        }

        let Some(mut search) = self.search.take() else {
            return self.start_iteration(x, f, g);
        };

        let slope = dot(&search.g0, &search.direction);
        if f.is_finite() && f <= search.f0 + ARMIJO_C1 * search.step * slope {
            let s: Vec<f64> = x.iter().zip(&search.x0).map(|(a, b)| a - b).collect();
            let y: Vec<f64> = g.iter().zip(&search.g0).map(|(a, b)| a - b).collect();
            if dot(&s, &y) > MIN_CURVATURE {
                if self.s.len() == self.memory {
                    self.s.pop_front();
                    self.y.pop_front();
                }
                self.s.push_back(s);
                self.y.push_back(y);
            }
            self.iter += 1;
            return self.start_iteration(x, f, g);
        }

        search.trials += 1;
        if search.trials >= self.max_line_search {
            self.s.clear();
            self.y.clear();
            return false;
        }

        search.step *= 0.5;
        for (i, xi) in x.iter_mut().enumerate() {
            *xi = search.x0[i] + search.step * search.direction[i];
        }
        self.search = Some(search);
        true
    }

    fn start_iteration(&mut self, x: &mut [f64], f: f64, g: &[f64]) -> bool {
        let mut direction = self.two_loop(g);
        if dot(&direction, g) >= 0.0 {
            self.s.clear();
            self.y.clear();
            direction = g.iter().map(|gi| -gi).collect();
        }

        let step = if self.s.is_empty() { 1.0 / norm(g) } else { 1.0 };
        let x0 = x.to_vec();
        for (i, xi) in x.iter_mut().enumerate() {
            *xi = x0[i] + step * direction[i];
        }

        self.search = Some(LineSearch {
            x0,
            f0: f,
            g0: g.to_vec(),
            direction,
            step,
            trials: 0,
        });
        true
    }

    /// Two-loop recursion for `-H g`.
    fn two_loop(&self, g: &[f64]) -> Vec<f64> {
        let mut q = g.to_vec();
        let mut alphas = Vec::with_capacity(self.s.len());

        for (s, y) in self.s.iter().zip(&self.y).rev() {
            let rho = 1.0 / dot(y, s);
            let alpha = rho * dot(s, &q);
            for (qi, yi) in q.iter_mut().zip(y) {
                *qi -= alpha * yi;
            }
            alphas.push((alpha, rho));
        }

        if let (Some(s), Some(y)) = (self.s.back(), self.y.back()) {
            let gamma = dot(s, y) / dot(y, y);
            q.iter_mut().for_each(|qi| *qi *= gamma);
        }

        for ((s, y), (alpha, rho)) in self.s.iter().zip(&self.y).zip(alphas.into_iter().rev()) {
            let beta = rho * dot(y, &q);
            for (qi, si) in q.iter_mut().zip(s) {
                *qi += (alpha - beta) * si;
            }
        }

        q.iter().map(|qi| -qi).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bowl(x: &[f64]) -> (f64, Vec<f64>) {
        let centre = [1.0, -2.0, 3.0];
        let scale = [1.0, 10.0, 0.5];
        let f = x
            .iter()
            .zip(centre.iter().zip(&scale))
            .map(|(xi, (c, a))| a * (xi - c) * (xi - c))
            .sum();
        let g = x
            .iter()
            .zip(centre.iter().zip(&scale))
            .map(|(xi, (c, a))| 2.0 * a * (xi - c))
            .collect();
        (f, g)
    }

    #[test]
    fn test_minimizes_quadratic() {
        let mut minimizer = LbfgsMinimizer::new(3, 5, 20);
        let mut x = vec![0.0, 0.0, 0.0];

        for _ in 0..500 {
            let (f, g) = bowl(&x);
            if !minimizer.run(&mut x, f, &g) && minimizer.converged() {
                break;
            }
        }

        assert!(minimizer.converged());
        assert!((x[0] - 1.0).abs() < 1e-4);
        assert!((x[1] + 2.0).abs() < 1e-4);
        assert!((x[2] - 3.0).abs() < 1e-4);
        assert!(minimizer.iter() > 0);
    }

    #[test]
    fn test_first_step_is_unit_length() {
        let mut minimizer = LbfgsMinimizer::new(2, 5, 20);
        let mut x = vec![1.0, 1.0];
        assert!(minimizer.run(&mut x, 0.0, &[3.0, 4.0]));
        assert!((x[0] - 0.4).abs() < 1e-12);
        assert!((x[1] - 0.2).abs() < 1e-12);
    }

    #[test]
    fn test_zero_gradient_converges() {
        let mut minimizer = LbfgsMinimizer::new(1, 5, 20);
        let mut x = vec![2.0];
        assert!(!minimizer.run(&mut x, 1.0, &[0.0]));
        assert!(minimizer.converged());
        assert_eq!(x, vec![2.0]);
        assert_eq!(minimizer.nfun(), 1);
    }

    #[test]
    fn test_failed_line_search_resets() {
        let mut minimizer = LbfgsMinimizer::new(1, 5, 2);
        let mut x = vec![0.0];
        assert!(minimizer.run(&mut x, 0.0, &[1.0]));
        // Value keeps rising, so both trials fail.
        assert!(minimizer.run(&mut x, 5.0, &[1.0]));
        assert!(!minimizer.run(&mut x, 5.0, &[1.0]));
        assert!(!minimizer.converged());
    }
}
