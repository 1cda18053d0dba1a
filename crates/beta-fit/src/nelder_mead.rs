//! Derivative-free Nelder–Mead simplex minimization.
//!
//! Standard coefficients: reflection 1, expansion 2, contraction 0.5,
//! shrink 0.5. The initial simplex steps each coordinate by 5 %, or by
//! `0.00025` when it is zero. Vertices are kept sorted by objective value
//! with a stable sort, so ties resolve by insertion order.

use nalgebra::DVector;

/// Relative step for non-zero coordinates of the initial simplex.
pub const NONZERO_DELTA: f64 = 0.05;

/// Absolute step for zero coordinates of the initial simplex.
pub const ZERO_DELTA: f64 = 0.00025;

const RHO: f64 = 1.0;
const CHI: f64 = 2.0;
const PSI: f64 = 0.5;
const SIGMA: f64 = 0.5;

/// Stopping options.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NelderMeadOptions {
    /// Maximum number of objective evaluations.
    pub max_fev: usize,
    /// Maximum number of iterations; `None` means unbounded.
    pub max_iter: Option<usize>,
    /// Absolute tolerance on simplex vertex spread.
    pub xatol: f64,
    /// Absolute tolerance on objective value spread.
    pub fatol: f64,
}

impl Default for NelderMeadOptions {
    fn default() -> Self {
        Self {
            max_fev: 200,
            max_iter: None,
            xatol: 1e-6,
            fatol: 1e-8,
        }
    }
}

impl NelderMeadOptions {
    /// Options with an evaluation cap and default tolerances.
    pub fn with_max_fev(max_fev: usize) -> Self {
        Self {
            max_fev,
            ..Self::default()
        }
    }
}

/// Why the search stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// Both tolerances met.
    Converged,
    /// Evaluation cap reached first.
    MaxFunctionEvaluations,
    /// Iteration cap reached first.
    MaxIterations,
}

impl Termination {
    /// Human-readable message.
    pub fn message(&self) -> &'static str {
        match self {
            Termination::Converged => "Optimization terminated successfully.",
            Termination::MaxFunctionEvaluations => {
                "Maximum number of function evaluations has been exceeded."
            }
            Termination::MaxIterations => "Maximum number of iterations has been exceeded.",
        }
    }
}

/// Result of a minimization.
#[derive(Debug, Clone, PartialEq)]
pub struct NelderMeadOutcome {
    /// Best point found.
    pub x: Vec<f64>,
    /// Objective value at `x`.
    pub fun: f64,
    /// Objective evaluations performed.
    pub nfev: usize,
    /// Iterations performed.
    pub nit: usize,
    pub termination: Termination,
}

impl NelderMeadOutcome {
    /// Check if the tolerances were met.
    #[inline]
    pub fn success(&self) -> bool {
        self.termination == Termination::Converged
    }

    /// Termination message.
    #[inline]
    pub fn message(&self) -> &'static str {
        self.termination.message()
    }
}

/// Objective wrapper that counts evaluations and maps NaN to +inf.
struct Counted<F> {
    f: F,
    nfev: usize,
}

impl<F: FnMut(&[f64]) -> f64> Counted<F> {
    fn call(&mut self, x: &DVector<f64>) -> f64 {
        self.nfev += 1;
        let v = (self.f)(x.as_slice());
        if v.is_nan() { f64::INFINITY } else { v }
    }
}

/// Minimize `f` starting from `x0`.
///
/// An empty `x0` evaluates the objective once and reports convergence.
pub fn minimize<F>(f: F, x0: &[f64], options: &NelderMeadOptions) -> NelderMeadOutcome
where
    F: FnMut(&[f64]) -> f64,
{
    let n = x0.len();
    let mut obj = Counted { f, nfev: 0 };
    let start = DVector::from_column_slice(x0);

    if n == 0 {
        let fun = obj.call(&start);
        return NelderMeadOutcome {
            x: Vec::new(),
            fun,
            nfev: obj.nfev,
            nit: 0,
            termination: Termination::Converged,
        };
    }

    let mut sim: Vec<DVector<f64>> = Vec::with_capacity(n + 1);
    sim.push(start.clone());
    for k in 0..n {
        let mut y = start.clone();
        y[k] = if y[k] != 0.0 {
            (1.0 + NONZERO_DELTA) * y[k]
        } else {
            ZERO_DELTA
        };
        sim.push(y);
    }
    let mut fsim: Vec<f64> = sim.iter().map(|x| obj.call(x)).collect();
    sort_simplex(&mut sim, &mut fsim);

    let max_iter = options.max_iter.unwrap_or(usize::MAX);
    let mut nit = 0usize;

    while obj.nfev < options.max_fev && nit < max_iter {
        if converged(&sim, &fsim, options) {
            break;
        }

        // Centroid of every vertex but the worst.
        let mut xbar: DVector<f64> = DVector::zeros(n);
        for v in &sim[..n] {
            xbar += v;
        }
        xbar /= n as f64;
        let worst = sim[n].clone();

        let xr = &xbar * (1.0 + RHO) - &worst * RHO;
        let fxr = obj.call(&xr);
        let mut shrink = false;

        if fxr < fsim[0] {
            let xe = &xbar * (1.0 + RHO * CHI) - &worst * (RHO * CHI);
            let fxe = obj.call(&xe);
            if fxe < fxr {
                sim[n] = xe;
                fsim[n] = fxe;
            } else {
                sim[n] = xr;
                fsim[n] = fxr;
            }
        } else if fxr < fsim[n - 1] {
            sim[n] = xr;
            fsim[n] = fxr;
        } else if fxr < fsim[n] {
            // Outside contraction.
            let xc = &xbar * (1.0 + PSI * RHO) - &worst * (PSI * RHO);
            let fxc = obj.call(&xc);
            if fxc <= fxr {
                sim[n] = xc;
                fsim[n] = fxc;
            } else {
                shrink = true;
            }
        } else {
            // Inside contraction.
            let xcc = &xbar * (1.0 - PSI) + &worst * PSI;
            let fxcc = obj.call(&xcc);
            if fxcc < fsim[n] {
                sim[n] = xcc;
                fsim[n] = fxcc;
            } else {
                shrink = true;
            }
        }

        if shrink {
            let best = sim[0].clone();
            for j in 1..=n {
                sim[j] = &best + (&sim[j] - &best) * SIGMA;
                fsim[j] = obj.call(&sim[j]);
            }
        }

        nit += 1;
        sort_simplex(&mut sim, &mut fsim);
    }

    let termination = if obj.nfev >= options.max_fev && !converged(&sim, &fsim, options) {
        Termination::MaxFunctionEvaluations
    } else if nit >= max_iter && !converged(&sim, &fsim, options) {
        Termination::MaxIterations
    } else {
        Termination::Converged
    };

    NelderMeadOutcome {
        x: sim[0].iter().copied().collect(),
        fun: fsim[0],
        nfev: obj.nfev,
        nit,
        termination,
    }
}

fn converged(sim: &[DVector<f64>], fsim: &[f64], options: &NelderMeadOptions) -> bool {
    let best = &sim[0];
    let x_spread = sim[1..]
        .iter()
        .map(|v| (v - best).amax())
        .fold(0.0f64, f64::max);
    let f_spread = fsim[1..]
        .iter()
        .map(|f| (fsim[0] - f).abs())
        .fold(0.0f64, f64::max);
    x_spread <= options.xatol && f_spread <= options.fatol
}

/// Stable sort of vertices by objective value.
fn sort_simplex(sim: &mut Vec<DVector<f64>>, fsim: &mut Vec<f64>) {
    let mut order: Vec<usize> = (0..fsim.len()).collect();
    order.sort_by(|&a, &b| fsim[a].total_cmp(&fsim[b]));
    *sim = order.iter().map(|&i| sim[i].clone()).collect();
    *fsim = order.iter().map(|&i| fsim[i]).collect();
}
