// Bundled equation-search collaborator: random expression trees refined by a
// mutation hill-climb, with a best-per-complexity hall of fame. Deliberately
// small; any engine implementing EquationSearch can replace it.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use anyhow::{bail, Result};
use dst_data::FeatureSet;
use ndarray::ArrayView1;
use rand::rngs::StdRng;
use rand::seq::index::sample;
use rand::{Rng, SeedableRng};
use tracing::debug;

use crate::regressor::{CandidateEquation, EquationSearch, FitConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Greater,
    Max,
    Min,
}

impl BinaryOp {
    fn parse(name: &str) -> Option<Self> {
        match name {
            "+" => Some(Self::Add),
            "-" => Some(Self::Sub),
            "*" => Some(Self::Mul),
            "/" => Some(Self::Div),
            "greater" => Some(Self::Greater),
            "max" => Some(Self::Max),
            "min" => Some(Self::Min),
            _ => None,
        }
    }

    fn apply(self, a: f64, b: f64) -> f64 {
        match self {
            Self::Add => a + b,
            Self::Sub => a - b,
            Self::Mul => a * b,
            Self::Div => a / b,
            Self::Greater => {
                if a > b {
                    1.0
                } else {
                    0.0
                }
            }
            Self::Max => a.max(b),
            Self::Min => a.min(b),
        }
    }

    fn infix(self) -> Option<&'static str> {
        match self {
            Self::Add => Some("+"),
            Self::Sub => Some("-"),
            Self::Mul => Some("*"),
            Self::Div => Some("/"),
            _ => None,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::Greater => "greater",
            Self::Max => "max",
            Self::Min => "min",
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UnaryOp {
    Sqrt,
    Square,
    Sign,
}

impl UnaryOp {
    fn parse(name: &str) -> Option<Self> {
        match name {
            "sqrt" => Some(Self::Sqrt),
            "square" => Some(Self::Square),
            "sign" => Some(Self::Sign),
            _ => None,
        }
    }

    fn apply(self, x: f64) -> f64 {
        match self {
            Self::Sqrt => x.sqrt(),
            Self::Square => x * x,
            Self::Sign => {
                if x == 0.0 {
                    0.0
                } else {
                    x.signum()
                }
            }
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::Sqrt => "sqrt",
            Self::Square => "square",
            Self::Sign => "sign",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Loss {
    L1,
    L2,
}

impl Loss {
    fn parse(name: &str) -> Option<Self> {
        match name {
            "L1DistLoss()" => Some(Self::L1),
            "L2DistLoss()" => Some(Self::L2),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
enum Expr {
    Var(usize),
    Const(f64),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
}

impl Expr {
    fn size(&self) -> u32 {
        match self {
            Expr::Var(_) | Expr::Const(_) => 1,
            Expr::Unary(_, a) => 1 + a.size(),
            Expr::Binary(_, a, b) => 1 + a.size() + b.size(),
        }
    }

    fn eval(&self, row: ArrayView1<f64>) -> f64 {
        match self {
            Expr::Var(i) => row[*i],
            Expr::Const(c) => *c,
            Expr::Unary(op, a) => op.apply(a.eval(row)),
            Expr::Binary(op, a, b) => op.apply(a.eval(row), b.eval(row)),
        }
    }

    fn format(&self, names: &[String]) -> String {
        match self {
            Expr::Var(i) => names
                .get(*i)
                .cloned()
                .unwrap_or_else(|| format!("x{i}")),
            Expr::Const(c) => format!("{c:.3}"),
            Expr::Unary(op, a) => format!("{}({})", op.name(), a.format(names)),
            Expr::Binary(op, a, b) => match op.infix() {
                Some(sym) => format!("({} {} {})", a.format(names), sym, b.format(names)),
                None => format!("{}({}, {})", op.name(), a.format(names), b.format(names)),
            },
        }
    }
}

struct OperatorSet {
    binary: Vec<BinaryOp>,
    unary: Vec<UnaryOp>,
    n_vars: usize,
}

fn random_expr<R: Rng>(rng: &mut R, depth: u32, ops: &OperatorSet) -> Expr {
    let leaf = depth == 0 || ops.binary.is_empty() || rng.gen_bool(0.3);
    if leaf {
        if rng.gen_bool(0.7) {
            Expr::Var(rng.gen_range(0..ops.n_vars))
        } else {
            Expr::Const((rng.gen_range(-5.0..5.0_f64) * 1000.0).round() / 1000.0)
        }
    } else if !ops.unary.is_empty() && rng.gen_bool(0.25) {
        let op = ops.unary[rng.gen_range(0..ops.unary.len())];
        Expr::Unary(op, Box::new(random_expr(rng, depth - 1, ops)))
    } else {
        let op = ops.binary[rng.gen_range(0..ops.binary.len())];
        Expr::Binary(
            op,
            Box::new(random_expr(rng, depth - 1, ops)),
            Box::new(random_expr(rng, depth - 1, ops)),
        )
    }
}

fn mutate<R: Rng>(expr: &Expr, rng: &mut R, ops: &OperatorSet) -> Expr {
    if rng.gen_bool(0.2) {
        return random_expr(rng, 2, ops);
    }
    match expr {
        Expr::Const(c) => Expr::Const(((c + rng.gen_range(-1.0..1.0)) * 1000.0).round() / 1000.0),
        Expr::Var(_) => {
            if rng.gen_bool(0.5) {
                Expr::Var(rng.gen_range(0..ops.n_vars))
            } else {
                expr.clone()
            }
        }
        Expr::Unary(op, a) => Expr::Unary(*op, Box::new(mutate(a, rng, ops))),
        Expr::Binary(op, a, b) => {
            if rng.gen_bool(0.5) {
                Expr::Binary(*op, Box::new(mutate(a, rng, ops)), b.clone())
            } else {
                Expr::Binary(*op, a.clone(), Box::new(mutate(b, rng, ops)))
            }
        }
    }
}

fn loss_on_rows(expr: &Expr, features: &FeatureSet, rows: &[usize], loss: Loss) -> f64 {
    let mut total = 0.0;
    for &i in rows {
        let pred = expr.eval(features.data.row(i));
        let err = pred - features.target[i];
        total += match loss {
            Loss::L1 => err.abs(),
            Loss::L2 => err * err,
        };
    }
    let mean = total / rows.len() as f64;
    if mean.is_finite() {
        mean
    } else {
        f64::INFINITY
    }
}

/// Reference implementation of the collaborator contract. Seedable so tests
/// and callers can pin its randomness.
#[derive(Debug, Clone, Default)]
pub struct PopulationSearch {
    seed: Option<u64>,
}

impl PopulationSearch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_seed(seed: u64) -> Self {
        Self { seed: Some(seed) }
    }
}

impl EquationSearch for PopulationSearch {
    fn fit(&mut self, features: &FeatureSet, config: &FitConfig) -> Result<Vec<CandidateEquation>> {
        let n_rows = features.n_rows();
        if n_rows == 0 || features.n_features() == 0 {
            bail!("empty feature matrix");
        }
        if features.target.len() != n_rows {
            bail!(
                "target length {} does not match {} feature rows",
                features.target.len(),
                n_rows
            );
        }
        if config.maxsize == 0 {
            bail!("maxsize must be at least 1");
        }

        let mut binary = Vec::new();
        for name in &config.binary_operators {
            match BinaryOp::parse(name) {
                Some(op) => binary.push(op),
                None => bail!("unknown binary operator: {name}"),
            }
        }
        let mut unary = Vec::new();
        for name in &config.unary_operators {
            match UnaryOp::parse(name) {
                Some(op) => unary.push(op),
                None => bail!("unknown unary operator: {name}"),
            }
        }
        let Some(loss) = Loss::parse(&config.elementwise_loss) else {
            bail!("unsupported loss: {}", config.elementwise_loss);
        };

        let ops = OperatorSet {
            binary,
            unary,
            n_vars: features.n_features(),
        };
        let mut rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let all_rows: Vec<usize> = (0..n_rows).collect();
        let batch_rows = |rng: &mut StdRng| -> Vec<usize> {
            if config.batching && config.batch_size < n_rows && config.batch_size > 0 {
                sample(rng, n_rows, config.batch_size).into_vec()
            } else {
                all_rows.clone()
            }
        };

        let pop_size = config.populations.max(1) as usize;
        let mut population: Vec<Expr> = (0..pop_size)
            .map(|_| random_expr(&mut rng, 3, &ops))
            .collect();

        // Best expression seen per complexity level, scored on the full data.
        let mut hall: BTreeMap<u32, (f64, Expr)> = BTreeMap::new();
        let promote = |expr: &Expr, hall: &mut BTreeMap<u32, (f64, Expr)>| {
            let size = expr.size();
            if size > config.maxsize {
                return;
            }
            let full = loss_on_rows(expr, features, &all_rows, loss);
            if !full.is_finite() {
                return;
            }
            let better = match hall.get(&size) {
                Some((best, _)) => full < *best,
                None => true,
            };
            if better {
                hall.insert(size, (full, expr.clone()));
            }
        };
        for member in &population {
            promote(member, &mut hall);
        }

        let deadline = Instant::now() + Duration::from_secs(config.timeout_seconds.max(1));
        for iter in 0..config.niterations {
            if Instant::now() >= deadline {
                debug!("time budget exhausted after {iter} iterations");
                break;
            }
            let rows = batch_rows(&mut rng);
            let idx = rng.gen_range(0..population.len());
            let child = mutate(&population[idx], &mut rng, &ops);
            if child.size() > config.maxsize {
                continue;
            }
            let parent_score = loss_on_rows(&population[idx], features, &rows, loss)
                + config.parsimony * population[idx].size() as f64;
            let child_score = loss_on_rows(&child, features, &rows, loss)
                + config.parsimony * child.size() as f64;
            if child_score <= parent_score {
                promote(&child, &mut hall);
                population[idx] = child;
            }
            if config.progress && iter % 200 == 0 {
                debug!(iter, hall = hall.len(), "search progress");
            }
        }

        let mut candidates: Vec<CandidateEquation> = hall
            .into_iter()
            .map(|(complexity, (loss, expr))| CandidateEquation {
                equation: expr.format(&features.names),
                complexity,
                loss,
            })
            .collect();
        candidates.sort_by(|a, b| a.loss.total_cmp(&b.loss));
        Ok(candidates)
    }
}
