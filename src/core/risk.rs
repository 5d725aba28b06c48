use serde::{Deserialize, Serialize};
use tracing::{debug, info_span, warn, Span};

use crate::core::indicators::{mean, population_std};
use crate::profiles::{RiskLimits, RiskProfile};

const TRADING_DAYS: f64 = 252.0;
const EPSILON: f64 = 1e-12;
const VAR_PENALTY: f64 = 0.8;
const VOLATILITY_PENALTY: f64 = 0.7;
const MAX_OPTIMIZER_ITERATIONS: usize = 100;
const OPTIMIZER_TOLERANCE: f64 = 0.001;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    /// Annual.
    pub risk_free_rate: f64,
    pub confidence_level: f64,
    /// Observations kept by `recent`.
    pub lookback: usize,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            risk_free_rate: 0.05,
            confidence_level: 0.95,
            lookback: 252,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct RiskMetrics {
    pub var: f64,
    pub cvar: f64,
    pub volatility: f64,
    pub sharpe_ratio: f64,
    pub sortino_ratio: f64,
    /// Non-positive fraction.
    pub max_drawdown: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VarMethod {
    Historical,
    Parametric,
}

impl VarMethod {
    /// Only the exact string "historical" selects the historical method;
    /// anything else, including typos and other casings, is parametric.
    pub fn from_name(name: &str) -> Self {
        if name == "historical" {
            VarMethod::Historical
        } else {
            VarMethod::Parametric
        }
    }
}

/// Every intermediate vector of a constraint pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstraintAudit {
    pub input: Vec<f64>,
    pub after_var: Vec<f64>,
    pub after_volatility: Vec<f64>,
    pub var_hits: Vec<usize>,
    pub volatility_hits: Vec<usize>,
    pub result: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationResult {
    pub weights: Vec<f64>,
    pub iterations: usize,
    pub volatility: f64,
    pub converged: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StressResult {
    pub normal_return: f64,
    pub normal_volatility: f64,
    pub stressed_return: f64,
    pub stressed_volatility: f64,
    pub impact: f64,
    pub volatility_increase: f64,
}

pub struct RiskManager {
    pub config: RiskConfig,
    pub limits: RiskLimits,
    span: Span,
}

impl RiskManager {
    pub fn new(config: RiskConfig) -> Self {
        Self {
            config,
            limits: RiskLimits {
                max_volatility: None,
                max_var: None,
            },
            span: info_span!("risk_manager"),
        }
    }

    pub fn for_profile(config: RiskConfig, profile: &RiskProfile) -> Self {
        Self::new(config).with_limits(profile.limits)
    }

    pub fn with_limits(mut self, limits: RiskLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// The most recent `lookback` observations.
    pub fn recent<'a>(&self, returns: &'a [f64]) -> &'a [f64] {
        let start = returns.len().saturating_sub(self.config.lookback);
        &returns[start..]
    }

    fn tail_percent(&self) -> f64 {
        (1.0 - self.config.confidence_level) * 100.0
    }

    /// Risk metrics for daily arithmetic returns. Fewer than two observations
    /// give all-zero metrics.
    pub fn calculate_metrics(&self, returns: &[f64]) -> RiskMetrics {
        if returns.len() < 2 {
            return RiskMetrics::default();
        }

        let volatility = population_std(returns) * TRADING_DAYS.sqrt();
        let var = percentile(returns, self.tail_percent());
        let tail: Vec<f64> = returns.iter().copied().filter(|r| *r <= var).collect();
        let cvar = if tail.is_empty() { var } else { mean(&tail) };

        let excess = mean(returns) * TRADING_DAYS - self.config.risk_free_rate;
        let sharpe_ratio = safe_ratio(excess, volatility);

        let negative: Vec<f64> = returns.iter().copied().filter(|r| *r < 0.0).collect();
        let downside = if negative.is_empty() {
            0.0
        } else {
            population_std(&negative) * TRADING_DAYS.sqrt()
        };
        let sortino_ratio = safe_ratio(excess, downside);

        RiskMetrics {
            var,
            cvar,
            volatility,
            sharpe_ratio,
            sortino_ratio,
            max_drawdown: max_drawdown(returns),
        }
    }

    /// VaR of the weighted portfolio. `asset_returns` is day-major: one row
    /// per day, one column per asset.
    pub fn calculate_portfolio_var(
        &self,
        weights: &[f64],
        asset_returns: &[Vec<f64>],
        method: VarMethod,
    ) -> f64 {
        let portfolio = portfolio_returns(weights, asset_returns);
        if portfolio.is_empty() {
            return 0.0;
        }
        match method {
            VarMethod::Historical => percentile(&portfolio, self.tail_percent()),
            VarMethod::Parametric => {
                let z = normal_quantile(1.0 - self.config.confidence_level);
                mean(&portfolio) + z * population_std(&portfolio)
            }
        }
    }

    pub fn apply_risk_constraints(&self, weights: &[f64], var_values: &[f64], volatilities: &[f64]) -> Vec<f64> {
        self.apply_risk_constraints_audited(weights, var_values, volatilities)
            .result
    }

    /// VaR floor first (x0.8), volatility ceiling second (x0.7), then
    /// renormalize. Negative inputs are clamped to zero; if nothing positive
    /// remains the result is equal weights.
    pub fn apply_risk_constraints_audited(
        &self,
        weights: &[f64],
        var_values: &[f64],
        volatilities: &[f64],
    ) -> ConstraintAudit {
        let _guard = self.span.enter();
        let input = weights.to_vec();

        let mut after_var = input.clone();
        let mut var_hits = Vec::new();
        if let Some(floor) = self.limits.max_var {
            for (i, var) in var_values.iter().enumerate().take(after_var.len()) {
                if *var < floor {
                    after_var[i] *= VAR_PENALTY;
                    var_hits.push(i);
                }
            }
        }

        let mut after_volatility = after_var.clone();
        let mut volatility_hits = Vec::new();
        if let Some(ceiling) = self.limits.max_volatility {
            for (i, vol) in volatilities.iter().enumerate().take(after_volatility.len()) {
                if *vol > ceiling {
                    after_volatility[i] *= VOLATILITY_PENALTY;
                    volatility_hits.push(i);
                }
            }
        }

        let result = normalize(&after_volatility);
        if !var_hits.is_empty() || !volatility_hits.is_empty() {
            debug!(?var_hits, ?volatility_hits, "Risk constraints applied");
        }

        ConstraintAudit {
            input,
            after_var,
            after_volatility,
            var_hits,
            volatility_hits,
            result,
        }
    }

    /// Fixed-point rescaling of an equal-weight start toward a target
    /// volatility. Each rescale is followed by renormalization, so the weights
    /// never leave the equal-weight start; only `converged` carries news.
    pub fn optimize_weights_for_risk(
        &self,
        expected_returns: &[f64],
        cov_matrix: &[Vec<f64>],
        target_volatility: f64,
    ) -> OptimizationResult {
        let n = expected_returns.len();
        if n == 0 {
            return OptimizationResult {
                weights: Vec::new(),
                iterations: 0,
                volatility: 0.0,
                converged: false,
            };
        }

        let mut weights = vec![1.0 / n as f64; n];
        let mut volatility = portfolio_volatility(&weights, cov_matrix);
        let mut iterations = 0;
        let mut converged = false;

        while iterations < MAX_OPTIMIZER_ITERATIONS {
            volatility = portfolio_volatility(&weights, cov_matrix);
            if (volatility - target_volatility).abs() < OPTIMIZER_TOLERANCE {
                converged = true;
                break;
            }
            let scale = if volatility > EPSILON {
                target_volatility / volatility
            } else {
                1.0
            };
            let scaled: Vec<f64> = weights.iter().map(|w| w * scale).collect();
            weights = normalize(&scaled);
            iterations += 1;
        }

        if !converged {
            let _guard = self.span.enter();
            warn!(
                target = target_volatility,
                achieved = volatility,
                "Volatility target not reached"
            );
        }

        OptimizationResult {
            weights,
            iterations,
            volatility,
            converged,
        }
    }

    /// Weighted average volatility over portfolio volatility.
    pub fn diversification_ratio(&self, weights: &[f64], volatilities: &[f64], cov_matrix: &[Vec<f64>]) -> f64 {
        let weighted: f64 = weights.iter().zip(volatilities).map(|(w, v)| w * v).sum();
        safe_ratio(weighted, portfolio_volatility(weights, cov_matrix))
    }

    /// Portfolio return statistics with every daily return shifted down by
    /// `shock`.
    pub fn stress_test(&self, weights: &[f64], asset_returns: &[Vec<f64>], shock: f64) -> StressResult {
        let portfolio = portfolio_returns(weights, asset_returns);
        let stressed: Vec<f64> = portfolio.iter().map(|r| r - shock).collect();

        let normal_return = mean(&portfolio);
        let normal_volatility = population_std(&portfolio);
        let stressed_return = mean(&stressed);
        let stressed_volatility = population_std(&stressed);

        StressResult {
            normal_return,
            normal_volatility,
            stressed_return,
            stressed_volatility,
            impact: stressed_return - normal_return,
            volatility_increase: stressed_volatility - normal_volatility,
        }
    }
}

impl Default for RiskManager {
    fn default() -> Self {
        Self::new(RiskConfig::default())
    }
}

/// True when any weight drifted at least `threshold` from its target.
pub fn needs_rebalance(current: &[f64], target: &[f64], threshold: f64) -> bool {
    current
        .iter()
        .zip(target)
        .map(|(c, t)| (c - t).abs())
        .fold(0.0, f64::max)
        >= threshold
}

fn safe_ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator.abs() > EPSILON {
        numerator / denominator
    } else {
        0.0
    }
}

fn normalize(weights: &[f64]) -> Vec<f64> {
    if weights.is_empty() {
        return Vec::new();
    }
    let clamped: Vec<f64> = weights
        .iter()
        .map(|w| if w.is_finite() && *w > 0.0 { *w } else { 0.0 })
        .collect();
    let total: f64 = clamped.iter().sum();
    if total > EPSILON {
        clamped.iter().map(|w| w / total).collect()
    } else {
        vec![1.0 / weights.len() as f64; weights.len()]
    }
}

/// Percentile with linear interpolation between order statistics.
pub fn percentile(values: &[f64], pct: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let rank = (pct / 100.0).clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = rank - lo as f64;
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}

/// Largest peak-to-trough decline of the compounded equity curve, as a
/// non-positive fraction.
pub fn max_drawdown(returns: &[f64]) -> f64 {
    let mut equity = 1.0;
    let mut peak = f64::MIN;
    let mut worst: f64 = 0.0;
    for r in returns {
        equity *= 1.0 + r;
        peak = peak.max(equity);
        if peak.abs() > EPSILON {
            worst = worst.min((equity - peak) / peak);
        }
    }
    worst
}

pub fn portfolio_returns(weights: &[f64], asset_returns: &[Vec<f64>]) -> Vec<f64> {
    asset_returns
        .iter()
        .map(|row| row.iter().zip(weights).map(|(r, w)| r * w).sum())
        .collect()
}

/// sqrt(w' S w). Zero for an empty or mismatched matrix.
pub fn portfolio_volatility(weights: &[f64], cov_matrix: &[Vec<f64>]) -> f64 {
    let mut variance = 0.0;
    for (i, row) in cov_matrix.iter().enumerate().take(weights.len()) {
        for (j, cov) in row.iter().enumerate().take(weights.len()) {
            variance += weights[i] * cov * weights[j];
        }
    }
    variance.max(0.0).sqrt()
}

/// Sample covariance of day-major returns.
pub fn covariance_matrix(asset_returns: &[Vec<f64>]) -> Vec<Vec<f64>> {
    let n_assets = asset_returns.iter().map(Vec::len).min().unwrap_or(0);
    let days = asset_returns.len();
    if days < 2 || n_assets == 0 {
        return vec![vec![0.0; n_assets]; n_assets];
    }
    let means: Vec<f64> = (0..n_assets)
        .map(|j| asset_returns.iter().map(|row| row[j]).sum::<f64>() / days as f64)
        .collect();

    let mut cov = vec![vec![0.0; n_assets]; n_assets];
    for i in 0..n_assets {
        for j in i..n_assets {
            let s: f64 = asset_returns
                .iter()
                .map(|row| (row[i] - means[i]) * (row[j] - means[j]))
                .sum();
            let c = s / (days - 1) as f64;
            cov[i][j] = c;
            cov[j][i] = c;
        }
    }
    cov
}

/// Pearson correlation. Constant assets correlate 0 with everything else
/// and 1 with themselves.
pub fn correlation_matrix(asset_returns: &[Vec<f64>]) -> Vec<Vec<f64>> {
    let cov = covariance_matrix(asset_returns);
    let n = cov.len();
    let mut corr = vec![vec![0.0; n]; n];
    for i in 0..n {
        for j in 0..n {
            corr[i][j] = if i == j {
                1.0
            } else {
                safe_ratio(cov[i][j], (cov[i][i] * cov[j][j]).sqrt())
            };
        }
    }
    corr
}

/// Inverse standard normal CDF (Acklam's rational approximation, relative
/// error below 1.2e-9).
pub fn normal_quantile(p: f64) -> f64 {
    const A: [f64; 6] = [
        -3.969683028665376e+01,
        2.209460984245205e+02,
        -2.759285104469687e+02,
        1.383577518672690e+02,
        -3.066479806614716e+01,
        2.506628277459239e+00,
    ];
    const B: [f64; 5] = [
        -5.447609879822406e+01,
        1.615858368580409e+02,
        -1.556989798598866e+02,
        6.680131188771972e+01,
        -1.328068155288572e+01,
    ];
    const C: [f64; 6] = [
        -7.784894002430293e-03,
        -3.223964580411365e-01,
        -2.400758277161838e+00,
        -2.549732539343734e+00,
        4.374664141464968e+00,
        2.938163982698783e+00,
    ];
    const D: [f64; 4] = [
        7.784695709041462e-03,
        3.224671290700398e-01,
        2.445134137142996e+00,
        3.754408661907416e+00,
    ];
    const P_LOW: f64 = 0.02425;

    if p <= 0.0 {
        return f64::NEG_INFINITY;
    }
    if p >= 1.0 {
        return f64::INFINITY;
    }

    if p < P_LOW {
        let q = (-2.0 * p.ln()).sqrt();
        (((((C[0] * q + C[1]) * q + C[2]) * q + C[3]) * q + C[4]) * q + C[5])
            / ((((D[0] * q + D[1]) * q + D[2]) * q + D[3]) * q + 1.0)
    } else if p <= 1.0 - P_LOW {
        let q = p - 0.5;
        let r = q * q;
        (((((A[0] * r + A[1]) * r + A[2]) * r + A[3]) * r + A[4]) * r + A[5]) * q
            / (((((B[0] * r + B[1]) * r + B[2]) * r + B[3]) * r + B[4]) * r + 1.0)
    } else {
        let q = (-2.0 * (1.0 - p).ln()).sqrt();
        -(((((C[0] * q + C[1]) * q + C[2]) * q + C[3]) * q + C[4]) * q + C[5])
            / ((((D[0] * q + D[1]) * q + D[2]) * q + D[3]) * q + 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64, tol: f64) -> bool {
        (a - b).abs() < tol
    }

    fn moderate() -> RiskManager {
        RiskManager::for_profile(RiskConfig::default(), &RiskProfile::intermediate())
    }

    #[test]
    fn short_series_gives_zero_metrics() {
        let rm = RiskManager::default();
        assert_eq!(rm.calculate_metrics(&[]), RiskMetrics::default());
        assert_eq!(rm.calculate_metrics(&[0.01]), RiskMetrics::default());
    }

    #[test]
    fn zero_variance_ratios_are_zero() {
        let rm = RiskManager::default();
        let m = rm.calculate_metrics(&[0.001; 50]);
        assert_eq!(m.sharpe_ratio, 0.0);
        assert_eq!(m.sortino_ratio, 0.0);
        assert!(m.volatility < 1e-9);
        assert!(!m.sharpe_ratio.is_nan());
    }

    #[test]
    fn no_losses_means_zero_sortino() {
        let rm = RiskManager::default();
        let m = rm.calculate_metrics(&[0.01, 0.02, 0.005, 0.03]);
        assert_eq!(m.sortino_ratio, 0.0);
        assert!(m.sharpe_ratio > 0.0);
        assert_eq!(m.max_drawdown, 0.0);
    }

    #[test]
    fn metrics_on_known_series() {
        let rm = RiskManager::default();
        let returns = [0.01, -0.02, 0.015, -0.005, 0.02];
        let m = rm.calculate_metrics(&returns);

        let sigma = population_std(&returns);
        assert!(approx(m.volatility, sigma * 252f64.sqrt(), 1e-12));
        // 5th percentile of [-0.02, -0.005, 0.01, 0.015, 0.02]: rank 0.2
        assert!(approx(m.var, -0.02 + 0.015 * 0.2, 1e-12));
        assert!(approx(m.cvar, -0.02, 1e-12));
        assert!(approx(m.max_drawdown, (1.01 * 0.98 - 1.01) / 1.01, 1e-12));
        assert!(m.max_drawdown <= 0.0);
    }

    #[test]
    fn var_method_name_gotcha() {
        assert_eq!(VarMethod::from_name("historical"), VarMethod::Historical);
        assert_eq!(VarMethod::from_name("Historical"), VarMethod::Parametric);
        assert_eq!(VarMethod::from_name("histrical"), VarMethod::Parametric);
        assert_eq!(VarMethod::from_name(""), VarMethod::Parametric);
    }

    #[test]
    fn portfolio_var_methods() {
        let rm = RiskManager::default();
        let returns: Vec<Vec<f64>> = (0..100)
            .map(|i| {
                let x = ((i * 37) % 100) as f64 / 1000.0 - 0.05;
                vec![x, -x * 0.5]
            })
            .collect();
        let w = [0.6, 0.4];
        let hist = rm.calculate_portfolio_var(&w, &returns, VarMethod::Historical);
        let para = rm.calculate_portfolio_var(&w, &returns, VarMethod::Parametric);
        assert!(hist < 0.0);
        assert!(para < 0.0);

        let port = portfolio_returns(&w, &returns);
        let expected = mean(&port) + normal_quantile(0.05) * population_std(&port);
        assert!(approx(para, expected, 1e-12));
    }

    #[test]
    fn quantile_matches_known_values() {
        assert!(approx(normal_quantile(0.5), 0.0, 1e-9));
        assert!(approx(normal_quantile(0.05), -1.6448536269514722, 1e-8));
        assert!(approx(normal_quantile(0.975), 1.959963984540054, 1e-8));
        assert!(approx(normal_quantile(0.001), -3.090232306167813, 1e-7));
    }

    #[test]
    fn constraints_apply_in_order_and_normalize() {
        let rm = moderate();
        let audit = rm.apply_risk_constraints_audited(
            &[0.25, 0.25, 0.25, 0.25],
            &[-0.20, -0.01, -0.01, -0.20],
            &[0.10, 0.25, 0.10, 0.25],
        );
        assert_eq!(audit.var_hits, vec![0, 3]);
        assert_eq!(audit.volatility_hits, vec![1, 3]);
        assert_eq!(audit.after_var, vec![0.2, 0.25, 0.25, 0.2]);
        assert!(approx(audit.after_volatility[3], 0.25 * 0.8 * 0.7, 1e-12));

        let raw = [0.2, 0.175, 0.25, 0.14];
        let total: f64 = raw.iter().sum();
        for (got, r) in audit.result.iter().zip(raw) {
            assert!(approx(*got, r / total, 1e-12));
        }
        assert!(approx(audit.result.iter().sum(), 1.0, 1e-9));
    }

    #[test]
    fn constraints_without_limits_only_normalize() {
        let rm = RiskManager::default();
        let w = rm.apply_risk_constraints(&[2.0, 6.0], &[-1.0, -1.0], &[5.0, 5.0]);
        assert!(approx(w[0], 0.25, 1e-12));
        assert!(approx(w[1], 0.75, 1e-12));
    }

    #[test]
    fn degenerate_weights_become_equal() {
        let rm = moderate();
        let w = rm.apply_risk_constraints(&[-1.0, 0.0, -3.0], &[], &[]);
        assert_eq!(w, vec![1.0 / 3.0; 3]);
    }

    #[test]
    fn optimizer_stays_at_equal_weights() {
        let rm = RiskManager::default();
        let cov = vec![vec![0.04, 0.0], vec![0.0, 0.09]];
        let res = rm.optimize_weights_for_risk(&[0.1, 0.2], &cov, 0.05);
        assert_eq!(res.weights, vec![0.5, 0.5]);
        assert!(!res.converged);
        assert_eq!(res.iterations, 100);

        let target = portfolio_volatility(&[0.5, 0.5], &cov);
        let res = rm.optimize_weights_for_risk(&[0.1, 0.2], &cov, target);
        assert!(res.converged);
        assert_eq!(res.iterations, 0);
    }

    #[test]
    fn covariance_and_correlation() {
        let returns = vec![vec![0.01, 0.02], vec![0.02, 0.04], vec![0.03, 0.06]];
        let cov = covariance_matrix(&returns);
        assert!(approx(cov[0][0], 0.0001, 1e-12));
        assert!(approx(cov[0][1], 0.0002, 1e-12));
        let corr = correlation_matrix(&returns);
        assert!(approx(corr[0][1], 1.0, 1e-9));

        let flat = vec![vec![0.01, 0.02], vec![0.01, 0.04]];
        assert_eq!(correlation_matrix(&flat)[0][1], 0.0);
    }

    #[test]
    fn diversification_of_uncorrelated_assets() {
        let rm = RiskManager::default();
        let cov = vec![vec![0.04, 0.0], vec![0.0, 0.04]];
        let ratio = rm.diversification_ratio(&[0.5, 0.5], &[0.2, 0.2], &cov);
        assert!(approx(ratio, 0.2 / (0.02f64).sqrt(), 1e-12));
        assert_eq!(rm.diversification_ratio(&[0.5, 0.5], &[0.2, 0.2], &[]), 0.0);
    }

    #[test]
    fn stress_shifts_mean_only() {
        let rm = RiskManager::default();
        let returns = vec![vec![0.01], vec![-0.01], vec![0.02]];
        let s = rm.stress_test(&[1.0], &returns, 0.1);
        assert!(approx(s.impact, -0.1, 1e-12));
        assert!(approx(s.volatility_increase, 0.0, 1e-12));
    }

    #[test]
    fn rebalance_threshold() {
        assert!(needs_rebalance(&[0.5, 0.5], &[0.40, 0.60], 0.07));
        assert!(!needs_rebalance(&[0.5, 0.5], &[0.45, 0.55], 0.07));
    }

    #[test]
    fn lookback_window() {
        let rm = RiskManager::new(RiskConfig {
            lookback: 3,
            ..RiskConfig::default()
        });
        assert_eq!(rm.recent(&[1.0, 2.0, 3.0, 4.0, 5.0]), &[3.0, 4.0, 5.0]);
        assert_eq!(rm.recent(&[1.0]), &[1.0]);
    }
}
