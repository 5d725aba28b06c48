use serde::{Deserialize, Serialize};
use tracing::{debug, info_span, Span};

use crate::core::indicators::{momentum, rolling_log_volatility, sma, trailing_mean, wilder_rsi};
use crate::models::{MacroSnapshot, MovingAverages, PriceSeries, Regime, RegimeResult};

const TRANSITION_FLOOR: f64 = 0.4;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegimeConfig {
    pub window_short: usize,
    pub window_medium: usize,
    pub window_long: usize,
    pub volatility_window: usize,
    pub rsi_period: usize,
    pub momentum_window: usize,
    pub volatility_average: usize,
    pub rsi_oversold: f64,
    pub rsi_overbought: f64,
}

impl Default for RegimeConfig {
    fn default() -> Self {
        Self {
            window_short: 20,
            window_medium: 50,
            window_long: 200,
            volatility_window: 30,
            rsi_period: 14,
            momentum_window: 10,
            volatility_average: 20,
            rsi_oversold: 30.0,
            rsi_overbought: 70.0,
        }
    }
}

/// Stock/bond/cash split recommended for the last detected regime.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BaselineAllocation {
    pub stocks: f64,
    pub bonds: f64,
    pub cash: f64,
}

#[derive(Debug, Clone, Copy, Default)]
struct Scores {
    bull: f64,
    bear: f64,
    sideways: f64,
}

/// Classifies a price history into a market regime.
///
/// Remembers the last regime and strength it produced; nothing else is
/// stateful, so identical input always gives an identical result.
pub struct RegimeDetector {
    pub config: RegimeConfig,
    current: Option<(Regime, f64)>,
    span: Span,
}

impl RegimeDetector {
    pub fn new(config: RegimeConfig) -> Self {
        Self {
            config,
            current: None,
            span: info_span!("regime_detector"),
        }
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn current_regime(&self) -> Option<Regime> {
        self.current.map(|(r, _)| r)
    }

    pub fn regime_strength(&self) -> f64 {
        self.current.map(|(_, s)| s).unwrap_or(0.0)
    }

    pub fn detect(&mut self, prices: &PriceSeries, macro_data: Option<&MacroSnapshot>) -> RegimeResult {
        self.detect_closes(&prices.closes(), macro_data)
    }

    pub fn detect_closes(&mut self, closes: &[f64], macro_data: Option<&MacroSnapshot>) -> RegimeResult {
        let _guard = self.span.enter();
        let cfg = &self.config;

        if closes.len() < cfg.window_long {
            debug!(
                observations = closes.len(),
                required = cfg.window_long,
                "Insufficient history, defaulting to transition"
            );
            return RegimeResult::insufficient();
        }

        let mas = MovingAverages {
            short: sma(closes, cfg.window_short).unwrap_or(0.0),
            medium: sma(closes, cfg.window_medium).unwrap_or(0.0),
            long: sma(closes, cfg.window_long).unwrap_or(0.0),
        };
        let price = closes[closes.len() - 1];
        let trend = trend_score(price, &mas);
        let rsi = wilder_rsi(closes, cfg.rsi_period);

        let vol_series = rolling_log_volatility(closes, cfg.volatility_window);
        let vol_current = vol_series.last().copied().flatten().unwrap_or(0.0);
        let vol_avg = trailing_mean(&vol_series, cfg.volatility_average).unwrap_or(vol_current);
        let mom = momentum(closes, cfg.momentum_window);

        let scores = self.score(trend, rsi, vol_current, vol_avg, mom);
        let (regime, strength) = pick(scores);

        debug!(
            bull = scores.bull,
            bear = scores.bear,
            sideways = scores.sideways,
            trend,
            rsi,
            momentum = mom,
            "Regime scores"
        );

        self.current = Some((regime, strength));

        RegimeResult {
            regime,
            strength,
            trend,
            rsi,
            volatility: vol_current,
            momentum: mom,
            moving_averages: mas,
            macro_data: macro_data.cloned(),
        }
    }

    fn score(&self, trend: f64, rsi: f64, vol: f64, vol_avg: f64, mom: f64) -> Scores {
        let cfg = &self.config;
        let mut s = Scores::default();

        if trend > 0.5 {
            s.bull += 0.4;
        } else if trend < -0.5 {
            s.bear += 0.4;
        } else if (-0.2..=0.2).contains(&trend) {
            s.sideways += 0.3;
        }

        if rsi > cfg.rsi_overbought {
            s.bull += 0.2;
            s.bear += 0.1;
        } else if rsi < cfg.rsi_oversold {
            s.bear += 0.2;
            s.bull += 0.1;
        } else if (40.0..=60.0).contains(&rsi) {
            s.sideways += 0.2;
        }

        if vol > vol_avg * 1.5 {
            if trend > 0.0 {
                s.bull += 0.1;
            } else {
                s.bear += 0.1;
            }
        } else if vol < vol_avg * 0.7 {
            s.sideways += 0.2;
        }

        if mom > 0.02 {
            s.bull += 0.3;
        } else if mom < -0.02 {
            s.bear += 0.3;
        } else if (-0.01..=0.01).contains(&mom) {
            s.sideways += 0.2;
        }

        s
    }

    /// Baseline stock/bond/cash weights for the last detected regime, tilted
    /// from cash into stocks by the regime strength.
    pub fn baseline_allocation(&self) -> BaselineAllocation {
        let Some((regime, strength)) = self.current else {
            return BaselineAllocation {
                stocks: 0.6,
                bonds: 0.3,
                cash: 0.1,
            };
        };

        let (stocks, bonds, cash) = match regime {
            Regime::Bull => (0.75, 0.15, 0.10),
            Regime::Bear => (0.30, 0.50, 0.20),
            Regime::Sideways => (0.50, 0.35, 0.15),
            Regime::Transition => (0.40, 0.45, 0.15),
        };

        let stocks = stocks + cash * strength * 0.5;
        let cash = cash * (1.0 - strength * 0.5);
        let total = stocks + bonds + cash;

        BaselineAllocation {
            stocks: stocks / total,
            bonds: bonds / total,
            cash: cash / total,
        }
    }
}

impl Default for RegimeDetector {
    fn default() -> Self {
        Self::new(RegimeConfig::default())
    }
}

/// Price against the moving averages (+/-1.0 or +/-0.5) plus MA ordering
/// (+/-0.3), clipped to [-1, 1].
fn trend_score(price: f64, mas: &MovingAverages) -> f64 {
    let (short, medium, long) = (mas.short, mas.medium, mas.long);
    let mut score = 0.0;

    if price > short && short > medium && medium > long {
        score += 1.0;
    } else if price > medium && medium > long {
        score += 0.5;
    } else if price < short && short < medium && medium < long {
        score -= 1.0;
    } else if price < medium && medium < long {
        score -= 0.5;
    }

    if short > medium && medium > long {
        score += 0.3;
    } else if short < medium && medium < long {
        score -= 0.3;
    }

    f64::clamp(score, -1.0, 1.0)
}

/// Highest score wins, ties resolved bull, then bear, then sideways. Below
/// the confidence floor the result is a transition.
fn pick(s: Scores) -> (Regime, f64) {
    let max = s.bull.max(s.bear).max(s.sideways);
    if max < TRANSITION_FLOOR {
        return (Regime::Transition, max);
    }
    if s.bull >= s.bear && s.bull >= s.sideways {
        (Regime::Bull, s.bull.min(1.0))
    } else if s.bear >= s.sideways {
        (Regime::Bear, s.bear.min(1.0))
    } else {
        (Regime::Sideways, s.sideways.min(1.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{falling_closes, flat_closes, rising_closes};

    #[test]
    fn short_history_is_transition_zero() {
        let mut det = RegimeDetector::default();
        let res = det.detect_closes(&rising_closes(150), None);
        assert_eq!(res.regime, Regime::Transition);
        assert_eq!(res.strength, 0.0);
        assert_eq!(det.current_regime(), None);
    }

    #[test]
    fn flat_history_is_sideways() {
        let mut det = RegimeDetector::default();
        let res = det.detect_closes(&flat_closes(250), None);
        assert_eq!(res.regime, Regime::Sideways);
        assert!((res.strength - 0.7).abs() < 1e-9);
        assert_eq!(res.trend, 0.0);
        assert_eq!(res.momentum, 0.0);
    }

    #[test]
    fn rising_history_is_bull() {
        let mut det = RegimeDetector::default();
        let res = det.detect_closes(&rising_closes(250), None);
        assert_eq!(res.regime, Regime::Bull);
        assert!(res.strength >= 0.4);
        assert_eq!(res.trend, 1.0);
        assert_eq!(det.current_regime(), Some(Regime::Bull));
    }

    #[test]
    fn falling_history_is_bear() {
        let mut det = RegimeDetector::default();
        let res = det.detect_closes(&falling_closes(250), None);
        assert_eq!(res.regime, Regime::Bear);
        assert_eq!(res.trend, -1.0);
    }

    #[test]
    fn detection_is_deterministic() {
        let closes: Vec<f64> = (0..260)
            .map(|i| 100.0 + (i as f64 * 0.3).sin() * 5.0 + i as f64 * 0.05)
            .collect();
        let snap = MacroSnapshot::default().with("policy_rate", 10.5);
        let a = RegimeDetector::default().detect_closes(&closes, Some(&snap));
        let b = RegimeDetector::default().detect_closes(&closes, Some(&snap));
        assert_eq!(a, b);
        assert_eq!(a.macro_data, Some(snap));
    }

    #[test]
    fn low_scores_force_transition() {
        let (regime, strength) = pick(Scores {
            bull: 0.3,
            bear: 0.1,
            sideways: 0.2,
        });
        assert_eq!(regime, Regime::Transition);
        assert!((strength - 0.3).abs() < 1e-12);
    }

    #[test]
    fn ties_prefer_bull_then_bear() {
        let tie = Scores {
            bull: 0.5,
            bear: 0.5,
            sideways: 0.5,
        };
        assert_eq!(pick(tie).0, Regime::Bull);
        let tie = Scores {
            bull: 0.1,
            bear: 0.5,
            sideways: 0.5,
        };
        assert_eq!(pick(tie).0, Regime::Bear);
    }

    #[test]
    fn trend_partial_alignment() {
        let mas = MovingAverages {
            short: 105.0,
            medium: 100.0,
            long: 95.0,
        };
        assert_eq!(trend_score(110.0, &mas), 1.0);
        // Price between short and medium: +0.5 for price, +0.3 for ordering.
        assert!((trend_score(102.0, &mas) - 0.8).abs() < 1e-12);
    }

    #[test]
    fn baseline_without_detection() {
        let det = RegimeDetector::default();
        let b = det.baseline_allocation();
        assert_eq!((b.stocks, b.bonds, b.cash), (0.6, 0.3, 0.1));
    }

    #[test]
    fn baseline_tilts_cash_into_stocks() {
        let mut det = RegimeDetector::default();
        det.detect_closes(&rising_closes(250), None);
        let s = det.regime_strength();
        let b = det.baseline_allocation();
        assert!((b.stocks + b.bonds + b.cash - 1.0).abs() < 1e-12);
        assert!(b.stocks > 0.75);
        assert!(b.cash < 0.10);
        let raw_stocks = 0.75 + 0.10 * s * 0.5;
        let raw_cash = 0.10 * (1.0 - s * 0.5);
        let total = raw_stocks + 0.15 + raw_cash;
        assert!((b.stocks - raw_stocks / total).abs() < 1e-12);
    }
}
