/// Mean-over-volatility score of the per-cycle return series.
///
/// Uses the sample standard deviation. Fewer than two observations, or a
/// flat series, score 0.0 so the dashboard never shows an infinity.
pub fn risk_metric(returns: &[f64]) -> f64 {
    if returns.len() < 2 {
        return 0.0;
    }
    let n = returns.len() as f64;
    let mean = returns.iter().sum::<f64>() / n;
    let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (n - 1.0);
    if variance <= 0.0 {
        return 0.0;
    }
    mean / variance.sqrt()
}
