//! Lightning fee estimation (spec §4.6 "Fee estimation").

use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct FeeEstimate {
    pub base: u64,
    pub routing: u64,
    pub total: u64,
    pub percentage: f64,
}

/// `estimate(amount) = base + routing` where `base = max(1, amount/1000)`
/// and `routing = max(10, amount/5000)`.
pub fn estimate(amount: u64) -> FeeEstimate {
    let base = std::cmp::max(1, amount / 1000);
    let routing = std::cmp::max(10, amount / 5000);
    let total = base + routing;
    let percentage = if amount == 0 { 0.0 } else { (total as f64 / amount as f64) * 100.0 };
    FeeEstimate { base, routing, total, percentage }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_amount_hits_the_floor_on_both_components() {
        let fee = estimate(100);
        assert_eq!(fee.base, 1);
        assert_eq!(fee.routing, 10);
        assert_eq!(fee.total, 11);
    }

    #[test]
    fn large_amount_scales_linearly() {
        let fee = estimate(1_000_000);
        assert_eq!(fee.base, 1000);
        assert_eq!(fee.routing, 200);
        assert_eq!(fee.total, 1200);
    }
}
