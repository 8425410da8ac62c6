use super::error::{Error, Result};
use super::summary::Summary;

pub const POLICY_ERROR : &str = "Policy error";
pub const VALUE_ERROR : &str = "Value error";
pub const REGULARIZATION_ERROR : &str = "Regularization error";
pub const COMBINED_COST : &str = "Combined cost";

/// Accumulates per-batch costs between two `collect()` calls.
///
/// Costs are only meaningful averaged over many batches, so each step is
/// reported here and the means are turned into one summary every so often.
#[derive(Debug, Default)]
pub struct StatisticsCollector {
    policy_costs : Vec<f64>,
    value_costs : Vec<f64>,
    regularization_costs : Vec<f64>,
    combined_costs : Vec<f64>,
}

fn mean(v : &[f64]) -> f64 {
    v.iter().sum::<f64>() / v.len() as f64
}

impl StatisticsCollector {
    pub fn new() -> StatisticsCollector {
        StatisticsCollector::default()
    }

    pub fn report(&mut self, policy_cost : f64, value_cost : f64,
            regularization_cost : f64, combined_cost : f64) {
        self.policy_costs.push(policy_cost);
        self.value_costs.push(value_cost);
        self.regularization_costs.push(regularization_cost);
        self.combined_costs.push(combined_cost);
    }

    pub fn is_empty(&self) -> bool {
        self.combined_costs.is_empty()
    }

    /// means of everything reported since the last call. the lists are emptied.
    pub fn collect(&mut self) -> Result<Summary> {
        if self.is_empty() {
            return Err(Error::EmptyAccumulator);
        }
        let mut summary = Summary::default();
        summary.scalar(POLICY_ERROR, mean(&self.policy_costs));
        summary.scalar(VALUE_ERROR, mean(&self.value_costs));
        summary.scalar(REGULARIZATION_ERROR, mean(&self.regularization_costs));
        summary.scalar(COMBINED_COST, mean(&self.combined_costs));
        self.policy_costs.clear();
        self.value_costs.clear();
        self.regularization_costs.clear();
        self.combined_costs.clear();
        Ok(summary)
    }
}

#[test]
fn test_single_report() {
    use super::summary::Value;

    let mut st = StatisticsCollector::new();
    st.report(0.5, 0.3, 0.01, 0.81);
    let s = st.collect().unwrap();
    assert_eq!(s.get(POLICY_ERROR), Some(&Value::Scalar(0.5)));
    assert_eq!(s.get(VALUE_ERROR), Some(&Value::Scalar(0.3)));
    assert_eq!(s.get(REGULARIZATION_ERROR), Some(&Value::Scalar(0.01)));
    assert_eq!(s.get(COMBINED_COST), Some(&Value::Scalar(0.81)));
    assert!(st.is_empty());
    assert!(st.policy_costs.is_empty() && st.value_costs.is_empty()
        && st.regularization_costs.is_empty());
}

#[test]
fn test_means() {
    use super::summary::Value;

    let mut st = StatisticsCollector::new();
    st.report(1.0, 0.0, 0.5, 1.5);
    st.report(3.0, 1.0, 0.5, 4.5);
    let s = st.collect().unwrap();
    assert_eq!(s.get(POLICY_ERROR), Some(&Value::Scalar(2.0)));
    assert_eq!(s.get(VALUE_ERROR), Some(&Value::Scalar(0.5)));
    assert_eq!(s.get(COMBINED_COST), Some(&Value::Scalar(3.0)));
}

#[test]
fn test_collect_empty() {
    let mut st = StatisticsCollector::new();
    assert!(matches!(st.collect(), Err(Error::EmptyAccumulator)));
    st.report(1.0, 1.0, 1.0, 3.0);
    st.collect().unwrap();
    assert!(matches!(st.collect(), Err(Error::EmptyAccumulator)));
}
