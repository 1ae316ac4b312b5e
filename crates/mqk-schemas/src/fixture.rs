use serde::{Deserialize, Serialize};

/// Sample input series handed identically to both sandbox runs.
///
/// All columns have the same length. Values are finite.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleFixture {
    pub open: Vec<f64>,
    pub high: Vec<f64>,
    pub low: Vec<f64>,
    pub close: Vec<f64>,
    pub volume: Vec<f64>,
}

impl SampleFixture {
    pub fn len(&self) -> usize {
        self.close.len()
    }

    pub fn is_empty(&self) -> bool {
        self.close.is_empty()
    }

    /// Columns aligned and finite. Fixtures that fail this are rejected at load.
    pub fn is_well_formed(&self) -> bool {
        let n = self.close.len();
        let cols = [&self.open, &self.high, &self.low, &self.close, &self.volume];
        cols.iter().all(|c| c.len() == n) && cols.iter().all(|c| c.iter().all(|v| v.is_finite()))
    }
}
