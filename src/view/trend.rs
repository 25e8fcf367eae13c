use crate::record::Record;
use crate::utils;

/// Summary line data for the health-data view.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TrendSummary {
    /// Weight trend, oldest to newest.
    pub sparkline: String,
    pub latest_weight: Option<f64>,
    pub avg_weight: Option<f64>,
    pub avg_heart_rate: Option<f64>,
    pub total_steps: Option<f64>,
}

impl TrendSummary {
    /// `records` are expected newest first, as a loaded collection is.
    pub fn from_records(records: &[Record]) -> Self {
        let weights: Vec<f64> = records
            .iter()
            .rev()
            .filter_map(|r| r.number("weight"))
            .filter(|w| *w > 0.0)
            .collect();
        let heart_rates: Vec<f64> = records.iter().filter_map(|r| r.number("heartRate")).collect();
        let steps: Vec<f64> = records.iter().filter_map(|r| r.number("steps")).collect();

        Self {
            sparkline: utils::sparkline(&weights),
            latest_weight: weights.last().copied(),
            avg_weight: utils::avg(&weights),
            avg_heart_rate: utils::avg(&heart_rates),
            total_steps: utils::sum(&steps).map(|s| utils::round(s, 0)),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.sparkline.is_empty()
            && self.avg_heart_rate.is_none()
            && self.total_steps.is_none()
    }

    pub fn lines(&self) -> Vec<String> {
        let fmt = |v: Option<f64>, unit: &str| match v {
            Some(n) => format!("{}{unit}", utils::format_number(n)),
            None => "-".to_string(),
        };
        let mut out = Vec::new();
        if !self.sparkline.is_empty() {
            out.push(format!(
                "Weight trend  {}  (latest {})",
                self.sparkline,
                fmt(self.latest_weight, " kg")
            ));
        }
        out.push(format!(
            "Avg weight {}   Avg heart rate {}   Total steps {}",
            fmt(self.avg_weight, " kg"),
            fmt(self.avg_heart_rate, " bpm"),
            fmt(self.total_steps, "")
        ));
        out
    }
}
