//! Latency and failure counts grouped from result records.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::Summary;
use crate::eval::ResultRecord;

/// Grouping key for a [`LatencyReport`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GroupBy {
    /// One row per model.
    #[default]
    Model,
    /// One row per (model, image).
    ModelImage,
    /// One row per (model, turn). Single-turn records group under turn 1.
    ModelTurn,
}

/// Statistics for one group of records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatencyRow {
    /// Model identifier.
    pub model: String,

    /// Image name or turn number, depending on the grouping.
    pub detail: Option<String>,

    /// Records in the group, failures included.
    pub records: usize,

    /// Failure records in the group.
    pub failures: usize,

    /// Latency of the successful records, in seconds.
    pub latency: Option<Summary>,

    /// Mean response length in characters over successful records.
    pub mean_response_chars: f64,
}

impl LatencyRow {
    /// Fraction of records that are failures.
    #[must_use]
    pub fn failure_rate(&self) -> f64 {
        if self.records == 0 {
            0.0
        } else {
            self.failures as f64 / self.records as f64
        }
    }
}

/// Grouped latency statistics, rows in first-appearance order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatencyReport {
    /// How rows are grouped.
    pub group_by: GroupBy,

    /// One row per group.
    pub rows: Vec<LatencyRow>,

    /// Latency over every successful record.
    pub overall: Option<Summary>,
}

impl LatencyReport {
    /// Group `records` and summarize each group.
    #[must_use]
    pub fn from_records(records: &[ResultRecord], group_by: GroupBy) -> Self {
        let mut index: HashMap<(&str, Option<String>), usize> = HashMap::new();
        let mut groups: Vec<((&str, Option<String>), Vec<&ResultRecord>)> = Vec::new();
        for record in records {
            let detail = match group_by {
                GroupBy::Model => None,
                GroupBy::ModelImage => Some(record.image.clone()),
                GroupBy::ModelTurn => Some(record.turn.unwrap_or(1).to_string()),
            };
            let key = (record.model.as_str(), detail);
            let slot = *index.entry(key.clone()).or_insert_with(|| {
                groups.push((key, Vec::new()));
                groups.len() - 1
            });
            groups[slot].1.push(record);
        }

        let rows = groups
            .into_iter()
            .map(|((model, detail), members)| summarize(model, detail, &members))
            .collect();
        let overall = Summary::compute(&latencies(records.iter()));

        Self { group_by, rows, overall }
    }

    /// Total records across all rows.
    #[must_use]
    pub fn total_records(&self) -> usize {
        self.rows.iter().map(|row| row.records).sum()
    }

    /// Total failure records across all rows.
    #[must_use]
    pub fn total_failures(&self) -> usize {
        self.rows.iter().map(|row| row.failures).sum()
    }
}

fn latencies<'a>(records: impl Iterator<Item = &'a ResultRecord>) -> Vec<f64> {
    records.filter_map(|r| r.inference_time).collect()
}

fn summarize(model: &str, detail: Option<String>, members: &[&ResultRecord]) -> LatencyRow {
    let successes: Vec<&ResultRecord> = members.iter().copied().filter(|r| !r.is_failure()).collect();
    let mean_response_chars = if successes.is_empty() {
        0.0
    } else {
        successes.iter().map(|r| r.response.chars().count()).sum::<usize>() as f64 / successes.len() as f64
    };

    LatencyRow {
        model: model.to_string(),
        detail,
        records: members.len(),
        failures: members.len() - successes.len(),
        latency: Summary::compute(&latencies(successes.into_iter())),
        mean_response_chars,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(model: &str, image: &str, turn: Option<usize>, time: Option<f64>) -> ResultRecord {
        ResultRecord {
            model: model.to_string(),
            image: image.to_string(),
            turn,
            question: "q".to_string(),
            response: if time.is_some() { "abcd".to_string() } else { "Error: boom".to_string() },
            inference_time: time,
        }
    }

    fn sample() -> Vec<ResultRecord> {
        vec![
            record("llava", "image_1.png", Some(1), Some(1.0)),
            record("llava", "image_1.png", Some(2), Some(3.0)),
            record("gemini", "image_1.png", Some(1), Some(0.5)),
            record("llava", "image_2.png", Some(1), None),
        ]
    }

    #[test]
    fn test_group_by_model() {
        let report = LatencyReport::from_records(&sample(), GroupBy::Model);

        assert_eq!(report.rows.len(), 2);
        let llava = &report.rows[0];
        assert_eq!(llava.model, "llava");
        assert_eq!(llava.records, 3);
        assert_eq!(llava.failures, 1);
        assert!((llava.failure_rate() - 1.0 / 3.0).abs() < 1e-9);
        let latency = llava.latency.as_ref().unwrap();
        assert_eq!(latency.count, 2);
        assert!((latency.mean - 2.0).abs() < 1e-9);
        assert!((llava.mean_response_chars - 4.0).abs() < 1e-9);

        assert_eq!(report.rows[1].model, "gemini");
        assert_eq!(report.total_records(), 4);
        assert_eq!(report.total_failures(), 1);
        assert_eq!(report.overall.as_ref().unwrap().count, 3);
    }

    #[test]
    fn test_interleaved_groups_keep_first_appearance_order() {
        let mut records = Vec::new();
        for idx in 0..300 {
            let model = ["qwen", "llava", "gemini"][idx % 3];
            let image = format!("image_{}.png", idx % 50);
            records.push(record(model, &image, None, Some(1.0)));
        }

        let by_model = LatencyReport::from_records(&records, GroupBy::Model);
        let models: Vec<&str> = by_model.rows.iter().map(|r| r.model.as_str()).collect();
        assert_eq!(models, vec!["qwen", "llava", "gemini"]);
        assert!(by_model.rows.iter().all(|r| r.records == 100));

        let by_image = LatencyReport::from_records(&records, GroupBy::ModelImage);
        assert_eq!(by_image.rows.len(), 150);
        assert_eq!(by_image.rows[1].model, "llava");
        assert_eq!(by_image.rows[1].detail.as_deref(), Some("image_1.png"));
        assert_eq!(by_image.total_records(), 300);
    }

    #[test]
    fn test_group_by_image_and_turn() {
        let by_image = LatencyReport::from_records(&sample(), GroupBy::ModelImage);
        let keys: Vec<(&str, Option<&str>)> = by_image
            .rows
            .iter()
            .map(|r| (r.model.as_str(), r.detail.as_deref()))
            .collect();
        assert_eq!(
            keys,
            vec![
                ("llava", Some("image_1.png")),
                ("gemini", Some("image_1.png")),
                ("llava", Some("image_2.png")),
            ]
        );
        assert!(by_image.rows[2].latency.is_none());

        let by_turn = LatencyReport::from_records(&sample(), GroupBy::ModelTurn);
        assert_eq!(by_turn.rows[0].detail.as_deref(), Some("1"));
        assert_eq!(by_turn.rows[0].records, 2);
    }
}
