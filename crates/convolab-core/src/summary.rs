//! Batch summary: success counts, per-axis rates, a per-unit table and the
//! `results.csv` export.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use crate::domain::result::UnitResult;

/// Succeeded over total for one slice of the batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rate {
    pub succeeded: usize,
    pub total: usize,
}

impl Rate {
    fn record(&mut self, success: bool) {
        self.total += 1;
        if success {
            self.succeeded += 1;
        }
    }
}

impl std::fmt::Display for Rate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.succeeded, self.total)
    }
}

/// Counts persisted alongside the results in every checkpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub export_failures: usize,
    pub by_group_size: BTreeMap<u32, Rate>,
    /// Keyed by behavior name, in first-seen order.
    pub by_behavior: Vec<(String, Rate)>,
}

impl BatchSummary {
    pub fn from_results(results: &[UnitResult]) -> Self {
        let mut summary = Self::default();
        for result in results {
            let ok = result.is_success();
            summary.total += 1;
            if ok {
                summary.succeeded += 1;
            } else {
                summary.failed += 1;
            }
            if result.export_error.is_some() {
                summary.export_failures += 1;
            }

            summary
                .by_group_size
                .entry(result.group_size)
                .or_default()
                .record(ok);

            match summary
                .by_behavior
                .iter_mut()
                .find(|(name, _)| *name == result.behavior)
            {
                Some((_, rate)) => rate.record(ok),
                None => {
                    let mut rate = Rate::default();
                    rate.record(ok);
                    summary.by_behavior.push((result.behavior.clone(), rate));
                }
            }
        }
        summary
    }
}

/// Plain-text summary block printed at the end of a run.
pub fn render_summary(summary: &BatchSummary) -> String {
    let mut out = String::new();
    out.push_str(&format!("Total units: {}\n", summary.total));
    out.push_str(&format!("Succeeded: {}\n", summary.succeeded));
    out.push_str(&format!("Failed: {}\n", summary.failed));
    if summary.export_failures > 0 {
        out.push_str(&format!("Export failures: {}\n", summary.export_failures));
    }

    out.push_str("\nBy group size:\n");
    for (size, rate) in &summary.by_group_size {
        out.push_str(&format!("  group {size}: {rate}\n"));
    }

    out.push_str("\nBy behavior:\n");
    for (name, rate) in &summary.by_behavior {
        out.push_str(&format!("  {name}: {rate}\n"));
    }
    out
}

/// One row per unit: behavior, group size, status, experiment id, error.
pub fn render_summary_table(results: &[UnitResult]) -> String {
    let rows: Vec<[String; 5]> = results
        .iter()
        .map(|r| {
            let behavior = match &r.scenario_id {
                Some(id) => format!("{} ({id})", r.behavior),
                None => r.behavior.clone(),
            };
            [
                behavior,
                r.group_size.to_string(),
                if r.is_success() { "success" } else { "error" }.to_string(),
                r.experiment_id.clone().unwrap_or_else(|| "-".into()),
                r.error
                    .clone()
                    .or_else(|| r.export_error.as_ref().map(|e| format!("export: {e}")))
                    .unwrap_or_default(),
            ]
        })
        .collect();

    let header = ["behavior", "group", "status", "experiment", "error"];
    let mut widths = header.map(str::len);
    for row in &rows {
        for (w, cell) in widths.iter_mut().zip(row.iter()) {
            *w = (*w).max(cell.chars().count());
        }
    }

    let line = |cells: &[&str]| -> String {
        let mut s = String::new();
        for (i, cell) in cells.iter().enumerate() {
            if i + 1 == cells.len() {
                s.push_str(cell);
            } else {
                s.push_str(&format!("{:<width$}  ", cell, width = widths[i]));
            }
        }
        s.trim_end().to_string() + "\n"
    };

    let mut out = line(&header);
    for row in &rows {
        let cells: Vec<&str> = row.iter().map(String::as_str).collect();
        out.push_str(&line(&cells));
    }
    out
}

/// One CSV row per unit, header first. Fields containing commas, quotes or
/// line breaks are quoted.
pub fn render_results_csv(results: &[UnitResult]) -> String {
    let mut out = String::from(
        "behavior,group_size,scenario_id,status,experiment_id,cohort_id,messages,error,export_error\n",
    );
    for r in results {
        let _ = writeln!(
            out,
            "{},{},{},{},{},{},{},{},{}",
            csv_field(&r.behavior),
            r.group_size,
            csv_field(r.scenario_id.as_deref().unwrap_or("")),
            if r.is_success() { "success" } else { "error" },
            csv_field(r.experiment_id.as_deref().unwrap_or("")),
            csv_field(r.cohort_id.as_deref().unwrap_or("")),
            r.message_count(),
            csv_field(r.error.as_deref().unwrap_or("")),
            csv_field(r.export_error.as_deref().unwrap_or("")),
        );
    }
    out
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::result::{CompletionOutcome, PartialHandle, UnitHandle};
    use crate::domain::spec::UnitKey;

    fn key(behavior: &str, size: u32) -> UnitKey {
        UnitKey {
            behavior: behavior.into(),
            group_size: size,
            scenario_id: None,
        }
    }

    fn ok(behavior: &str, size: u32, exp: &str) -> UnitResult {
        let handle = UnitHandle {
            experiment_id: exp.into(),
            cohort_id: "c".into(),
        };
        UnitResult::success(key(behavior, size), &handle, CompletionOutcome::NotAwaited, vec![], None)
    }

    fn results() -> Vec<UnitResult> {
        vec![
            ok("silent", 1, "exp-1"),
            UnitResult::failed(key("silent", 2), "500 boom".into(), PartialHandle::default()),
            ok("explanatory", 1, "exp-3"),
            ok("explanatory", 2, "exp-4"),
        ]
    }

    #[test]
    fn test_summary_counts_and_rates() {
        let summary = BatchSummary::from_results(&results());
        assert_eq!(summary.total, 4);
        assert_eq!(summary.succeeded, 3);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.by_group_size[&1].to_string(), "2/2");
        assert_eq!(summary.by_group_size[&2].to_string(), "1/2");
        assert_eq!(summary.by_behavior[0].0, "silent");
        assert_eq!(summary.by_behavior[0].1.to_string(), "1/2");
        assert_eq!(summary.by_behavior[1].1.to_string(), "2/2");
    }

    #[test]
    fn test_summary_render_is_stable() {
        let text = render_summary(&BatchSummary::from_results(&results()));
        let expected = "Total units: 4\nSucceeded: 3\nFailed: 1\n\nBy group size:\n  group 1: 2/2\n  group 2: 1/2\n\nBy behavior:\n  silent: 1/2\n  explanatory: 2/2\n";
        assert_eq!(text, expected);
    }

    #[test]
    fn test_table_aligns_columns() {
        let table = render_summary_table(&results()[..2]);
        let expected = "behavior  group  status   experiment  error\n\
                        silent    1      success  exp-1\n\
                        silent    2      error    -           500 boom\n";
        assert_eq!(table, expected);
    }

    #[test]
    fn test_empty_batch() {
        let summary = BatchSummary::from_results(&[]);
        assert_eq!(summary.total, 0);
        assert!(summary.by_behavior.is_empty());
    }

    #[test]
    fn test_results_csv_rows_and_quoting() {
        let mut rows = results()[..2].to_vec();
        rows[1].error = Some("failed to create cohort: 500 \"boom\", retry".into());
        let csv = render_results_csv(&rows);
        let expected = "behavior,group_size,scenario_id,status,experiment_id,cohort_id,messages,error,export_error\n\
                        silent,1,,success,exp-1,c,0,,\n\
                        silent,2,,error,,,0,\"failed to create cohort: 500 \"\"boom\"\", retry\",\n";
        assert_eq!(csv, expected);
    }
}
