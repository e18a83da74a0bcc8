//! Run-level metric reporting.
//!
//! [`RunRecorder`] is the process-wide observability handle: created once by
//! the run orchestrator, passed by reference to whatever needs to report,
//! torn down once at run end. Never ambient global state.

use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use ffwd_common::RunningMetrics;

/// Sink for per-phase aggregated metrics.
pub trait Recorder {
    fn record(
        &mut self,
        phase: &str,
        elapsed: Duration,
        metrics: &RunningMetrics,
        epoch: Option<usize>,
    ) -> Result<()>;
}

/// Default recorder: one `tracing` line per phase plus long-format CSV rows
/// (`phase,epoch,metric,value`) when an output directory is given.
pub struct RunRecorder {
    csv: Option<File>,
}

impl RunRecorder {
    /// Open the run. Creates `metrics.csv` under `output_dir` when given.
    pub fn init(output_dir: Option<&Path>) -> Result<Self> {
        let csv = match output_dir {
            Some(dir) => {
                std::fs::create_dir_all(dir)?;
                let path = dir.join("metrics.csv");
                let mut f = File::create(&path).context("create metrics.csv")?;
                writeln!(f, "phase,epoch,metric,value")?;
                Some(f)
            }
            None => None,
        };
        Ok(Self { csv })
    }

    /// Close the run, flushing pending CSV rows.
    pub fn finish(self) -> Result<()> {
        if let Some(mut f) = self.csv {
            f.flush()?;
        }
        Ok(())
    }
}

impl Recorder for RunRecorder {
    fn record(
        &mut self,
        phase: &str,
        elapsed: Duration,
        metrics: &RunningMetrics,
        epoch: Option<usize>,
    ) -> Result<()> {
        let summary = metrics
            .iter_sorted()
            .iter()
            .map(|(name, value)| format!("{name}={value:.4}"))
            .collect::<Vec<_>>()
            .join(" ");
        match epoch {
            Some(epoch) => tracing::info!(
                phase,
                epoch,
                elapsed_s = format!("{:.1}", elapsed.as_secs_f64()),
                "{summary}"
            ),
            None => tracing::info!(
                phase,
                elapsed_s = format!("{:.1}", elapsed.as_secs_f64()),
                "{summary}"
            ),
        }

        if let Some(f) = &mut self.csv {
            let epoch = epoch.map(|e| e.to_string()).unwrap_or_default();
            for (name, value) in metrics.iter_sorted() {
                writeln!(f, "{phase},{epoch},{name},{value}")?;
            }
        }
        Ok(())
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use ffwd_common::ScalarOutputs;

    #[test]
    fn csv_rows_are_long_format() {
        let dir = tempfile::tempdir().unwrap();
        let mut recorder = RunRecorder::init(Some(dir.path())).unwrap();

        let mut running = RunningMetrics::new();
        let outputs: ScalarOutputs =
            [("Loss".to_string(), 0.5), ("acc".to_string(), 0.25)].into();
        running.accumulate(&outputs, 1);
        recorder
            .record("train", Duration::from_secs(2), &running, Some(3))
            .unwrap();
        recorder.finish().unwrap();

        let csv = std::fs::read_to_string(dir.path().join("metrics.csv")).unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines[0], "phase,epoch,metric,value");
        assert!(lines.contains(&"train,3,Loss,0.5"));
        assert!(lines.contains(&"train,3,acc,0.25"));
    }

    #[test]
    fn no_output_dir_means_no_csv() {
        let mut recorder = RunRecorder::init(None).unwrap();
        let running = RunningMetrics::new();
        recorder
            .record("val", Duration::from_secs(1), &running, None)
            .unwrap();
        recorder.finish().unwrap();
    }
}
