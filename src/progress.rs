//! Console progress and time estimates for long sweeps.
//!
//! Prints the start time, the duration of the first row, the estimated total and end
//! time, and the actual end time:
//!
//! ```text
//! starting date time: 2024/03/07 09:05:02
//! Time for 1 sweep: 0.5 min
//! estimated total time: 10 min
//! estimated end: 2024/03/07 09:15:02
//! actual end: 2024/03/07 09:14:48
//! ```

use chrono::{DateTime, Duration, Local};
use std::io::Write;

const TIME_FORMAT: &str = "%Y/%m/%d %H:%M:%S";

/// Minutes rounded to two decimals, without trailing zeros.
fn minutes(duration: Duration) -> String {
    let mins = duration.num_milliseconds() as f64 / 60_000.0;
    format!("{}", (mins * 100.0).round() / 100.0)
}

/// Reports sweep progress to a console-like sink.
pub struct ProgressReporter {
    rows: usize,
    started: Option<DateTime<Local>>,
    estimated_end: Option<DateTime<Local>>,
    out: Box<dyn Write + Send>,
}

impl ProgressReporter {
    /// Reporter for `rows` outer iterations printing to stdout.
    pub fn new(rows: usize) -> Self {
        Self::with_writer(rows, Box::new(std::io::stdout()))
    }

    /// Reporter printing to `out`.
    pub fn with_writer(rows: usize, out: Box<dyn Write + Send>) -> Self {
        Self {
            rows,
            started: None,
            estimated_end: None,
            out,
        }
    }

    /// Estimated end time, known after the first row.
    pub fn estimated_end(&self) -> Option<DateTime<Local>> {
        self.estimated_end
    }

    fn line(&mut self, text: String) {
        // Console output is best effort and never aborts a sweep.
        if let Err(err) = writeln!(self.out, "{text}") {
            tracing::warn!(error = %err, "Failed to write progress line");
        }
    }

    /// Record the start time and print it.
    pub fn start(&mut self) {
        self.start_at(Local::now());
    }

    /// [`ProgressReporter::start`] at a fixed time.
    pub fn start_at(&mut self, now: DateTime<Local>) {
        self.started = Some(now);
        self.line(String::new());
        self.line(format!("starting date time: {}", now.format(TIME_FORMAT)));
    }

    /// Mark row `row` (zero-based) as done. The estimate is printed after row 0.
    pub fn row_finished(&mut self, row: usize) {
        self.row_finished_at(row, Local::now());
    }

    /// [`ProgressReporter::row_finished`] at a fixed time.
    pub fn row_finished_at(&mut self, row: usize, now: DateTime<Local>) {
        if row != 0 {
            return;
        }
        let Some(started) = self.started else {
            return;
        };
        let per_row = now - started;
        let total = per_row * self.rows as i32;
        let end = started + total;
        self.estimated_end = Some(end);
        self.line(format!("Time for 1 sweep: {} min", minutes(per_row)));
        self.line(format!("estimated total time: {} min", minutes(total)));
        self.line(format!("estimated end: {}", end.format(TIME_FORMAT)));
        tracing::debug!(rows = self.rows, estimated_end = %end, "Sweep time estimated");
    }

    /// Print the end time.
    pub fn finish(&mut self) {
        self.finish_at(Local::now());
    }

    /// [`ProgressReporter::finish`] at a fixed time.
    pub fn finish_at(&mut self, now: DateTime<Local>) {
        self.line(format!("actual end: {}", now.format(TIME_FORMAT)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Shared(Arc<Mutex<Vec<u8>>>);

    impl Write for Shared {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn prints_estimate_after_first_row() {
        let sink = Shared::default();
        let mut progress = ProgressReporter::with_writer(20, Box::new(sink.clone()));
        let t0 = Local.with_ymd_and_hms(2024, 3, 7, 9, 0, 0).unwrap();

        progress.start_at(t0);
        progress.row_finished_at(0, t0 + Duration::seconds(30));
        progress.row_finished_at(1, t0 + Duration::seconds(60));
        progress.finish_at(t0 + Duration::seconds(600));

        let text = String::from_utf8(sink.0.lock().unwrap().clone()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines,
            vec![
                "",
                "starting date time: 2024/03/07 09:00:00",
                "Time for 1 sweep: 0.5 min",
                "estimated total time: 10 min",
                "estimated end: 2024/03/07 09:10:00",
                "actual end: 2024/03/07 09:10:00",
            ]
        );
        assert_eq!(
            progress.estimated_end(),
            Some(t0 + Duration::seconds(600))
        );
    }

    #[test]
    fn no_estimate_without_start() {
        let sink = Shared::default();
        let mut progress = ProgressReporter::with_writer(5, Box::new(sink.clone()));
        progress.row_finished(0);
        assert!(progress.estimated_end().is_none());
        assert!(sink.0.lock().unwrap().is_empty());
    }
}
