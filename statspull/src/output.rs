//! JSONL output
//!
//! This format writes one JSON object per line. Each line representing a single
//! pulled row.

use std::io::Write;

use serde::Serialize;
use uuid::Uuid;

use crate::atom::Row;

/// JSONL output errors
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// IO errors during write operations
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// JSON serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Serialize)]
/// The structure of an output line.
pub struct Line<'a> {
    /// An id unique to this run, distinguishing the output of separate runs
    /// written to the same place.
    pub run_id: Uuid,
    /// Milliseconds since the start of the run at which the row was pulled.
    pub time: i64,
    /// The pulled row.
    #[serde(flatten)]
    pub row: &'a Row,
}

/// JSONL row writer
#[derive(Debug)]
pub struct Writer<W: Write> {
    run_id: Uuid,
    writer: W,
}

impl<W: Write> Writer<W> {
    /// Create a new instance of `Writer`, tagging every line with `run_id`.
    #[must_use]
    pub fn new(run_id: Uuid, writer: W) -> Self {
        Self { run_id, writer }
    }

    /// Write a single row pulled at `time`
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or writing fails
    pub fn write_row(&mut self, time: i64, row: &Row) -> Result<(), Error> {
        let line = Line {
            run_id: self.run_id,
            time,
            row,
        };
        let payload = serde_json::to_string(&line)?;
        self.writer.write_all(payload.as_bytes())?;
        self.writer.write_all(b"\n")?;
        Ok(())
    }

    /// Flush any buffered data
    ///
    /// # Errors
    ///
    /// Returns an error if flushing fails
    pub fn flush(&mut self) -> Result<(), Error> {
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atom::Atom;
    use netstats::{CounterSet, Counters, Key};

    #[test]
    fn writes_one_line_per_row() {
        let stats: CounterSet = [
            (Key::new("wlan0", 1), Counters::new(1, 1, 1, 1)),
            (Key::new("wlan0", 2), Counters::new(2, 2, 2, 2)),
        ]
        .into_iter()
        .collect();
        let rows = Atom::WifiBytesTransfer.rows(&stats);

        let mut buffer = Vec::new();
        let run_id = Uuid::new_v4();
        let mut writer = Writer::new(run_id, &mut buffer);
        for row in &rows {
            writer.write_row(1_000, row).expect("write should succeed");
        }
        writer.flush().expect("flush should succeed");

        let output = String::from_utf8(buffer).expect("should be valid UTF-8");
        let lines: Vec<&str> = output.lines().collect();
        assert_eq!(lines.len(), 2, "should have 2 lines");

        for (idx, line) in lines.iter().enumerate() {
            let parsed: serde_json::Value = serde_json::from_str(line).expect("should deserialize");
            assert_eq!(parsed["run_id"], run_id.to_string());
            assert_eq!(parsed["time"], 1_000);
            assert_eq!(parsed["atom"], "wifi_bytes_transfer");
            assert_eq!(parsed["uid"], i64::try_from(idx).expect("small") + 1);
        }
    }
}
