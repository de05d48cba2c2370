use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::train::step_stats::StepStats;

/// Appends one JSON object per line to `working_dir/summary.jsonl`.
pub struct SummaryWriter {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl SummaryWriter {
    pub const FILENAME: &'static str = "summary.jsonl";

    pub fn create(working_dir: &Path) -> Result<Self> {
        let path = working_dir.join(Self::FILENAME);
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(SummaryWriter {
            path,
            writer: BufWriter::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write(&mut self, stats: &StepStats) -> Result<()> {
        serde_json::to_writer(&mut self.writer, stats)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        Ok(())
    }
}
