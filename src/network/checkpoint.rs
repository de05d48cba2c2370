use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Error, Result};
use crate::network::params::Parameter;
use crate::util::npz;

/// Bookkeeping saved next to the weights.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointMeta {
    pub global_step: u64,
    pub class_names: Vec<String>,
}

/// `model.npz` (every parameter by name) plus `model.json` in a working directory.
#[derive(Debug, Clone)]
pub struct Checkpoint {
    dir: PathBuf,
}

impl Checkpoint {
    pub const WEIGHTS_FILENAME: &'static str = "model.npz";
    pub const META_FILENAME: &'static str = "model.json";

    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Checkpoint { dir: dir.into() }
    }

    pub fn weights_path(&self) -> PathBuf {
        self.dir.join(Self::WEIGHTS_FILENAME)
    }

    pub fn meta_path(&self) -> PathBuf {
        self.dir.join(Self::META_FILENAME)
    }

    pub fn exists(&self) -> bool {
        self.weights_path().is_file() && self.meta_path().is_file()
    }

    pub fn save<'a>(
        &self,
        params: impl IntoIterator<Item = &'a Parameter>,
        global_step: u64,
        class_names: &[String],
    ) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        let weights = self.weights_path();
        let staging = weights.with_extension("npz.tmp");
        npz::write_all(&staging, params.into_iter().map(|p| (p.name.as_str(), &p.value)))?;
        fs::rename(&staging, &weights)?;

        let meta = CheckpointMeta {
            global_step,
            class_names: class_names.to_vec(),
        };
        let writer = BufWriter::new(File::create(self.meta_path())?);
        serde_json::to_writer_pretty(writer, &meta)?;
        info!(path = %weights.display(), global_step, "Model saved");
        Ok(())
    }

    pub fn load_meta(&self) -> Result<CheckpointMeta> {
        let reader = BufReader::new(File::open(self.meta_path())?);
        Ok(serde_json::from_reader(reader)?)
    }

    /// Overwrites every parameter from the checkpoint; returns the saved global step.
    pub fn restore<'a>(
        &self,
        params: impl IntoIterator<Item = &'a mut Parameter>,
        class_names: &[String],
    ) -> Result<u64> {
        let meta = self.load_meta()?;
        if meta.class_names != class_names {
            return Err(Error::contract(format!(
                "checkpoint in {} was trained on classes {:?}, not {:?}",
                self.dir.display(),
                meta.class_names,
                class_names
            )));
        }
        let mut arrays = npz::read_all(self.weights_path())?;
        for param in params {
            let value = arrays
                .remove(&param.name)
                .ok_or_else(|| Error::contract(format!("checkpoint has no `{}`", param.name)))?;
            if value.shape() != param.value.shape() {
                return Err(Error::contract(format!(
                    "checkpoint `{}` has shape {:?}, expected {:?}",
                    param.name,
                    value.shape(),
                    param.value.shape()
                )));
            }
            param.value = value;
        }
        info!(path = %self.weights_path().display(), global_step = meta.global_step, "Model restored");
        Ok(meta.global_step)
    }
}
