use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::network::net::NetConfig;
use crate::network::resnet::ResNetSpec;
use crate::pipeline::{BatchConfig, ConsumerConfig, FileProducerConfig, PreprocessConfig, QueueProducerConfig};
use crate::serve::classifier::ServeConfig;

/// Settings of a training run outside the pipeline stages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainSettings {
    pub iterations: usize,
    pub test_interval: usize,
    pub summary_interval: usize,
    /// Checkpoint cadence in iterations; 0 saves only at the end.
    pub save_per: usize,
    /// Decode every image before training and delete the unreadable ones.
    pub check_images: bool,
    pub is_show: bool,
}

impl Default for TrainSettings {
    fn default() -> Self {
        TrainSettings {
            iterations: 100_000,
            test_interval: 5,
            summary_interval: 5,
            save_per: 1000,
            check_images: false,
            is_show: true,
        }
    }
}

/// Every hyperparameter of a run, one section per component.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub queue_producer: QueueProducerConfig,
    pub file_producer: FileProducerConfig,
    pub preprocess: PreprocessConfig,
    pub batch: BatchConfig,
    pub net: NetConfig,
    pub consumer: ConsumerConfig,
    pub train: TrainSettings,
    pub serve: ServeConfig,
    pub resnet: ResNetSpec,
}

impl RunConfig {
    /// Sets the crop count in every section that depends on it.
    pub fn with_test_crops(mut self, num_test_crops: usize) -> Self {
        self.preprocess.num_test_crops = num_test_crops;
        self.batch.num_test_crops = num_test_crops;
        self.net.num_test_crops = num_test_crops;
        self.consumer.num_test_crops = num_test_crops;
        self
    }

    /// Sets the batch size of the batch and consumer sections together.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch.batch_size = batch_size;
        self.consumer.batch_size = batch_size;
        self
    }

    /// Checks that sections describing the same quantity agree.
    pub fn validate(&self) -> Result<()> {
        let crops = self.preprocess.num_test_crops;
        if crops == 0 {
            return Err(Error::contract("num_test_crops must be positive"));
        }
        if [self.batch.num_test_crops, self.net.num_test_crops, self.consumer.num_test_crops]
            .iter()
            .any(|&c| c != crops)
        {
            return Err(Error::contract(
                "preprocess, batch, net and consumer must agree on num_test_crops",
            ));
        }
        if self.batch.batch_size == 0 || self.batch.batch_size != self.consumer.batch_size {
            return Err(Error::contract("batch and consumer must agree on a positive batch_size"));
        }
        if self.batch.train_min_after_dequeue >= self.batch.train_capacity {
            return Err(Error::contract("train_min_after_dequeue must be below train_capacity"));
        }
        Ok(())
    }

    /// Serializes the config to a pretty-printed JSON file.
    pub fn save_json(&self, path: impl AsRef<Path>) -> Result<()> {
        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(writer, self)?;
        Ok(())
    }

    /// Deserializes and validates a config; missing sections and fields take
    /// their defaults.
    pub fn load_json(path: impl AsRef<Path>) -> Result<RunConfig> {
        let reader = BufReader::new(File::open(path)?);
        let config: RunConfig = serde_json::from_reader(reader)?;
        config.validate()?;
        Ok(config)
    }
}
