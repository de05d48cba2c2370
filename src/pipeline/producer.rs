use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ndarray::{ArrayD, IxDyn};
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::meta::MetaConfig;
use crate::error::{Error, Result};
use crate::graph::{BoundedQueue, Discipline, Fetch, Graph, Labels, Node, Placeholder, Request, Shape, Tensor};
use crate::image::decode;
use crate::pipeline::blob::Blob;

// ---------------------------------------------------------------------------
// SimpleProducer
// ---------------------------------------------------------------------------

/// One externally fed image per step, no buffering.
#[derive(Default)]
pub struct SimpleProducer {
    slot: Option<Placeholder<Tensor>>,
}

impl SimpleProducer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn blob(&mut self, name: &str, shape: Option<Shape>) -> Blob {
        let mut placeholder = Placeholder::new(name);
        if let Some(shape) = shape {
            placeholder = placeholder.with_shape(shape);
        }
        let image = placeholder.node();
        self.slot = Some(placeholder);
        Blob::from_images(image)
    }

    /// Feed supplying the image for the next step.
    pub fn kwargs(&self, image: Tensor) -> Result<Request> {
        let slot = self
            .slot
            .as_ref()
            .ok_or_else(|| Error::missing("SimpleProducer::blob must be called first"))?;
        Ok(Request::new().feed_entry(slot.feed(image)?))
    }
}

// ---------------------------------------------------------------------------
// QueueProducer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueProducerConfig {
    pub capacity: usize,
}

impl Default for QueueProducerConfig {
    fn default() -> Self {
        QueueProducerConfig { capacity: 1024 }
    }
}

struct QueueSlot {
    placeholder: Placeholder<Tensor>,
    enqueue: Node<()>,
    queue: Arc<BoundedQueue<Tensor>>,
}

/// Bounded FIFO between an external feed and the pipeline: the caller
/// pushes one image per step, the pipeline pops one image per step.
pub struct QueueProducer {
    config: QueueProducerConfig,
    slot: Option<QueueSlot>,
}

impl QueueProducer {
    pub const ENQUEUE_KEY: &'static str = "queue_producer_enqueue";

    pub fn new(config: QueueProducerConfig) -> Self {
        QueueProducer { config, slot: None }
    }

    pub fn blob(&mut self, graph: &Graph, name: &str, shape: Option<Shape>) -> Result<Blob> {
        let queue = graph.queue::<Tensor>(&format!("{name}_queue"), self.config.capacity, Discipline::Fifo)?;
        let placeholder = Placeholder::new(name);

        let fed = placeholder.node();
        let sink = queue.clone();
        let enqueue = Node::new(&format!("{name}_enqueue"), move |step| sink.push(fed.eval(step)?));

        let source = queue.clone();
        let mut image = Node::new(&format!("{name}_dequeue"), move |_| source.pop());
        if let Some(shape) = shape {
            image = image.with_shape(shape);
        }

        self.slot = Some(QueueSlot {
            placeholder,
            enqueue,
            queue,
        });
        Ok(Blob::from_images(image))
    }

    /// Request pushing `image` into the queue.
    pub fn kwargs(&self, image: Tensor) -> Result<Request> {
        let slot = self
            .slot
            .as_ref()
            .ok_or_else(|| Error::missing("QueueProducer::blob must be called first"))?;
        Ok(Request::new()
            .feed_entry(slot.placeholder.feed(image)?)
            .fetch(Fetch::named(Self::ENQUEUE_KEY, &slot.enqueue)))
    }

    /// Images pushed but not yet taken by the pipeline.
    pub fn pending(&self) -> usize {
        self.slot.as_ref().map(|slot| slot.queue.len()).unwrap_or(0)
    }
}

// ---------------------------------------------------------------------------
// FileProducer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileProducerConfig {
    /// Capacity of each reader's filename queue.
    pub capacity: usize,
    pub num_train_inputs: usize,
    pub num_test_inputs: usize,
    /// Files whose name hashes to 0 modulo this value form the test split.
    pub subsample_size: u64,
    pub extension: String,
}

impl Default for FileProducerConfig {
    fn default() -> Self {
        FileProducerConfig {
            capacity: 32,
            num_train_inputs: 8,
            num_test_inputs: 1,
            subsample_size: 64,
            extension: "jpg".to_owned(),
        }
    }
}

/// 64-bit FNV-1a; stable across runs and platforms.
pub fn stable_hash(text: &str) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    text.bytes()
        .fold(OFFSET, |hash, byte| (hash ^ byte as u64).wrapping_mul(PRIME))
}

/// Test-split membership of a file, decided by its name alone.
pub fn in_subsample(file_name: &str, subsample_size: u64) -> bool {
    subsample_size > 0 && stable_hash(file_name) % subsample_size == 0
}

/// Labeled image files read from `image_dir/<class_name>/**`.
pub struct FileProducer {
    config: FileProducerConfig,
}

impl FileProducer {
    pub fn new(config: FileProducerConfig) -> Self {
        FileProducer { config }
    }

    pub fn config(&self) -> &FileProducerConfig {
        &self.config
    }

    /// Every matching file of the requested split with its label, in
    /// class order then sorted path order. Missing class directories
    /// contribute nothing.
    pub fn list_files(
        &self,
        meta: &MetaConfig,
        image_dir: &Path,
        subsample_divisible: bool,
    ) -> Result<Vec<(PathBuf, i64)>> {
        if self.config.subsample_size == 0 {
            return Err(Error::contract("subsample_size must be positive"));
        }
        let suffix = format!(".{}", self.config.extension);
        let mut files = Vec::new();
        for (label, class_name) in meta.class_names().iter().enumerate() {
            let class_dir = image_dir.join(class_name);
            if !class_dir.is_dir() {
                continue;
            }
            let mut found = Vec::new();
            walk(&class_dir, &mut found)?;
            found.sort();
            for path in found {
                let file_name = match path.file_name() {
                    Some(name) => name.to_string_lossy().into_owned(),
                    None => continue,
                };
                if !file_name.ends_with(&suffix) {
                    continue;
                }
                if in_subsample(&file_name, self.config.subsample_size) != subsample_divisible {
                    continue;
                }
                files.push((path, label as i64));
            }
        }
        Ok(files)
    }

    /// Drops every file that does not decode. Such files are deleted from
    /// disk permanently.
    pub fn check(files: Vec<(PathBuf, i64)>) -> Vec<(PathBuf, i64)> {
        let total = files.len();
        let mut kept = Vec::with_capacity(total);
        for (num, (path, label)) in files.into_iter().enumerate() {
            if (num + 1) % 1000 == 0 || num + 1 == total {
                info!("Checking image {} / {}", num + 1, total);
            }
            if decode::is_readable(&path) {
                kept.push((path, label));
                continue;
            }
            warn!(path = %path.display(), "removing unreadable image");
            if let Err(err) = fs::remove_file(&path) {
                warn!(path = %path.display(), error = %err, "could not remove unreadable image");
            }
        }
        kept
    }

    #[allow(clippy::too_many_arguments)]
    fn blob(
        &self,
        graph: &Graph,
        meta: &MetaConfig,
        image_dir: &Path,
        name: &str,
        num_inputs: usize,
        subsample_divisible: bool,
        check: bool,
        shuffle: bool,
    ) -> Result<Blob> {
        let mut files = self.list_files(meta, image_dir, subsample_divisible)?;
        if check {
            files = Self::check(files);
        }
        if files.is_empty() {
            return Err(Error::missing(format!(
                "no .{} files for the {name} split under {}",
                self.config.extension,
                image_dir.display()
            )));
        }
        info!(split = name, files = files.len(), readers = num_inputs, "file producer ready");

        let mut images = Vec::with_capacity(num_inputs);
        let mut labels = Vec::with_capacity(num_inputs);
        for lane in 0..num_inputs {
            if shuffle {
                files.shuffle(&mut rand::thread_rng());
            }
            let lane_name = format!("{name}_file_{lane}");
            let queue = graph.queue::<(PathBuf, i64)>(&lane_name, self.config.capacity, Discipline::Fifo)?;

            let listing = Arc::new(files.clone());
            let sink = queue.clone();
            graph.add_queue_runner(
                &lane_name,
                Node::new(&format!("{lane_name}_enqueue"), move |_| sink.push_many(listing.iter().cloned())),
            );

            let source = queue.clone();
            let entry = Node::new(&format!("{lane_name}_dequeue"), move |_| source.pop());
            let image = entry
                .map(&format!("{lane_name}_image"), |(path, _)| decode::decode_file(path))
                .with_shape(vec![None, None, Some(3)]);
            let label: Node<Labels> = entry
                .map(&format!("{lane_name}_label"), |(_, label)| Ok(ArrayD::from_elem(IxDyn(&[]), label)))
                .with_shape(vec![]);
            images.push(image);
            labels.push(label);
        }
        Blob::from_images_labels(images, labels)
    }

    /// Training split: shuffled, spread over `num_train_inputs` readers.
    pub fn train_blob(&self, graph: &Graph, meta: &MetaConfig, image_dir: &Path, check: bool) -> Result<Blob> {
        self.blob(graph, meta, image_dir, "train", self.config.num_train_inputs, false, check, true)
    }

    /// Test split: in listing order over `num_test_inputs` readers.
    pub fn test_blob(&self, graph: &Graph, meta: &MetaConfig, image_dir: &Path, check: bool) -> Result<Blob> {
        self.blob(graph, meta, image_dir, "test", self.config.num_test_inputs, true, check, false)
    }

    /// File producers take no per-step input.
    pub fn kwargs(&self) -> Request {
        Request::new()
    }
}

fn walk(dir: &Path, found: &mut Vec<PathBuf>) -> Result<()> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            walk(&path, found)?;
        } else {
            found.push(path);
        }
    }
    Ok(())
}
