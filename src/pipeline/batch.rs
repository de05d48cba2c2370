use std::sync::Arc;

use ndarray::Array1;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::graph::{
    zip, BoundedQueue, Discipline, Fetch, Graph, Labels, Node, Phase, Placeholder, RemainingCounter, Request,
    Tensor,
};
use crate::math::tensor::{merge_leading, stack_examples};
use crate::pipeline::blob::{Blob, NO_LABEL};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    pub batch_size: usize,
    /// Crops per test image; a test batch holds `batch_size / num_test_crops` images.
    pub num_test_crops: usize,
    pub train_capacity: usize,
    pub train_min_after_dequeue: usize,
    pub test_capacity: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        BatchConfig {
            batch_size: 64,
            num_test_crops: 4,
            train_capacity: 5120,
            train_min_after_dequeue: 4096,
            test_capacity: 64,
        }
    }
}

impl BatchConfig {
    pub fn test_batch_size(&self) -> usize {
        (self.batch_size / self.num_test_crops.max(1)).max(1)
    }
}

type Example = (Tensor, i64);

/// Sizing path of one batch queue: a remaining-total counter, the
/// placeholder a caller seeds it through and the node that applies it.
struct Sizing {
    counter: Arc<RemainingCounter>,
    total: Placeholder<i64>,
    assign: Node<i64>,
    size: Node<usize>,
}

impl Sizing {
    fn new(graph: &Graph, name: &str, requested: usize) -> Sizing {
        let counter = graph.counter(&format!("{name}_total_size"));

        let sizer = counter.clone();
        let size = Node::new(&format!("{name}_size"), move |_| Ok(sizer.make_size(requested)));

        let (after, after_size) = (counter.clone(), size.clone());
        let next_total = Node::new(&format!("{name}_next_total_size"), move |step| {
            after_size.eval(step)?;
            Ok(after.get())
        });
        let total = Placeholder::with_default(&format!("{name}_total_size"), next_total);

        let (seeder, total_node, fed_key) = (counter.clone(), total.node(), total.key().to_owned());
        let assign = Node::new(&format!("{name}_assign"), move |step| {
            let fed = step.fed(&fed_key).is_some();
            let value = total_node.eval(step)?;
            if fed {
                if value < 0 {
                    return Err(Error::contract(format!("total size must not be negative, got {value}")));
                }
                seeder.seed(value);
            }
            Ok(value)
        });

        Sizing {
            counter,
            total,
            assign,
            size,
        }
    }
}

fn first_label(labels: &Labels) -> i64 {
    labels.iter().next().copied().unwrap_or(NO_LABEL)
}

fn known_shape(image: &Node<Tensor>) -> Result<Vec<usize>> {
    image
        .shape()
        .and_then(|shape| shape.iter().copied().collect::<Option<Vec<_>>>())
        .ok_or_else(|| Error::contract(format!("batching `{}` needs a fully known image shape", image.name())))
}

/// Collects examples into batches, shuffled for training and in arrival
/// order for testing, with a caller-seeded total for finite test runs.
pub struct Batch {
    config: BatchConfig,
    train: Option<Sizing>,
    test: Option<Sizing>,
}

impl Batch {
    pub const TRAIN_ASSIGN_KEY: &'static str = "batch_train_assign";
    pub const TEST_ASSIGN_KEY: &'static str = "batch_test_assign";

    pub fn new(config: BatchConfig) -> Self {
        Batch {
            config,
            train: None,
            test: None,
        }
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    fn join(
        &self,
        graph: &Graph,
        blob: &Blob,
        name: &str,
        queue: Arc<BoundedQueue<Example>>,
    ) -> Result<Vec<usize>> {
        let pairs = blob.as_tuple_list()?;
        let (first, _) = pairs
            .first()
            .ok_or_else(|| Error::contract(format!("{name} batch needs at least one input")))?;
        let example_shape = known_shape(first)?;
        for (lane, (image, label)) in pairs.iter().enumerate() {
            let pair = zip(&format!("{name}_example_{lane}"), image, label);
            let sink = queue.clone();
            graph.add_queue_runner(
                &format!("{name}_batch_{lane}"),
                Node::new(&format!("{name}_batch_enqueue_{lane}"), move |step| {
                    let (image, label) = pair.eval(step)?;
                    sink.push((image, first_label(&label)))
                }),
            );
        }
        Ok(example_shape)
    }

    fn dequeue(
        name: &str,
        queue: Arc<BoundedQueue<Example>>,
        sizing: &Sizing,
        example_shape: Vec<usize>,
        merge_crops: bool,
    ) -> Result<Blob> {
        let (assign, size) = (sizing.assign.clone(), sizing.size.clone());
        let batch = Node::new(&format!("{name}_batch"), move |step| {
            assign.eval(step)?;
            let size = size.eval(step)?;
            let examples = queue.pop_many(size)?;
            debug!(size, got = examples.len(), "batch dequeued");
            let (images, labels): (Vec<Tensor>, Vec<i64>) = examples.into_iter().unzip();
            let mut images = stack_examples(&images, &example_shape)?;
            if merge_crops {
                images = merge_leading(images)?;
            }
            let labels: Labels = Array1::from(labels).into_dyn();
            Ok((images, labels))
        });

        let image = batch.map(&format!("{name}_batch_image"), |(images, _)| Ok(images));
        let label = batch.map(&format!("{name}_batch_label"), |(_, labels)| Ok(labels));
        Blob::from_images_labels(image, label)
    }

    /// Shuffling batch over every input pair of the blob.
    pub fn train(&mut self, graph: &Graph, blob: Blob) -> Result<Blob> {
        let queue = graph.queue::<Example>(
            "train_batch",
            self.config.train_capacity,
            Discipline::Shuffle {
                min_after_dequeue: self.config.train_min_after_dequeue,
            },
        )?;
        let example_shape = self.join(graph, &blob, "train", queue.clone())?;
        let sizing = Sizing::new(graph, "batch_train", self.config.batch_size);

        let mut shape: Vec<Option<usize>> = vec![None];
        shape.extend(example_shape.iter().map(|&d| Some(d)));
        let blob = Self::dequeue("train", queue, &sizing, example_shape, false)?;
        self.train = Some(sizing);
        with_image_shape(blob, shape)
    }

    /// Arrival-order batch of `test_batch_size` images; the crop axis of
    /// every image is folded into the batch axis.
    pub fn test(&mut self, graph: &Graph, blob: Blob) -> Result<Blob> {
        let queue = graph.queue::<Example>("test_batch", self.config.test_capacity, Discipline::Fifo)?;
        let example_shape = self.join(graph, &blob, "test", queue.clone())?;
        let sizing = Sizing::new(graph, "batch_test", self.config.test_batch_size());

        let mut shape: Vec<Option<usize>> = vec![None];
        shape.extend(example_shape.iter().skip(1).map(|&d| Some(d)));
        let blob = Self::dequeue("test", queue, &sizing, example_shape, true)?;
        self.test = Some(sizing);
        with_image_shape(blob, shape)
    }

    fn sizing(&self, phase: Phase) -> Result<&Sizing> {
        let (slot, name) = match phase {
            Phase::Train => (&self.train, "train"),
            Phase::Test => (&self.test, "test"),
            Phase::None => return Err(Error::contract("batch sizing needs the train or test phase")),
        };
        slot.as_ref()
            .ok_or_else(|| Error::missing(format!("Batch::{name} must be called first")))
    }

    /// Request seeding the phase's counter with `total_size` examples.
    pub fn kwargs(&self, total_size: usize, phase: Phase) -> Result<Request> {
        let sizing = self.sizing(phase)?;
        let key = match phase {
            Phase::Train => Self::TRAIN_ASSIGN_KEY,
            _ => Self::TEST_ASSIGN_KEY,
        };
        Ok(Request::new()
            .feed_entry(sizing.total.feed(total_size as i64)?)
            .fetch(Fetch::named(key, &sizing.assign)))
    }

    pub fn counter(&self, phase: Phase) -> Result<Arc<RemainingCounter>> {
        Ok(self.sizing(phase)?.counter.clone())
    }
}

fn with_image_shape(blob: Blob, shape: Vec<Option<usize>>) -> Result<Blob> {
    let (image, label) = blob.single_pair()?;
    let label = label.with_shape(vec![None]);
    Blob::from_images_labels(image.with_shape(shape), label)
}
