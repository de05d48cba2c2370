use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::graph::{
    BoundedQueue, Discipline, Fetch, Graph, Node, Placeholder, RemainingCounter, Request, Tensor, UNSET,
};
use crate::math::tensor::concat_rows;
use crate::pipeline::blob::Blob;

/// Turns network outputs into a value blob.
pub struct Postprocess;

impl Postprocess {
    /// Wraps each output node as a value.
    pub fn blob(values: Vec<Node<Tensor>>) -> Result<Blob> {
        if values.is_empty() {
            return Err(Error::contract("postprocess needs at least one output"));
        }
        Ok(Blob::from_values(values))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsumerConfig {
    pub batch_size: usize,
    pub num_test_crops: usize,
    /// Capacity of the output queue, in batches.
    pub capacity: usize,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        ConsumerConfig {
            batch_size: 64,
            num_test_crops: 4,
            capacity: 64,
        }
    }
}

impl ConsumerConfig {
    /// Images represented by one upstream batch.
    pub fn test_batch_size(&self) -> usize {
        (self.batch_size / self.num_test_crops.max(1)).max(1)
    }
}

type Chunk = Vec<Tensor>;

struct Slot {
    counter: Arc<RemainingCounter>,
    total: Placeholder<i64>,
    assign: Node<i64>,
    queue: Arc<BoundedQueue<Chunk>>,
}

/// Decouples the network from whoever reads its results: a background
/// runner keeps pushing evaluated output chunks into a queue, and each
/// fetch hands back only the rows still owed to the current request.
pub struct Consumer {
    config: ConsumerConfig,
    slot: Option<Slot>,
}

impl Consumer {
    pub const ASSIGN_KEY: &'static str = "consumer_assign";

    pub fn new(config: ConsumerConfig) -> Self {
        Consumer { config, slot: None }
    }

    pub fn config(&self) -> &ConsumerConfig {
        &self.config
    }

    pub fn build(&mut self, graph: &Graph, blob: Blob) -> Result<Blob> {
        let values = blob.values()?.to_vec();
        if values.is_empty() {
            return Err(Error::contract("consumer needs at least one value"));
        }
        let row_shapes = values
            .iter()
            .map(|value| {
                value
                    .shape()
                    .and_then(|shape| shape.iter().skip(1).copied().collect::<Option<Vec<_>>>())
                    .ok_or_else(|| {
                        Error::contract(format!("consumer needs the trailing shape of `{}`", value.name()))
                    })
            })
            .collect::<Result<Vec<_>>>()?;

        let tbs = self.config.test_batch_size();
        let queue = graph.queue::<Chunk>("consumer_queue", self.config.capacity, Discipline::Fifo)?;

        let signal = graph.seed_signal();
        let (sink, upstream) = (queue.clone(), values.clone());
        graph.add_queue_runner(
            "consumer",
            Node::new("consumer_enqueue", move |step| {
                let seen = signal.generation();
                let chunk = upstream
                    .iter()
                    .map(|value| value.eval(step))
                    .collect::<Result<Chunk>>()?;
                let rows = chunk.first().and_then(|first| first.shape().first().copied()).unwrap_or(0);
                if rows == 0 {
                    // Nothing is owed upstream; sleep until a request seeds a new total.
                    return signal.wait_change(seen);
                }
                sink.push(chunk)
            }),
        );

        let counter = graph.counter("consumer_total_size");
        let default_total = Node::constant("consumer_default_total_size", (self.config.capacity * tbs) as i64);
        let total = Placeholder::with_default("consumer_total_size", default_total);

        let (seeder, total_node) = (counter.clone(), total.node());
        let assign = Node::new("consumer_assign", move |step| {
            let value = total_node.eval(step)?;
            if value < 0 {
                return Err(Error::contract(format!("total size must not be negative, got {value}")));
            }
            seeder.seed(value);
            Ok(value)
        });

        let (source, remaining) = (queue.clone(), counter.clone());
        let dequeue = Node::new("consumer_dequeue", move |_| {
            let owed = remaining.get();
            let entries = if owed == UNSET {
                1
            } else if owed <= 0 {
                0
            } else {
                (owed as usize).div_ceil(tbs)
            };
            let chunks = source.pop_many(entries)?;
            let outputs = row_shapes
                .iter()
                .enumerate()
                .map(|(position, row_shape)| {
                    let parts: Vec<Tensor> = chunks.iter().map(|chunk| chunk[position].clone()).collect();
                    concat_rows(&parts, row_shape)
                })
                .collect::<Result<Vec<_>>>()?;
            let rows = outputs.first().map(|first| first.shape()[0]).unwrap_or(0);
            remaining.consume(rows);
            debug!(entries, rows, "consumer dequeued");
            Ok(Arc::new(outputs))
        });

        let outputs = values
            .iter()
            .enumerate()
            .map(|(position, value)| {
                let node = dequeue.map(&format!("consumer_{}", value.name()), move |outputs| {
                    Ok(outputs[position].clone())
                });
                match value.shape() {
                    Some(shape) => node.with_shape(shape.clone()),
                    None => node,
                }
            })
            .collect::<Vec<_>>();

        self.slot = Some(Slot {
            counter,
            total,
            assign,
            queue,
        });
        Ok(Blob::from_values(outputs))
    }

    /// Request seeding how many rows the following fetches should return.
    pub fn kwargs(&self, total_size: usize) -> Result<Request> {
        let slot = self.slot()?;
        Ok(Request::new()
            .feed_entry(slot.total.feed(total_size as i64)?)
            .fetch(Fetch::named(Self::ASSIGN_KEY, &slot.assign)))
    }

    /// Request re-seeding the default total of `capacity * test_batch_size`.
    pub fn default_kwargs(&self) -> Result<Request> {
        let slot = self.slot()?;
        Ok(Request::new().fetch(Fetch::named(Self::ASSIGN_KEY, &slot.assign)))
    }

    pub fn counter(&self) -> Result<Arc<RemainingCounter>> {
        Ok(self.slot()?.counter.clone())
    }

    /// Chunks evaluated but not yet fetched.
    pub fn pending(&self) -> usize {
        self.slot.as_ref().map(|slot| slot.queue.len()).unwrap_or(0)
    }

    fn slot(&self) -> Result<&Slot> {
        self.slot
            .as_ref()
            .ok_or_else(|| Error::missing("Consumer::build must be called first"))
    }
}
