use std::sync::Arc;

use crate::error::Result;
use crate::graph::node::{Feeds, Node, Step};
use crate::graph::value::{IntoValue, Value};

type FetchFn = dyn Fn(&mut Step) -> Result<Value> + Send + Sync;

/// A named output to evaluate during a step.
#[derive(Clone)]
pub struct Fetch {
    key: String,
    run: Arc<FetchFn>,
}

impl Fetch {
    /// Fetches `node` under its own unique key.
    pub fn node<T>(node: &Node<T>) -> Self
    where
        T: IntoValue + Clone + Send + Sync + 'static,
    {
        Fetch::named(node.key(), node)
    }

    /// Fetches `node` under an explicit key such as `batch_test_assign`.
    pub fn named<T>(key: impl Into<String>, node: &Node<T>) -> Self
    where
        T: IntoValue + Clone + Send + Sync + 'static,
    {
        let node = node.clone();
        Fetch {
            key: key.into(),
            run: Arc::new(move |step| node.eval(step)?.into_value()),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub(crate) fn run(&self, step: &mut Step) -> Result<Value> {
        (self.run)(step)
    }
}

impl std::fmt::Debug for Fetch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Fetch").field(&self.key).finish()
    }
}

/// The (feeds, fetches) pair one step is executed with.
#[derive(Debug, Clone, Default)]
pub struct Request {
    feeds: Feeds,
    fetches: Vec<Fetch>,
}

impl Request {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(mut self, key: impl Into<String>, value: Value) -> Self {
        self.feeds.insert(key.into(), value);
        self
    }

    pub fn feed_entry(self, (key, value): (String, Value)) -> Self {
        self.feed(key, value)
    }

    pub fn fetch(mut self, fetch: Fetch) -> Self {
        self.fetches.push(fetch);
        self
    }

    /// Combines two requests into one step.
    pub fn merge(mut self, other: Request) -> Self {
        self.feeds.extend(other.feeds);
        self.fetches.extend(other.fetches);
        self
    }

    pub fn feeds(&self) -> &Feeds {
        &self.feeds
    }

    pub fn fetches(&self) -> &[Fetch] {
        &self.fetches
    }

    pub fn fetch_keys(&self) -> Vec<&str> {
        self.fetches.iter().map(Fetch::key).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.feeds.is_empty() && self.fetches.is_empty()
    }

    pub(crate) fn into_parts(self) -> (Feeds, Vec<Fetch>) {
        (self.feeds, self.fetches)
    }
}
