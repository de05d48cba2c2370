use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::graph::phase::Phase;
use crate::graph::value::{FromValue, IntoValue, Value};

pub type NodeId = u64;

/// Static shape hint; `None` marks a dimension only known at step time.
pub type Shape = Vec<Option<usize>>;

/// Values fed into a step, keyed by placeholder key.
pub type Feeds = HashMap<String, Value>;

static NEXT_NODE: AtomicU64 = AtomicU64::new(1);

fn next_id() -> NodeId {
    NEXT_NODE.fetch_add(1, Ordering::Relaxed)
}

type Eval<T> = dyn Fn(&mut Step) -> Result<T> + Send + Sync;

// ---------------------------------------------------------------------------
// Step
// ---------------------------------------------------------------------------

/// One execution of (part of) the graph.
///
/// Every node is evaluated at most once per step: the first evaluation is
/// memoised, so two nodes derived from the same dequeue see the same item.
pub struct Step {
    phase: Phase,
    feeds: Feeds,
    memo: HashMap<NodeId, Box<dyn Any + Send>>,
}

impl Step {
    pub fn new(phase: Phase, feeds: Feeds) -> Self {
        Step {
            phase,
            feeds,
            memo: HashMap::new(),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn fed(&self, key: &str) -> Option<&Value> {
        self.feeds.get(key)
    }
}

// ---------------------------------------------------------------------------
// Node
// ---------------------------------------------------------------------------

/// A named computation evaluated lazily inside a [`Step`].
pub struct Node<T> {
    id: NodeId,
    name: Arc<str>,
    shape: Option<Shape>,
    eval: Arc<Eval<T>>,
}

impl<T> Clone for Node<T> {
    fn clone(&self) -> Self {
        Node {
            id: self.id,
            name: self.name.clone(),
            shape: self.shape.clone(),
            eval: self.eval.clone(),
        }
    }
}

impl<T> std::fmt::Debug for Node<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("key", &self.key())
            .field("shape", &self.shape)
            .finish()
    }
}

impl<T> Node<T> {
    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Unique fetch key of this node.
    pub fn key(&self) -> String {
        format!("{}:{}", self.name, self.id)
    }

    pub fn shape(&self) -> Option<&Shape> {
        self.shape.as_ref()
    }

    /// Attaches a static shape hint.
    pub fn with_shape(mut self, shape: Shape) -> Self {
        self.shape = Some(shape);
        self
    }
}

impl<T: Clone + Send + Sync + 'static> Node<T> {
    pub fn new<F>(name: &str, eval: F) -> Self
    where
        F: Fn(&mut Step) -> Result<T> + Send + Sync + 'static,
    {
        Self::with_id(next_id(), name, eval)
    }

    fn with_id<F>(id: NodeId, name: &str, eval: F) -> Self
    where
        F: Fn(&mut Step) -> Result<T> + Send + Sync + 'static,
    {
        Node {
            id,
            name: Arc::from(name),
            shape: None,
            eval: Arc::new(eval),
        }
    }

    pub fn constant(name: &str, value: T) -> Self {
        Node::new(name, move |_| Ok(value.clone()))
    }

    /// Evaluates the node, reusing the value if this step already produced it.
    pub fn eval(&self, step: &mut Step) -> Result<T> {
        if let Some(cached) = step.memo.get(&self.id) {
            if let Some(value) = cached.downcast_ref::<T>() {
                return Ok(value.clone());
            }
        }
        let value = (self.eval)(step)?;
        step.memo.insert(self.id, Box::new(value.clone()));
        Ok(value)
    }

    pub fn map<U, F>(&self, name: &str, f: F) -> Node<U>
    where
        U: Clone + Send + Sync + 'static,
        F: Fn(T) -> Result<U> + Send + Sync + 'static,
    {
        let source = self.clone();
        Node::new(name, move |step| f(source.eval(step)?))
    }
}

/// Pairs two nodes so they are evaluated within the same step.
pub fn zip<A, B>(name: &str, a: &Node<A>, b: &Node<B>) -> Node<(A, B)>
where
    A: Clone + Send + Sync + 'static,
    B: Clone + Send + Sync + 'static,
{
    let (a, b) = (a.clone(), b.clone());
    Node::new(name, move |step| Ok((a.eval(step)?, b.eval(step)?)))
}

/// Phase dispatch: evaluates the branch registered for the step's phase,
/// falling back to the first branch when no pair matches.
pub fn case<T>(name: &str, branches: Vec<(Phase, Node<T>)>) -> Result<Node<T>>
where
    T: Clone + Send + Sync + 'static,
{
    let default = match branches.first() {
        Some((_, node)) => node.clone(),
        None => return Err(Error::contract(format!("case `{name}` needs at least one branch"))),
    };
    let shape = default.shape().cloned();
    let node = Node::new(name, move |step| {
        let phase = step.phase();
        let branch = branches
            .iter()
            .find(|(p, _)| *p == phase)
            .map(|(_, node)| node)
            .unwrap_or(&default);
        branch.eval(step)
    });
    Ok(match shape {
        Some(shape) => node.with_shape(shape),
        None => node,
    })
}

// ---------------------------------------------------------------------------
// Placeholder
// ---------------------------------------------------------------------------

/// A slot filled from the step's feeds, optionally backed by a default node.
pub struct Placeholder<T> {
    key: String,
    node: Node<T>,
}

impl<T> Clone for Placeholder<T> {
    fn clone(&self) -> Self {
        Placeholder {
            key: self.key.clone(),
            node: self.node.clone(),
        }
    }
}

impl<T> Placeholder<T>
where
    T: FromValue + IntoValue + Clone + Send + Sync + 'static,
{
    pub fn new(name: &str) -> Self {
        Self::build(name, None)
    }

    pub fn with_default(name: &str, default: Node<T>) -> Self {
        Self::build(name, Some(default))
    }

    fn build(name: &str, default: Option<Node<T>>) -> Self {
        let id = next_id();
        let key = format!("{name}:{id}");
        let lookup = key.clone();
        let node = Node::with_id(id, name, move |step| match step.fed(&lookup) {
            Some(value) => T::from_value(value.clone()).ok_or_else(|| Error::ValueType {
                key: lookup.clone(),
                expected: T::KIND,
            }),
            None => match &default {
                Some(default) => default.eval(step),
                None => Err(Error::contract(format!("placeholder `{lookup}` must be fed"))),
            },
        });
        Placeholder { key, node }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn node(&self) -> Node<T> {
        self.node.clone()
    }

    pub fn with_shape(mut self, shape: Shape) -> Self {
        self.node = self.node.with_shape(shape);
        self
    }

    /// Builds the feed entry assigning `value` to this slot.
    pub fn feed(&self, value: T) -> Result<(String, Value)> {
        Ok((self.key.clone(), value.into_value()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn node_is_evaluated_once_per_step() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let source = Node::new("source", move |_| Ok(counter.fetch_add(1, Ordering::SeqCst) as i64));
        let a = source.map("a", |v| Ok(v + 10));
        let b = source.map("b", |v| Ok(v + 20));
        let both = zip("both", &a, &b);

        let mut step = Step::new(Phase::None, Feeds::new());
        assert_eq!(both.eval(&mut step).unwrap(), (10, 20));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let mut next = Step::new(Phase::None, Feeds::new());
        assert_eq!(both.eval(&mut next).unwrap(), (11, 21));
    }

    #[test]
    fn case_falls_back_to_first_branch() {
        let node = case(
            "pick",
            vec![
                (Phase::Train, Node::constant("train", 1i64)),
                (Phase::Test, Node::constant("test", 2i64)),
            ],
        )
        .unwrap();
        let eval = |phase| node.eval(&mut Step::new(phase, Feeds::new())).unwrap();
        assert_eq!(eval(Phase::Train), 1);
        assert_eq!(eval(Phase::Test), 2);
        assert_eq!(eval(Phase::None), 1);
    }

    #[test]
    fn placeholder_prefers_feed_over_default() {
        let slot = Placeholder::with_default("total", Node::constant("fallback", 7i64));
        let node = slot.node();
        assert_eq!(node.eval(&mut Step::new(Phase::None, Feeds::new())).unwrap(), 7);

        let (key, value) = slot.feed(3).unwrap();
        let mut feeds = Feeds::new();
        feeds.insert(key, value);
        assert_eq!(node.eval(&mut Step::new(Phase::None, feeds)).unwrap(), 3);
    }

    #[test]
    fn placeholder_without_default_requires_feed() {
        let slot: Placeholder<i64> = Placeholder::new("image");
        let err = slot.node().eval(&mut Step::new(Phase::None, Feeds::new()));
        assert!(matches!(err, Err(Error::Contract(_))));
    }
}
