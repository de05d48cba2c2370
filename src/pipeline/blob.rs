use ndarray::{ArrayD, IxDyn};

use crate::error::{Error, Result};
use crate::graph::{Fetch, Labels, Node, Request, Tensor};

/// Label attached to images that come without one.
pub const NO_LABEL: i64 = -1;

/// Which variant a [`Blob`] carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Content {
    ImageLabel,
    Value,
}

/// Unit of transit between pipeline stages.
///
/// Either paired image/label nodes (always the same length) or arbitrary
/// values. Stages never mutate a blob; they return a new one.
#[derive(Debug, Clone)]
pub enum Blob {
    ImageLabel {
        images: Vec<Node<Tensor>>,
        labels: Vec<Node<Labels>>,
    },
    Value {
        values: Vec<Node<Tensor>>,
    },
}

/// One node or a list of nodes; a single node becomes a unit list.
pub trait IntoNodes<T> {
    fn into_nodes(self) -> Vec<Node<T>>;
}

impl<T> IntoNodes<T> for Node<T> {
    fn into_nodes(self) -> Vec<Node<T>> {
        vec![self]
    }
}

impl<T> IntoNodes<T> for Vec<Node<T>> {
    fn into_nodes(self) -> Vec<Node<T>> {
        self
    }
}

/// Constant node holding the "no label" sentinel.
pub fn no_label() -> Node<Labels> {
    Node::constant("label", ArrayD::from_elem(IxDyn(&[]), NO_LABEL)).with_shape(vec![])
}

impl Blob {
    /// Images without labels; every image gets the [`NO_LABEL`] sentinel.
    pub fn from_images(images: impl IntoNodes<Tensor>) -> Blob {
        let images = images.into_nodes();
        let labels = images.iter().map(|_| no_label()).collect();
        Blob::ImageLabel { images, labels }
    }

    pub fn from_images_labels(
        images: impl IntoNodes<Tensor>,
        labels: impl IntoNodes<Labels>,
    ) -> Result<Blob> {
        let images = images.into_nodes();
        let labels = labels.into_nodes();
        if images.len() != labels.len() {
            return Err(Error::contract(format!(
                "blob has {} images but {} labels",
                images.len(),
                labels.len()
            )));
        }
        Ok(Blob::ImageLabel { images, labels })
    }

    pub fn from_values(values: impl IntoNodes<Tensor>) -> Blob {
        Blob::Value {
            values: values.into_nodes(),
        }
    }

    /// Keyword-style constructor: exactly one of `images` (with optional
    /// `labels`) or `values` must be given.
    pub fn from_parts(
        images: Option<Vec<Node<Tensor>>>,
        labels: Option<Vec<Node<Labels>>>,
        values: Option<Vec<Node<Tensor>>>,
    ) -> Result<Blob> {
        match (images, labels, values) {
            (Some(images), Some(labels), None) => Blob::from_images_labels(images, labels),
            (Some(images), None, None) => Ok(Blob::from_images(images)),
            (None, None, Some(values)) => Ok(Blob::from_values(values)),
            (None, Some(_), None) => Err(Error::contract("labels were given without images")),
            _ => Err(Error::contract("a blob takes exactly one of images or values")),
        }
    }

    pub fn content(&self) -> Content {
        match self {
            Blob::ImageLabel { .. } => Content::ImageLabel,
            Blob::Value { .. } => Content::Value,
        }
    }

    pub fn images(&self) -> Result<&[Node<Tensor>]> {
        match self {
            Blob::ImageLabel { images, .. } => Ok(images),
            Blob::Value { .. } => Err(Error::contract("value blob has no images")),
        }
    }

    pub fn labels(&self) -> Result<&[Node<Labels>]> {
        match self {
            Blob::ImageLabel { labels, .. } => Ok(labels),
            Blob::Value { .. } => Err(Error::contract("value blob has no labels")),
        }
    }

    pub fn values(&self) -> Result<&[Node<Tensor>]> {
        match self {
            Blob::Value { values } => Ok(values),
            Blob::ImageLabel { .. } => Err(Error::contract("image blob has no values")),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Blob::ImageLabel { images, .. } => images.len(),
            Blob::Value { values } => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Zips images with their labels.
    pub fn as_tuple_list(&self) -> Result<Vec<(Node<Tensor>, Node<Labels>)>> {
        match self {
            Blob::ImageLabel { images, labels } => {
                Ok(images.iter().cloned().zip(labels.iter().cloned()).collect())
            }
            Blob::Value { .. } => Err(Error::contract("value blob cannot be zipped into pairs")),
        }
    }

    /// The one image/label pair a network build expects.
    pub fn single_pair(&self) -> Result<(Node<Tensor>, Node<Labels>)> {
        let mut pairs = self.as_tuple_list()?;
        match (pairs.pop(), pairs.is_empty()) {
            (Some(pair), true) => Ok(pair),
            _ => Err(Error::contract(format!(
                "must pass in a single pair of image and label, got {}",
                self.len()
            ))),
        }
    }

    /// Threads the blob through a stage, for left-to-right composition.
    pub fn func<R>(self, f: impl FnOnce(Blob) -> R) -> R {
        f(self)
    }

    /// Projects the blob into a request fetching every node it carries.
    pub fn kwargs(&self) -> Request {
        match self {
            Blob::ImageLabel { images, labels } => {
                let request = images
                    .iter()
                    .fold(Request::new(), |request, image| request.fetch(Fetch::node(image)));
                labels
                    .iter()
                    .fold(request, |request, label| request.fetch(Fetch::node(label)))
            }
            Blob::Value { values } => values
                .iter()
                .fold(Request::new(), |request, value| request.fetch(Fetch::node(value))),
        }
    }
}
