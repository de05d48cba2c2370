use std::collections::BTreeMap;

use ndarray::{ArrayD, IxDyn};

use crate::error::{Error, Result};

/// Dense `f32` tensor in NHWC (or any) layout.
pub type Tensor = ArrayD<f32>;
/// Integer labels; a scalar label is a 0-d array.
pub type Labels = ArrayD<i64>;

/// The type-erased value a step can be fed with or can fetch.
#[derive(Debug, Clone)]
pub enum Value {
    Tensor(Tensor),
    Labels(Labels),
    Scalar(f64),
    Int(i64),
    /// Structured record (statistics, reports).
    Record(serde_json::Value),
    /// Result of an operation run only for its effect (enqueue, assign).
    Done,
}

impl Value {
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Tensor(_) => "tensor",
            Value::Labels(_) => "labels",
            Value::Scalar(_) => "scalar",
            Value::Int(_) => "int",
            Value::Record(_) => "record",
            Value::Done => "done",
        }
    }
}

pub trait IntoValue {
    fn into_value(self) -> Result<Value>;
}

pub trait FromValue: Sized {
    const KIND: &'static str;
    fn from_value(value: Value) -> Option<Self>;
}

impl IntoValue for Tensor {
    fn into_value(self) -> Result<Value> {
        Ok(Value::Tensor(self))
    }
}

impl FromValue for Tensor {
    const KIND: &'static str = "tensor";
    fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Tensor(t) => Some(t),
            _ => None,
        }
    }
}

impl IntoValue for Labels {
    fn into_value(self) -> Result<Value> {
        Ok(Value::Labels(self))
    }
}

impl FromValue for Labels {
    const KIND: &'static str = "labels";
    fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Labels(l) => Some(l),
            Value::Int(i) => Some(ArrayD::from_elem(IxDyn(&[]), i)),
            _ => None,
        }
    }
}

impl IntoValue for f64 {
    fn into_value(self) -> Result<Value> {
        Ok(Value::Scalar(self))
    }
}

impl FromValue for f64 {
    const KIND: &'static str = "scalar";
    fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Scalar(s) => Some(s),
            Value::Int(i) => Some(i as f64),
            _ => None,
        }
    }
}

impl IntoValue for i64 {
    fn into_value(self) -> Result<Value> {
        Ok(Value::Int(self))
    }
}

impl FromValue for i64 {
    const KIND: &'static str = "int";
    fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Int(i) => Some(i),
            _ => None,
        }
    }
}

impl IntoValue for () {
    fn into_value(self) -> Result<Value> {
        Ok(Value::Done)
    }
}

impl IntoValue for Value {
    fn into_value(self) -> Result<Value> {
        Ok(self)
    }
}

/// Values returned by one step, keyed by fetch name.
#[derive(Debug, Clone, Default)]
pub struct Fetched {
    values: BTreeMap<String, Value>,
}

impl Fetched {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.values.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Removes the value under `key` and converts it to `T`.
    pub fn take<T: FromValue>(&mut self, key: &str) -> Result<T> {
        let value = self
            .values
            .remove(key)
            .ok_or_else(|| Error::MissingFetch(key.to_owned()))?;
        T::from_value(value).ok_or_else(|| Error::ValueType {
            key: key.to_owned(),
            expected: T::KIND,
        })
    }

    pub fn tensor(&self, key: &str) -> Result<&Tensor> {
        match self.get(key) {
            Some(Value::Tensor(t)) => Ok(t),
            Some(_) => Err(Error::ValueType {
                key: key.to_owned(),
                expected: "tensor",
            }),
            None => Err(Error::MissingFetch(key.to_owned())),
        }
    }

    pub fn record<T: serde::de::DeserializeOwned>(&self, key: &str) -> Result<T> {
        match self.get(key) {
            Some(Value::Record(r)) => Ok(serde_json::from_value(r.clone())?),
            Some(_) => Err(Error::ValueType {
                key: key.to_owned(),
                expected: "record",
            }),
            None => Err(Error::MissingFetch(key.to_owned())),
        }
    }

    pub fn merge(&mut self, other: Fetched) {
        self.values.extend(other.values);
    }
}
