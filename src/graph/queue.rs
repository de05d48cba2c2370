use std::collections::VecDeque;

use parking_lot::{Condvar, Mutex};
use rand::Rng;

use crate::error::{Error, Result};

/// Dequeue order of a [`BoundedQueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Discipline {
    Fifo,
    /// Random element order; a pop waits until more than `min_after_dequeue`
    /// items are buffered (unless the queue is closed).
    Shuffle { min_after_dequeue: usize },
}

/// Anything the owning graph must be able to shut down.
pub trait Closable: Send + Sync {
    fn name(&self) -> &str;
    fn close(&self);
}

struct State<T> {
    items: VecDeque<T>,
    closed: bool,
}

/// Blocking bounded queue: pushes wait while full, pops wait while empty.
///
/// Closing wakes every waiter. Pushes then fail immediately; pops drain what
/// is left and fail once the queue is empty.
pub struct BoundedQueue<T> {
    name: String,
    capacity: usize,
    discipline: Discipline,
    state: Mutex<State<T>>,
    not_empty: Condvar,
    not_full: Condvar,
}

impl<T: Send> BoundedQueue<T> {
    pub fn new(name: impl Into<String>, capacity: usize, discipline: Discipline) -> Result<Self> {
        let name = name.into();
        if capacity == 0 {
            return Err(Error::contract(format!("queue `{name}` needs a positive capacity")));
        }
        if let Discipline::Shuffle { min_after_dequeue } = discipline {
            if min_after_dequeue >= capacity {
                return Err(Error::contract(format!(
                    "queue `{name}`: min_after_dequeue ({min_after_dequeue}) must be below capacity ({capacity})"
                )));
            }
        }
        Ok(BoundedQueue {
            name,
            capacity,
            discipline,
            state: Mutex::new(State {
                items: VecDeque::with_capacity(capacity.min(1024)),
                closed: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub fn push(&self, item: T) -> Result<()> {
        let mut state = self.state.lock();
        while state.items.len() >= self.capacity && !state.closed {
            self.not_full.wait(&mut state);
        }
        if state.closed {
            return Err(Error::QueueClosed(self.name.clone()));
        }
        state.items.push_back(item);
        drop(state);
        self.not_empty.notify_all();
        Ok(())
    }

    /// Pushes every item in order, blocking as often as needed.
    pub fn push_many(&self, items: impl IntoIterator<Item = T>) -> Result<()> {
        for item in items {
            self.push(item)?;
        }
        Ok(())
    }

    pub fn pop(&self) -> Result<T> {
        let mut state = self.state.lock();
        loop {
            let ready = match self.discipline {
                Discipline::Fifo => !state.items.is_empty(),
                Discipline::Shuffle { min_after_dequeue } => {
                    state.items.len() > min_after_dequeue || (state.closed && !state.items.is_empty())
                }
            };
            if ready {
                break;
            }
            if state.closed {
                return Err(Error::QueueClosed(self.name.clone()));
            }
            self.not_empty.wait(&mut state);
        }
        let item = match self.discipline {
            Discipline::Fifo => state.items.pop_front(),
            Discipline::Shuffle { .. } => {
                let index = rand::thread_rng().gen_range(0..state.items.len());
                state.items.swap_remove_back(index)
            }
        };
        drop(state);
        self.not_full.notify_all();
        item.ok_or_else(|| Error::QueueClosed(self.name.clone()))
    }

    /// Pops `n` items one at a time, so `n` may exceed the capacity as long as
    /// producers keep up. Items taken before a close are discarded.
    pub fn pop_many(&self, n: usize) -> Result<Vec<T>> {
        let mut items = Vec::with_capacity(n);
        for _ in 0..n {
            items.push(self.pop()?);
        }
        Ok(items)
    }
}

impl<T: Send> Closable for BoundedQueue<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn close(&self) {
        self.state.lock().closed = true;
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }
}
