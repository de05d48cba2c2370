pub mod counter;
pub mod graph;
pub mod node;
pub mod phase;
pub mod queue;
pub mod request;
pub mod value;

pub use counter::{RemainingCounter, SeedSignal, UNSET};
pub use graph::Graph;
pub use node::{case, zip, Feeds, Node, NodeId, Placeholder, Shape, Step};
pub use phase::{Phase, PhaseRegister};
pub use queue::{BoundedQueue, Closable, Discipline};
pub use request::{Fetch, Request};
pub use value::{Fetched, FromValue, IntoValue, Labels, Tensor, Value};
