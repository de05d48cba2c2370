use std::sync::Arc;

use ferrite_resnet::Classifier;

/// State shared by every request thread.
pub struct ServerState {
    pub classifier: Classifier,
}

impl ServerState {
    pub fn new(classifier: Classifier) -> Self {
        ServerState { classifier }
    }
}

pub type SharedState = Arc<ServerState>;
