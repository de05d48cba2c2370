use std::sync::atomic::{AtomicU8, Ordering};

use serde::{Deserialize, Serialize};

/// Execution mode every phase-dependent computation dispatches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    #[default]
    None,
    Train,
    Test,
}

impl Phase {
    pub fn name(self) -> &'static str {
        match self {
            Phase::None => "none",
            Phase::Train => "train",
            Phase::Test => "test",
        }
    }

    fn to_raw(self) -> u8 {
        match self {
            Phase::None => 0,
            Phase::Train => 1,
            Phase::Test => 2,
        }
    }

    fn from_raw(raw: u8) -> Phase {
        match raw {
            1 => Phase::Train,
            2 => Phase::Test,
            _ => Phase::None,
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// The runtime-mutable phase register shared by one graph.
///
/// Steps snapshot the register when they begin, so a phase switch never
/// changes the branch taken halfway through a step.
#[derive(Debug, Default)]
pub struct PhaseRegister(AtomicU8);

impl PhaseRegister {
    pub fn new(phase: Phase) -> Self {
        PhaseRegister(AtomicU8::new(phase.to_raw()))
    }

    pub fn get(&self) -> Phase {
        Phase::from_raw(self.0.load(Ordering::SeqCst))
    }

    pub fn set(&self, phase: Phase) {
        self.0.store(phase.to_raw(), Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_round_trips_every_phase() {
        let register = PhaseRegister::default();
        assert_eq!(register.get(), Phase::None);
        for phase in [Phase::Train, Phase::Test, Phase::None] {
            register.set(phase);
            assert_eq!(register.get(), phase);
        }
    }
}
