use serde::{Deserialize, Serialize};
use std::fmt;

/// One of the three processing stages. Serialised with the agent names
/// observers see in the event stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Stage {
    Scanner,
    Fixer,
    Validator,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scanner => "Scanner",
            Self::Fixer => "Fixer",
            Self::Validator => "Validator",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
