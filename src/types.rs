use serde::{Deserialize, Serialize};

/// Lifecycle transition a host reports for a scope.
///
/// The registry does not enforce any ordering between phases: each one is
/// tracked independently and the host is trusted to emit them sensibly.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Refresh,
    Start,
    Stop,
    Close,
}

impl Phase {
    pub const ALL: [Phase; 4] = [Phase::Refresh, Phase::Start, Phase::Stop, Phase::Close];

    /// Dense index used for per-phase tables.
    pub const fn index(self) -> usize {
        match self {
            Phase::Refresh => 0,
            Phase::Start => 1,
            Phase::Stop => 2,
            Phase::Close => 3,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Phase::Refresh => "refresh",
            Phase::Start => "start",
            Phase::Stop => "stop",
            Phase::Close => "close",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

pub fn parse_phase(s: &str) -> Result<Phase, String> {
    match s.trim().to_lowercase().as_str() {
        "refresh" | "init" | "initialize" => Ok(Phase::Refresh),
        "start" => Ok(Phase::Start),
        "stop" => Ok(Phase::Stop),
        "close" | "shutdown" => Ok(Phase::Close),
        _ => Err(format!(
            "Invalid phase '{}': expected refresh, start, stop, or close",
            s
        )),
    }
}

/// What happens to the rest of a firing pass when a task returns an error.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Stop at the first failing task and return its error. Tasks not yet
    /// reached stay queued.
    #[default]
    Abort,
    /// Run every task, then report all failures together.
    Isolate,
}

impl std::fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailurePolicy::Abort => write!(f, "abort"),
            FailurePolicy::Isolate => write!(f, "isolate"),
        }
    }
}
