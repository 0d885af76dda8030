use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A stage of the workflow state machine. Phases run strictly in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Specify,
    Plan,
    Tasks,
    Implement,
    Done,
}

impl Phase {
    pub const ALL: &[Phase] = &[
        Phase::Specify,
        Phase::Plan,
        Phase::Tasks,
        Phase::Implement,
        Phase::Done,
    ];

    /// Phases whose action is a single generation call.
    pub const GENERATED: &[Phase] = &[Phase::Specify, Phase::Plan, Phase::Tasks];

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Specify => "specify",
            Phase::Plan => "plan",
            Phase::Tasks => "tasks",
            Phase::Implement => "implement",
            Phase::Done => "done",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Phase::Specify => "Specify",
            Phase::Plan => "Plan",
            Phase::Tasks => "Tasks",
            Phase::Implement => "Implement",
            Phase::Done => "Done",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s {
            "specify" => Some(Phase::Specify),
            "plan" => Some(Phase::Plan),
            "tasks" => Some(Phase::Tasks),
            "implement" => Some(Phase::Implement),
            "done" => Some(Phase::Done),
            _ => None,
        }
    }

    /// The phase that follows this one. `Done` is absorbing.
    pub fn next(&self) -> Phase {
        match self {
            Phase::Specify => Phase::Plan,
            Phase::Plan => Phase::Tasks,
            Phase::Tasks => Phase::Implement,
            Phase::Implement | Phase::Done => Phase::Done,
        }
    }

    /// Phases that must have produced an artifact before this one can start.
    pub fn prerequisites(&self) -> &'static [Phase] {
        match self {
            Phase::Specify => &[],
            Phase::Plan => &[Phase::Specify],
            Phase::Tasks => &[Phase::Specify, Phase::Plan],
            Phase::Implement | Phase::Done => &[Phase::Specify, Phase::Plan, Phase::Tasks],
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Done)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

impl FromStr for Phase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Phase::parse_str(&s.to_lowercase()).ok_or_else(|| {
            let names: Vec<&str> = Phase::ALL.iter().map(|p| p.as_str()).collect();
            format!("unknown phase '{s}' (expected one of: {})", names.join(", "))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_parse_str_round_trip() {
        for p in Phase::ALL {
            assert_eq!(Phase::parse_str(p.as_str()), Some(*p));
        }
        assert_eq!(Phase::parse_str("deploy"), None);
    }

    #[test]
    fn test_phase_order_is_strictly_sequential() {
        let mut phase = Phase::Specify;
        let mut seen = vec![phase];
        while !phase.is_terminal() {
            phase = phase.next();
            seen.push(phase);
        }
        assert_eq!(seen, Phase::ALL);
        assert_eq!(Phase::Done.next(), Phase::Done);
    }

    #[test]
    fn test_from_str_is_case_insensitive() {
        assert_eq!("Implement".parse::<Phase>(), Ok(Phase::Implement));
        assert!("bogus".parse::<Phase>().unwrap_err().contains("specify"));
    }

    #[test]
    fn test_prerequisites_precede_phase() {
        for p in Phase::ALL {
            for pre in p.prerequisites() {
                assert!(pre < p);
            }
        }
    }
}
