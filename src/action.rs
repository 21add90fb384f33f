use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::room::PlayerId;
use crate::Role;

/// The seven declarable turn actions.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Income,
    ForeignAid,
    Coup,
    Tax,
    Assassinate,
    Steal,
    Exchange,
}

impl ActionKind {
    pub const ALL: [ActionKind; 7] = [
        ActionKind::Income,
        ActionKind::ForeignAid,
        ActionKind::Coup,
        ActionKind::Tax,
        ActionKind::Assassinate,
        ActionKind::Steal,
        ActionKind::Exchange,
    ];

    /// Coins paid at declaration. Refunded if a challenge or block lands
    /// against the actor.
    pub fn cost(self) -> u32 {
        match self {
            ActionKind::Coup => 7,
            ActionKind::Assassinate => 3,
            _ => 0,
        }
    }

    /// The role the actor implicitly claims by declaring this, if the claim
    /// is open to a challenge.
    pub fn claimed_role(self) -> Option<Role> {
        match self {
            ActionKind::Tax => Some(Role::Duke),
            ActionKind::Assassinate => Some(Role::Assassin),
            ActionKind::Steal => Some(Role::Captain),
            ActionKind::Exchange => Some(Role::Ambassador),
            _ => None,
        }
    }

    /// The role that can block this action, if any.
    pub fn counter_role(self) -> Option<Role> {
        match self {
            ActionKind::ForeignAid => Some(Role::Duke),
            ActionKind::Assassinate => Some(Role::Contessa),
            _ => None,
        }
    }

    pub fn needs_target(self) -> bool {
        matches!(
            self,
            ActionKind::Coup | ActionKind::Assassinate | ActionKind::Steal
        )
    }
}

impl Display for ActionKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ActionKind::Income => "income",
            ActionKind::ForeignAid => "foreign aid",
            ActionKind::Coup => "coup",
            ActionKind::Tax => "tax",
            ActionKind::Assassinate => "assassinate",
            ActionKind::Steal => "steal",
            ActionKind::Exchange => "exchange",
        };
        f.write_str(name)
    }
}

/// One declared action and the narrative it produced so far. Kept as
/// `last_action` and inside an open challenge/counter window.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ActionRecord {
    pub actor: PlayerId,
    pub actor_name: String,
    pub kind: ActionKind,
    pub target: Option<PlayerId>,
    pub success: bool,
    pub log: Vec<String>,
}

impl ActionRecord {
    pub(crate) fn new(
        actor: PlayerId,
        actor_name: String,
        kind: ActionKind,
        target: Option<PlayerId>,
    ) -> Self {
        Self {
            actor,
            actor_name,
            kind,
            target,
            success: false,
            log: Vec::new(),
        }
    }
}

impl Display for ActionRecord {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.target {
            Some(target) => write!(
                f,
                "{} declares {} against player {}",
                self.actor_name, self.kind, target
            ),
            None => write!(f, "{} declares {}", self.actor_name, self.kind),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cost_table() {
        assert_eq!(ActionKind::Coup.cost(), 7);
        assert_eq!(ActionKind::Assassinate.cost(), 3);
        assert_eq!(ActionKind::Income.cost(), 0);
        assert_eq!(ActionKind::Tax.cost(), 0);
    }

    #[test]
    fn claims_and_counters() {
        assert_eq!(ActionKind::Tax.claimed_role(), Some(Role::Duke));
        assert_eq!(ActionKind::Steal.claimed_role(), Some(Role::Captain));
        assert_eq!(ActionKind::Exchange.claimed_role(), Some(Role::Ambassador));
        assert_eq!(ActionKind::Assassinate.claimed_role(), Some(Role::Assassin));
        assert_eq!(ActionKind::Income.claimed_role(), None);
        assert_eq!(ActionKind::Coup.claimed_role(), None);

        assert_eq!(ActionKind::ForeignAid.counter_role(), Some(Role::Duke));
        assert_eq!(ActionKind::Assassinate.counter_role(), Some(Role::Contessa));
        assert_eq!(ActionKind::Steal.counter_role(), None);
    }

    #[test]
    fn targeting() {
        for kind in ActionKind::ALL {
            let targeted = matches!(
                kind,
                ActionKind::Coup | ActionKind::Assassinate | ActionKind::Steal
            );
            assert_eq!(kind.needs_target(), targeted);
        }
    }

    #[test]
    fn records_describe_themselves() {
        let record = ActionRecord::new(1, "ava".to_string(), ActionKind::Steal, Some(2));
        assert_eq!(record.to_string(), "ava declares steal against player 2");

        let record = ActionRecord::new(1, "ava".to_string(), ActionKind::Income, None);
        assert_eq!(record.to_string(), "ava declares income");
    }

    #[test]
    fn wire_names_are_snake_case() {
        let json = serde_json::to_string(&ActionKind::ForeignAid).unwrap();
        assert_eq!(json, "\"foreign_aid\"");
        let back: ActionKind = serde_json::from_str("\"tax\"").unwrap();
        assert_eq!(back, ActionKind::Tax);
    }
}
