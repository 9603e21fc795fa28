//! The gasless-payment state machine (§4.3).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum GaslessStatus {
    Init,
    Quoted,
    Verifying,
    Settling,
    Accepted,
    Finalizing,
    Confirmed,
    Rejected,
    Refunded,
    Penalized,
}

impl GaslessStatus {
    pub fn can_transition_to(self, next: GaslessStatus) -> bool {
        use GaslessStatus::*;
        matches!(
            (self, next),
            (Init, Quoted)
                | (Init, Verifying)
                | (Verifying, Settling)
                | (Verifying, Rejected)
                | (Settling, Accepted)
                | (Settling, Rejected)
                | (Accepted, Finalizing)
                | (Finalizing, Confirmed)
                | (Finalizing, Refunded)
                | (Finalizing, Penalized)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_cannot_jump_straight_to_confirmed() {
        assert!(!GaslessStatus::Init.can_transition_to(GaslessStatus::Confirmed));
    }

    #[test]
    fn verifying_settling_accepted_is_a_valid_chain() {
        assert!(GaslessStatus::Verifying.can_transition_to(GaslessStatus::Settling));
        assert!(GaslessStatus::Settling.can_transition_to(GaslessStatus::Accepted));
        assert!(GaslessStatus::Accepted.can_transition_to(GaslessStatus::Finalizing));
    }

    #[test]
    fn terminal_states_have_no_outgoing_transitions() {
        for terminal in [GaslessStatus::Confirmed, GaslessStatus::Refunded, GaslessStatus::Penalized, GaslessStatus::Rejected] {
            for candidate in [GaslessStatus::Init, GaslessStatus::Quoted, GaslessStatus::Verifying] {
                assert!(!terminal.can_transition_to(candidate));
            }
        }
    }
}
