//! Tear campaigns: randomised power loss against the purse.
//!
//! Each round picks a credit or debit, arms the tear injector at a random
//! write, sends the command and then checks the invariants:
//! - Conservation of value: the balance equals the sum of every credit
//!   that committed minus every debit that committed
//! - No partial commits: the transaction count advances exactly when the
//!   balance does

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info};

use crate::aid::Aid;
use crate::apdu::StatusWord;
use crate::applets::purse::{INS_BALANCE, INS_COUNT, INS_CREDIT, INS_DEBIT};
use crate::kernel::CardInstance;

/// Operation sent in one round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Credit(i16),
    Debit(i16),
}

/// Configuration for a campaign.
#[derive(Debug, Clone)]
pub struct CampaignConfig {
    pub rounds: usize,
    pub seed: u64,
    /// Largest amount per operation.
    pub max_amount: i16,
    /// The tear fires after `0..=max_tear_after` writes. A purse update
    /// performs three, so larger values let some rounds commit.
    pub max_tear_after: usize,
}

impl Default for CampaignConfig {
    fn default() -> Self {
        CampaignConfig {
            rounds: 200,
            seed: 0x5EED,
            max_amount: 50,
            max_tear_after: 5,
        }
    }
}

/// What happened over a campaign.
#[derive(Debug, Clone, Default)]
pub struct CampaignReport {
    pub rounds: usize,
    pub committed: usize,
    pub torn: usize,
    /// Refused before any write (e.g. insufficient funds).
    pub rejected: usize,
    pub expected_balance: i16,
    pub observed_balance: i16,
    pub violations: Vec<String>,
}

impl CampaignReport {
    pub fn is_consistent(&self) -> bool {
        self.violations.is_empty()
    }
}

/// Run a campaign against the purse registered as `purse` on channel 0.
///
/// The purse is selected first. The card's tear injector is left
/// disarmed afterwards.
pub fn run_tear_campaign(card: &mut CardInstance, purse: &Aid, config: &CampaignConfig) -> CampaignReport {
    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut report = CampaignReport {
        rounds: config.rounds,
        ..CampaignReport::default()
    };

    if !card.select(purse, 0) {
        report.violations.push(format!("purse {} could not be selected", purse));
        return report;
    }
    let mut expected = match read_short(card, INS_BALANCE) {
        Some(v) => v,
        None => {
            report.violations.push("initial balance unreadable".into());
            return report;
        }
    };
    let mut expected_count = read_short(card, INS_COUNT).unwrap_or_default();

    for round in 0..config.rounds {
        let amount = rng.gen_range(1..=config.max_amount);
        let operation = if rng.gen_bool(0.5) {
            Operation::Credit(amount)
        } else {
            Operation::Debit(amount)
        };
        let tear_after = rng.gen_range(0..=config.max_tear_after);

        card.arm_tear(tear_after);
        let response = card.dispatch_apdu(&command(operation));
        card.disarm_tear();

        let sw = status_of(&response);
        match sw {
            StatusWord::NO_ERROR => {
                report.committed += 1;
                expected_count = expected_count.wrapping_add(1);
                expected = match operation {
                    Operation::Credit(a) => expected + a,
                    Operation::Debit(a) => expected - a,
                };
            }
            StatusWord::UNKNOWN => report.torn += 1,
            _ => report.rejected += 1,
        }
        debug!(round, ?operation, tear_after, %sw, "tear round");

        let balance = read_short(card, INS_BALANCE);
        let count = read_short(card, INS_COUNT);
        if balance != Some(expected) {
            report.violations.push(format!(
                "round {}: balance {:?}, expected {}",
                round, balance, expected
            ));
        }
        if count != Some(expected_count) {
            report.violations.push(format!(
                "round {}: count {:?}, expected {}",
                round, count, expected_count
            ));
        }
        if card.transaction_depth() != 0 {
            report.violations.push(format!("round {}: transaction left open", round));
        }
    }

    report.expected_balance = expected;
    report.observed_balance = read_short(card, INS_BALANCE).unwrap_or_default();
    info!(
        rounds = report.rounds,
        committed = report.committed,
        torn = report.torn,
        rejected = report.rejected,
        consistent = report.is_consistent(),
        "tear campaign finished"
    );
    report
}

fn command(operation: Operation) -> Vec<u8> {
    let (ins, amount) = match operation {
        Operation::Credit(a) => (INS_CREDIT, a),
        Operation::Debit(a) => (INS_DEBIT, a),
    };
    let [hi, lo] = amount.to_be_bytes();
    vec![0x00, ins, 0x00, 0x00, 0x02, hi, lo]
}

fn status_of(response: &[u8]) -> StatusWord {
    match response {
        [.., sw1, sw2] => StatusWord::new(*sw1, *sw2),
        _ => StatusWord::UNKNOWN,
    }
}

fn read_short(card: &mut CardInstance, ins: u8) -> Option<i16> {
    match card.dispatch_apdu(&[0x00, ins, 0x00, 0x00, 0x02])[..] {
        [hi, lo, 0x90, 0x00] => Some(i16::from_be_bytes([hi, lo])),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::applets::{self, PURSE_AID};
    use crate::config::CardConfig;

    fn purse_card(opening: i16) -> (CardInstance, Aid) {
        let mut card = CardInstance::new(CardConfig::default()).unwrap();
        let aid: Aid = PURSE_AID.parse().unwrap();
        card.install_from_catalog(&applets::catalog(), "purse", &aid, &opening.to_be_bytes())
            .unwrap();
        (card, aid)
    }

    #[test]
    fn test_campaign_preserves_balance() {
        let (mut card, aid) = purse_card(500);
        let report = run_tear_campaign(&mut card, &aid, &CampaignConfig::default());

        assert!(report.is_consistent(), "{:?}", report.violations);
        assert_eq!(report.committed + report.torn + report.rejected, report.rounds);
        assert!(report.torn > 0);
        assert!(report.committed > 0);
        assert_eq!(report.observed_balance, report.expected_balance);
        assert_eq!(card.tears_fired(), report.torn as u64);
    }

    #[test]
    fn test_same_seed_same_outcome() {
        let config = CampaignConfig {
            rounds: 50,
            seed: 42,
            ..CampaignConfig::default()
        };
        let (mut a, aid) = purse_card(100);
        let (mut b, _) = purse_card(100);
        let ra = run_tear_campaign(&mut a, &aid, &config);
        let rb = run_tear_campaign(&mut b, &aid, &config);

        assert_eq!(ra.committed, rb.committed);
        assert_eq!(ra.torn, rb.torn);
        assert_eq!(ra.observed_balance, rb.observed_balance);
    }

    #[test]
    fn test_missing_purse_is_reported() {
        let mut card = CardInstance::new(CardConfig::default()).unwrap();
        let aid: Aid = PURSE_AID.parse().unwrap();
        let report = run_tear_campaign(&mut card, &aid, &CampaignConfig::default());
        assert!(!report.is_consistent());
        assert_eq!(report.committed, 0);
    }
}
