//! Drone fee reconciliation
//!
//! Decides, after a confirmed delivery, whether the drone still has to be
//! paid off-chain. The contract pays the drone itself only when it knows the
//! drone's wallet, so a manual payout is due when the wallet is known locally
//! but never made it on-chain.

use ethereum_types::Address;

use crate::amount::Amount;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AmountSource {
    Local,
    OnChain,
    Default,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileInput {
    pub local_wallet: Option<Address>,
    /// `assignDrone` was sent and mined for this job
    pub assigned_on_chain: bool,
    /// Wallet from the post-confirmation re-read; `None` if absent, zero or unreadable
    pub onchain_wallet: Option<Address>,
    pub local_amount: Option<Amount>,
    pub onchain_amount: Option<Amount>,
    pub default_amount: Amount,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayoutDecision {
    NoLocalWallet,
    PaidOnChain { wallet: Address },
    ZeroFee { amount: Amount, source: AmountSource },
    Pay {
        to: Address,
        fee: Amount,
        job_amount: Amount,
        source: AmountSource,
    },
}

pub fn needs_manual_payout(
    local_wallet: Option<Address>,
    assigned_on_chain: bool,
    onchain_wallet: Option<Address>,
) -> bool {
    let onchain_wallet = onchain_wallet.filter(|w| !w.is_zero());
    local_wallet.is_some() && (!assigned_on_chain || onchain_wallet.is_none())
}

/// First non-zero of the local record, the on-chain re-read, then the default.
pub fn resolve_amount(
    local: Option<Amount>,
    onchain: Option<Amount>,
    default: Amount,
) -> (Amount, AmountSource) {
    if let Some(amount) = local.filter(|a| !a.is_zero()) {
        return (amount, AmountSource::Local);
    }
    if let Some(amount) = onchain.filter(|a| !a.is_zero()) {
        return (amount, AmountSource::OnChain);
    }
    (default, AmountSource::Default)
}

pub fn plan_payout(input: &ReconcileInput) -> PayoutDecision {
    let Some(to) = input.local_wallet else {
        return PayoutDecision::NoLocalWallet;
    };
    if !needs_manual_payout(input.local_wallet, input.assigned_on_chain, input.onchain_wallet) {
        // needs_manual_payout only returns false here when the wallet is on-chain
        let wallet = input.onchain_wallet.unwrap_or(to);
        return PayoutDecision::PaidOnChain { wallet };
    }

    let (job_amount, source) =
        resolve_amount(input.local_amount, input.onchain_amount, input.default_amount);
    let fee = job_amount.drone_fee();
    if fee.is_zero() {
        return PayoutDecision::ZeroFee { amount: job_amount, source };
    }
    PayoutDecision::Pay {
        to,
        fee,
        job_amount,
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wallet(n: u64) -> Address {
        Address::from_low_u64_be(n)
    }

    fn input() -> ReconcileInput {
        ReconcileInput {
            local_wallet: Some(wallet(0xd1)),
            assigned_on_chain: false,
            onchain_wallet: None,
            local_amount: Some(Amount::from(1_000_000)),
            onchain_amount: None,
            default_amount: Amount::from(500),
        }
    }

    #[test]
    fn test_manual_payout_truth_table() {
        let local = Some(wallet(1));
        let onchain = Some(wallet(1));

        assert!(!needs_manual_payout(None, false, None));
        assert!(!needs_manual_payout(None, true, onchain));
        assert!(needs_manual_payout(local, false, None));
        assert!(needs_manual_payout(local, false, onchain));
        assert!(needs_manual_payout(local, true, None));
        assert!(needs_manual_payout(local, true, Some(Address::zero())));
        assert!(!needs_manual_payout(local, true, onchain));
    }

    #[test]
    fn test_ten_percent_fee() {
        match plan_payout(&input()) {
            PayoutDecision::Pay { to, fee, job_amount, source } => {
                assert_eq!(to, wallet(0xd1));
                assert_eq!(fee, Amount::from(100_000));
                assert_eq!(job_amount, Amount::from(1_000_000));
                assert_eq!(source, AmountSource::Local);
            }
            other => panic!("unexpected decision {:?}", other),
        }
    }

    #[test]
    fn test_tiny_amount_skips_payout() {
        let decision = plan_payout(&ReconcileInput {
            local_amount: Some(Amount::from(7)),
            ..input()
        });
        assert_eq!(
            decision,
            PayoutDecision::ZeroFee {
                amount: Amount::from(7),
                source: AmountSource::Local
            }
        );
    }

    #[test]
    fn test_no_double_payment() {
        let decision = plan_payout(&ReconcileInput {
            assigned_on_chain: true,
            onchain_wallet: Some(wallet(0xd1)),
            ..input()
        });
        assert_eq!(decision, PayoutDecision::PaidOnChain { wallet: wallet(0xd1) });
    }

    #[test]
    fn test_no_wallet_no_payout() {
        let decision = plan_payout(&ReconcileInput {
            local_wallet: None,
            ..input()
        });
        assert_eq!(decision, PayoutDecision::NoLocalWallet);
    }

    #[test]
    fn test_amount_resolution_order() {
        let default = Amount::from(100);
        assert_eq!(
            resolve_amount(Some(Amount::from(5)), Some(Amount::from(9)), default),
            (Amount::from(5), AmountSource::Local)
        );
        assert_eq!(
            resolve_amount(Some(Amount::zero()), Some(Amount::from(9)), default),
            (Amount::from(9), AmountSource::OnChain)
        );
        assert_eq!(
            resolve_amount(None, Some(Amount::zero()), default),
            (default, AmountSource::Default)
        );
    }
}
