//! Balance merge for concurrent, lock-free kitty edits.
//!
//! A client submits the balances it last saw (`baseline`) together with the
//! balances it wants (`target`). For every currency the server still holds the
//! baseline value of, the target is taken verbatim. Where another writer got
//! there first, the client's delta (`target - baseline`) is rebased onto the
//! current value instead, so concurrent edits to one currency add up.

use thiserror::Error;

use crate::KittyError;

use super::{Balances, KittyRecord};

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ConflictError {
    #[error("baseline timestamp {baseline} is later than last update {last_update}")]
    FutureBaseline { baseline: u64, last_update: u64 },
    #[error("missing baseline for currency {currency}")]
    MissingCurrencyBaseline { currency: String },
    #[error("missing target for currency {currency}")]
    MissingCurrencyTarget { currency: String },
    #[error("balance overflow for currency {currency}")]
    Overflow { currency: String },
}

impl From<ConflictError> for KittyError {
    fn from(err: ConflictError) -> Self {
        match err {
            ConflictError::FutureBaseline {
                baseline,
                last_update,
            } => KittyError::FutureBaseline {
                baseline,
                last_update,
            },
            ConflictError::MissingCurrencyBaseline { currency } => {
                KittyError::MissingCurrencyBaseline { currency }
            }
            ConflictError::MissingCurrencyTarget { currency } => {
                KittyError::MissingCurrencyTarget { currency }
            }
            ConflictError::Overflow { currency } => KittyError::Overflow { currency },
        }
    }
}

/// Result of a successful merge.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Resolution {
    pub balances: Balances,
    /// Currencies whose client delta was rebased onto a newer server value.
    pub rebased: Vec<String>,
}

/// Merges a client edit into `current`.
///
/// Currencies are checked in code order and the first failure is returned;
/// nothing is merged when any currency is rejected.
pub fn resolve(
    current: &KittyRecord,
    baseline: &Balances,
    target: &Balances,
    baseline_timestamp: u64,
) -> Result<Resolution, ConflictError> {
    if baseline_timestamp > current.last_update {
        return Err(ConflictError::FutureBaseline {
            baseline: baseline_timestamp,
            last_update: current.last_update,
        });
    }

    let mut balances = Balances::new();
    let mut rebased = Vec::new();

    for (currency, &server) in &current.balances {
        let Some(&seen) = baseline.get(currency) else {
            return Err(ConflictError::MissingCurrencyBaseline {
                currency: currency.clone(),
            });
        };
        let Some(&wanted) = target.get(currency) else {
            return Err(ConflictError::MissingCurrencyTarget {
                currency: currency.clone(),
            });
        };

        let merged = if seen == server {
            wanted
        } else {
            rebased.push(currency.clone());
            wanted
                .checked_sub(seen)
                .and_then(|delta| server.checked_add(delta))
                .ok_or_else(|| ConflictError::Overflow {
                    currency: currency.clone(),
                })?
        };
        balances.insert(currency.clone(), merged);
    }

    for (currency, &wanted) in target {
        balances.entry(currency.clone()).or_insert(wanted);
    }

    Ok(Resolution { balances, rebased })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kitty::KittyName;

    fn balances(pairs: &[(&str, i64)]) -> Balances {
        pairs
            .iter()
            .map(|(currency, amount)| (currency.to_string(), *amount))
            .collect()
    }

    fn record(current: &[(&str, i64)], last_update: u64) -> KittyRecord {
        KittyRecord {
            name: KittyName::parse("happy-otter").expect("name"),
            balances: balances(current),
            party_size: 2,
            split_ratio: 1,
            config: serde_json::Value::Null,
            last_update,
            last_view: last_update,
        }
    }

    #[test]
    fn unchanged_currency_takes_target_verbatim() {
        let current = record(&[("USD", 100), ("EUR", -20)], 50);
        let out = resolve(
            &current,
            &balances(&[("USD", 100), ("EUR", -20)]),
            &balances(&[("USD", 40), ("EUR", 0)]),
            50,
        )
        .expect("merge");
        assert_eq!(out.balances, balances(&[("USD", 40), ("EUR", 0)]));
        assert!(out.rebased.is_empty());
    }

    #[test]
    fn concurrent_change_rebases_client_delta() {
        let current = record(&[("USD", 100)], 50);
        let out = resolve(
            &current,
            &balances(&[("USD", 90)]),
            &balances(&[("USD", 95)]),
            40,
        )
        .expect("merge");
        assert_eq!(out.balances["USD"], 105);
        assert_eq!(out.rebased, vec!["USD".to_string()]);
    }

    #[test]
    fn negative_deltas_rebase_too() {
        let current = record(&[("USD", 10)], 50);
        let out = resolve(
            &current,
            &balances(&[("USD", 30)]),
            &balances(&[("USD", 0)]),
            40,
        )
        .expect("merge");
        assert_eq!(out.balances["USD"], -20);
    }

    #[test]
    fn future_baseline_is_rejected_even_without_changes() {
        let current = record(&[("USD", 100)], 50);
        let err = resolve(
            &current,
            &balances(&[("USD", 100)]),
            &balances(&[("USD", 100)]),
            51,
        )
        .unwrap_err();
        assert_eq!(
            err,
            ConflictError::FutureBaseline {
                baseline: 51,
                last_update: 50
            }
        );
    }

    #[test]
    fn missing_baseline_names_the_currency() {
        let current = record(&[("USD", 100)], 50);
        let err = resolve(&current, &Balances::new(), &balances(&[("USD", 1)]), 50).unwrap_err();
        assert_eq!(
            err,
            ConflictError::MissingCurrencyBaseline {
                currency: "USD".to_string()
            }
        );
    }

    #[test]
    fn missing_target_names_the_currency() {
        let current = record(&[("USD", 100)], 50);
        let err = resolve(&current, &balances(&[("USD", 100)]), &Balances::new(), 50).unwrap_err();
        assert_eq!(
            err,
            ConflictError::MissingCurrencyTarget {
                currency: "USD".to_string()
            }
        );
    }

    #[test]
    fn first_failing_currency_in_code_order_wins() {
        let current = record(&[("EUR", 1), ("USD", 1)], 50);
        let err = resolve(
            &current,
            &balances(&[("USD", 1)]),
            &balances(&[("EUR", 1)]),
            50,
        )
        .unwrap_err();
        assert_eq!(
            err,
            ConflictError::MissingCurrencyBaseline {
                currency: "EUR".to_string()
            }
        );
    }

    #[test]
    fn target_only_currencies_are_added() {
        let current = record(&[("USD", 5)], 50);
        let out = resolve(
            &current,
            &balances(&[("USD", 5)]),
            &balances(&[("USD", 5), ("GBP", 12)]),
            50,
        )
        .expect("merge");
        assert_eq!(out.balances, balances(&[("USD", 5), ("GBP", 12)]));
    }

    #[test]
    fn rebase_overflow_fails_instead_of_wrapping() {
        let current = record(&[("USD", i64::MAX)], 50);
        let err = resolve(
            &current,
            &balances(&[("USD", 0)]),
            &balances(&[("USD", 1)]),
            40,
        )
        .unwrap_err();
        assert_eq!(
            err,
            ConflictError::Overflow {
                currency: "USD".to_string()
            }
        );

        let current = record(&[("USD", 0)], 50);
        let err = resolve(
            &current,
            &balances(&[("USD", i64::MIN)]),
            &balances(&[("USD", 1)]),
            40,
        )
        .unwrap_err();
        assert!(matches!(err, ConflictError::Overflow { .. }));
    }
}
