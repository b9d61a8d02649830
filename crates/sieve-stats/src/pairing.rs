use crate::errors::EvalError;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// One model's outcome on one item, as read from an outcomes file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ItemOutcome {
    pub item_id: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PairedItem {
    pub item_id: String,
    pub category: Option<String>,
    pub a: bool,
    pub b: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Pairing {
    pub items: Vec<PairedItem>,
    /// Items only A produced, excluded from every statistic.
    pub unmatched_a: usize,
    pub unmatched_b: usize,
}

/// Joins on item ID in A's order. Unmatched items are dropped, never imputed.
pub fn pair_by_id(a: &[ItemOutcome], b: &[ItemOutcome]) -> Result<Pairing, EvalError> {
    ensure_unique(a, "A")?;
    ensure_unique(b, "B")?;

    let by_id: HashMap<&str, &ItemOutcome> = b.iter().map(|o| (o.item_id.as_str(), o)).collect();
    let mut items = Vec::with_capacity(a.len().min(b.len()));
    for oa in a {
        let Some(ob) = by_id.get(oa.item_id.as_str()) else {
            continue;
        };
        if let (Some(ca), Some(cb)) = (&oa.category, &ob.category) {
            if ca != cb {
                tracing::warn!(
                    event = "sieve.eval.category_mismatch",
                    item_id = %oa.item_id,
                    a = %ca,
                    b = %cb,
                    "using A's category"
                );
            }
        }
        items.push(PairedItem {
            item_id: oa.item_id.clone(),
            category: oa.category.clone().or_else(|| ob.category.clone()),
            a: oa.success,
            b: ob.success,
        });
    }

    let matched = items.len();
    let pairing = Pairing {
        unmatched_a: a.len() - matched,
        unmatched_b: b.len() - matched,
        items,
    };
    if pairing.unmatched_a + pairing.unmatched_b > 0 {
        tracing::warn!(
            event = "sieve.eval.unmatched",
            unmatched_a = pairing.unmatched_a,
            unmatched_b = pairing.unmatched_b,
            "excluding items without a counterpart"
        );
    }
    Ok(pairing)
}

fn ensure_unique(outcomes: &[ItemOutcome], side: &'static str) -> Result<(), EvalError> {
    let mut seen = HashSet::with_capacity(outcomes.len());
    for o in outcomes {
        if !seen.insert(o.item_id.as_str()) {
            return Err(EvalError::DuplicateId {
                id: o.item_id.clone(),
                side,
            });
        }
    }
    Ok(())
}
