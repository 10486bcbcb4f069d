//! Decision results and chain consolidation.

use serde::Serialize;
use tracing::error;

use crate::error::{PdpError, Result};
use crate::evaluator::DataRuleResult;

/// The outcome for one resource in a decision request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceDecision {
    pub resource_id: String,
    /// Every definition's rule passed.
    pub entitled: bool,
    /// The PEP can fulfil every obligation triggered on this resource.
    pub obligations_satisfied: bool,
    /// `entitled && obligations_satisfied`.
    pub passed: bool,
    /// Obligation value FQNs the PEP must fulfil for this resource.
    pub required_obligations: Vec<String>,
    pub data_rule_results: Vec<DataRuleResult>,
}

impl ResourceDecision {
    /// Creates an entitlement-only result; obligations are applied later.
    pub fn entitlement(resource_id: impl Into<String>, data_rule_results: Vec<DataRuleResult>) -> Self {
        let entitled = data_rule_results.iter().all(|r| r.passed);
        Self {
            resource_id: resource_id.into(),
            entitled,
            obligations_satisfied: true,
            passed: entitled,
            required_obligations: Vec::new(),
            data_rule_results,
        }
    }

    /// Records the obligations triggered on this resource and whether the PEP
    /// can fulfil them, recomputing `passed`.
    pub fn apply_obligations(&mut self, required: Vec<String>, satisfied: bool) {
        self.required_obligations = required;
        self.obligations_satisfied = satisfied;
        self.passed = self.entitled && self.obligations_satisfied;
    }
}

/// A decision over a list of resources.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Decision {
    /// True iff every resource passed.
    pub access: bool,
    pub results: Vec<ResourceDecision>,
}

impl Decision {
    pub fn new(results: Vec<ResourceDecision>) -> Self {
        let access = results.iter().all(|r| r.passed);
        Self { access, results }
    }

    /// Recomputes `access` after per-resource results changed.
    pub fn refresh_access(&mut self) {
        self.access = self.results.iter().all(|r| r.passed);
    }
}

/// ANDs per-entity decisions into one.
///
/// All decisions must list the same resources in the same order. Rule
/// results from every entity are kept for diagnostics.
pub fn consolidate(decisions: Vec<Decision>) -> Result<Decision> {
    let mut decisions = decisions.into_iter();
    let Some(mut consolidated) = decisions.next() else {
        return Err(PdpError::InvalidEntityChain {
            reason: "no entity decisions to consolidate".to_string(),
        });
    };

    for decision in decisions {
        if decision.results.len() != consolidated.results.len() {
            error!(
                expected = consolidated.results.len(),
                actual = decision.results.len(),
                "Entity decisions cover different resource counts"
            );
            return Err(PdpError::ResourceDecisionLengthMismatch {
                expected: consolidated.results.len(),
                actual: decision.results.len(),
            });
        }

        for (acc, next) in consolidated.results.iter_mut().zip(decision.results) {
            if acc.resource_id != next.resource_id {
                error!(
                    expected = %acc.resource_id,
                    actual = %next.resource_id,
                    "Entity decisions disagree on resource order"
                );
                return Err(PdpError::ResourceDecisionIdMismatch {
                    expected: acc.resource_id.clone(),
                    actual: next.resource_id,
                });
            }
            acc.entitled &= next.entitled;
            acc.obligations_satisfied &= next.obligations_satisfied;
            acc.passed &= next.passed;
            for obligation in next.required_obligations {
                if !acc.required_obligations.contains(&obligation) {
                    acc.required_obligations.push(obligation);
                }
            }
            acc.data_rule_results.extend(next.data_rule_results);
        }
    }

    consolidated.refresh_access();
    Ok(consolidated)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resource(id: &str, entitled: bool) -> ResourceDecision {
        ResourceDecision {
            resource_id: id.to_string(),
            entitled,
            obligations_satisfied: true,
            passed: entitled,
            required_obligations: Vec::new(),
            data_rule_results: Vec::new(),
        }
    }

    #[test]
    fn consolidation_ands_every_flag() {
        let a = Decision::new(vec![resource("r1", true), resource("r2", true)]);
        let b = Decision::new(vec![resource("r1", true), resource("r2", false)]);

        let merged = consolidate(vec![a, b]).unwrap();
        assert!(!merged.access);
        assert!(merged.results[0].passed);
        assert!(!merged.results[1].entitled);
        assert!(!merged.results[1].passed);
    }

    #[test]
    fn length_mismatch_is_fatal() {
        let a = Decision::new(vec![resource("r1", true)]);
        let b = Decision::new(vec![resource("r1", true), resource("r2", true)]);
        assert!(matches!(
            consolidate(vec![a, b]),
            Err(PdpError::ResourceDecisionLengthMismatch { expected: 1, actual: 2 })
        ));
    }

    #[test]
    fn id_mismatch_is_fatal() {
        let a = Decision::new(vec![resource("r1", true)]);
        let b = Decision::new(vec![resource("r9", true)]);
        assert!(matches!(
            consolidate(vec![a, b]),
            Err(PdpError::ResourceDecisionIdMismatch { .. })
        ));
    }

    #[test]
    fn nothing_to_consolidate() {
        assert!(consolidate(Vec::new()).is_err());
    }

    #[test]
    fn obligations_gate_passing() {
        let mut r = resource("r1", true);
        r.apply_obligations(vec!["https://example.com/obl/drm/value/watermark".to_string()], false);
        assert!(r.entitled);
        assert!(!r.passed);
        assert_eq!(r.required_obligations.len(), 1);
    }
}
