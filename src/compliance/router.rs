//! Routing decision
//!
//! Folds verified findings into a single disposition. The mapping is
//! conservative: approval requires an all-pass fold and a low risk
//! score, and an empty finding set routes to review because nothing was
//! actually checked.

use crate::compliance::matcher::{ComplianceStatus, Finding};
use crate::config::RouterConfig;
use crate::phi::ValidationResult;
use serde::{Deserialize, Serialize};

/// Final disposition for a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteAction {
    AutoApprove,
    RequiresReview,
    Reject,
}

impl RouteAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AutoApprove => "auto_approve",
            Self::RequiresReview => "requires_review",
            Self::Reject => "reject",
        }
    }
}

impl std::fmt::Display for RouteAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteDecision {
    pub action: RouteAction,
    pub overall_status: ComplianceStatus,
    /// Weighted risk in [0, 1]
    pub risk_score: f64,
    pub rationale: String,
}

pub struct Router {
    config: RouterConfig,
}

impl Router {
    pub fn new(config: &RouterConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    pub fn route(&self, findings: &[Finding], validation: &ValidationResult) -> RouteDecision {
        if !validation.passed {
            return RouteDecision {
                action: RouteAction::Reject,
                overall_status: ComplianceStatus::Fail,
                risk_score: 1.0,
                rationale: format!(
                    "leakage gate failed; {} residual type(s)",
                    validation.residual_types.len()
                ),
            };
        }

        let total = findings.len();
        let fails = findings
            .iter()
            .filter(|f| f.status == ComplianceStatus::Fail)
            .count();
        let reviews = findings
            .iter()
            .filter(|f| f.status == ComplianceStatus::NeedsReview)
            .count();
        let passes = total - fails - reviews;

        let (fail_frac, review_frac, uncertainty) = if total == 0 {
            (0.0, 0.0, 1.0)
        } else {
            let mean_confidence =
                findings.iter().map(|f| f.confidence).sum::<f64>() / total as f64;
            (
                fails as f64 / total as f64,
                reviews as f64 / total as f64,
                (1.0 - mean_confidence).clamp(0.0, 1.0),
            )
        };

        let risk_score = (self.config.fail_weight * fail_frac
            + self.config.review_weight * review_frac
            + self.config.uncertainty_weight * uncertainty)
            .clamp(0.0, 1.0);

        let overall_status = if total == 0 {
            ComplianceStatus::NeedsReview
        } else if fails > 0 {
            ComplianceStatus::Fail
        } else if reviews > 0 {
            ComplianceStatus::NeedsReview
        } else {
            ComplianceStatus::Pass
        };

        let mut action = if risk_score >= self.config.reject_threshold {
            RouteAction::Reject
        } else if risk_score >= self.config.review_threshold {
            RouteAction::RequiresReview
        } else {
            RouteAction::AutoApprove
        };
        // A non-pass fold never auto-approves regardless of score
        if overall_status != ComplianceStatus::Pass && action == RouteAction::AutoApprove {
            action = RouteAction::RequiresReview;
        }

        let rationale = if total == 0 {
            format!("no applicable rules evaluated; risk {:.2}", risk_score)
        } else {
            format!(
                "{} fail, {} needs_review, {} pass; risk {:.2}",
                fails, reviews, passes, risk_score
            )
        };

        RouteDecision {
            action,
            overall_status,
            risk_score,
            rationale,
        }
    }
}
