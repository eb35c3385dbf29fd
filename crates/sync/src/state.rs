//! The authoritative transition classifier. A pure function: given the
//! same inputs it always returns the same classification, which is what
//! makes sync idempotent and the action log deterministic.

use audit_core::{ChangeType, Status};

/// Everything the classifier is allowed to look at.
#[derive(Debug, Clone, Copy)]
pub struct TransitionInput {
    pub baseline_status: Option<Status>,
    pub current_status: Option<Status>,
    /// current fact discrepant and the post-persistence annotation
    /// designates an exception
    pub has_exception: bool,
    /// same, evaluated against the baseline fact and the pre-sync
    /// annotation
    pub had_exception: bool,
    /// the exception text changed between the pre-sync and current
    /// annotation
    pub annotation_text_changed: bool,
    /// the annotation carries any operator text at all
    pub has_note: bool,
    /// was the entity's instance reached this run
    pub instance_was_scanned: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub change_type: ChangeType,
    pub is_loggable_action: bool,
    pub counts_as_active_issue: bool,
    /// a second action recorded in the same sync (the regression
    /// auto-promotion also logs EXCEPTION_ADDED)
    pub extra_action: Option<ChangeType>,
    /// forward effect: clear review_status and indicator, keep the
    /// justification as historical documentation
    pub clear_review_status: bool,
    /// forward effect: set review_status to "Exception"
    pub promote_to_exception: bool,
}

impl Classification {
    fn new(change_type: ChangeType, loggable: bool, active: bool) -> Self {
        Self {
            change_type,
            is_loggable_action: loggable,
            counts_as_active_issue: active,
            extra_action: None,
            clear_review_status: false,
            promote_to_exception: false,
        }
    }
}

fn discrepant(status: Option<Status>) -> bool {
    status.map(|s| s.is_discrepant()).unwrap_or(false)
}

/// Classify one transition. Priority order matters and is part of the
/// contract: GONE beats FIXED, FIXED beats EXCEPTION_REMOVED, the
/// regression promotion records both REGRESSION and EXCEPTION_ADDED.
pub fn classify(input: TransitionInput) -> Classification {
    let active = discrepant(input.current_status) && !input.has_exception;

    // 1. an unreached instance never produces FIXED
    if !input.instance_was_scanned && input.baseline_status.is_some() {
        return Classification::new(ChangeType::Gone, true, false);
    }

    // an entity that disappeared from a scanned instance is gone, not fixed
    if input.baseline_status.is_some() && input.current_status.is_none() {
        return Classification::new(ChangeType::Gone, true, false);
    }

    if input.baseline_status.is_none() {
        return match input.current_status {
            Some(s) if s.is_discrepant() => {
                Classification::new(ChangeType::NewIssue, true, active)
            }
            _ => Classification::new(ChangeType::NoChange, false, false),
        };
    }

    let (baseline, current) = match (input.baseline_status, input.current_status) {
        (Some(b), Some(c)) => (b, c),
        // absent sides were all classified above
        _ => return Classification::new(ChangeType::NoChange, false, false),
    };

    // 2. FIXED wins over EXCEPTION_REMOVED; the justification is kept as
    //    documentation while review_status and the indicator clear
    if baseline.is_discrepant() && current == Status::Pass {
        let mut c = Classification::new(ChangeType::Fixed, true, false);
        c.clear_review_status = input.had_exception;
        return c;
    }

    // 3. a regressed row with a pre-existing note is auto-promoted to a
    //    documented exception; both actions are recorded
    if baseline == Status::Pass && current.is_discrepant() {
        let mut c = Classification::new(ChangeType::Regression, true, active);
        if input.has_note && !input.has_exception {
            c.extra_action = Some(ChangeType::ExceptionAdded);
            c.promote_to_exception = true;
            c.counts_as_active_issue = false;
        }
        return c;
    }

    // 5. exception deltas on an otherwise stable row
    if !input.had_exception && input.has_exception {
        return Classification::new(ChangeType::ExceptionAdded, true, false);
    }
    if input.had_exception && !input.has_exception {
        return Classification::new(ChangeType::ExceptionRemoved, true, active);
    }
    if input.had_exception && input.has_exception && input.annotation_text_changed {
        return Classification::new(ChangeType::ExceptionUpdated, true, false);
    }

    // 6. steady state
    if current.is_discrepant() {
        Classification::new(ChangeType::StillFailing, false, active)
    } else {
        Classification::new(ChangeType::NoChange, false, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input() -> TransitionInput {
        TransitionInput {
            baseline_status: None,
            current_status: None,
            has_exception: false,
            had_exception: false,
            annotation_text_changed: false,
            has_note: false,
            instance_was_scanned: true,
        }
    }

    #[test]
    fn test_new_issue() {
        let c = classify(TransitionInput {
            current_status: Some(Status::Fail),
            ..input()
        });
        assert_eq!(c.change_type, ChangeType::NewIssue);
        assert!(c.is_loggable_action);
        assert!(c.counts_as_active_issue);
    }

    #[test]
    fn test_new_compliant_row_is_silent() {
        let c = classify(TransitionInput {
            current_status: Some(Status::Pass),
            ..input()
        });
        assert_eq!(c.change_type, ChangeType::NoChange);
        assert!(!c.is_loggable_action);
    }

    #[test]
    fn test_unscanned_instance_emits_gone_never_fixed() {
        let c = classify(TransitionInput {
            baseline_status: Some(Status::Fail),
            current_status: None,
            instance_was_scanned: false,
            ..input()
        });
        assert_eq!(c.change_type, ChangeType::Gone);
        assert!(!c.counts_as_active_issue);
    }

    #[test]
    fn test_entity_deleted_from_scanned_instance_is_gone() {
        let c = classify(TransitionInput {
            baseline_status: Some(Status::Fail),
            current_status: None,
            ..input()
        });
        assert_eq!(c.change_type, ChangeType::Gone);
    }

    #[test]
    fn test_fixed_beats_exception_removed() {
        // the exception-covered issue gets fixed for real
        let c = classify(TransitionInput {
            baseline_status: Some(Status::Fail),
            current_status: Some(Status::Pass),
            had_exception: true,
            ..input()
        });
        assert_eq!(c.change_type, ChangeType::Fixed);
        assert!(c.clear_review_status, "review status clears on fix");
        assert!(!c.counts_as_active_issue);
    }

    #[test]
    fn test_fixed_without_exception_keeps_annotation_alone() {
        let c = classify(TransitionInput {
            baseline_status: Some(Status::Warn),
            current_status: Some(Status::Pass),
            ..input()
        });
        assert_eq!(c.change_type, ChangeType::Fixed);
        assert!(!c.clear_review_status);
    }

    #[test]
    fn test_regression_plain() {
        let c = classify(TransitionInput {
            baseline_status: Some(Status::Pass),
            current_status: Some(Status::Fail),
            ..input()
        });
        assert_eq!(c.change_type, ChangeType::Regression);
        assert!(c.counts_as_active_issue);
        assert_eq!(c.extra_action, None);
    }

    #[test]
    fn test_regression_with_note_promotes_to_exception() {
        let c = classify(TransitionInput {
            baseline_status: Some(Status::Pass),
            current_status: Some(Status::Fail),
            has_note: true,
            ..input()
        });
        assert_eq!(c.change_type, ChangeType::Regression);
        assert_eq!(c.extra_action, Some(ChangeType::ExceptionAdded));
        assert!(c.promote_to_exception);
        assert!(!c.counts_as_active_issue);
    }

    #[test]
    fn test_exception_added() {
        // the operator documents a waiver on a still-failing row
        let c = classify(TransitionInput {
            baseline_status: Some(Status::Fail),
            current_status: Some(Status::Fail),
            has_exception: true,
            ..input()
        });
        assert_eq!(c.change_type, ChangeType::ExceptionAdded);
        assert!(c.is_loggable_action);
        assert!(!c.counts_as_active_issue);
    }

    #[test]
    fn test_exception_removed() {
        // the operator clears the annotation fields
        let c = classify(TransitionInput {
            baseline_status: Some(Status::Fail),
            current_status: Some(Status::Fail),
            had_exception: true,
            ..input()
        });
        assert_eq!(c.change_type, ChangeType::ExceptionRemoved);
        assert!(c.counts_as_active_issue);
    }

    #[test]
    fn test_exception_updated_requires_text_change() {
        let updated = classify(TransitionInput {
            baseline_status: Some(Status::Fail),
            current_status: Some(Status::Fail),
            has_exception: true,
            had_exception: true,
            annotation_text_changed: true,
            ..input()
        });
        assert_eq!(updated.change_type, ChangeType::ExceptionUpdated);

        let stable = classify(TransitionInput {
            baseline_status: Some(Status::Fail),
            current_status: Some(Status::Fail),
            has_exception: true,
            had_exception: true,
            ..input()
        });
        assert_eq!(stable.change_type, ChangeType::StillFailing);
        assert!(!stable.is_loggable_action);
        assert!(!stable.counts_as_active_issue);
    }

    #[test]
    fn test_still_failing_counts_active_without_exception() {
        let c = classify(TransitionInput {
            baseline_status: Some(Status::Fail),
            current_status: Some(Status::Fail),
            ..input()
        });
        assert_eq!(c.change_type, ChangeType::StillFailing);
        assert!(c.counts_as_active_issue);
        assert!(!c.is_loggable_action);
    }

    #[test]
    fn test_pass_with_note_is_documentation_only() {
        // a justification on a PASS row must not produce EXCEPTION_ADDED
        let c = classify(TransitionInput {
            baseline_status: Some(Status::Pass),
            current_status: Some(Status::Pass),
            has_note: true,
            ..input()
        });
        assert_eq!(c.change_type, ChangeType::NoChange);
        assert!(!c.is_loggable_action);
    }

    #[test]
    fn test_classification_is_deterministic() {
        let statuses = [None, Some(Status::Pass), Some(Status::Warn), Some(Status::Fail)];
        let bools = [false, true];
        for baseline_status in statuses {
            for current_status in statuses {
                for has_exception in bools {
                    for had_exception in bools {
                        for scanned in bools {
                            let probe = TransitionInput {
                                baseline_status,
                                current_status,
                                has_exception,
                                had_exception,
                                annotation_text_changed: false,
                                has_note: has_exception,
                                instance_was_scanned: scanned,
                            };
                            assert_eq!(classify(probe), classify(probe));
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn test_active_issue_definition() {
        // counts_as_active_issue <=> discrepant current without exception
        let covered = classify(TransitionInput {
            baseline_status: Some(Status::Fail),
            current_status: Some(Status::Warn),
            has_exception: true,
            had_exception: true,
            ..input()
        });
        assert!(!covered.counts_as_active_issue);

        let uncovered = classify(TransitionInput {
            baseline_status: Some(Status::Warn),
            current_status: Some(Status::Warn),
            ..input()
        });
        assert!(uncovered.counts_as_active_issue);
    }
}
