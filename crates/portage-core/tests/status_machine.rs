use portage_core::{PlanStatus, PlanType, StackStatus};

#[test]
fn error_reachable_from_everywhere() {
    for s in [
        PlanStatus::Creating,
        PlanStatus::Available,
        PlanStatus::Cloning,
        PlanStatus::Finished,
    ] {
        assert!(s.can_transition(PlanStatus::Error));
    }
}

#[test]
fn deleting_only_from_available_or_error() {
    assert!(PlanStatus::Available.can_transition(PlanStatus::Deleting));
    assert!(PlanStatus::Error.can_transition(PlanStatus::Deleting));
    assert!(!PlanStatus::Cloning.can_transition(PlanStatus::Deleting));
    assert!(!PlanStatus::Finished.can_transition(PlanStatus::Deleting));
}

#[test]
fn forward_edges_only() {
    assert!(PlanStatus::Creating.can_transition(PlanStatus::Available));
    assert!(PlanStatus::Available.can_transition(PlanStatus::Cloning));
    assert!(PlanStatus::Cloning.can_transition(PlanStatus::DataTransFinished));
    assert!(PlanStatus::DataTransFinished.can_transition(PlanStatus::Finished));
    assert!(!PlanStatus::Finished.can_transition(PlanStatus::Available));
    assert!(!PlanStatus::Cloning.can_transition(PlanStatus::Migrating));
}

#[test]
fn stack_status_mirrors_by_plan_type() {
    assert_eq!(
        StackStatus::CreateInProgress.mirror(PlanType::Clone),
        PlanStatus::Cloning
    );
    assert_eq!(
        StackStatus::CreateInProgress.mirror(PlanType::Migrate),
        PlanStatus::Migrating
    );
    assert_eq!(
        StackStatus::CreateComplete.mirror(PlanType::Clone),
        PlanStatus::Finished
    );
    assert_eq!(
        StackStatus::CreateFailed.mirror(PlanType::Migrate),
        PlanStatus::Error
    );
}

#[test]
fn statuses_parse_from_wire_names() {
    assert_eq!(
        "data_trans_finished".parse::<PlanStatus>().unwrap(),
        PlanStatus::DataTransFinished
    );
    assert!("bogus".parse::<PlanStatus>().is_err());
}
