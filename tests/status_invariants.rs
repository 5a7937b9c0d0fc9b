//! Invariant sweep over the job state machine and the outcome mapping:
//! every terminal document satisfies the error/failure-type/output rules,
//! and no field changes after the terminal write.

use code_exec_worker::handler::final_outcome;
use code_exec_worker::job::{
    self, JobDocument, JobStatus, StatusChange, apply, is_allowed,
};
use code_exec_worker::sandbox::ExecutionOutcome;
use color_eyre::eyre::{Result, ensure};
use rstest::rstest;

const NOW: &str = "2025-06-01T12:00:00.000Z";

const ALL_STATUSES: [JobStatus; 8] = [
    JobStatus::Queued,
    JobStatus::Processing,
    JobStatus::ProcessingDirect,
    JobStatus::ProcessingAuthWorkspace,
    JobStatus::FetchingFromR2,
    JobStatus::RunningAuthWorkspace,
    JobStatus::Completed,
    JobStatus::Failed,
];

#[test]
fn every_path_through_the_table_ends_in_a_terminal_sink() {
    // The transition table is a DAG: walking allowed targets from `queued`
    // always reaches a terminal status, and terminals have no successors.
    for status in ALL_STATUSES {
        if status.is_terminal() {
            assert!(status.allowed_targets().is_empty(), "{status} must be a sink");
        } else {
            assert!(
                !status.allowed_targets().is_empty(),
                "{status} must lead somewhere"
            );
        }
        for target in status.allowed_targets() {
            assert!(is_allowed(status, *target));
            assert!(
                !is_allowed(*target, status) || *target == status,
                "back-edge {target} -> {status}"
            );
        }
    }
}

fn outcome_variants() -> Vec<ExecutionOutcome> {
    vec![
        ExecutionOutcome::ok("hi\n".to_owned()),
        ExecutionOutcome::ok(String::new()),
        ExecutionOutcome::user_error("partial\n".to_owned(), "Traceback\n".to_owned()),
        ExecutionOutcome::user_error(String::new(), String::new()),
        ExecutionOutcome::timeout(10),
        ExecutionOutcome::internal("Internal worker error: failed to launch the interpreter."),
    ]
}

#[test]
fn terminal_documents_satisfy_the_field_invariants() -> Result<()> {
    for outcome in outcome_variants() {
        let mut doc = JobDocument::queued();
        apply(&mut doc, &StatusChange::To(JobStatus::ProcessingDirect), NOW)?;
        apply(&mut doc, &StatusChange::Finish(final_outcome(&outcome)), NOW)?;

        ensure!(doc.status.is_terminal(), "terminal status");
        ensure!(doc.output.is_some(), "output never null after terminal");
        match doc.status {
            JobStatus::Completed => {
                ensure!(doc.error.is_none(), "completed implies error null");
                ensure!(doc.failure_type.is_none(), "completed implies no failure type");
            }
            JobStatus::Failed => {
                ensure!(doc.error.is_some(), "failed implies error set");
                ensure!(doc.failure_type.is_some(), "failed implies failure type set");
            }
            other => ensure!(false, "unexpected terminal status {other}"),
        }
        ensure!(
            doc.completed_at >= doc.processing_started_at,
            "completed_at must not precede processing_started_at"
        );
        ensure!(doc.expires_at.is_some(), "retention expiry stamped");
    }
    Ok(())
}

#[rstest]
#[case(JobStatus::Queued)]
#[case(JobStatus::Processing)]
#[case(JobStatus::ProcessingDirect)]
#[case(JobStatus::ProcessingAuthWorkspace)]
#[case(JobStatus::FetchingFromR2)]
#[case(JobStatus::RunningAuthWorkspace)]
fn no_status_reaches_a_terminal_without_terminal_fields(#[case] from: JobStatus) {
    // `Finish` is the only change that may enter a terminal status, so the
    // terminal fields can never be absent on a terminal document.
    let mut doc = JobDocument::queued();
    doc.status = from;
    let result = apply(&mut doc, &StatusChange::To(JobStatus::Completed), NOW);
    assert!(result.is_err(), "bare transition into completed from {from}");
}

#[test]
fn terminal_documents_are_immutable() -> Result<()> {
    let mut doc = JobDocument::queued();
    apply(&mut doc, &StatusChange::To(JobStatus::ProcessingDirect), NOW)?;
    apply(
        &mut doc,
        &StatusChange::Finish(final_outcome(&ExecutionOutcome::ok("done\n".to_owned()))),
        NOW,
    )?;
    let frozen = serde_json::to_value(&doc)?;

    for target in ALL_STATUSES {
        let rejected = apply(&mut doc, &StatusChange::To(target), NOW).is_err();
        ensure!(rejected, "terminal document accepted a transition to {target}");
    }
    ensure!(serde_json::to_value(&doc)? == frozen, "document mutated");
    Ok(())
}

#[test]
fn wire_names_round_trip() {
    for status in ALL_STATUSES {
        assert_eq!(job::JobStatus::parse(status.as_str()), Some(status));
    }
}
