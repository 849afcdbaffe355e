use std::sync::Arc;

use anyhow::Context;
use herbarium::reconcile::{
    CorrectionReport, ExecutionReport, MembershipPlan, PlanEntry, ValidationReport,
};
use herbarium::{CacheError, ReconcileOptions, Reconciler, RecordOutcome, load_cache};

use crate::config::Config;
use crate::progress::ProgressReporter;

/// Bring project membership in line with the cached field values.
pub(crate) async fn handle_reconcile(config: &Config, dry_run: bool) -> anyhow::Result<()> {
    let records = load_cache(&config.cache.path).map_err(|e| match e {
        CacheError::Missing(_) | CacheError::Incomplete { .. } => {
            anyhow::Error::new(e).context("run `herbarium fetch` to build the cache first")
        }
        other => anyhow::Error::new(other),
    })?;
    tracing::info!(records = records.len(), "Loaded cache");

    let client = super::build_client(config)?;
    let reporter = Arc::new(ProgressReporter::new());
    let callback = reporter.as_callback();

    let options = ReconcileOptions {
        project_id: config.project.id,
        rule: config.membership_rule(),
        dry_run,
        correct_invalid: config.project.correct_invalid,
    };
    let include = options.rule.include.clone();

    let mut reconciler = Reconciler::new(&client, &records, options).with_progress(Some(&callback));
    let result = reconciler
        .run(|plan| {
            for line in plan_lines(plan) {
                reporter.println(line);
            }
        })
        .await;
    reporter.finish();

    let report = result.with_context(|| {
        format!("could not list members of project {}", config.project.id)
    })?;

    for line in execution_lines(&report.execution, dry_run) {
        println!("{line}");
    }
    for line in validation_lines(&report.validation, &include) {
        println!("{line}");
    }
    if let Some(correction) = &report.correction {
        for line in correction_lines(correction, dry_run) {
            println!("{line}");
        }
    }
    Ok(())
}

fn entry_lines(entries: &[PlanEntry]) -> impl Iterator<Item = String> + '_ {
    entries
        .iter()
        .map(|e| super::entry_line(e.id, e.value.as_deref()))
}

fn plan_lines(plan: &MembershipPlan) -> Vec<String> {
    let mut lines = Vec::new();
    if plan.to_add.is_empty() {
        lines.push("0 observations would be added to the project.".to_string());
    } else {
        lines.push(format!(
            "{} observations would be added to the project:",
            plan.to_add.len()
        ));
        lines.extend(entry_lines(&plan.to_add));
    }

    if !plan.to_remove.is_empty() {
        lines.push(format!(
            "{} observations would be removed from the project:",
            plan.to_remove.len()
        ));
        lines.extend(entry_lines(&plan.to_remove));
    }

    if !plan.conflicts.is_empty() {
        lines.push(format!(
            "{} observations match both patterns and were skipped:",
            plan.conflicts.len()
        ));
        lines.extend(entry_lines(&plan.conflicts));
    }
    lines
}

fn outcome_line(id: u64, outcome: &RecordOutcome) -> Option<String> {
    match outcome {
        RecordOutcome::AddFailed(error) => Some(format!("{id}: add failed: {error}")),
        RecordOutcome::RemoveFailed(error) => Some(format!("{id}: remove failed: {error}")),
        RecordOutcome::MissingHandle => Some(format!("{id}: no membership link, not removed")),
        _ => None,
    }
}

fn execution_lines(execution: &ExecutionReport, dry_run: bool) -> Vec<String> {
    let count = |outcomes: &[(u64, RecordOutcome)], wanted: &[RecordOutcome]| {
        outcomes.iter().filter(|(_, o)| wanted.contains(o)).count()
    };
    let added = count(
        &execution.adds,
        &[RecordOutcome::Added, RecordOutcome::WouldAdd],
    );
    let removed = count(
        &execution.removes,
        &[RecordOutcome::Removed, RecordOutcome::WouldRemove],
    );

    let mut lines = vec![if dry_run {
        format!("Dry run: would add {added}, would remove {removed}.")
    } else {
        format!(
            "Added {added}, removed {removed}, {} failed.",
            execution.failures()
        )
    }];
    lines.extend(
        execution
            .adds
            .iter()
            .chain(&execution.removes)
            .filter_map(|(id, outcome)| outcome_line(*id, outcome)),
    );
    lines
}

fn validation_lines(validation: &ValidationReport, include: &str) -> Vec<String> {
    if validation.is_valid() {
        return vec![format!("All project observations have {include}.")];
    }
    let mut lines = vec![format!(
        "Project contains {} observations without {include}.",
        validation.invalid.len()
    )];
    lines.extend(entry_lines(&validation.invalid));
    lines
}

fn correction_lines(correction: &CorrectionReport, dry_run: bool) -> Vec<String> {
    let removed = correction
        .removes
        .iter()
        .filter(|(_, o)| matches!(o, RecordOutcome::Removed | RecordOutcome::WouldRemove))
        .count();
    let verb = if dry_run { "would remove" } else { "removed" };
    let mut lines = vec![format!(
        "Corrective pass {verb} {removed}; {} still invalid.",
        correction.remaining.len()
    )];
    lines.extend(
        correction
            .removes
            .iter()
            .filter_map(|(id, outcome)| outcome_line(*id, outcome)),
    );
    lines
}
