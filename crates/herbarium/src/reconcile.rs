//! Project membership reconciliation.
//!
//! Desired membership is derived from cached observations: a record whose
//! target field contains the include pattern belongs in the project, one
//! whose field contains the exclude pattern does not. [`Reconciler`] diffs
//! that against the live member list, applies adds and removes, re-lists
//! the project, and reports members that still fail the include rule.
//!
//! # Algorithm
//!
//! 1. List live members, keeping each member's membership-link id
//! 2. Plan: ADD included records not in the project, REMOVE excluded
//!    records that are; records matching both patterns are conflicts and
//!    left alone
//! 3. Hand the plan to the caller for reporting
//! 4. Execute adds, then removes (removes need the link id; a member
//!    without one is skipped and reported)
//! 5. List live members again
//! 6. Flag every member whose cached value lacks the include pattern
//! 7. Optionally remove flagged members once; whatever is left is reported
//!
//! Failures on one record never stop the batch. Only a failed member
//! listing aborts the run.

use std::collections::{BTreeMap, HashMap};
use std::convert::Infallible;

use async_trait::async_trait;

use crate::cache::RecordSink;
use crate::client::InatClient;
use crate::error::{ApiError, ReconcileError, short_error_message};
use crate::pagination::{ListQuery, collect_into};
use crate::progress::{ProgressCallback, SyncProgress, emit};
use crate::record::{MemberObservation, Observation};

/// Default project, field, and patterns.
pub mod defaults {
    pub const PROJECT_ID: u64 = 263_745;
    pub const FIELD_NAME: &str = "Herbarium Catalog Number";
    pub const INCLUDE_PATTERN: &str = "UWAL-M";
    pub const EXCLUDE_PATTERN: &str = "UWAL-L";
}

/// Which field to inspect and which substrings decide membership.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MembershipRule {
    pub field_name: String,
    pub include: String,
    pub exclude: String,
}

impl Default for MembershipRule {
    fn default() -> Self {
        Self {
            field_name: defaults::FIELD_NAME.to_string(),
            include: defaults::INCLUDE_PATTERN.to_string(),
            exclude: defaults::EXCLUDE_PATTERN.to_string(),
        }
    }
}

/// What a field value says about membership.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Desired {
    Include,
    Exclude,
    /// Matches both patterns; never acted on.
    Conflict,
    Neither,
}

impl MembershipRule {
    pub fn classify(&self, value: Option<&str>) -> Desired {
        let Some(value) = value else {
            return Desired::Neither;
        };
        match (value.contains(&self.include), value.contains(&self.exclude)) {
            (true, true) => Desired::Conflict,
            (true, false) => Desired::Include,
            (false, true) => Desired::Exclude,
            (false, false) => Desired::Neither,
        }
    }

    /// A live member is valid only if its value contains the include pattern.
    pub fn is_valid_member(&self, value: Option<&str>) -> bool {
        value.is_some_and(|v| v.contains(&self.include))
    }
}

/// Live project members and their membership-link ids.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProjectMembership {
    members: BTreeMap<u64, Option<u64>>,
}

impl ProjectMembership {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, observation_id: u64, link_id: Option<u64>) {
        self.members.insert(observation_id, link_id);
    }

    pub fn contains(&self, observation_id: u64) -> bool {
        self.members.contains_key(&observation_id)
    }

    /// Link id needed to remove `observation_id`, if the listing carried one.
    pub fn link(&self, observation_id: u64) -> Option<u64> {
        self.members.get(&observation_id).copied().flatten()
    }

    /// Member ids in ascending order.
    pub fn ids(&self) -> impl Iterator<Item = u64> + '_ {
        self.members.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

impl FromIterator<(u64, Option<u64>)> for ProjectMembership {
    fn from_iter<I: IntoIterator<Item = (u64, Option<u64>)>>(iter: I) -> Self {
        Self {
            members: iter.into_iter().collect(),
        }
    }
}

/// Remote operations the reconciler needs.
#[async_trait]
pub trait ProjectApi: Send + Sync {
    /// Every current member of `project_id`.
    async fn list_members(
        &self,
        project_id: u64,
        on_progress: Option<&ProgressCallback>,
    ) -> Result<ProjectMembership, ApiError>;

    async fn add_member(
        &self,
        project_id: u64,
        observation_id: u64,
        on_progress: Option<&ProgressCallback>,
    ) -> Result<(), ApiError>;

    /// Remove a membership by its link id.
    async fn remove_member(
        &self,
        link_id: u64,
        on_progress: Option<&ProgressCallback>,
    ) -> Result<(), ApiError>;
}

/// Builds a [`ProjectMembership`] from streamed member observations.
struct MembershipSink {
    project_id: u64,
    membership: ProjectMembership,
}

impl RecordSink<MemberObservation> for MembershipSink {
    type Error = Infallible;

    fn accept(&mut self, member: MemberObservation) -> Result<(), Self::Error> {
        let link = member.link_for(self.project_id);
        if link.is_none() {
            tracing::debug!(id = member.id, "Member listing has no project link");
        }
        self.membership.insert(member.id, link);
        Ok(())
    }
}

#[async_trait]
impl ProjectApi for InatClient {
    async fn list_members(
        &self,
        project_id: u64,
        on_progress: Option<&ProgressCallback>,
    ) -> Result<ProjectMembership, ApiError> {
        let mut sink = MembershipSink {
            project_id,
            membership: ProjectMembership::new(),
        };
        let query = ListQuery::project_members(project_id, self.page_size());
        collect_into::<MemberObservation, _, ApiError>(self, query, &mut sink, on_progress).await?;
        Ok(sink.membership)
    }

    async fn add_member(
        &self,
        project_id: u64,
        observation_id: u64,
        on_progress: Option<&ProgressCallback>,
    ) -> Result<(), ApiError> {
        self.add_to_project(project_id, observation_id, on_progress)
            .await
    }

    async fn remove_member(
        &self,
        link_id: u64,
        on_progress: Option<&ProgressCallback>,
    ) -> Result<(), ApiError> {
        self.remove_project_observation(link_id, on_progress).await
    }
}

/// Options for one reconciliation run.
#[derive(Debug, Clone)]
pub struct ReconcileOptions {
    pub project_id: u64,
    pub rule: MembershipRule,
    /// Read, diff and validate, but make no add/remove calls.
    pub dry_run: bool,
    /// Remove members flagged by validation, once.
    pub correct_invalid: bool,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            project_id: defaults::PROJECT_ID,
            rule: MembershipRule::default(),
            dry_run: false,
            correct_invalid: false,
        }
    }
}

/// A record id with its current target-field value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanEntry {
    pub id: u64,
    pub value: Option<String>,
}

/// The diff between desired and live membership.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MembershipPlan {
    pub to_add: Vec<PlanEntry>,
    pub to_remove: Vec<PlanEntry>,
    pub conflicts: Vec<PlanEntry>,
}

impl MembershipPlan {
    /// True when there is nothing to add or remove.
    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty()
    }
}

/// Result of acting on one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordOutcome {
    Added,
    WouldAdd,
    AddFailed(String),
    Removed,
    WouldRemove,
    RemoveFailed(String),
    /// The member has no membership-link id, so it cannot be removed.
    MissingHandle,
}

impl RecordOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            Self::AddFailed(_) | Self::RemoveFailed(_) | Self::MissingHandle
        )
    }
}

/// Outcomes of executing a plan, in execution order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionReport {
    pub adds: Vec<(u64, RecordOutcome)>,
    pub removes: Vec<(u64, RecordOutcome)>,
}

impl ExecutionReport {
    pub fn failures(&self) -> usize {
        self.adds
            .iter()
            .chain(&self.removes)
            .filter(|(_, o)| o.is_failure())
            .count()
    }
}

/// Live members checked against the include rule.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    pub members: usize,
    /// Members whose cached value lacks the include pattern, ascending id.
    pub invalid: Vec<PlanEntry>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.invalid.is_empty()
    }
}

/// The single corrective pass over invalid members.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CorrectionReport {
    pub removes: Vec<(u64, RecordOutcome)>,
    /// Members still invalid after the pass.
    pub remaining: Vec<PlanEntry>,
}

/// Everything a run did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub plan: MembershipPlan,
    pub execution: ExecutionReport,
    pub validation: ValidationReport,
    pub correction: Option<CorrectionReport>,
}

/// Diff cached records against live membership. Pure; entries are sorted by id.
pub fn plan(
    records: &[Observation],
    membership: &ProjectMembership,
    rule: &MembershipRule,
) -> MembershipPlan {
    let mut to_add = BTreeMap::new();
    let mut to_remove = BTreeMap::new();
    let mut conflicts = BTreeMap::new();

    for record in records {
        let value = record.field_value(&rule.field_name);
        match rule.classify(value.as_deref()) {
            Desired::Include if !membership.contains(record.id) => {
                to_add.entry(record.id).or_insert(value);
            }
            Desired::Exclude if membership.contains(record.id) => {
                to_remove.entry(record.id).or_insert(value);
            }
            Desired::Conflict => {
                conflicts.entry(record.id).or_insert(value);
            }
            _ => {}
        }
    }

    let entries = |map: BTreeMap<u64, Option<String>>| -> Vec<PlanEntry> {
        map.into_iter()
            .map(|(id, value)| PlanEntry { id, value })
            .collect()
    };
    MembershipPlan {
        to_add: entries(to_add),
        to_remove: entries(to_remove),
        conflicts: entries(conflicts),
    }
}

/// Reconciliation context for one run.
///
/// Owns the live membership snapshot (and with it the link-id map) for the
/// duration of the run. Cached records are only read.
pub struct Reconciler<'a, A: ProjectApi + ?Sized> {
    api: &'a A,
    records: &'a [Observation],
    values: HashMap<u64, Option<String>>,
    options: ReconcileOptions,
    membership: ProjectMembership,
    on_progress: Option<&'a ProgressCallback>,
}

impl<'a, A: ProjectApi + ?Sized> Reconciler<'a, A> {
    pub fn new(api: &'a A, records: &'a [Observation], options: ReconcileOptions) -> Self {
        let mut values = HashMap::with_capacity(records.len());
        for record in records {
            values
                .entry(record.id)
                .or_insert_with(|| record.field_value(&options.rule.field_name));
        }
        Self {
            api,
            records,
            values,
            options,
            membership: ProjectMembership::new(),
            on_progress: None,
        }
    }

    #[must_use]
    pub fn with_progress(mut self, on_progress: Option<&'a ProgressCallback>) -> Self {
        self.on_progress = on_progress;
        self
    }

    /// Cached value of the target field for `id` (`None` if uncached or absent).
    pub fn cached_value(&self, id: u64) -> Option<String> {
        self.values.get(&id).cloned().flatten()
    }

    /// List live members, replacing the current snapshot.
    pub async fn refresh_membership(&mut self) -> Result<&ProjectMembership, ReconcileError> {
        self.membership = self
            .api
            .list_members(self.options.project_id, self.on_progress)
            .await
            .map_err(ReconcileError::Membership)?;
        tracing::info!(
            project_id = self.options.project_id,
            members = self.membership.len(),
            "Listed project members"
        );
        Ok(&self.membership)
    }

    /// Diff the cache against the current snapshot.
    pub fn plan(&self) -> MembershipPlan {
        let plan = plan(self.records, &self.membership, &self.options.rule);
        for conflict in &plan.conflicts {
            tracing::warn!(id = conflict.id, value = ?conflict.value, "Record matches both patterns");
            emit(
                self.on_progress,
                SyncProgress::Conflict {
                    id: conflict.id,
                    value: conflict.value.clone().unwrap_or_default(),
                },
            );
        }
        plan
    }

    /// Apply a plan: all adds, then all removes.
    pub async fn execute(&self, plan: &MembershipPlan) -> ExecutionReport {
        let mut report = ExecutionReport::default();
        for entry in &plan.to_add {
            let outcome = self.add(entry.id).await;
            report.adds.push((entry.id, outcome));
        }
        for entry in &plan.to_remove {
            let outcome = self.remove(entry.id).await;
            report.removes.push((entry.id, outcome));
        }
        report
    }

    /// Re-list the project and flag members that fail the include rule.
    pub async fn validate(&mut self) -> Result<ValidationReport, ReconcileError> {
        self.refresh_membership().await?;
        let invalid: Vec<PlanEntry> = self
            .membership
            .ids()
            .filter_map(|id| {
                let value = self.cached_value(id);
                (!self.options.rule.is_valid_member(value.as_deref()))
                    .then_some(PlanEntry { id, value })
            })
            .collect();

        emit(
            self.on_progress,
            SyncProgress::ValidationComplete {
                members: self.membership.len(),
                invalid: invalid.len(),
            },
        );
        Ok(ValidationReport {
            members: self.membership.len(),
            invalid,
        })
    }

    /// One removal attempt per invalid member. No re-listing, no loop.
    pub async fn correct(&self, validation: &ValidationReport) -> CorrectionReport {
        let mut report = CorrectionReport::default();
        for entry in &validation.invalid {
            let outcome = self.remove(entry.id).await;
            if !matches!(outcome, RecordOutcome::Removed | RecordOutcome::WouldRemove) {
                report.remaining.push(entry.clone());
            }
            report.removes.push((entry.id, outcome));
        }
        report
    }

    /// Full run. `on_plan` sees the plan before anything is executed.
    pub async fn run<F>(&mut self, on_plan: F) -> Result<ReconcileReport, ReconcileError>
    where
        F: FnOnce(&MembershipPlan),
    {
        self.refresh_membership().await?;
        let plan = self.plan();
        on_plan(&plan);

        let execution = self.execute(&plan).await;
        let validation = self.validate().await?;
        let correction = if self.options.correct_invalid && !validation.is_valid() {
            Some(self.correct(&validation).await)
        } else {
            None
        };

        Ok(ReconcileReport {
            plan,
            execution,
            validation,
            correction,
        })
    }

    async fn add(&self, id: u64) -> RecordOutcome {
        let dry_run = self.options.dry_run;
        if dry_run {
            emit(self.on_progress, SyncProgress::Added { id, dry_run });
            return RecordOutcome::WouldAdd;
        }

        match self
            .api
            .add_member(self.options.project_id, id, self.on_progress)
            .await
        {
            Ok(()) => {
                tracing::info!(id, project_id = self.options.project_id, "Added observation");
                emit(self.on_progress, SyncProgress::Added { id, dry_run });
                RecordOutcome::Added
            }
            Err(e) => {
                let error = short_error_message(&e);
                tracing::warn!(id, error = %error, "Failed to add observation");
                emit(
                    self.on_progress,
                    SyncProgress::AddFailed {
                        id,
                        error: error.clone(),
                    },
                );
                RecordOutcome::AddFailed(error)
            }
        }
    }

    async fn remove(&self, id: u64) -> RecordOutcome {
        let Some(link_id) = self.membership.link(id) else {
            tracing::warn!(id, "No membership link; cannot remove");
            emit(self.on_progress, SyncProgress::MissingHandle { id });
            return RecordOutcome::MissingHandle;
        };

        let dry_run = self.options.dry_run;
        if dry_run {
            emit(self.on_progress, SyncProgress::Removed { id, dry_run });
            return RecordOutcome::WouldRemove;
        }

        match self.api.remove_member(link_id, self.on_progress).await {
            Ok(()) => {
                tracing::info!(id, link_id, "Removed observation");
                emit(self.on_progress, SyncProgress::Removed { id, dry_run });
                RecordOutcome::Removed
            }
            Err(e) => {
                let error = short_error_message(&e);
                tracing::warn!(id, link_id, error = %error, "Failed to remove observation");
                emit(
                    self.on_progress,
                    SyncProgress::RemoveFailed {
                        id,
                        error: error.clone(),
                    },
                );
                RecordOutcome::RemoveFailed(error)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use crate::record::FieldValue;

    const FIELD: &str = "Catalog";

    fn rule() -> MembershipRule {
        MembershipRule {
            field_name: FIELD.to_string(),
            include: "UWAL-M".to_string(),
            exclude: "UWAL-L".to_string(),
        }
    }

    fn options(dry_run: bool) -> ReconcileOptions {
        ReconcileOptions {
            project_id: 99,
            rule: rule(),
            dry_run,
            correct_invalid: false,
        }
    }

    fn obs(id: u64, catalog: &str) -> Observation {
        Observation::new(id, vec![FieldValue::text(FIELD, catalog)])
    }

    /// In-memory project: observation id -> link id.
    #[derive(Default)]
    struct FakeProject {
        state: Mutex<FakeState>,
    }

    #[derive(Default)]
    struct FakeState {
        members: BTreeMap<u64, Option<u64>>,
        next_link: u64,
        calls: Vec<String>,
        fail_add: Vec<u64>,
    }

    impl FakeProject {
        fn with_members(members: &[(u64, Option<u64>)]) -> Self {
            let project = Self::default();
            {
                let mut state = project.state.lock().expect("lock");
                state.members = members.iter().copied().collect();
                state.next_link = 1_000;
            }
            project
        }

        fn member_ids(&self) -> Vec<u64> {
            self.state.lock().expect("lock").members.keys().copied().collect()
        }

        fn mutating_calls(&self) -> Vec<String> {
            self.state
                .lock()
                .expect("lock")
                .calls
                .iter()
                .filter(|c| !c.starts_with("list"))
                .cloned()
                .collect()
        }
    }

    #[async_trait]
    impl ProjectApi for FakeProject {
        async fn list_members(
            &self,
            _project_id: u64,
            _on_progress: Option<&ProgressCallback>,
        ) -> Result<ProjectMembership, ApiError> {
            let mut state = self.state.lock().expect("lock");
            state.calls.push("list".to_string());
            Ok(state.members.iter().map(|(&k, &v)| (k, v)).collect())
        }

        async fn add_member(
            &self,
            _project_id: u64,
            observation_id: u64,
            _on_progress: Option<&ProgressCallback>,
        ) -> Result<(), ApiError> {
            let mut state = self.state.lock().expect("lock");
            state.calls.push(format!("add {observation_id}"));
            if state.fail_add.contains(&observation_id) {
                return Err(ApiError::Status {
                    status: 422,
                    body: "not allowed".to_string(),
                });
            }
            state.next_link += 1;
            let link = state.next_link;
            state.members.entry(observation_id).or_insert(Some(link));
            Ok(())
        }

        async fn remove_member(
            &self,
            link_id: u64,
            _on_progress: Option<&ProgressCallback>,
        ) -> Result<(), ApiError> {
            let mut state = self.state.lock().expect("lock");
            state.calls.push(format!("remove link {link_id}"));
            let before = state.members.len();
            state.members.retain(|_, link| *link != Some(link_id));
            if state.members.len() == before {
                return Err(ApiError::Status {
                    status: 404,
                    body: "no such link".to_string(),
                });
            }
            Ok(())
        }
    }

    #[test]
    fn classify_patterns() {
        let rule = rule();
        assert_eq!(rule.classify(Some("UWAL-M-1")), Desired::Include);
        assert_eq!(rule.classify(Some("UWAL-L-1")), Desired::Exclude);
        assert_eq!(rule.classify(Some("UWAL-M/UWAL-L")), Desired::Conflict);
        assert_eq!(rule.classify(Some("OTHER-999")), Desired::Neither);
        assert_eq!(rule.classify(None), Desired::Neither);
        assert!(!rule.is_valid_member(None));
        assert!(!rule.is_valid_member(Some("")));
    }

    #[test]
    fn plan_is_sorted_and_membership_aware() {
        let records = vec![
            obs(5, "UWAL-M-5"),
            obs(1, "UWAL-M-1"),
            obs(4, "UWAL-M-4"),
            obs(2, "UWAL-L-2"),
            obs(6, "UWAL-L-6"),
            obs(7, "UWAL-M-7 UWAL-L-7"),
        ];
        let membership: ProjectMembership = [(4, Some(40)), (2, Some(20))].into_iter().collect();

        let plan = plan(&records, &membership, &rule());
        assert_eq!(plan.to_add.iter().map(|e| e.id).collect::<Vec<_>>(), vec![1, 5]);
        assert_eq!(plan.to_remove.iter().map(|e| e.id).collect::<Vec<_>>(), vec![2]);
        assert_eq!(plan.conflicts.iter().map(|e| e.id).collect::<Vec<_>>(), vec![7]);
        assert_eq!(plan.to_add[0].value.as_deref(), Some("UWAL-M-1"));
    }

    #[tokio::test]
    async fn missing_include_record_is_added() {
        let project = FakeProject::with_members(&[]);
        let records = vec![obs(1, "UWAL-M-100")];
        let mut reconciler = Reconciler::new(&project, &records, options(false));

        let mut seen = None;
        let report = reconciler
            .run(|plan| seen = Some((plan.clone(), project.mutating_calls().len())))
            .await
            .expect("run");

        let (seen, calls_at_report) = seen.expect("plan reported");
        assert_eq!(calls_at_report, 0, "plan must be reported before any add/remove");
        assert_eq!(seen.to_add, vec![PlanEntry { id: 1, value: Some("UWAL-M-100".into()) }]);
        assert_eq!(report.execution.adds, vec![(1, RecordOutcome::Added)]);
        assert_eq!(project.member_ids(), vec![1]);
        assert!(report.validation.is_valid());
    }

    #[tokio::test]
    async fn excluded_member_with_link_is_removed() {
        let project = FakeProject::with_members(&[(2, Some(20))]);
        let records = vec![obs(2, "UWAL-L-200")];
        let mut reconciler = Reconciler::new(&project, &records, options(false));

        let report = reconciler.run(|_| {}).await.expect("run");
        assert_eq!(report.execution.removes, vec![(2, RecordOutcome::Removed)]);
        assert!(project.member_ids().is_empty());
        assert_eq!(project.mutating_calls(), vec!["remove link 20"]);
    }

    #[tokio::test]
    async fn excluded_member_without_link_is_skipped_and_reported() {
        let project = FakeProject::with_members(&[(2, None)]);
        let records = vec![obs(2, "UWAL-L-200")];
        let mut reconciler = Reconciler::new(&project, &records, options(false));

        let report = reconciler.run(|_| {}).await.expect("run");
        assert_eq!(report.execution.removes, vec![(2, RecordOutcome::MissingHandle)]);
        assert_eq!(report.execution.failures(), 1);
        assert_eq!(project.member_ids(), vec![2]);
        assert!(project.mutating_calls().is_empty());
        // Still a member and still lacking UWAL-M, so validation flags it.
        assert_eq!(report.validation.invalid[0].id, 2);
    }

    #[tokio::test]
    async fn member_matching_neither_pattern_is_flagged_invalid() {
        let project = FakeProject::with_members(&[(3, Some(30)), (4, Some(40)), (8, Some(80))]);
        let records = vec![obs(3, "OTHER-999"), obs(4, "UWAL-M-4")];
        let mut reconciler = Reconciler::new(&project, &records, options(false));

        let report = reconciler.run(|_| {}).await.expect("run");
        assert!(report.plan.is_empty());
        assert_eq!(
            report.validation.invalid,
            vec![
                PlanEntry { id: 3, value: Some("OTHER-999".into()) },
                PlanEntry { id: 8, value: None },
            ]
        );
        assert!(report.correction.is_none());
        assert_eq!(project.member_ids(), vec![3, 4, 8]);
    }

    #[tokio::test]
    async fn second_run_is_a_no_op() {
        let project = FakeProject::with_members(&[(2, Some(20)), (9, Some(90))]);
        let records = vec![obs(1, "UWAL-M-1"), obs(2, "UWAL-L-2"), obs(9, "UWAL-M-9")];

        let first = Reconciler::new(&project, &records, options(false))
            .run(|_| {})
            .await
            .expect("first run");
        assert!(!first.plan.is_empty());

        let second = Reconciler::new(&project, &records, options(false))
            .run(|_| {})
            .await
            .expect("second run");
        assert!(second.plan.to_add.is_empty());
        assert!(second.plan.to_remove.is_empty());
        assert!(second.execution.adds.is_empty() && second.execution.removes.is_empty());
    }

    #[tokio::test]
    async fn dry_run_makes_no_mutating_calls() {
        let project = FakeProject::with_members(&[(2, Some(20))]);
        let records = vec![obs(1, "UWAL-M-1"), obs(2, "UWAL-L-2")];
        let mut reconciler = Reconciler::new(&project, &records, options(true));

        let report = reconciler.run(|_| {}).await.expect("run");
        assert_eq!(report.execution.adds, vec![(1, RecordOutcome::WouldAdd)]);
        assert_eq!(report.execution.removes, vec![(2, RecordOutcome::WouldRemove)]);
        assert!(project.mutating_calls().is_empty());
        // Validation still ran against the untouched live state.
        assert_eq!(report.validation.invalid.iter().map(|e| e.id).collect::<Vec<_>>(), vec![2]);
    }

    #[tokio::test]
    async fn failed_add_does_not_stop_the_batch() {
        let project = FakeProject::with_members(&[]);
        project.state.lock().expect("lock").fail_add.push(1);
        let records = vec![obs(1, "UWAL-M-1"), obs(2, "UWAL-M-2")];
        let mut reconciler = Reconciler::new(&project, &records, options(false));

        let report = reconciler.run(|_| {}).await.expect("run");
        assert!(matches!(report.execution.adds[0], (1, RecordOutcome::AddFailed(_))));
        assert_eq!(report.execution.adds[1], (2, RecordOutcome::Added));
        assert_eq!(project.member_ids(), vec![2]);
    }

    #[tokio::test]
    async fn conflicting_record_is_never_acted_on() {
        let project = FakeProject::with_members(&[]);
        let records = vec![obs(7, "UWAL-M-7 / UWAL-L-7")];
        let mut reconciler = Reconciler::new(&project, &records, options(false));

        let report = reconciler.run(|_| {}).await.expect("run");
        assert_eq!(report.plan.conflicts.len(), 1);
        assert!(report.plan.is_empty());
        assert!(project.mutating_calls().is_empty());
    }

    #[tokio::test]
    async fn correction_is_a_single_bounded_pass() {
        let project = FakeProject::with_members(&[(3, Some(30)), (8, None)]);
        let records = vec![obs(3, "OTHER-999")];
        let mut opts = options(false);
        opts.correct_invalid = true;
        let mut reconciler = Reconciler::new(&project, &records, opts);

        let report = reconciler.run(|_| {}).await.expect("run");
        let correction = report.correction.expect("correction ran");
        assert_eq!(
            correction.removes,
            vec![(3, RecordOutcome::Removed), (8, RecordOutcome::MissingHandle)]
        );
        assert_eq!(correction.remaining.iter().map(|e| e.id).collect::<Vec<_>>(), vec![8]);
        // Two listings (before and after execution); none after correcting.
        let lists = project
            .state
            .lock()
            .expect("lock")
            .calls
            .iter()
            .filter(|c| c.as_str() == "list")
            .count();
        assert_eq!(lists, 2);
        assert_eq!(project.member_ids(), vec![8]);
    }

    #[tokio::test]
    async fn dry_run_correction_counts_would_remove_as_handled() {
        let project = FakeProject::with_members(&[(3, Some(30)), (8, None)]);
        let records = vec![obs(3, "OTHER-999")];
        let mut opts = options(true);
        opts.correct_invalid = true;
        let mut reconciler = Reconciler::new(&project, &records, opts);

        let report = reconciler.run(|_| {}).await.expect("run");
        let correction = report.correction.expect("correction ran");
        assert_eq!(
            correction.removes,
            vec![(3, RecordOutcome::WouldRemove), (8, RecordOutcome::MissingHandle)]
        );
        assert_eq!(correction.remaining.iter().map(|e| e.id).collect::<Vec<_>>(), vec![8]);
        assert!(project.mutating_calls().is_empty());
        assert_eq!(project.member_ids(), vec![3, 8]);
    }

    #[tokio::test]
    async fn failed_listing_aborts_the_run() {
        struct Unreachable;

        #[async_trait]
        impl ProjectApi for Unreachable {
            async fn list_members(
                &self,
                _project_id: u64,
                _on_progress: Option<&ProgressCallback>,
            ) -> Result<ProjectMembership, ApiError> {
                Err(ApiError::FetchExhausted {
                    attempts: 5,
                    last: Box::new(ApiError::Status {
                        status: 503,
                        body: String::new(),
                    }),
                })
            }

            async fn add_member(
                &self,
                _project_id: u64,
                _observation_id: u64,
                _on_progress: Option<&ProgressCallback>,
            ) -> Result<(), ApiError> {
                unreachable!("no adds after a failed listing")
            }

            async fn remove_member(
                &self,
                _link_id: u64,
                _on_progress: Option<&ProgressCallback>,
            ) -> Result<(), ApiError> {
                unreachable!("no removes after a failed listing")
            }
        }

        let records = vec![obs(1, "UWAL-M-1")];
        let err = Reconciler::new(&Unreachable, &records, options(false))
            .run(|_| panic!("no plan without a listing"))
            .await
            .expect_err("listing failure is fatal");
        assert!(matches!(err, ReconcileError::Membership(e) if e.is_exhausted()));
    }
}
