//! The execution state machine.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tracing::instrument;
use uuid::Uuid;

use crate::config::RunConfig;
use crate::db::{Database, DbError, RetryPolicy};
use crate::kpi;
use crate::rules::RuleSet;
use crate::staging::StagingManager;

use super::cancel::CancelHandle;
use super::plan::{choose_mode, resolve_rules, ExtractionPlan, ResolvedRule};
use super::record::{
    ExecutionMode, ExecutionRecord, ExecutionStatus, FailureInfo, PipelineStep, RuleOutcome,
};
use super::sink::ResultSink;
use super::staged::{self, StagedTables};
use super::{federated, ExecutionFailure, FailureCause, StepError};

/// Drives runs of rulesets against one source and one target database.
///
/// The configuration is fixed at construction; runs with different
/// thresholds use different coordinators and can proceed concurrently.
pub struct ExecutionCoordinator {
    source: Arc<dyn Database>,
    target: Arc<dyn Database>,
    sink: Arc<dyn ResultSink>,
    staging: Option<Arc<StagingManager>>,
    config: RunConfig,
    policy: RetryPolicy,
}

impl std::fmt::Debug for ExecutionCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionCoordinator")
            .field("source", &self.source.dialect())
            .field("target", &self.target.dialect())
            .field("staging", &self.staging.is_some())
            .field("config", &self.config)
            .finish()
    }
}

/// Mutable state of one run.
struct Run<'a> {
    execution_id: Uuid,
    record: ExecutionRecord,
    staged: StagedTables,
    cancel: &'a CancelHandle,
    started: Instant,
}

impl Run<'_> {
    /// Advance to `step`, unless the run has been cancelled.
    fn enter(&mut self, step: PipelineStep) -> Result<(), StepError> {
        if self.cancel.is_cancelled() {
            return Err(StepError::new(step, FailureCause::Cancelled));
        }
        tracing::debug!(execution_id = %self.execution_id, from = %self.record.step, to = %step, "pipeline step");
        self.record.step = step;
        Ok(())
    }
}

impl ExecutionCoordinator {
    pub fn new(
        source: Arc<dyn Database>,
        target: Arc<dyn Database>,
        sink: Arc<dyn ResultSink>,
        config: RunConfig,
    ) -> Self {
        let policy = RetryPolicy::from_run_config(&config);
        Self {
            source,
            target,
            sink,
            staging: None,
            config,
            policy,
        }
    }

    /// Make a landing database available for staged runs.
    pub fn with_staging(mut self, manager: Arc<StagingManager>) -> Self {
        self.staging = Some(manager);
        self
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Execute `ruleset` to completion.
    #[instrument(skip_all, fields(ruleset_id = %ruleset.ruleset_id))]
    pub async fn run(&self, ruleset: &RuleSet) -> Result<ExecutionRecord, ExecutionFailure> {
        self.run_with_cancel(ruleset, &CancelHandle::new()).await
    }

    /// Execute `ruleset`, stopping at the next step boundary once `cancel`
    /// is triggered. A cancelled run is persisted as `partial`.
    #[instrument(skip_all, fields(ruleset_id = %ruleset.ruleset_id, execution_id))]
    pub async fn run_with_cancel(
        &self,
        ruleset: &RuleSet,
        cancel: &CancelHandle,
    ) -> Result<ExecutionRecord, ExecutionFailure> {
        let execution_id = Uuid::new_v4();
        tracing::Span::current().record("execution_id", tracing::field::display(execution_id));

        let mut run = Run {
            execution_id,
            record: ExecutionRecord::new(execution_id, &ruleset.ruleset_id, ExecutionMode::Federated),
            staged: StagedTables::default(),
            cancel,
            started: Instant::now(),
        };

        let outcome = self.drive(ruleset, &mut run).await;

        if let Some(manager) = &self.staging {
            if !run.staged.is_empty() {
                let warnings = manager.retain_all(run.staged.tables_mut()).await;
                run.record.warnings.extend(warnings);
            }
            manager.release(&execution_id);
        }

        let mut record = run.record;
        record.staging_tables = run.staged.names();
        record.timing.total_ms = millis(run.started);
        record.finished_at = Some(Utc::now());

        match outcome {
            Ok(()) => self.finish(record).await,
            Err(err) => Err(self.fail(record, err).await),
        }
    }

    async fn drive(&self, ruleset: &RuleSet, run: &mut Run<'_>) -> Result<(), StepError> {
        run.enter(PipelineStep::Init)?;
        self.config
            .validate()
            .map_err(|e| StepError::new(PipelineStep::Init, FailureCause::InvalidConfig(e)))?;

        let rules = resolve_rules(
            &ruleset.rules,
            self.source.as_ref(),
            self.target.as_ref(),
            &self.policy,
        )
        .await?;

        let choice = choose_mode(
            self.config.mode,
            self.staging.is_some(),
            self.config.staging_threshold_rows,
            &rules,
            self.source.as_ref(),
            self.target.as_ref(),
            &self.policy,
        )
        .await;
        if let Some(warning) = choice.warning {
            tracing::warn!(execution_id = %run.execution_id, %warning, "execution mode fallback");
            run.record.warnings.push(warning);
        }
        run.record.mode = choice.mode;
        tracing::info!(
            execution_id = %run.execution_id,
            mode = %choice.mode,
            rules = rules.len(),
            "execution started"
        );

        if choice.mode == ExecutionMode::Staged {
            self.extract_and_stage(&rules, run).await?;
        } else {
            // Federated extraction happens per rule, inside MATCH.
            run.enter(PipelineStep::Extract)?;
        }

        self.match_rules(&rules, run).await?;

        run.enter(PipelineStep::Aggregate)?;
        let counts: Vec<_> = run.record.rules.iter().map(RuleOutcome::counts).collect();
        let snapshot = kpi::compute(
            &counts,
            ruleset.rules.len(),
            self.config.target_time,
            run.started.elapsed(),
        );
        tracing::info!(
            execution_id = %run.execution_id,
            rcr = snapshot.rcr.value,
            rcr_status = %snapshot.rcr.status,
            dqcs = snapshot.dqcs.value,
            rei = snapshot.rei.value,
            "KPIs computed"
        );
        run.record.kpi_snapshot = Some(snapshot);
        Ok(())
    }

    async fn extract_and_stage(&self, rules: &[ResolvedRule], run: &mut Run<'_>) -> Result<(), StepError> {
        let manager = self.staging.as_ref().ok_or_else(|| {
            StepError::new(
                PipelineStep::Stage,
                FailureCause::Staging("no landing database configured".into()),
            )
        })?;
        let plan = ExtractionPlan::build(rules);

        run.enter(PipelineStep::Extract)?;
        let started = Instant::now();
        let extracted = staged::extract(&plan, self.source.as_ref(), self.target.as_ref(), &self.policy).await?;
        run.record.timing.extraction_ms = millis(started);
        tracing::info!(
            execution_id = %run.execution_id,
            slices = plan.slices().count(),
            rows = extracted.rows(),
            "extraction complete"
        );

        run.enter(PipelineStep::Stage)?;
        let started = Instant::now();
        staged::stage(
            manager,
            run.execution_id,
            &plan,
            extracted,
            rules,
            &mut run.staged,
            &mut run.record.warnings,
        )
        .await?;
        run.record.timing.staging_ms = millis(started);
        Ok(())
    }

    async fn match_rules(&self, rules: &[ResolvedRule], run: &mut Run<'_>) -> Result<(), StepError> {
        run.enter(PipelineStep::Match)?;
        let started = Instant::now();

        for resolved in rules {
            let rule = &resolved.rule;
            if run.cancel.is_cancelled() {
                return Err(StepError::new(PipelineStep::Match, FailureCause::Cancelled));
            }

            let rule_started = Instant::now();
            let counts = match (run.record.mode, &self.staging) {
                (ExecutionMode::Staged, Some(manager)) => {
                    staged::summarize_rule(manager.landing().as_ref(), rule, &run.staged, &self.policy).await
                }
                (ExecutionMode::Staged, None) => Err(DbError::Internal("no landing database".into())),
                (ExecutionMode::Federated, _) => {
                    federated::summarize_rule(rule, self.source.as_ref(), self.target.as_ref(), &self.policy)
                        .await
                }
            }
            .map_err(|e| StepError::for_rule(PipelineStep::Match, &rule.rule_id, e))?;

            tracing::info!(
                execution_id = %run.execution_id,
                rule_id = %rule.rule_id,
                matched = counts.matched,
                unmatched_source = counts.unmatched_source,
                unmatched_target = counts.unmatched_target,
                "rule executed"
            );
            run.record.rules.push(RuleOutcome {
                rule_id: rule.rule_id.clone(),
                rule_name: rule.rule_name.clone(),
                confidence_score: rule.confidence_score,
                total_source: counts.total_source,
                total_target: counts.total_target,
                matched_count: counts.matched,
                unmatched_source_count: counts.unmatched_source,
                unmatched_target_count: counts.unmatched_target,
                elapsed_ms: millis(rule_started),
            });
        }
        run.record.timing.join_ms = millis(started);

        if let Some(manager) = &self.staging {
            let warnings = staged::mark_queried(manager, &mut run.staged).await;
            run.record.warnings.extend(warnings);
        }
        Ok(())
    }

    async fn finish(&self, mut record: ExecutionRecord) -> Result<ExecutionRecord, ExecutionFailure> {
        record.step = PipelineStep::Persist;
        record.status = ExecutionStatus::Success;

        let mut done = record.clone();
        done.step = PipelineStep::Done;
        match self.sink.persist(&done).await {
            Ok(id) => {
                tracing::info!(
                    execution_id = %done.execution_id,
                    sink_id = %id,
                    total_ms = done.timing.total_ms,
                    warnings = done.warnings.len(),
                    "execution complete"
                );
                Ok(done)
            }
            Err(e) => {
                tracing::error!(execution_id = %record.execution_id, error = %e, "could not persist execution record");
                record.status = ExecutionStatus::Failed;
                record.kpi_snapshot = None;
                let cause = FailureCause::from(e);
                record.failure = Some(FailureInfo {
                    step: PipelineStep::Persist,
                    rule_id: None,
                    message: cause.to_string(),
                });
                record.step = PipelineStep::Failed;
                Err(ExecutionFailure {
                    step: PipelineStep::Persist,
                    rule_id: None,
                    cause,
                    record: Box::new(record),
                })
            }
        }
    }

    async fn fail(&self, mut record: ExecutionRecord, err: StepError) -> ExecutionFailure {
        let cancelled = err.cause == FailureCause::Cancelled;
        record.kpi_snapshot = None;
        record.failure = Some(FailureInfo {
            step: err.step,
            rule_id: err.rule_id.clone(),
            message: err.cause.to_string(),
        });
        if cancelled {
            record.status = ExecutionStatus::Partial;
            record.step = err.step;
            tracing::warn!(
                execution_id = %record.execution_id,
                step = %err.step,
                rules_executed = record.rules.len(),
                "execution cancelled"
            );
        } else {
            record.status = ExecutionStatus::Failed;
            record.step = PipelineStep::Failed;
            tracing::error!(
                execution_id = %record.execution_id,
                step = %err.step,
                rule_id = ?err.rule_id,
                cause = %err.cause,
                "execution failed"
            );
        }

        if let Err(e) = self.sink.persist(&record).await {
            tracing::error!(execution_id = %record.execution_id, error = %e, "could not persist failed execution record");
        }

        ExecutionFailure {
            step: err.step,
            rule_id: err.rule_id,
            cause: err.cause,
            record: Box::new(record),
        }
    }
}

fn millis(since: Instant) -> u64 {
    since.elapsed().as_millis() as u64
}
