//! Running one task: find, diff, check, render.

use serde::Serialize;
use std::fmt;
use tracing::{debug, info, warn};

use crate::error::{Result, TaskError};
use crate::tasks::{Changes, Context, DeclarativeWriter, Lifecycle, Resource, TaskOutput};

/// What a run does with the tasks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum Target {
    /// Create and update live resources.
    #[default]
    Apply,
    /// Read live resources and report what would change.
    DryRun,
    /// Emit declarative configuration without touching the cloud.
    Export,
}

/// What happened to one task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Action {
    /// The resource was created.
    Created,
    /// The resource existed and was updated in place.
    Updated,
    /// The resource already matched.
    Unchanged,
    /// A required resource exists and matches.
    Validated,
    /// A required resource exists but differs; the difference was logged.
    Drifted,
    /// The task was only looked up.
    Ignored,
    /// Dry run: the resource would be created.
    WouldCreate,
    /// Dry run: the resource would be updated.
    WouldUpdate,
    /// Declarative output was emitted.
    Exported,
}

impl Action {
    /// Returns true if the cloud was or would be mutated.
    #[must_use]
    pub const fn is_change(self) -> bool {
        matches!(
            self,
            Self::Created | Self::Updated | Self::WouldCreate | Self::WouldUpdate
        )
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Unchanged => "unchanged",
            Self::Validated => "validated",
            Self::Drifted => "drifted",
            Self::Ignored => "ignored",
            Self::WouldCreate => "would create",
            Self::WouldUpdate => "would update",
            Self::Exported => "exported",
        };
        f.write_str(s)
    }
}

/// Result of one successful step.
#[derive(Debug, Clone)]
pub struct StepOutcome {
    /// What happened.
    pub action: Action,
    /// Fields that differed between the live resource and the declaration.
    pub changes: Vec<String>,
    /// Output for dependent tasks.
    pub output: TaskOutput,
    /// Declarative blocks, for [`Target::Export`].
    pub declarative: Option<DeclarativeWriter>,
}

impl StepOutcome {
    fn new(action: Action, changes: &Changes, output: TaskOutput) -> Self {
        Self {
            action,
            changes: changes.fields().map(str::to_string).collect(),
            output,
            declarative: None,
        }
    }
}

/// Runs one task against `target`.
///
/// # Errors
///
/// Returns `SharedNotFound` when a shared or must-exist resource is missing,
/// `LifecycleViolation` when a validate-only resource differs, and any
/// error raised by the task itself.
pub async fn run_step<R: Resource>(task: &R, ctx: &Context<'_>, target: Target) -> Result<StepOutcome> {
    let (kind, name) = (R::KIND, task.name());

    if target == Target::Export {
        let mut writer = DeclarativeWriter::new();
        task.render_declarative(&mut writer)?;
        return Ok(StepOutcome {
            declarative: Some(writer),
            ..StepOutcome::new(Action::Exported, &Changes::default(), task.output(ctx))
        });
    }

    let lifecycle = task.lifecycle();
    let actual = task.find(ctx).await?;

    if lifecycle == Lifecycle::Ignore {
        let output = actual.as_ref().map_or_else(|| task.output(ctx), |a| a.output(ctx));
        return Ok(StepOutcome::new(Action::Ignored, &Changes::default(), output));
    }

    let must_exist = task.is_shared()
        || matches!(
            lifecycle,
            Lifecycle::ExistsAndValidates | Lifecycle::ExistsAndWarnIfChanges
        );
    if must_exist && actual.is_none() {
        return Err(TaskError::SharedNotFound {
            kind,
            name: name.to_string(),
        }
        .into());
    }

    let changes = Changes::compute(actual.as_ref(), task)?;

    if let Some(found) = &actual {
        if must_exist {
            if changes.is_empty() {
                return Ok(StepOutcome::new(Action::Validated, &changes, found.output(ctx)));
            }
            let fields = changes.fields().collect::<Vec<_>>().join(", ");
            if lifecycle == Lifecycle::ExistsAndValidates && !task.is_shared() {
                return Err(TaskError::LifecycleViolation {
                    kind,
                    name: name.to_string(),
                    fields,
                }
                .into());
            }
            warn!("{kind} {name} is not managed here but differs in: {fields}");
            return Ok(StepOutcome::new(Action::Drifted, &changes, found.output(ctx)));
        }
        if changes.is_empty() {
            debug!("{kind} {name} is up to date");
            return Ok(StepOutcome::new(Action::Unchanged, &changes, found.output(ctx)));
        }
    }

    task.check_changes(actual.as_ref(), &changes)?;

    match (target, &actual) {
        (Target::DryRun, Some(found)) => Ok(StepOutcome::new(
            Action::WouldUpdate,
            &changes,
            found.output(ctx),
        )),
        (Target::DryRun, None) => Ok(StepOutcome::new(
            Action::WouldCreate,
            &changes,
            task.output(ctx),
        )),
        (_, Some(_)) => {
            let fields = changes.fields().collect::<Vec<_>>().join(", ");
            info!("Updating {kind} {name}: {fields}");
            let output = task.render_cloud(ctx, actual.as_ref(), &changes).await?;
            Ok(StepOutcome::new(Action::Updated, &changes, output))
        }
        (_, None) => {
            info!("Creating {kind} {name}");
            let output = task.render_cloud(ctx, None, &changes).await?;
            Ok(StepOutcome::new(Action::Created, &changes, output))
        }
    }
}
