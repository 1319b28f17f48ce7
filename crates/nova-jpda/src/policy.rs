//! Smart-stepping policies and the rule that merges their answers.

use std::sync::Arc;

use nova_config::SteppingConfig;
use nova_jdi::{Location, StepDepth, StepSize, ThreadId};

use crate::editor::EditorContext;
use crate::filter::{stop_in_class, ExclusionFilter};

/// Outcome of asking whether to stop at a location.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOrStep {
    Stop,
    /// Keep stepping; `None` leaves the choice to the stepper.
    Skip {
        size: Option<StepSize>,
        depth: Option<StepDepth>,
    },
}

impl StopOrStep {
    pub fn skip() -> Self {
        StopOrStep::Skip {
            size: None,
            depth: None,
        }
    }

    pub fn skip_with(size: Option<StepSize>, depth: Option<StepDepth>) -> Self {
        StopOrStep::Skip { size, depth }
    }

    pub fn is_stop(self) -> bool {
        matches!(self, StopOrStep::Stop)
    }

    /// Combines two answers. A stop always wins; between two skips the
    /// coarser size (line over instruction) and the shallowest depth (into
    /// over over, over over out) win. Commutative.
    pub fn merge(self, other: StopOrStep) -> StopOrStep {
        match (self, other) {
            (StopOrStep::Stop, _) | (_, StopOrStep::Stop) => StopOrStep::Stop,
            (
                StopOrStep::Skip { size: s1, depth: d1 },
                StopOrStep::Skip { size: s2, depth: d2 },
            ) => StopOrStep::Skip {
                size: merge_size(s1, s2),
                depth: match (d1, d2) {
                    (Some(a), Some(b)) => Some(a.min(b)),
                    (a, b) => a.or(b),
                },
            },
        }
    }
}

fn merge_size(a: Option<StepSize>, b: Option<StepSize>) -> Option<StepSize> {
    match (a, b) {
        (Some(StepSize::Line), _) | (_, Some(StepSize::Line)) => Some(StepSize::Line),
        (a, b) => a.or(b),
    }
}

/// What a policy may look at when deciding.
pub struct PolicyContext<'a> {
    pub thread: ThreadId,
    pub location: &'a Location,
    pub options: &'a SteppingConfig,
    pub editor: Option<&'a dyn EditorContext>,
}

/// A smart-stepping policy. Policies may add patterns to the (per-step)
/// filter they are handed.
pub trait StepPolicy: Send + Sync {
    fn name(&self) -> &'static str;

    fn stop_here(&self, ctx: &PolicyContext<'_>, filter: &dyn ExclusionFilter) -> bool;

    /// `None` means no opinion.
    fn stop_at(&self, ctx: &PolicyContext<'_>, filter: &dyn ExclusionFilter) -> Option<StopOrStep> {
        Some(if self.stop_here(ctx, filter) {
            StopOrStep::Stop
        } else {
            StopOrStep::skip()
        })
    }
}

/// Stops unless the location's class matches an exclusion pattern.
pub struct ClassFilterPolicy;

impl StepPolicy for ClassFilterPolicy {
    fn name(&self) -> &'static str {
        "class-filter"
    }

    fn stop_here(&self, ctx: &PolicyContext<'_>, filter: &dyn ExclusionFilter) -> bool {
        !ctx.options.use_step_filters || stop_in_class(ctx.location.declaring_type(), filter)
    }
}

/// Skips classes the editor has no source for, remembering them in the
/// step's filter so later checks agree.
pub struct SourceAvailabilityPolicy;

impl StepPolicy for SourceAvailabilityPolicy {
    fn name(&self) -> &'static str {
        "source-availability"
    }

    fn stop_here(&self, ctx: &PolicyContext<'_>, filter: &dyn ExclusionFilter) -> bool {
        let Some(editor) = ctx.editor else {
            return true;
        };
        let class_name = ctx.location.declaring_type();
        if editor.has_source(class_name) {
            return true;
        }
        tracing::debug!(
            target: "nova.jpda.step",
            class = class_name,
            "no source; excluding class for this step"
        );
        filter.add_exclusion_patterns(&[class_name.to_owned()]);
        false
    }

    fn stop_at(&self, ctx: &PolicyContext<'_>, filter: &dyn ExclusionFilter) -> Option<StopOrStep> {
        ctx.editor?;
        Some(if self.stop_here(ctx, filter) {
            StopOrStep::Stop
        } else {
            StopOrStep::skip()
        })
    }
}

/// Fixed, ordered fan-out over the session's policies.
#[derive(Clone)]
pub struct CompoundSmartSteppingListener {
    policies: Vec<Arc<dyn StepPolicy>>,
}

impl CompoundSmartSteppingListener {
    pub fn new(policies: Vec<Arc<dyn StepPolicy>>) -> Self {
        Self { policies }
    }

    /// Source availability first, so the class filter sees what it excludes.
    pub fn default_policies() -> Self {
        Self::new(vec![
            Arc::new(SourceAvailabilityPolicy),
            Arc::new(ClassFilterPolicy),
        ])
    }

    pub fn policies(&self) -> &[Arc<dyn StepPolicy>] {
        &self.policies
    }

    /// Logical AND over all policies.
    pub fn stop_here(&self, ctx: &PolicyContext<'_>, filter: &dyn ExclusionFilter) -> bool {
        self.policies.iter().all(|p| p.stop_here(ctx, filter))
    }

    /// Folds every answer with [`StopOrStep::merge`]; stops when nobody
    /// answers.
    pub fn stop_at(&self, ctx: &PolicyContext<'_>, filter: &dyn ExclusionFilter) -> StopOrStep {
        let mut merged: Option<StopOrStep> = None;
        for policy in &self.policies {
            if let Some(answer) = policy.stop_at(ctx, filter) {
                tracing::trace!(
                    target: "nova.jpda.step",
                    policy = policy.name(),
                    answer = ?answer,
                    location = %ctx.location,
                    "smart-stepping answer"
                );
                merged = Some(match merged {
                    Some(acc) => acc.merge(answer),
                    None => answer,
                });
            }
        }
        merged.unwrap_or(StopOrStep::Stop)
    }
}

impl Default for CompoundSmartSteppingListener {
    fn default() -> Self {
        Self::default_policies()
    }
}
