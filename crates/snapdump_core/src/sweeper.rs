//! Reclamation of expired and deleted contexts.
//!
//! The crate does not keep a registry of contexts. Whatever maps batch IDs
//! to contexts implements [`ContextSource`] and calls [`sweep`] on a timer.

use crate::context::ReplicationContext;
use crate::types::BatchId;
use std::sync::Arc;
use tracing::{debug, info};

/// A collection of live contexts, keyed by batch ID.
pub trait ContextSource {
    /// Returns every context currently known.
    fn contexts(&self) -> Vec<Arc<ReplicationContext>>;

    /// Forgets the context with the given ID.
    fn remove(&self, id: BatchId);
}

/// Outcome of one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Contexts looked at.
    pub examined: usize,
    /// Contexts destroyed and removed from the source.
    pub destroyed: Vec<BatchId>,
    /// Contexts skipped because a lease was still held.
    pub in_use: usize,
}

/// Destroys every reclaimable context of `source` and removes it.
///
/// With `force`, every context is marked deleted first, so all unleased
/// contexts go regardless of expiry. Leased contexts always survive.
pub fn sweep(source: &dyn ContextSource, force: bool) -> SweepReport {
    let mut report = SweepReport::default();
    for context in source.contexts() {
        report.examined += 1;
        if force {
            context.mark_deleted();
        }
        if context.reclaim() {
            source.remove(context.id());
            report.destroyed.push(context.id());
        } else if context.is_used() {
            report.in_use += 1;
        }
    }

    if report.destroyed.is_empty() {
        debug!(examined = report.examined, force, "sweep found nothing to reclaim");
    } else {
        info!(
            examined = report.examined,
            destroyed = report.destroyed.len(),
            in_use = report.in_use,
            force,
            "swept replication contexts"
        );
    }
    report
}
