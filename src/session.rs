//! Session-wide teardown safety net.
//!
//! [`SessionGuard`] wraps a [`ResourceController`] and funnels both the
//! normal end-of-session path and interrupt-driven termination through one
//! cleanup routine: destroy everything the controller tracked, then sweep
//! by session tag for anything missed. There is deliberately no second,
//! signal-handler-only teardown implementation.

use std::future::Future;

use crate::controller::ResourceController;
use crate::provider::Provider;

/// How a guarded task ended.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum GuardOutcome<T> {
    /// The task ran to completion with this result.
    Completed(T),
    /// A termination signal arrived before the task finished.
    Interrupted,
}

/// Accounting for one teardown pass.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SweepSummary {
    /// Tracked instances destroyed directly.
    pub destroyed: usize,
    /// Instances removed by the tag-based sweep backstop.
    pub swept: usize,
    /// Notes for failures that were swallowed during teardown.
    pub notes: Vec<String>,
}

/// Guarantees bulk cleanup however the session ends.
#[derive(Debug)]
pub struct SessionGuard<P: Provider> {
    controller: ResourceController<P>,
    tag: String,
}

impl<P: Provider> SessionGuard<P> {
    /// Wraps a controller and the session tag its resources carry.
    #[must_use]
    pub fn new(controller: ResourceController<P>, tag: impl Into<String>) -> Self {
        Self {
            controller,
            tag: tag.into(),
        }
    }

    /// Destroys tracked instances, then sweeps the session tag.
    ///
    /// Failures never propagate out of teardown; they are collected as
    /// notes so the remaining steps always run.
    pub async fn cleanup(&mut self) -> SweepSummary {
        let mut summary = SweepSummary::default();

        let report = self.controller.cleanup().await;
        summary.destroyed = report.destroyed;
        summary.notes.extend(report.notes);

        match self.controller.destroy_all(&self.tag).await {
            Ok(count) => summary.swept = count,
            Err(err) => summary
                .notes
                .push(format!("tag sweep for {} failed: {err}", self.tag)),
        }

        summary
    }

    /// Drives `task` to completion unless a termination signal arrives
    /// first, then runs [`cleanup`](Self::cleanup) on either path.
    pub async fn shield<T, F>(&mut self, task: F) -> (GuardOutcome<T>, SweepSummary)
    where
        F: Future<Output = T>,
    {
        let outcome = tokio::select! {
            result = task => GuardOutcome::Completed(result),
            _ = tokio::signal::ctrl_c() => GuardOutcome::Interrupted,
        };

        let summary = self.cleanup().await;
        (outcome, summary)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::provider::{InstanceRecord, InstanceSpec, InstanceStatus};
    use crate::test_support::FakeProvider;
    use rstest::rstest;

    const TAG: &str = "gauntlet-test";

    fn spec(name: &str) -> InstanceSpec {
        InstanceSpec::builder()
            .name(name)
            .image("ubuntu-24-04-x64")
            .region("nyc3")
            .size("s-1vcpu-1gb")
            .tags(vec![String::from(TAG)])
            .build()
            .unwrap_or_else(|err| panic!("spec: {err}"))
    }

    fn orphan(id: &str) -> InstanceRecord {
        InstanceRecord {
            id: String::from(id),
            name: format!("gauntlet-orphan-{id}"),
            public_ip: None,
            status: InstanceStatus::Active,
            tags: vec![String::from(TAG)],
        }
    }

    #[rstest]
    #[tokio::test]
    async fn cleanup_destroys_tracked_and_sweeps_orphans() {
        let provider = FakeProvider::new();
        let mut controller = ResourceController::new(provider.clone())
            .with_poll_interval(Duration::from_millis(1));
        controller
            .create(&spec("gauntlet-a"), true, Duration::from_secs(1))
            .await
            .unwrap_or_else(|err| panic!("create: {err}"));
        provider.seed_instance(orphan("900"));

        let mut guard = SessionGuard::new(controller, TAG);
        let summary = guard.cleanup().await;

        assert_eq!(summary.destroyed, 1);
        assert_eq!(summary.swept, 1);
        assert!(summary.notes.is_empty());
        assert!(provider.live_instances().is_empty());
    }

    #[rstest]
    #[tokio::test]
    async fn shield_runs_cleanup_after_normal_completion() {
        let provider = FakeProvider::new();
        provider.seed_instance(orphan("901"));
        let guard_controller = ResourceController::new(provider.clone());
        let mut guard = SessionGuard::new(guard_controller, TAG);

        let (outcome, summary) = guard.shield(async { 7 }).await;

        assert_eq!(outcome, GuardOutcome::Completed(7));
        assert_eq!(summary.swept, 1);
        assert!(provider.live_instances().is_empty());
    }

    #[rstest]
    #[tokio::test]
    async fn cleanup_notes_swallowed_failures() {
        let provider = FakeProvider::new();
        let mut controller = ResourceController::new(provider.clone())
            .with_poll_interval(Duration::from_millis(1));
        let stuck = controller
            .create(&spec("gauntlet-stuck"), true, Duration::from_secs(1))
            .await
            .unwrap_or_else(|err| panic!("create: {err}"));
        provider.fail_destroy(stuck.id.clone());

        let mut guard = SessionGuard::new(controller, TAG);
        let summary = guard.cleanup().await;

        assert_eq!(summary.destroyed, 0);
        assert!(
            summary.notes.len() >= 2,
            "direct destroy and sweep should both note the refusal: {:?}",
            summary.notes
        );
    }
}
