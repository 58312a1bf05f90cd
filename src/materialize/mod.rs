//! Lazy-content materialization — the watcher/trigger protocol.
//!
//! Dynamically-rendered widgets materialize content incrementally with no
//! fixed "done" signal. [`materialize`] waits for a caller-supplied settle
//! predicate over a watched subtree, optionally firing a trigger control
//! (a "load more" activation) once per change notification to drive
//! paginated/virtualized widgets to completion without polling.
//!
//! One owned [`Subscription`] exists per invocation and is released on every
//! exit path — normal resolve, short-circuit, timeout, or cancellation of the
//! surrounding future.

use crate::error::{GleanerError, GleanerResult};
use crate::view::{ChangeBatch, NodeHandle, Subscription};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Decides whether the watched subtree has finished materializing.
///
/// `batch` is the change notification that prompted the re-check, `None` for
/// the entry checks that run before any notification has arrived. On success
/// the implementation returns the node the wait resolves with.
#[async_trait]
pub trait SettleCheck: Send + Sync {
    async fn check(
        &self,
        root: &NodeHandle,
        batch: Option<&ChangeBatch>,
    ) -> GleanerResult<Option<NodeHandle>>;
}

/// One materialization wait. Immutable; consumed by exactly one
/// [`materialize`] call.
pub struct WatchSpec {
    /// Root of the watched subtree.
    pub root: NodeHandle,
    /// Completion predicate.
    pub check: Arc<dyn SettleCheck>,
    /// Selector for an actionable load-more control within the subtree,
    /// invoked at most once per change notification.
    pub trigger: Option<String>,
    /// Bound on the whole wait. `None` waits indefinitely.
    pub timeout: Option<Duration>,
}

/// Wait until the subtree satisfies the settle predicate.
///
/// Resolves `Ok(Some(node))` with the predicate's completion node,
/// `Ok(None)` when the root has no children at entry (empty-result short
/// circuit — no subscription is created), or an error on timeout / lost
/// subscription.
pub async fn materialize(spec: WatchSpec) -> GleanerResult<Option<NodeHandle>> {
    let started = Instant::now();

    // Content may have loaded before the watcher attached; checking first
    // avoids the missed-event race entirely.
    if let Some(node) = spec.check.check(&spec.root, None).await? {
        return Ok(Some(node));
    }

    if spec.root.child_count().await? == 0 {
        debug!("watched subtree has no children; resolving empty");
        return Ok(None);
    }

    let mut subscription = spec.root.subscribe().await?;

    // Re-check after attaching: the predicate may have been satisfied in the
    // gap between the first check and the subscription.
    if let Some(node) = spec.check.check(&spec.root, None).await? {
        return Ok(Some(node));
    }

    fire_trigger(&spec).await?;

    let deadline = spec.timeout.map(|t| tokio::time::Instant::now() + t);
    let mut notifications: u64 = 0;

    loop {
        let batch = next_batch(&mut subscription, deadline, started).await?;
        notifications += 1;
        trace!(
            notifications,
            inserted = batch.inserted.len(),
            removed = batch.removed.len(),
            "change notification"
        );

        if let Some(node) = spec.check.check(&spec.root, Some(&batch)).await? {
            debug!(
                notifications,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "content settled"
            );
            return Ok(Some(node));
        }

        // Not settled: advance loading. At most one activation per
        // notification, never after the predicate is satisfied.
        fire_trigger(&spec).await?;
    }
}

async fn next_batch(
    subscription: &mut Subscription,
    deadline: Option<tokio::time::Instant>,
    started: Instant,
) -> GleanerResult<ChangeBatch> {
    let batch = match deadline {
        Some(at) => tokio::time::timeout_at(at, subscription.next_change())
            .await
            .map_err(|_| GleanerError::MaterializationTimeout {
                waited_ms: started.elapsed().as_millis() as u64,
            })?,
        None => subscription.next_change().await,
    };
    batch.ok_or(GleanerError::WatchInterrupted)
}

async fn fire_trigger(spec: &WatchSpec) -> GleanerResult<()> {
    let Some(selector) = &spec.trigger else {
        return Ok(());
    };
    if let Some(control) = spec.root.query(selector).await? {
        trace!(selector, "firing trigger");
        control.activate().await?;
    }
    Ok(())
}

// ── Shipped settle checks ────────────────────────────────────────────────────

/// Settled when the root's last direct child carries a marker attribute.
///
/// List widgets that append a load-more stub as their trailing child satisfy
/// this exactly when the stub has been replaced by a real item.
pub struct LastChildHasAttr {
    pub attr: String,
}

#[async_trait]
impl SettleCheck for LastChildHasAttr {
    async fn check(
        &self,
        root: &NodeHandle,
        _batch: Option<&ChangeBatch>,
    ) -> GleanerResult<Option<NodeHandle>> {
        let Some(last) = root.query(":scope > :last-child").await? else {
            return Ok(None);
        };
        if last.attr(&self.attr).await?.is_some() {
            Ok(Some(Arc::clone(root)))
        } else {
            Ok(None)
        }
    }
}

/// Settled when any descendant matches a selector. Resolves with the first
/// matching node.
pub struct HasDescendant {
    pub selector: String,
}

#[async_trait]
impl SettleCheck for HasDescendant {
    async fn check(
        &self,
        root: &NodeHandle,
        _batch: Option<&ChangeBatch>,
    ) -> GleanerResult<Option<NodeHandle>> {
        root.query(&self.selector).await
    }
}

/// Settled when a change batch reports removal of a node with the given tag.
///
/// Re-rendering widgets tear down their old output first; the removal is the
/// earliest reliable signal that a redraw is underway and the previous
/// content is stale. Purely notification-driven — never settles on the entry
/// checks.
pub struct NodeRemoved {
    pub tag: String,
}

#[async_trait]
impl SettleCheck for NodeRemoved {
    async fn check(
        &self,
        root: &NodeHandle,
        batch: Option<&ChangeBatch>,
    ) -> GleanerResult<Option<NodeHandle>> {
        match batch {
            Some(b) if b.removed_tag(&self.tag) => Ok(Some(Arc::clone(root))),
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::view::fixture::{Elem, FixtureTree};

    fn question(id: &str) -> Elem {
        Elem::new("div").attr("data-question-id", id)
    }

    #[tokio::test]
    async fn test_already_settled_skips_subscription() {
        let tree = FixtureTree::new(
            Elem::new("div")
                .attr("data-widget", "webListQuestions")
                .child(question("q-1")),
        );
        let root = tree.root();

        let settled = materialize(WatchSpec {
            root,
            check: Arc::new(LastChildHasAttr {
                attr: "data-question-id".to_string(),
            }),
            trigger: None,
            timeout: Some(Duration::from_secs(5)),
        })
        .await
        .unwrap();

        assert!(settled.is_some());
        assert_eq!(tree.live_subscriptions(), 0);
    }

    #[tokio::test]
    async fn test_empty_root_resolves_none_without_subscription() {
        let tree = FixtureTree::new(Elem::new("div").attr("data-widget", "webListQuestions"));
        let root = tree.root();

        let settled = materialize(WatchSpec {
            root,
            check: Arc::new(LastChildHasAttr {
                attr: "data-question-id".to_string(),
            }),
            trigger: None,
            timeout: Some(Duration::from_secs(5)),
        })
        .await
        .unwrap();

        assert!(settled.is_none());
        assert_eq!(tree.live_subscriptions(), 0);
        assert_eq!(tree.subscriptions_created(), 0);
    }

    #[tokio::test]
    async fn test_trigger_drives_loading_to_completion() {
        // A widget whose trailing child is a load-more stub. Each activation
        // replaces the stub with one real question (the last batch carries no
        // stub), so two clicks finish the load.
        let stub = Elem::new("div").child(Elem::new("button").attr("data-load", "more"));
        let tree = FixtureTree::new(
            Elem::new("div")
                .attr("data-widget", "webListQuestions")
                .child(question("q-1"))
                .child(stub.clone()),
        );

        tree.script_activation("data-load", |root| {
            // Replace the trailing stub with the next question; re-append the
            // stub unless this was the final page.
            let stub = root.children.pop().expect("stub present");
            let n = root.children.len();
            root.children.push(
                Elem::new("div").attr_owned("data-question-id", format!("q-{}", n + 1)),
            );
            let last_page = n >= 2;
            if !last_page {
                root.children.push(stub);
            }
            ChangeBatch {
                inserted: vec!["div".to_string()],
                removed: vec!["div".to_string()],
            }
        });

        let root = tree.root();
        let settled = materialize(WatchSpec {
            root: Arc::clone(&root),
            check: Arc::new(LastChildHasAttr {
                attr: "data-question-id".to_string(),
            }),
            trigger: Some(":scope > :last-child button".to_string()),
            timeout: Some(Duration::from_secs(5)),
        })
        .await
        .unwrap();

        assert!(settled.is_some());
        let questions = root.query_all("[data-question-id]").await.unwrap();
        assert_eq!(questions.len(), 3);
        // Subscription released once settled.
        assert_eq!(tree.live_subscriptions(), 0);
        assert_eq!(tree.subscriptions_created(), 1);
    }

    #[tokio::test]
    async fn test_timeout_rejects() {
        // One child, no trigger, no mutations: the predicate can never be
        // satisfied and the bounded wait must reject.
        let tree = FixtureTree::new(
            Elem::new("div")
                .attr("data-widget", "webListQuestions")
                .child(Elem::new("div")),
        );

        let result = materialize(WatchSpec {
            root: tree.root(),
            check: Arc::new(LastChildHasAttr {
                attr: "data-question-id".to_string(),
            }),
            trigger: None,
            timeout: Some(Duration::from_millis(50)),
        })
        .await;

        assert!(matches!(
            result,
            Err(GleanerError::MaterializationTimeout { .. })
        ));
        assert_eq!(tree.live_subscriptions(), 0);
    }

    #[tokio::test]
    async fn test_node_removed_settles_on_notification() {
        let tree = FixtureTree::new(
            Elem::new("div")
                .attr("data-onboarding-target", "trendsOnboarding1")
                .child(Elem::new("svg")),
        );
        let root = tree.root();

        let wait = materialize(WatchSpec {
            root: Arc::clone(&root),
            check: Arc::new(NodeRemoved {
                tag: "svg".to_string(),
            }),
            trigger: None,
            timeout: Some(Duration::from_secs(5)),
        });
        tokio::pin!(wait);

        // Not settled until the old diagram is torn down.
        tokio::select! {
            _ = &mut wait => panic!("settled before any mutation"),
            _ = tokio::time::sleep(Duration::from_millis(20)) => {}
        }

        tree.mutate(|root| {
            root.children.clear();
            ChangeBatch {
                inserted: vec![],
                removed: vec!["svg".to_string()],
            }
        });

        let settled = wait.await.unwrap();
        assert!(settled.is_some());
        assert_eq!(tree.live_subscriptions(), 0);
    }

    #[tokio::test]
    async fn test_cancellation_releases_subscription() {
        let tree = FixtureTree::new(
            Elem::new("div")
                .attr("data-widget", "webListQuestions")
                .child(Elem::new("div")),
        );

        let wait = tokio::spawn(materialize(WatchSpec {
            root: tree.root(),
            check: Arc::new(LastChildHasAttr {
                attr: "data-question-id".to_string(),
            }),
            trigger: None,
            timeout: None,
        }));

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(tree.live_subscriptions(), 1);

        // Abandoning the in-flight wait must release the backend observer.
        wait.abort();
        let _ = wait.await;
        assert_eq!(tree.live_subscriptions(), 0);
    }
}
