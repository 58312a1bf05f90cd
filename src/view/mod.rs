//! View-tree provider abstraction.
//!
//! Defines the `ViewTree`, `ViewNode`, and `ViewState` traits that abstract
//! over the rendered-page backend (currently Chromium via chromiumoxide, plus
//! an in-memory fixture tree for tests). The engine only ever borrows nodes;
//! the backend owns the live tree. The single mutation the engine performs is
//! `ViewNode::activate` (a simulated click).

pub mod chromium;
pub mod fixture;

use crate::error::GleanerResult;
use crate::session::CookieJar;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Shared handle to a node in the rendered view tree.
pub type NodeHandle = Arc<dyn ViewNode>;

/// One structural change notification: nodes inserted into or removed from a
/// watched subtree. Carries tag names only — enough for settle predicates
/// that key on what appeared or disappeared, nothing more.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChangeBatch {
    /// Tag names of inserted nodes.
    pub inserted: Vec<String>,
    /// Tag names of removed nodes.
    pub removed: Vec<String>,
}

impl ChangeBatch {
    /// True if a node with the given tag was removed in this batch.
    pub fn removed_tag(&self, tag: &str) -> bool {
        self.removed.iter().any(|t| t.eq_ignore_ascii_case(tag))
    }
}

/// An owned, single-use change-notification subscription.
///
/// Dropping the subscription releases the backend-side observer on every exit
/// path — normal resolve, short-circuit, or cancellation of the surrounding
/// future. Exactly one subscription exists per watcher invocation.
pub struct Subscription {
    receiver: mpsc::UnboundedReceiver<ChangeBatch>,
    _guard: SubscriptionGuard,
}

impl Subscription {
    /// Build a subscription from a change receiver and a release action run
    /// when the subscription is dropped.
    pub fn new(
        receiver: mpsc::UnboundedReceiver<ChangeBatch>,
        release: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            receiver,
            _guard: SubscriptionGuard {
                release: Some(Box::new(release)),
            },
        }
    }

    /// Wait for the next change notification. `None` means the backend
    /// dropped the sender (page gone, tree torn down).
    pub async fn next_change(&mut self) -> Option<ChangeBatch> {
        self.receiver.recv().await
    }
}

struct SubscriptionGuard {
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

/// A node in the rendered view tree.
///
/// Borrowed for the duration of one extraction call; the engine never stores
/// handles beyond the unit of work that produced them.
#[async_trait]
pub trait ViewNode: Send + Sync {
    /// Read an attribute value, `None` if absent.
    async fn attr(&self, name: &str) -> GleanerResult<Option<String>>;
    /// Concatenated visible text of the subtree.
    async fn text(&self) -> GleanerResult<String>;
    /// First descendant matching the selector, if any.
    async fn query(&self, selector: &str) -> GleanerResult<Option<NodeHandle>>;
    /// All descendants matching the selector, in document order.
    async fn query_all(&self, selector: &str) -> GleanerResult<Vec<NodeHandle>>;
    /// Number of direct children.
    async fn child_count(&self) -> GleanerResult<usize>;
    /// Simulated UI activation (click). The engine's only tree side effect.
    async fn activate(&self) -> GleanerResult<()>;
    /// Subscribe to structural changes (insertion/removal) in this subtree.
    async fn subscribe(&self) -> GleanerResult<Subscription>;
}

/// A rendered-page backend capable of producing a document root.
#[async_trait]
pub trait ViewTree: Send + Sync {
    /// The document root of the currently rendered page.
    async fn document(&self) -> GleanerResult<NodeHandle>;
    /// Navigate to a URL and wait for the load, bounded by `timeout`.
    async fn navigate(&self, url: &str, timeout: Duration) -> GleanerResult<()>;
    /// Inject named session cookies before navigation (session bootstrap).
    async fn set_cookies(&self, jar: &CookieJar) -> GleanerResult<()>;
    /// The current page URL.
    async fn current_url(&self) -> GleanerResult<String>;
}

// ── ViewState capability ─────────────────────────────────────────────────────

/// The host runtime's selected category, as exposed by its view state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Selection {
    pub id: i64,
    pub level: i64,
    pub name: String,
}

/// One group in the category tree, with its leaf node identifiers in the
/// host's enumeration order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryGroup {
    pub name: String,
    pub nodes: Vec<String>,
}

/// Read-only access to live client-framework component state, plus the two
/// actions the trends flow needs. The engine depends on this contract only —
/// never on a concrete frontend framework's object graph.
#[async_trait]
pub trait ViewState: Send + Sync {
    /// The currently selected category.
    async fn selection(&self) -> GleanerResult<Selection>;
    /// The full category tree, order-stable.
    async fn category_tree(&self) -> GleanerResult<Vec<CategoryGroup>>;
    /// Select a leaf category by identifier.
    async fn select_category(&self, id: &str) -> GleanerResult<()>;
    /// Dispatch a named action with a JSON payload (e.g. a date-range change).
    async fn dispatch_action(&self, name: &str, payload: Value) -> GleanerResult<()>;
    /// A named slice of component state as JSON (e.g. the rendered trend
    /// series).
    async fn state_slice(&self, name: &str) -> GleanerResult<Value>;
}

/// Flatten a category tree into its leaf identifiers, preserving the host's
/// enumeration order.
pub fn leaf_categories(tree: &[CategoryGroup]) -> Vec<String> {
    tree.iter().flat_map(|g| g.nodes.iter().cloned()).collect()
}
