//! In-memory view tree for tests.
//!
//! A scripted stand-in for a live rendered page: a mutable element tree, a
//! minimal selector matcher covering exactly the selector forms the engine's
//! field maps use, activation scripts that mutate the tree the way a widget's
//! "load more" control would, and change notifications delivered to
//! subscribers the way a structural observer would deliver them.
//!
//! Not a CSS engine. Supported selector forms: `tag`, `[attr]`,
//! `[attr="value"]`, `[attr^="prefix"]`, compound `tag[attr...]`, descendant
//! chains separated by spaces, and a leading `:scope > :last-child`.

use crate::error::{GleanerError, GleanerResult};
use crate::session::CookieJar;
use crate::view::{ChangeBatch, NodeHandle, Subscription, ViewNode, ViewTree};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

/// One element in the fixture tree.
#[derive(Debug, Clone, Default)]
pub struct Elem {
    pub tag: String,
    pub attrs: BTreeMap<String, String>,
    pub text: String,
    pub children: Vec<Elem>,
}

impl Elem {
    pub fn new(tag: &str) -> Self {
        Self {
            tag: tag.to_string(),
            ..Default::default()
        }
    }

    pub fn attr(mut self, name: &str, value: &str) -> Self {
        self.attrs.insert(name.to_string(), value.to_string());
        self
    }

    pub fn attr_owned(mut self, name: &str, value: String) -> Self {
        self.attrs.insert(name.to_string(), value);
        self
    }

    pub fn text(mut self, text: &str) -> Self {
        self.text = text.to_string();
        self
    }

    pub fn child(mut self, child: Elem) -> Self {
        self.children.push(child);
        self
    }

    /// Own text plus all descendant text, in document order.
    fn deep_text(&self) -> String {
        let mut out = self.text.clone();
        for child in &self.children {
            out.push_str(&child.deep_text());
        }
        out
    }

    fn at_path(&self, path: &[usize]) -> Option<&Elem> {
        let mut current = self;
        for &idx in path {
            current = current.children.get(idx)?;
        }
        Some(current)
    }
}

type ActivationFn = Box<dyn FnMut(&mut Elem) -> ChangeBatch + Send>;

struct Shared {
    root: Mutex<Elem>,
    subscribers: Mutex<HashMap<u64, mpsc::UnboundedSender<ChangeBatch>>>,
    next_sub_id: AtomicU64,
    subs_created: AtomicU64,
    /// Activation scripts keyed by an attribute name present on the clicked
    /// control.
    activations: Mutex<Vec<(String, ActivationFn)>>,
    url: Mutex<String>,
    cookies: Mutex<CookieJar>,
}

/// A scripted in-memory view tree.
#[derive(Clone)]
pub struct FixtureTree {
    shared: Arc<Shared>,
}

impl FixtureTree {
    pub fn new(root: Elem) -> Self {
        Self {
            shared: Arc::new(Shared {
                root: Mutex::new(root),
                subscribers: Mutex::new(HashMap::new()),
                next_sub_id: AtomicU64::new(0),
                subs_created: AtomicU64::new(0),
                activations: Mutex::new(Vec::new()),
                url: Mutex::new(String::from("about:blank")),
                cookies: Mutex::new(CookieJar::new()),
            }),
        }
    }

    /// Handle to the tree root.
    pub fn root(&self) -> NodeHandle {
        Arc::new(FixtureNode {
            shared: Arc::clone(&self.shared),
            path: Vec::new(),
        })
    }

    /// Register what happens when a control carrying `attr_name` is
    /// activated: the script mutates the tree and reports the resulting
    /// change batch, which is delivered to all subscribers.
    pub fn script_activation(
        &self,
        attr_name: &str,
        script: impl FnMut(&mut Elem) -> ChangeBatch + Send + 'static,
    ) {
        self.shared
            .activations
            .lock()
            .unwrap()
            .push((attr_name.to_string(), Box::new(script)));
    }

    /// Mutate the tree out-of-band (content arriving without a click) and
    /// notify subscribers.
    pub fn mutate(&self, f: impl FnOnce(&mut Elem) -> ChangeBatch) {
        let batch = {
            let mut root = self.shared.root.lock().unwrap();
            f(&mut root)
        };
        self.shared.notify(batch);
    }

    /// Number of currently live change subscriptions.
    pub fn live_subscriptions(&self) -> usize {
        self.shared.subscribers.lock().unwrap().len()
    }

    /// Total number of subscriptions ever created.
    pub fn subscriptions_created(&self) -> u64 {
        self.shared.subs_created.load(Ordering::SeqCst)
    }

    /// Cookies injected via the `ViewTree` seam.
    pub fn injected_cookies(&self) -> CookieJar {
        self.shared.cookies.lock().unwrap().clone()
    }
}

impl Shared {
    fn notify(&self, batch: ChangeBatch) {
        let mut subs = self.subscribers.lock().unwrap();
        subs.retain(|_, tx| tx.send(batch.clone()).is_ok());
    }

    fn run_activation(&self, elem_attrs: &BTreeMap<String, String>) -> bool {
        let batch = {
            let mut activations = self.activations.lock().unwrap();
            let mut produced = None;
            for (attr_name, script) in activations.iter_mut() {
                if elem_attrs.contains_key(attr_name) {
                    let mut root = self.root.lock().unwrap();
                    produced = Some(script(&mut root));
                    break;
                }
            }
            produced
        };
        match batch {
            Some(batch) => {
                self.notify(batch);
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl ViewTree for FixtureTree {
    async fn document(&self) -> GleanerResult<NodeHandle> {
        Ok(self.root())
    }

    async fn navigate(&self, url: &str, _timeout: Duration) -> GleanerResult<()> {
        *self.shared.url.lock().unwrap() = url.to_string();
        Ok(())
    }

    async fn set_cookies(&self, jar: &CookieJar) -> GleanerResult<()> {
        *self.shared.cookies.lock().unwrap() = jar.clone();
        Ok(())
    }

    async fn current_url(&self) -> GleanerResult<String> {
        Ok(self.shared.url.lock().unwrap().clone())
    }
}

/// A path-addressed node handle into a [`FixtureTree`].
struct FixtureNode {
    shared: Arc<Shared>,
    path: Vec<usize>,
}

impl FixtureNode {
    fn with_elem<R>(&self, f: impl FnOnce(&Elem) -> R) -> GleanerResult<R> {
        let root = self.shared.root.lock().unwrap();
        let elem = root
            .at_path(&self.path)
            .ok_or_else(|| GleanerError::Provider("stale fixture node handle".to_string()))?;
        Ok(f(elem))
    }

    fn handle(&self, path: Vec<usize>) -> NodeHandle {
        Arc::new(FixtureNode {
            shared: Arc::clone(&self.shared),
            path,
        })
    }
}

#[async_trait]
impl ViewNode for FixtureNode {
    async fn attr(&self, name: &str) -> GleanerResult<Option<String>> {
        self.with_elem(|e| e.attrs.get(name).cloned())
    }

    async fn text(&self) -> GleanerResult<String> {
        self.with_elem(|e| e.deep_text())
    }

    async fn query(&self, selector: &str) -> GleanerResult<Option<NodeHandle>> {
        let paths = self.with_elem(|e| select_paths(e, selector))?;
        Ok(paths.into_iter().next().map(|rel| {
            let mut abs = self.path.clone();
            abs.extend(rel);
            self.handle(abs)
        }))
    }

    async fn query_all(&self, selector: &str) -> GleanerResult<Vec<NodeHandle>> {
        let paths = self.with_elem(|e| select_paths(e, selector))?;
        Ok(paths
            .into_iter()
            .map(|rel| {
                let mut abs = self.path.clone();
                abs.extend(rel);
                self.handle(abs)
            })
            .collect())
    }

    async fn child_count(&self) -> GleanerResult<usize> {
        self.with_elem(|e| e.children.len())
    }

    async fn activate(&self) -> GleanerResult<()> {
        let attrs = self.with_elem(|e| e.attrs.clone())?;
        self.shared.run_activation(&attrs);
        Ok(())
    }

    async fn subscribe(&self) -> GleanerResult<Subscription> {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.shared.next_sub_id.fetch_add(1, Ordering::SeqCst);
        self.shared.subs_created.fetch_add(1, Ordering::SeqCst);
        self.shared.subscribers.lock().unwrap().insert(id, tx);

        let shared = Arc::clone(&self.shared);
        Ok(Subscription::new(rx, move || {
            shared.subscribers.lock().unwrap().remove(&id);
        }))
    }
}

// ── Selector matching ────────────────────────────────────────────────────────

/// One `tag#id.class[attr...]` step of a selector.
#[derive(Debug)]
struct SimpleSelector {
    tag: Option<String>,
    attrs: Vec<AttrMatch>,
}

#[derive(Debug)]
enum AttrMatch {
    Present(String),
    Equals(String, String),
    Prefix(String, String),
    ClassToken(String),
}

impl SimpleSelector {
    fn parse(token: &str) -> Option<Self> {
        let mut tag = None;
        let mut attrs = Vec::new();
        let mut rest = token;

        if !rest.starts_with('[') && !rest.starts_with('.') && !rest.starts_with('#') {
            let end = rest
                .find(['[', '.', '#'])
                .unwrap_or(rest.len());
            let name = &rest[..end];
            if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
                return None;
            }
            tag = Some(name.to_ascii_lowercase());
            rest = &rest[end..];
        }

        while !rest.is_empty() {
            if let Some(stripped) = rest.strip_prefix('[') {
                let close = stripped.find(']')?;
                let body = &stripped[..close];
                rest = &stripped[close + 1..];

                if let Some((name, value)) = body.split_once("^=") {
                    attrs.push(AttrMatch::Prefix(
                        name.to_string(),
                        value.trim_matches('"').to_string(),
                    ));
                } else if let Some((name, value)) = body.split_once('=') {
                    attrs.push(AttrMatch::Equals(
                        name.to_string(),
                        value.trim_matches('"').to_string(),
                    ));
                } else {
                    attrs.push(AttrMatch::Present(body.to_string()));
                }
            } else if let Some(stripped) = rest.strip_prefix('.') {
                let end = stripped
                    .find(['[', '.', '#'])
                    .unwrap_or(stripped.len());
                let class = &stripped[..end];
                if class.is_empty() {
                    return None;
                }
                attrs.push(AttrMatch::ClassToken(class.to_string()));
                rest = &stripped[end..];
            } else if let Some(stripped) = rest.strip_prefix('#') {
                let end = stripped
                    .find(['[', '.', '#'])
                    .unwrap_or(stripped.len());
                let id = &stripped[..end];
                if id.is_empty() {
                    return None;
                }
                attrs.push(AttrMatch::Equals("id".to_string(), id.to_string()));
                rest = &stripped[end..];
            } else {
                return None;
            }
        }

        Some(Self { tag, attrs })
    }

    fn matches(&self, elem: &Elem) -> bool {
        if let Some(tag) = &self.tag {
            if !elem.tag.eq_ignore_ascii_case(tag) {
                return false;
            }
        }
        self.attrs.iter().all(|m| match m {
            AttrMatch::Present(name) => elem.attrs.contains_key(name),
            AttrMatch::Equals(name, value) => {
                elem.attrs.get(name).map(String::as_str) == Some(value.as_str())
            }
            AttrMatch::Prefix(name, value) => elem
                .attrs
                .get(name)
                .map(|v| v.starts_with(value.as_str()))
                .unwrap_or(false),
            AttrMatch::ClassToken(class) => elem
                .attrs
                .get("class")
                .map(|v| v.split_whitespace().any(|token| token == class))
                .unwrap_or(false),
        })
    }
}

/// Resolve a selector against `root`, returning matching paths relative to
/// it, in document order. Unsupported selector syntax matches nothing.
fn select_paths(root: &Elem, selector: &str) -> Vec<Vec<usize>> {
    let mut tokens: Vec<&str> = selector.split_whitespace().collect();
    let mut base = Vec::new();

    // Leading `:scope > :last-child` narrows the search base to the last
    // direct child.
    if tokens.len() >= 3 && tokens[0] == ":scope" && tokens[1] == ">" && tokens[2] == ":last-child"
    {
        let Some(last) = root.children.len().checked_sub(1) else {
            return Vec::new();
        };
        base.push(last);
        tokens.drain(..3);
    }

    let steps: Vec<SimpleSelector> = match tokens
        .iter()
        .map(|t| SimpleSelector::parse(t))
        .collect::<Option<Vec<_>>>()
    {
        Some(steps) => steps,
        None => return Vec::new(),
    };

    if steps.is_empty() {
        // Selector was exactly `:scope > :last-child`.
        return if base.is_empty() { Vec::new() } else { vec![base] };
    }

    if root.at_path(&base).is_none() {
        return Vec::new();
    }

    let mut frontier = vec![base];
    for step in &steps {
        let mut next = Vec::new();
        for path in &frontier {
            let elem = root.at_path(path).expect("path stays valid during match");
            collect_descendants(elem, path, step, &mut next);
        }
        frontier = next;
        if frontier.is_empty() {
            return Vec::new();
        }
    }
    frontier
}

fn collect_descendants(
    elem: &Elem,
    path: &[usize],
    step: &SimpleSelector,
    out: &mut Vec<Vec<usize>>,
) {
    for (idx, child) in elem.children.iter().enumerate() {
        let mut child_path = path.to_vec();
        child_path.push(idx);
        if step.matches(child) {
            out.push(child_path.clone());
        }
        collect_descendants(child, &child_path, step, out);
    }
}

// ── Fixture view state ───────────────────────────────────────────────────────

use crate::view::{CategoryGroup, Selection, ViewState};
use serde_json::Value;

struct ViewStateInner {
    tree: Vec<CategoryGroup>,
    selections: HashMap<String, Selection>,
    selected: Selection,
    slices: HashMap<String, Value>,
    dispatched: Vec<(String, Value)>,
    selected_ids: Vec<String>,
    on_dispatch: Option<Box<dyn Fn() + Send>>,
}

/// Scripted [`ViewState`] implementation for tests.
#[derive(Clone)]
pub struct FixtureViewState {
    inner: Arc<Mutex<ViewStateInner>>,
}

impl FixtureViewState {
    pub fn new(tree: Vec<CategoryGroup>, initial: Selection) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ViewStateInner {
                tree,
                selections: HashMap::new(),
                selected: initial,
                slices: HashMap::new(),
                dispatched: Vec::new(),
                selected_ids: Vec::new(),
                on_dispatch: None,
            })),
        }
    }

    /// Register the selection the host reports after `select_category(id)`.
    pub fn selection_for(&self, id: &str, selection: Selection) {
        self.inner
            .lock()
            .unwrap()
            .selections
            .insert(id.to_string(), selection);
    }

    pub fn set_slice(&self, name: &str, value: Value) {
        self.inner
            .lock()
            .unwrap()
            .slices
            .insert(name.to_string(), value);
    }

    /// Run `hook` after every dispatched action (e.g. schedule the diagram
    /// re-render the action causes).
    pub fn on_dispatch(&self, hook: impl Fn() + Send + 'static) {
        self.inner.lock().unwrap().on_dispatch = Some(Box::new(hook));
    }

    pub fn dispatched(&self) -> Vec<(String, Value)> {
        self.inner.lock().unwrap().dispatched.clone()
    }

    pub fn selected_ids(&self) -> Vec<String> {
        self.inner.lock().unwrap().selected_ids.clone()
    }
}

#[async_trait]
impl ViewState for FixtureViewState {
    async fn selection(&self) -> GleanerResult<Selection> {
        Ok(self.inner.lock().unwrap().selected.clone())
    }

    async fn category_tree(&self) -> GleanerResult<Vec<CategoryGroup>> {
        Ok(self.inner.lock().unwrap().tree.clone())
    }

    async fn select_category(&self, id: &str) -> GleanerResult<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.selected_ids.push(id.to_string());
        if let Some(selection) = inner.selections.get(id).cloned() {
            inner.selected = selection;
        }
        Ok(())
    }

    async fn dispatch_action(&self, name: &str, payload: Value) -> GleanerResult<()> {
        let hook = {
            let mut inner = self.inner.lock().unwrap();
            inner.dispatched.push((name.to_string(), payload));
            inner.on_dispatch.take()
        };
        if let Some(hook) = hook {
            hook();
            self.inner.lock().unwrap().on_dispatch = Some(hook);
        }
        Ok(())
    }

    async fn state_slice(&self, name: &str) -> GleanerResult<Value> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .slices
            .get(name)
            .cloned()
            .unwrap_or(Value::Null))
    }
}
