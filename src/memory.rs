//! In-process [`Page`] implementation.
//!
//! `MemoryPage` models just enough of a rendered document for the engine:
//! a node tree with layout boxes, computed visibility, z-ordered hit testing,
//! form state and event listeners. Selector matching is by registration: a
//! node matches a selector string it was created with. A comma-separated
//! selector group matches if any member does.
//!
//! Listeners run synchronously inside [`Page::dispatch`], after the page lock
//! is released, so they may freely mutate the page or spawn delayed changes.

use crate::dom::{EventKind, Rect, SyntheticEvent};
use crate::Page;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// Handle to a node of a [`MemoryPage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeRef(usize);

/// Description of a node to insert.
#[derive(Debug, Clone)]
pub struct NodeSpec {
    selector: String,
    text: String,
    rect: Rect,
    hidden: bool,
    disabled: bool,
    checked: bool,
    value: String,
    z_index: f64,
    attrs: BTreeMap<String, String>,
}

impl NodeSpec {
    /// A laid-out, visible node matching `selector`.
    pub fn new(selector: &str) -> Self {
        Self {
            selector: selector.to_string(),
            text: String::new(),
            rect: Rect::new(0.0, 0.0, 120.0, 32.0),
            hidden: false,
            disabled: false,
            checked: false,
            value: String::new(),
            z_index: 0.0,
            attrs: BTreeMap::new(),
        }
    }

    pub fn text(mut self, text: &str) -> Self {
        self.text = text.to_string();
        self
    }

    pub fn rect(mut self, rect: Rect) -> Self {
        self.rect = rect;
        self
    }

    pub fn at(mut self, left: f64, top: f64) -> Self {
        self.rect.left = left;
        self.rect.top = top;
        self
    }

    /// Present in the tree but not yet laid out (zero width).
    pub fn unrendered(mut self) -> Self {
        self.rect.width = 0.0;
        self
    }

    pub fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.disabled = true;
        self
    }

    pub fn value(mut self, value: &str) -> Self {
        self.value = value.to_string();
        self
    }

    pub fn z_index(mut self, z: f64) -> Self {
        self.z_index = z;
        self
    }

    pub fn attr(mut self, name: &str, value: &str) -> Self {
        self.attrs.insert(name.to_string(), value.to_string());
        self
    }
}

type Listener = Arc<dyn Fn(&MemoryPage, NodeRef) + Send + Sync>;

struct Node {
    spec: NodeSpec,
    parent: Option<NodeRef>,
    removed: bool,
}

#[derive(Default)]
struct PageState {
    url: String,
    nodes: Vec<Node>,
    listeners: Vec<(NodeRef, EventKind, Listener)>,
    log: Vec<(NodeRef, SyntheticEvent)>,
    native_writes: Vec<(NodeRef, String)>,
    focused: Option<NodeRef>,
    reloads: u32,
}

impl PageState {
    fn node(&self, node: NodeRef) -> Option<&Node> {
        self.nodes.get(node.0)
    }

    fn ancestry(&self, node: NodeRef) -> Vec<NodeRef> {
        let mut chain = vec![node];
        let mut current = self.node(node).and_then(|n| n.parent);
        while let Some(parent) = current {
            chain.push(parent);
            current = self.node(parent).and_then(|n| n.parent);
        }
        chain
    }

    fn is_attached(&self, node: NodeRef) -> bool {
        self.ancestry(node)
            .iter()
            .all(|n| self.node(*n).map(|n| !n.removed).unwrap_or(false))
    }

    fn is_rendered(&self, node: NodeRef) -> bool {
        self.is_attached(node)
            && self
                .ancestry(node)
                .iter()
                .all(|n| self.node(*n).map(|n| !n.spec.hidden).unwrap_or(false))
    }

    fn effective_z(&self, node: NodeRef) -> f64 {
        self.ancestry(node)
            .iter()
            .filter_map(|n| self.node(*n).map(|n| n.spec.z_index))
            .fold(0.0, f64::max)
    }

    fn matches(&self, node: NodeRef, selector: &str) -> bool {
        let Some(n) = self.node(node) else {
            return false;
        };
        selector
            .split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .any(|part| n.spec.selector == part)
    }

    fn text_of(&self, node: NodeRef) -> String {
        let mut text = self
            .node(node)
            .map(|n| n.spec.text.clone())
            .unwrap_or_default();
        for (index, child) in self.nodes.iter().enumerate() {
            if child.parent == Some(node) && !child.removed {
                text.push_str(&self.text_of(NodeRef(index)));
            }
        }
        text
    }
}

/// Scriptable in-memory document.
#[derive(Clone, Default)]
pub struct MemoryPage {
    state: Arc<Mutex<PageState>>,
}

impl MemoryPage {
    pub fn new(url: &str) -> Self {
        let page = Self::default();
        page.lock().url = url.to_string();
        page
    }

    fn lock(&self) -> MutexGuard<'_, PageState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Insert a node under `parent` (document root when `None`).
    pub fn append(&self, parent: Option<NodeRef>, spec: NodeSpec) -> NodeRef {
        let mut state = self.lock();
        state.nodes.push(Node {
            spec,
            parent,
            removed: false,
        });
        NodeRef(state.nodes.len() - 1)
    }

    /// Detach a node and its subtree.
    pub fn remove(&self, node: NodeRef) {
        if let Some(n) = self.lock().nodes.get_mut(node.0) {
            n.removed = true;
        }
    }

    fn update(&self, node: NodeRef, f: impl FnOnce(&mut NodeSpec)) {
        if let Some(n) = self.lock().nodes.get_mut(node.0) {
            f(&mut n.spec);
        }
    }

    pub fn set_width(&self, node: NodeRef, width: f64) {
        self.update(node, |s| s.rect.width = width);
    }

    pub fn set_hidden(&self, node: NodeRef, hidden: bool) {
        self.update(node, |s| s.hidden = hidden);
    }

    pub fn set_disabled(&self, node: NodeRef, disabled: bool) {
        self.update(node, |s| s.disabled = disabled);
    }

    pub fn set_checked(&self, node: NodeRef, checked: bool) {
        self.update(node, |s| s.checked = checked);
    }

    pub fn set_text(&self, node: NodeRef, text: &str) {
        self.update(node, |s| s.text = text.to_string());
    }

    pub fn set_url(&self, url: &str) {
        self.lock().url = url.to_string();
    }

    /// Register a listener for `kind` on `node`. Bubbling events from
    /// descendants reach it too.
    pub fn on<F>(&self, node: NodeRef, kind: EventKind, listener: F)
    where
        F: Fn(&MemoryPage, NodeRef) + Send + Sync + 'static,
    {
        self.lock().listeners.push((node, kind, Arc::new(listener)));
    }

    pub fn is_attached(&self, node: NodeRef) -> bool {
        self.lock().is_attached(node)
    }

    /// Event kinds dispatched with `node` as target, in order.
    pub fn events(&self, node: NodeRef) -> Vec<EventKind> {
        self.lock()
            .log
            .iter()
            .filter(|(target, _)| *target == node)
            .map(|(_, event)| event.kind)
            .collect()
    }

    /// Every dispatched event with its target.
    pub fn event_log(&self) -> Vec<(NodeRef, SyntheticEvent)> {
        self.lock().log.clone()
    }

    /// Values written through the native setter, in order.
    pub fn native_writes(&self, node: NodeRef) -> Vec<String> {
        self.lock()
            .native_writes
            .iter()
            .filter(|(target, _)| *target == node)
            .map(|(_, value)| value.clone())
            .collect()
    }

    pub fn focused(&self) -> Option<NodeRef> {
        self.lock().focused
    }

    pub fn reload_count(&self) -> u32 {
        self.lock().reloads
    }
}

impl Page for MemoryPage {
    type Element = NodeRef;

    fn query_all(&self, root: Option<&NodeRef>, selector: &str) -> Vec<NodeRef> {
        let state = self.lock();
        (0..state.nodes.len())
            .map(NodeRef)
            .filter(|node| state.is_attached(*node))
            .filter(|node| match root {
                Some(root) => node != root && state.ancestry(*node).contains(root),
                None => true,
            })
            .filter(|node| state.matches(*node, selector))
            .collect()
    }

    fn bounding_rect(&self, element: &NodeRef) -> Rect {
        let state = self.lock();
        if !state.is_rendered(*element) {
            return Rect::default();
        }
        state
            .node(*element)
            .map(|n| n.spec.rect)
            .unwrap_or_default()
    }

    fn is_rendered(&self, element: &NodeRef) -> bool {
        self.lock().is_rendered(*element)
    }

    fn z_index(&self, element: &NodeRef) -> f64 {
        self.lock()
            .node(*element)
            .map(|n| n.spec.z_index)
            .unwrap_or(0.0)
    }

    fn element_from_point(&self, x: f64, y: f64) -> Option<NodeRef> {
        let state = self.lock();
        let mut best: Option<(f64, NodeRef)> = None;
        for index in 0..state.nodes.len() {
            let node = NodeRef(index);
            if !state.is_rendered(node) {
                continue;
            }
            let rect = state.nodes[index].spec.rect;
            if !rect.has_area() || !rect.contains(x, y) {
                continue;
            }
            let z = state.effective_z(node);
            // Later nodes paint over earlier ones at equal z.
            if best.map(|(best_z, _)| z >= best_z).unwrap_or(true) {
                best = Some((z, node));
            }
        }
        best.map(|(_, node)| node)
    }

    fn contains(&self, ancestor: &NodeRef, node: &NodeRef) -> bool {
        self.lock().ancestry(*node).contains(ancestor)
    }

    fn is_disabled(&self, element: &NodeRef) -> bool {
        self.lock()
            .node(*element)
            .map(|n| n.spec.disabled)
            .unwrap_or(false)
    }

    fn is_checked(&self, element: &NodeRef) -> bool {
        self.lock()
            .node(*element)
            .map(|n| n.spec.checked)
            .unwrap_or(false)
    }

    fn text_content(&self, element: &NodeRef) -> String {
        self.lock().text_of(*element)
    }

    fn attribute(&self, element: &NodeRef, name: &str) -> Option<String> {
        self.lock()
            .node(*element)
            .and_then(|n| n.spec.attrs.get(name).cloned())
    }

    fn value(&self, element: &NodeRef) -> String {
        self.lock()
            .node(*element)
            .map(|n| n.spec.value.clone())
            .unwrap_or_default()
    }

    fn scroll_into_view(&self, _element: &NodeRef) {}

    fn focus(&self, element: &NodeRef) {
        self.lock().focused = Some(*element);
    }

    fn set_native_value(&self, element: &NodeRef, value: &str) {
        let mut state = self.lock();
        if let Some(n) = state.nodes.get_mut(element.0) {
            n.spec.value = value.to_string();
        }
        state.native_writes.push((*element, value.to_string()));
    }

    fn dispatch(&self, target: &NodeRef, event: &SyntheticEvent) {
        let listeners: Vec<(NodeRef, Listener)> = {
            let mut state = self.lock();
            state.log.push((*target, event.clone()));
            let path = if event.bubbles {
                state.ancestry(*target)
            } else {
                vec![*target]
            };
            let mut matched = Vec::new();
            for node in &path {
                for (owner, kind, listener) in &state.listeners {
                    if owner == node && *kind == event.kind {
                        matched.push((*owner, Arc::clone(listener)));
                    }
                }
            }
            matched
        };

        for (owner, listener) in listeners {
            listener(self, owner);
        }
    }

    fn current_url(&self) -> String {
        self.lock().url.clone()
    }

    fn reload(&self) {
        self.lock().reloads += 1;
    }
}
