//! # Assignment Batcher
//!
//! Resumable DOM automation engine that creates assignments in bulk by driving
//! a web application's own UI.
//!
//! ## Features
//!
//! - Bounded, cancellable polling for elements that render asynchronously
//! - Synthetic pointer, keyboard and value events that framework-driven pages accept
//! - A fixed per-item stage sequence with classified outcomes
//! - A batch runner whose queue lives in SQLite and survives page reloads
//! - A request/notification control channel for the operator's surface
//!
//! ## Quick Start
//!
//! 1. Implement [`Page`] for the document you drive (or enable the default
//!    `memory-page` feature for the in-process `memory::MemoryPage`)
//! 2. Open a [`BatchStore`] and create a [`BatchRunner`] with a [`RunnerConfig`]
//! 3. Call [`BatchRunner::submit()`] with parsed [`WorkItem`]s
//! 4. Call [`BatchRunner::on_page_load()`] every time the page (re)loads
//!
//! See `demos/` for a complete example.

pub mod channel;
pub mod config;
pub mod db;
pub mod dom;
pub mod emitter;
pub mod error;
pub mod events;
pub mod intake;
pub mod mapping;
#[cfg(any(test, feature = "memory-page"))]
pub mod memory;
pub mod poller;
pub mod runner;
pub mod sequencer;
pub mod store;
pub mod types;

pub use channel::{ControlClient, ControlRequest, ControlResponse, ControlServer, Injector};
pub use config::{RunnerConfig, RunnerConfigBuilder, SelectorCatalog};
pub use dom::{EventKind, Rect, SyntheticEvent};
pub use error::AutomationError;
pub use events::{Notification, NotificationSink, Severity};
pub use mapping::{CategoryMap, CategoryRule, SubjectMap};
pub use poller::{Lookup, Poller};
pub use runner::BatchRunner;
pub use sequencer::AssignmentFlow;
pub use store::BatchStore;
pub use types::{BatchState, Outcome, ResumeStatus, RunSettings, WorkItem};

use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// The rendered document the engine reads and acts on.
///
/// Every method is a synchronous query or action against the live page, the
/// way script running inside the page sees it. Waiting is never done here;
/// the [`Poller`] decides when to ask again.
///
/// # Example
///
/// ```ignore
/// use assignment_batcher::*;
///
/// struct WebSysPage { document: web_sys::Document }
///
/// impl Page for WebSysPage {
///     type Element = web_sys::Element;
///
///     fn query_all(&self, root: Option<&web_sys::Element>, selector: &str) -> Vec<web_sys::Element> {
///         // root.query_selector_all(selector) or document.query_selector_all(selector)
///     }
///     // ...
/// }
/// ```
pub trait Page: Send + Sync {
    /// Handle to one element. Equality means "same node".
    type Element: Clone + PartialEq + Send + Sync + std::fmt::Debug;

    /// All matches of `selector` under `root` (the whole document when `None`),
    /// in document order.
    fn query_all(&self, root: Option<&Self::Element>, selector: &str) -> Vec<Self::Element>;

    /// First match, if any.
    fn query(&self, root: Option<&Self::Element>, selector: &str) -> Option<Self::Element> {
        self.query_all(root, selector).into_iter().next()
    }

    fn bounding_rect(&self, element: &Self::Element) -> Rect;

    /// `false` when computed style hides the element (`display: none`,
    /// `visibility: hidden`).
    fn is_rendered(&self, element: &Self::Element) -> bool;

    /// Computed z-index, `0.0` for `auto`.
    fn z_index(&self, element: &Self::Element) -> f64;

    /// Topmost element hit-tested at client coordinates.
    fn element_from_point(&self, x: f64, y: f64) -> Option<Self::Element>;

    /// Whether `node` is `ancestor` or one of its descendants.
    fn contains(&self, ancestor: &Self::Element, node: &Self::Element) -> bool;

    fn is_disabled(&self, element: &Self::Element) -> bool;

    fn is_checked(&self, element: &Self::Element) -> bool;

    fn text_content(&self, element: &Self::Element) -> String;

    fn attribute(&self, element: &Self::Element, name: &str) -> Option<String>;

    fn value(&self, element: &Self::Element) -> String;

    fn scroll_into_view(&self, element: &Self::Element);

    fn focus(&self, element: &Self::Element);

    /// Assign `value` through the platform's own `value` property setter,
    /// bypassing any setter a component framework installed on the instance.
    fn set_native_value(&self, element: &Self::Element, value: &str);

    fn dispatch(&self, target: &Self::Element, event: &SyntheticEvent);

    fn current_url(&self) -> String;

    /// Start a full page reload. The current execution context does not survive it.
    fn reload(&self);
}

/// Owned handle for one run (one `submit`/`resume` entry or one single-shot).
///
/// Holds the cancellation token every wait of that run observes. It is never
/// persisted; a page navigation abandons it.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    token: CancellationToken,
}

impl RunContext {
    pub fn new() -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            started_at: Utc::now(),
            token: CancellationToken::new(),
        }
    }

    /// Signal cancellation. Pending waits of this run fail with `Cancelled`.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// A poller bound to this run's token.
    pub fn poller(&self, interval: Duration) -> Poller {
        Poller::new(interval, self.token.clone())
    }
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new()
    }
}
