use crate::error::Result;
use crate::mapping::{CategoryMap, SubjectMap};
use crate::types::{RunSettings, WorkItem};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// The query strings the engine uses to find things on the target page.
///
/// The defaults describe the assignments UI the crate was built against.
/// Every field can be overridden from JSON; missing fields keep their default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SelectorCatalog {
    pub create_button: String,
    pub students_button: String,
    /// Any of these marks an overlay; the topmost visible one wins.
    pub modal: Vec<String>,
    pub search_input: String,
    pub search_button: String,
    pub result_row: String,
    pub row_checkbox: String,
    /// Preferred tap targets inside a row, tried in order before the checkbox itself.
    pub row_click_targets: Vec<String>,
    pub row_name: String,
    pub no_results: String,
    pub cancel_button: String,
    pub next_button: String,
    pub name_input: String,
    pub subject_select: String,
    /// Options of any dropdown, usually rendered in a portal outside the control.
    pub select_option: String,
    pub start_date_input: String,
    pub start_time_input: String,
    pub due_date_input: String,
    pub due_time_input: String,
    pub create_submit: String,
    pub nugget_button: String,
    pub category_select: String,
    pub content_search_input: String,
    pub content_search_button: String,
    pub content_result: String,
    pub content_no_results: String,
    /// Candidates scanned for the attach control by visible label.
    pub attach_candidates: String,
    pub attach_label: String,
    /// Candidates scanned for the back affordance.
    pub back_candidates: String,
    pub back_href: String,
    pub back_label: String,
}

impl Default for SelectorCatalog {
    fn default() -> Self {
        Self {
            create_button: r#"[data-testid="create-assignment-button"]"#.into(),
            students_button: r#"[data-testid="for-students-button"]"#.into(),
            modal: vec![
                r#"[role="dialog"]"#.into(),
                r#"[aria-modal="true"]"#.into(),
                ".modal".into(),
                ".rc-modal".into(),
                ".rc-drawer".into(),
                r#"[data-testid*="modal"]"#.into(),
            ],
            search_input: r#"[data-testid="search-input"]"#.into(),
            search_button: r#"[data-testid="search-btn"]"#.into(),
            result_row: r#"tbody[role="group"] tr.rc-table-row-clickable"#.into(),
            row_checkbox: r#"input[type="checkbox"][name="students"]"#.into(),
            row_click_targets: vec![
                "label.cds-checkbox__input-label".into(),
                ".cds-checkbox__control".into(),
            ],
            row_name: r#"[data-testid="student-name"]"#.into(),
            no_results: r#"[data-testid="empty-state"]"#.into(),
            cancel_button: r#"[data-testid="cancel-button"]"#.into(),
            next_button: r#"[data-testid="next-button"]"#.into(),
            name_input: r#"[data-testid="assignment-name-input"]"#.into(),
            subject_select: r#"[data-testid="subject-select"]"#.into(),
            select_option: r#"[role="option"]"#.into(),
            start_date_input: r#"[data-testid="start-date-input"]"#.into(),
            start_time_input: r#"[data-testid="start-time-input"]"#.into(),
            due_date_input: r#"[data-testid="due-date-input"]"#.into(),
            due_time_input: r#"[data-testid="due-time-input"]"#.into(),
            create_submit: r#"[data-testid="create-button"]"#.into(),
            nugget_button: r#"[data-testid="add-nuggets-button"]"#.into(),
            category_select: r#"[data-testid="course-select"]"#.into(),
            content_search_input: r#"[data-testid="nugget-search-input"]"#.into(),
            content_search_button: r#"[data-testid="nugget-search-btn"]"#.into(),
            content_result: r#"[data-testid="nugget-result"]"#.into(),
            content_no_results: r#"[data-testid="nugget-empty-state"]"#.into(),
            attach_candidates: "button".into(),
            attach_label: "Add to assignment".into(),
            back_candidates: "a".into(),
            back_href: "/teach/assignments".into(),
            back_label: "Back".into(),
        }
    }
}

impl SelectorCatalog {
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// The modal list as a single selector group.
    pub fn modal_group(&self) -> String {
        self.modal.join(",")
    }
}

/// Configuration for the automation engine.
///
/// Use [`RunnerConfig::builder()`] for ergonomic construction, or
/// [`RunnerConfig::default()`] for the defaults (in-memory DB, 100ms polling,
/// 15s element waits).
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Path to the SQLite file holding batch state. `None` = in-memory database.
    pub db_path: Option<PathBuf>,

    /// Delay between two evaluations of a wait condition.
    pub poll_interval: Duration,

    /// Polling cadence for the row-or-empty wait after a search. Result lists
    /// render in one go, so this can be coarser than `poll_interval`.
    pub result_poll_interval: Duration,

    /// Upper bound for element presence/state waits.
    pub element_timeout: Duration,

    /// Upper bound for the row-or-empty wait after a search.
    pub result_timeout: Duration,

    /// Upper bound for a specific option to show up in a dropdown.
    pub option_timeout: Duration,

    /// Pause after taps that open or close a surface.
    pub settle_delay: Duration,

    /// Pause after typing a search before looking for results.
    pub search_settle: Duration,

    /// Pause before checking whether a tap took effect.
    pub verify_delay: Duration,

    /// Pause after page load before resuming, so the page's own startup runs first.
    pub load_settle: Duration,

    /// URL fragment identifying the listing page every item starts from.
    pub listing_url: String,

    /// How far in the future a batch's start time must be.
    pub min_start_lead: Duration,

    /// Assignment name template. Placeholders: `{identifier}`, `{day}`,
    /// `{subject}`, and any item parameter such as `{topic}`.
    pub name_template: String,

    pub selectors: SelectorCatalog,
    pub subjects: SubjectMap,
    pub categories: CategoryMap,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            poll_interval: Duration::from_millis(100),
            result_poll_interval: Duration::from_millis(250),
            element_timeout: Duration::from_secs(15),
            result_timeout: Duration::from_secs(10),
            option_timeout: Duration::from_secs(10),
            settle_delay: Duration::from_millis(300),
            search_settle: Duration::from_millis(300),
            verify_delay: Duration::from_millis(200),
            load_settle: Duration::from_millis(1500),
            listing_url: "app.century.tech/teach/assignments".into(),
            min_start_lead: Duration::from_secs(30 * 60),
            name_template: "{identifier} - {topic}".into(),
            selectors: SelectorCatalog::default(),
            subjects: SubjectMap::default(),
            categories: CategoryMap::default(),
        }
    }
}

impl RunnerConfig {
    /// Start building a config with the builder pattern.
    pub fn builder() -> RunnerConfigBuilder {
        RunnerConfigBuilder::default()
    }

    /// Render the assignment name for one item.
    ///
    /// Unknown placeholders are left as-is.
    pub fn render_name(&self, item: &WorkItem, settings: &RunSettings) -> String {
        let mut rendered = self
            .name_template
            .replace("{identifier}", &item.identifier)
            .replace("{day}", &settings.day)
            .replace("{subject}", &settings.subject);
        for (key, value) in &item.parameters {
            let placeholder = format!("{{{}}}", key);
            rendered = rendered.replace(&placeholder, value);
        }
        rendered
    }
}

/// Builder for [`RunnerConfig`].
#[derive(Default)]
pub struct RunnerConfigBuilder {
    config: RunnerConfig,
}

impl RunnerConfigBuilder {
    /// Set the SQLite database path for persistence. Omit for in-memory.
    pub fn with_db_path(mut self, path: PathBuf) -> Self {
        self.config.db_path = Some(path);
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    pub fn with_result_poll_interval(mut self, interval: Duration) -> Self {
        self.config.result_poll_interval = interval;
        self
    }

    pub fn with_element_timeout(mut self, timeout: Duration) -> Self {
        self.config.element_timeout = timeout;
        self
    }

    pub fn with_result_timeout(mut self, timeout: Duration) -> Self {
        self.config.result_timeout = timeout;
        self
    }

    pub fn with_option_timeout(mut self, timeout: Duration) -> Self {
        self.config.option_timeout = timeout;
        self
    }

    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.config.settle_delay = delay;
        self
    }

    pub fn with_search_settle(mut self, delay: Duration) -> Self {
        self.config.search_settle = delay;
        self
    }

    pub fn with_verify_delay(mut self, delay: Duration) -> Self {
        self.config.verify_delay = delay;
        self
    }

    pub fn with_load_settle(mut self, delay: Duration) -> Self {
        self.config.load_settle = delay;
        self
    }

    pub fn with_listing_url(mut self, fragment: &str) -> Self {
        self.config.listing_url = fragment.to_string();
        self
    }

    pub fn with_min_start_lead(mut self, lead: Duration) -> Self {
        self.config.min_start_lead = lead;
        self
    }

    pub fn with_name_template(mut self, template: &str) -> Self {
        self.config.name_template = template.to_string();
        self
    }

    pub fn with_selectors(mut self, selectors: SelectorCatalog) -> Self {
        self.config.selectors = selectors;
        self
    }

    pub fn with_subjects(mut self, subjects: SubjectMap) -> Self {
        self.config.subjects = subjects;
        self
    }

    pub fn with_categories(mut self, categories: CategoryMap) -> Self {
        self.config.categories = categories;
        self
    }

    /// Build the final [`RunnerConfig`].
    pub fn build(self) -> RunnerConfig {
        self.config
    }
}
