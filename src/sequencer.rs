//! The per-item transaction: from the assignments listing, through creation
//! and the optional content attach, back to the listing.
//!
//! Stages are strictly sequential and none is retried. Every stage gates its
//! actions on a [`Poller`] wait; the emitter only ever acts on elements the
//! poller has already seen. Failures are classified once, at
//! [`AssignmentFlow::run`], so the runner only ever sees an [`Outcome`].

use crate::config::{RunnerConfig, SelectorCatalog};
use crate::emitter::{is_visible, press_key, replace_value, set_value, tap};
use crate::error::{AutomationError, Result};
use crate::mapping::normalize_label;
use crate::poller::{Lookup, Poller};
use crate::types::{Outcome, RunSettings, WorkItem};
use crate::Page;

/// One pass of the creation flow for a single [`WorkItem`].
pub struct AssignmentFlow<'a, P: Page> {
    page: &'a P,
    config: &'a RunnerConfig,
    poller: Poller,
}

impl<'a, P: Page> AssignmentFlow<'a, P> {
    /// `poller` carries the run's cancellation token.
    pub fn new(page: &'a P, config: &'a RunnerConfig, poller: Poller) -> Self {
        Self {
            page,
            config,
            poller,
        }
    }

    /// Run every stage for `item` and classify how it ended.
    ///
    /// A partially created assignment is never rolled back: when only the
    /// attach sub-stage fails, the assignment stays and the outcome is
    /// [`Outcome::SkippedSubstepFailed`].
    pub async fn run(&self, item: &WorkItem, settings: &RunSettings) -> Outcome {
        tracing::info!(item = %item.identifier, "starting assignment flow");
        let outcome = classify(self.execute(item, settings).await);
        tracing::info!(
            item = %item.identifier,
            outcome = outcome.as_str(),
            "assignment flow finished"
        );
        outcome
    }

    /// `Ok(Some(reason))` when the main entity was created but the attach
    /// sub-stage was abandoned.
    async fn execute(&self, item: &WorkItem, settings: &RunSettings) -> Result<Option<String>> {
        self.open_creation().await?;

        let (modal, row) = self.find_entity(item).await?;
        self.select_first_row(item, &row).await?;
        self.confirm_selection(&modal).await?;

        self.fill_form(item, settings).await?;
        self.submit().await?;

        let abandoned = if settings.nugget_automation {
            self.attach_content(item, settings).await?
        } else {
            None
        };

        self.return_to_listing().await?;
        Ok(abandoned)
    }

    fn sel(&self) -> &SelectorCatalog {
        &self.config.selectors
    }

    async fn settle(&self) -> Result<()> {
        self.poller.sleep(self.config.settle_delay).await
    }

    /// First visible match under `root`, without waiting.
    fn visible_in(&self, root: Option<&P::Element>, selector: &str) -> Option<P::Element> {
        self.page
            .query_all(root, selector)
            .into_iter()
            .find(|el| is_visible(self.page, el))
    }

    /// Wait until `element` is enabled and unobstructed, then tap it.
    async fn tap_when_ready(&self, element: &P::Element) -> Result<()> {
        let timeout = self.config.element_timeout;
        self.poller.enabled(self.page, element, timeout).await?;
        self.poller.clickable(self.page, element, timeout).await?;
        tap(self.page, element);
        Ok(())
    }

    /// Wait until the control is present, enabled and unobstructed, then tap it.
    async fn tap_ready(&self, root: Option<&P::Element>, selector: &str) -> Result<P::Element> {
        let element = self
            .poller
            .element(self.page, root, selector, self.config.element_timeout)
            .await?;
        self.tap_when_ready(&element).await?;
        Ok(element)
    }

    /// Row-or-empty wait on the result poll cadence. Empty indicators already
    /// on screen before the search was triggered are ignored.
    async fn search_results(
        &self,
        root: &P::Element,
        row_selector: &str,
        empty_selector: &str,
        stale: &[P::Element],
    ) -> Result<Lookup<P::Element>> {
        self.poller
            .with_interval(self.config.result_poll_interval)
            .row_or_empty(
                self.page,
                Some(root),
                row_selector,
                empty_selector,
                stale,
                self.config.result_timeout,
            )
            .await
    }

    /// Tap the search control under `root`, or press Enter in the input when
    /// the surface filters live.
    fn trigger_search(&self, root: &P::Element, input: &P::Element, button_selector: &str) {
        let button = self
            .page
            .query_all(Some(root), button_selector)
            .into_iter()
            .find(|el| is_visible(self.page, el) && !self.page.is_disabled(el));
        match button {
            Some(button) => tap(self.page, &button),
            None => {
                tracing::debug!(button_selector, "no search control, pressing Enter");
                press_key(self.page, input, "Enter");
            }
        }
    }

    async fn dismiss(&self, overlay: &P::Element) -> Result<()> {
        match self.visible_in(Some(overlay), &self.sel().cancel_button) {
            Some(cancel) => {
                tap(self.page, &cancel);
                self.settle().await
            }
            None => {
                tracing::warn!("overlay has no cancel control, leaving it open");
                Ok(())
            }
        }
    }

    async fn open_creation(&self) -> Result<()> {
        tracing::debug!(stage = "open_creation");
        self.tap_ready(None, &self.sel().create_button).await?;
        self.settle().await?;
        self.tap_ready(None, &self.sel().students_button).await?;
        self.settle().await
    }

    /// Search the overlay for the item's entity. Returns the overlay and the
    /// first result row.
    async fn find_entity(&self, item: &WorkItem) -> Result<(P::Element, P::Element)> {
        tracing::debug!(stage = "search", item = %item.identifier);
        let sel = self.sel();
        let modal = self
            .poller
            .topmost_modal(self.page, &sel.modal_group(), self.config.element_timeout)
            .await?;
        let input = self
            .poller
            .element(self.page, Some(&modal), &sel.search_input, self.config.element_timeout)
            .await?;

        let stale = self.page.query_all(Some(&modal), &sel.no_results);
        replace_value(self.page, &input, &item.identifier);
        self.trigger_search(&modal, &input, &sel.search_button);
        self.poller.sleep(self.config.search_settle).await?;

        let lookup = self
            .search_results(&modal, &sel.result_row, &sel.no_results, &stale)
            .await?;

        match lookup {
            Lookup::Found(row) => Ok((modal, row)),
            Lookup::NotFound => {
                self.dismiss(&modal).await?;
                Err(AutomationError::NotFound(format!(
                    "no match for \"{}\"",
                    item.identifier
                )))
            }
        }
    }

    /// Check the row's checkbox, trying the preferred tap targets first and
    /// the row itself last.
    ///
    /// Each target is tapped only once it is unobstructed. A target that stays
    /// covered for the whole element timeout is passed over for the next one.
    async fn select_first_row(&self, item: &WorkItem, row: &P::Element) -> Result<()> {
        tracing::debug!(stage = "select_row", item = %item.identifier);
        let sel = self.sel();
        let checkbox = self.page.query(Some(row), &sel.row_checkbox).ok_or_else(|| {
            AutomationError::Structure(format!(
                "result row for {} has no checkbox",
                item.identifier
            ))
        })?;

        if let Some(name) = self.page.query(Some(row), &sel.row_name) {
            tracing::debug!(row = %self.page.text_content(&name).trim(), "first result row");
        }

        let mut targets: Vec<P::Element> = sel
            .row_click_targets
            .iter()
            .filter_map(|selector| self.visible_in(Some(row), selector))
            .collect();
        if is_visible(self.page, &checkbox) {
            targets.push(checkbox.clone());
        }
        targets.push(row.clone());

        for target in &targets {
            if self.page.is_checked(&checkbox) {
                break;
            }
            match self
                .poller
                .clickable(self.page, target, self.config.element_timeout)
                .await
            {
                Ok(()) => {}
                Err(AutomationError::Timeout { what, waited_ms }) => {
                    tracing::debug!(%what, waited_ms, "row target stayed covered, trying the next one");
                    continue;
                }
                Err(e) => return Err(e),
            }
            tap(self.page, target);
            self.poller.sleep(self.config.verify_delay).await?;
        }

        if self.page.is_checked(&checkbox) {
            Ok(())
        } else {
            Err(AutomationError::Structure(format!(
                "could not select the result row for {}",
                item.identifier
            )))
        }
    }

    async fn confirm_selection(&self, modal: &P::Element) -> Result<()> {
        let sel = self.sel();
        let timeout = self.config.element_timeout;
        let next = match self.visible_in(Some(modal), &sel.next_button) {
            Some(next) => next,
            None => {
                self.poller
                    .element(self.page, None, &sel.next_button, timeout)
                    .await?
            }
        };
        self.tap_when_ready(&next).await?;
        self.settle().await
    }

    /// Open a dropdown and pick the option whose label matches. Options are
    /// looked up document-wide since they usually render in a portal.
    async fn choose_option(
        &self,
        root: Option<&P::Element>,
        control: &str,
        label: &str,
    ) -> Result<()> {
        self.tap_ready(root, control).await?;
        let option = self
            .poller
            .labelled(
                self.page,
                None,
                &self.sel().select_option,
                label,
                self.config.option_timeout,
            )
            .await?;
        self.poller
            .clickable(self.page, &option, self.config.element_timeout)
            .await?;
        tap(self.page, &option);
        self.settle().await
    }

    async fn fill_form(&self, item: &WorkItem, settings: &RunSettings) -> Result<()> {
        tracing::debug!(stage = "fill_form", item = %item.identifier);
        let sel = self.sel();
        let timeout = self.config.element_timeout;

        let name = self.config.render_name(item, settings);
        let input = self
            .poller
            .element(self.page, None, &sel.name_input, timeout)
            .await?;
        set_value(self.page, &input, &name);

        let subject = self.config.subjects.resolve(&settings.subject);
        self.choose_option(None, &sel.subject_select, &subject).await?;

        let fields = [
            (&sel.start_date_input, &settings.start_date),
            (&sel.start_time_input, &settings.start_time),
            (&sel.due_date_input, &settings.due_date),
            (&sel.due_time_input, &settings.due_time),
        ];
        for (selector, value) in fields {
            let field = self.poller.element(self.page, None, selector, timeout).await?;
            set_value(self.page, &field, value);
        }
        Ok(())
    }

    async fn submit(&self) -> Result<()> {
        tracing::debug!(stage = "submit");
        self.tap_ready(None, &self.sel().create_submit).await?;
        self.settle().await
    }

    /// Optional content attach. Returns the reason when it had to be
    /// abandoned; the overlay is dismissed first so the flow can go back.
    async fn attach_content(
        &self,
        item: &WorkItem,
        settings: &RunSettings,
    ) -> Result<Option<String>> {
        tracing::debug!(stage = "attach_content", item = %item.identifier);
        let sel = self.sel();

        let category = match self.config.categories.lookup(&settings.subject, item) {
            Ok(category) => category,
            Err(AutomationError::SubstepFailed(reason)) => {
                tracing::warn!(item = %item.identifier, %reason, "skipping content attach");
                return Ok(Some(reason));
            }
            Err(e) => return Err(e),
        };
        let topic = match item.topic().map(str::trim) {
            Some(topic) if !topic.is_empty() => topic.to_string(),
            _ => return Ok(Some(format!("{} has no topic to search for", item.identifier))),
        };

        self.tap_ready(None, &sel.nugget_button).await?;
        self.settle().await?;
        let modal = self
            .poller
            .topmost_modal(self.page, &sel.modal_group(), self.config.element_timeout)
            .await?;

        if let Some(category) = category {
            // The control renders before its options do; the option itself is the gate.
            self.choose_option(Some(&modal), &sel.category_select, &category)
                .await?;
        }

        let input = self
            .poller
            .element(
                self.page,
                Some(&modal),
                &sel.content_search_input,
                self.config.element_timeout,
            )
            .await?;
        let stale = self.page.query_all(Some(&modal), &sel.content_no_results);
        replace_value(self.page, &input, &topic);
        self.trigger_search(&modal, &input, &sel.content_search_button);
        self.poller.sleep(self.config.search_settle).await?;

        let lookup = self
            .search_results(&modal, &sel.content_result, &sel.content_no_results, &stale)
            .await?;
        let result = match lookup {
            Lookup::Found(result) => result,
            Lookup::NotFound => {
                self.dismiss(&modal).await?;
                return Ok(Some(format!(
                    "no content matching \"{}\" for {}",
                    topic, item.identifier
                )));
            }
        };

        match self.pick_content(&result).await {
            Ok(()) => Ok(None),
            Err(AutomationError::Timeout { what, .. }) => {
                tracing::warn!(item = %item.identifier, %what, "content could not be attached");
                self.dismiss(&modal).await?;
                Ok(Some(format!(
                    "could not attach \"{}\" for {}: timed out waiting for {}",
                    topic, item.identifier, what
                )))
            }
            Err(e) => Err(e),
        }
    }

    /// Tap the content result, then the attach control, each once it accepts input.
    async fn pick_content(&self, result: &P::Element) -> Result<()> {
        let sel = self.sel();
        self.tap_when_ready(result).await?;
        self.settle().await?;

        let attach = self
            .poller
            .labelled(
                self.page,
                None,
                &sel.attach_candidates,
                &sel.attach_label,
                self.config.element_timeout,
            )
            .await?;
        self.tap_when_ready(&attach).await?;
        self.settle().await
    }

    /// Tap the back affordance, found by link target or by label.
    async fn return_to_listing(&self) -> Result<()> {
        tracing::debug!(stage = "return_to_listing");
        let sel = self.sel();
        let label = normalize_label(&sel.back_label);
        let link = self
            .poller
            .until("back link", self.config.element_timeout, || {
                self.page
                    .query_all(None, &sel.back_candidates)
                    .into_iter()
                    .find(|el| {
                        if !is_visible(self.page, el) {
                            return false;
                        }
                        let by_target = self
                            .page
                            .attribute(el, "href")
                            .map(|href| href.contains(&sel.back_href))
                            .unwrap_or(false);
                        by_target || normalize_label(&self.page.text_content(el)) == label
                    })
            })
            .await?;
        self.poller
            .clickable(self.page, &link, self.config.element_timeout)
            .await?;
        tap(self.page, &link);
        self.settle().await
    }
}

/// Map a stage result onto the outcome taxonomy.
pub(crate) fn classify(result: Result<Option<String>>) -> Outcome {
    match result {
        Ok(None) => Outcome::Completed,
        Ok(Some(reason)) => Outcome::SkippedSubstepFailed { reason },
        Err(AutomationError::NotFound(reason)) => Outcome::SkippedNotFound { reason },
        Err(AutomationError::SubstepFailed(reason)) => Outcome::SkippedSubstepFailed { reason },
        Err(AutomationError::Cancelled) => Outcome::Cancelled,
        Err(e) => {
            tracing::error!(error = %e, "stage failed");
            Outcome::Fatal {
                error: e.to_string(),
            }
        }
    }
}
