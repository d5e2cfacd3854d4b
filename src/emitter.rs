//! Synthetic interaction primitives.
//!
//! Framework-driven pages listen for native events rather than method calls,
//! so a tap is the full hover/press/release/click sequence at the element's
//! visual centre, and a value change goes through the platform setter
//! followed by `input` and `change` notifications.
//!
//! Each call is one best-effort attempt. Nothing here waits or retries;
//! callers gate calls with the [`Poller`](crate::Poller).

use crate::dom::{EventKind, SyntheticEvent};
use crate::Page;

/// Visual centre of the element's bounding box.
pub fn center_point<P: Page>(page: &P, element: &P::Element) -> (f64, f64) {
    page.bounding_rect(element).center()
}

/// Rendered with a non-empty box.
pub fn is_visible<P: Page>(page: &P, element: &P::Element) -> bool {
    page.is_rendered(element) && page.bounding_rect(element).has_area()
}

/// Visible, and the topmost hit at its centre is the element or a descendant.
pub fn is_clickable<P: Page>(page: &P, element: &P::Element) -> bool {
    if !is_visible(page, element) {
        return false;
    }
    let (x, y) = center_point(page, element);
    match page.element_from_point(x, y) {
        Some(top) => page.contains(element, &top),
        None => false,
    }
}

/// Tap the element like a mouse user would.
///
/// Events go to whatever is hit-tested at the centre point, which may be an
/// overlapping node rather than `element` itself.
pub fn tap<P: Page>(page: &P, element: &P::Element) {
    page.scroll_into_view(element);
    page.focus(element);

    let (x, y) = center_point(page, element);
    let target = page
        .element_from_point(x, y)
        .unwrap_or_else(|| element.clone());

    let sequence = [
        (EventKind::PointerOver, None),
        (EventKind::PointerEnter, None),
        (EventKind::MouseOver, None),
        (EventKind::MouseEnter, None),
        (EventKind::PointerDown, Some(0)),
        (EventKind::MouseDown, Some(0)),
        (EventKind::PointerUp, Some(0)),
        (EventKind::MouseUp, Some(0)),
        (EventKind::Click, Some(0)),
    ];
    for (kind, button) in sequence {
        page.dispatch(&target, &SyntheticEvent::pointer(kind, x, y, button));
    }
}

fn write_and_notify<P: Page>(page: &P, element: &P::Element, text: &str) {
    page.set_native_value(element, text);
    page.dispatch(element, &SyntheticEvent::notify(EventKind::Input));
    page.dispatch(element, &SyntheticEvent::notify(EventKind::Change));
}

/// Set an input's value once: one `input` and one `change` event.
pub fn set_value<P: Page>(page: &P, element: &P::Element, text: &str) {
    page.scroll_into_view(element);
    page.focus(element);
    write_and_notify(page, element, text);
}

/// Clear, then set: two `input` and two `change` events.
///
/// Forces change detection on frameworks that diff against the previous value.
pub fn replace_value<P: Page>(page: &P, element: &P::Element, text: &str) {
    page.scroll_into_view(element);
    page.focus(element);
    write_and_notify(page, element, "");
    write_and_notify(page, element, text);
}

/// Press and release a key on the element.
pub fn press_key<P: Page>(page: &P, element: &P::Element, key: &str) {
    page.focus(element);
    page.dispatch(element, &SyntheticEvent::key(EventKind::KeyDown, key));
    page.dispatch(element, &SyntheticEvent::key(EventKind::KeyUp, key));
}
