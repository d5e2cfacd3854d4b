use serde::{Deserialize, Serialize};

/// Viewport-relative bounding box, as reported by layout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn new(left: f64, top: f64, width: f64, height: f64) -> Self {
        Self {
            left,
            top,
            width,
            height,
        }
    }

    pub fn center(&self) -> (f64, f64) {
        (self.left + self.width / 2.0, self.top + self.height / 2.0)
    }

    /// Whether layout gave this box any area.
    pub fn has_area(&self) -> bool {
        self.width > 0.0 && self.height > 0.0
    }

    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.left && x <= self.left + self.width && y >= self.top && y <= self.top + self.height
    }
}

/// Native event types the emitter dispatches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    PointerOver,
    PointerEnter,
    MouseOver,
    MouseEnter,
    PointerDown,
    MouseDown,
    PointerUp,
    MouseUp,
    Click,
    KeyDown,
    KeyUp,
    Input,
    Change,
}

impl EventKind {
    /// The DOM event type name.
    pub fn as_str(&self) -> &str {
        match self {
            EventKind::PointerOver => "pointerover",
            EventKind::PointerEnter => "pointerenter",
            EventKind::MouseOver => "mouseover",
            EventKind::MouseEnter => "mouseenter",
            EventKind::PointerDown => "pointerdown",
            EventKind::MouseDown => "mousedown",
            EventKind::PointerUp => "pointerup",
            EventKind::MouseUp => "mouseup",
            EventKind::Click => "click",
            EventKind::KeyDown => "keydown",
            EventKind::KeyUp => "keyup",
            EventKind::Input => "input",
            EventKind::Change => "change",
        }
    }

    pub fn is_pointer(&self) -> bool {
        matches!(
            self,
            EventKind::PointerOver
                | EventKind::PointerEnter
                | EventKind::PointerDown
                | EventKind::PointerUp
        )
    }
}

/// A fully described event, ready for `dispatchEvent`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyntheticEvent {
    pub kind: EventKind,
    pub bubbles: bool,
    pub cancelable: bool,
    pub client_x: f64,
    pub client_y: f64,
    /// Primary button is `0`. `None` for hover and value events.
    pub button: Option<u16>,
    /// `"mouse"` on pointer events.
    pub pointer_type: Option<String>,
    pub key: Option<String>,
}

impl SyntheticEvent {
    /// A pointer or mouse event at the given client coordinates.
    pub fn pointer(kind: EventKind, x: f64, y: f64, button: Option<u16>) -> Self {
        Self {
            kind,
            bubbles: true,
            cancelable: true,
            client_x: x,
            client_y: y,
            button,
            pointer_type: kind.is_pointer().then(|| "mouse".to_string()),
            key: None,
        }
    }

    pub fn key(kind: EventKind, key: &str) -> Self {
        Self {
            kind,
            bubbles: true,
            cancelable: true,
            client_x: 0.0,
            client_y: 0.0,
            button: None,
            pointer_type: None,
            key: Some(key.to_string()),
        }
    }

    /// A bubbling `input` or `change` notification.
    pub fn notify(kind: EventKind) -> Self {
        Self {
            kind,
            bubbles: true,
            cancelable: false,
            client_x: 0.0,
            client_y: 0.0,
            button: None,
            pointer_type: None,
            key: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rect_center_and_area() {
        let rect = Rect::new(10.0, 20.0, 100.0, 40.0);
        assert_eq!(rect.center(), (60.0, 40.0));
        assert!(rect.has_area());
        assert!(!Rect::new(10.0, 20.0, 0.0, 40.0).has_area());
        assert!(rect.contains(60.0, 40.0));
        assert!(!rect.contains(5.0, 40.0));
    }

    #[test]
    fn test_event_kind_dom_names() {
        assert_eq!(EventKind::PointerDown.as_str(), "pointerdown");
        assert_eq!(EventKind::Click.as_str(), "click");
        assert_eq!(EventKind::KeyUp.as_str(), "keyup");
        assert!(EventKind::PointerUp.is_pointer());
        assert!(!EventKind::MouseUp.is_pointer());
    }

    #[test]
    fn test_pointer_events_carry_pointer_type() {
        let down = SyntheticEvent::pointer(EventKind::PointerDown, 1.0, 2.0, Some(0));
        assert_eq!(down.pointer_type.as_deref(), Some("mouse"));
        let click = SyntheticEvent::pointer(EventKind::Click, 1.0, 2.0, Some(0));
        assert!(click.pointer_type.is_none());
        assert_eq!(click.button, Some(0));
    }
}
