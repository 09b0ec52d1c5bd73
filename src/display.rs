//! Types shared with an external display.
//!
//! The server does not render anything itself. A display reads the canvas
//! through a [`crate::ServerHandle`] and forwards window events back as
//! plain calls. Keys are reported in this small device-independent form.

/// A key press reported by the display.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Escape,
    F11,
    F12,
    /// Printable character key.
    Char(char),
    /// Anything else, by the display's own key code.
    Other(u32),
}

/// What the display should do in response to a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAction {
    None,
    /// The server is shutting down; close the window.
    Quit,
    /// Switch between windowed and fullscreen on the current display.
    ToggleFullscreen,
    /// Move fullscreen to the next display.
    NextDisplay,
}

impl Key {
    /// Built-in key bindings.
    pub fn action(self) -> KeyAction {
        match self {
            Key::Escape | Key::Char('q') => KeyAction::Quit,
            Key::F11 => KeyAction::ToggleFullscreen,
            Key::F12 => KeyAction::NextDisplay,
            _ => KeyAction::None,
        }
    }
}
