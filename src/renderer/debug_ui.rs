//! Immediate-mode settings surface.
//!
//! The renderer does not depend on a UI toolkit. Each pass describes its
//! tunables through [`SettingsUi`], and the host implements the trait on top
//! of whatever widget library it uses. Every method returns `true` when the
//! user changed the value this frame.

use glam::Vec3;

pub trait SettingsUi {
    /// Starts a titled group; returns `false` if the group is collapsed.
    fn section(&mut self, title: &str) -> bool;

    fn slider_f32(&mut self, label: &str, value: &mut f32, min: f32, max: f32) -> bool;

    fn slider_u32(&mut self, label: &str, value: &mut u32, min: u32, max: u32) -> bool;

    fn checkbox(&mut self, label: &str, value: &mut bool) -> bool;

    fn color(&mut self, label: &str, value: &mut Vec3) -> bool;

    fn label(&mut self, text: &str);
}

/// Records the widgets it was asked to draw without changing anything.
/// Handy for headless hosts and tests.
#[derive(Debug, Default)]
pub struct WidgetLog {
    pub widgets: Vec<String>,
}

impl SettingsUi for WidgetLog {
    fn section(&mut self, title: &str) -> bool {
        self.widgets.push(format!("[{title}]"));
        true
    }

    fn slider_f32(&mut self, label: &str, value: &mut f32, _min: f32, _max: f32) -> bool {
        self.widgets.push(format!("{label} = {value}"));
        false
    }

    fn slider_u32(&mut self, label: &str, value: &mut u32, _min: u32, _max: u32) -> bool {
        self.widgets.push(format!("{label} = {value}"));
        false
    }

    fn checkbox(&mut self, label: &str, value: &mut bool) -> bool {
        self.widgets.push(format!("{label} = {value}"));
        false
    }

    fn color(&mut self, label: &str, value: &mut Vec3) -> bool {
        self.widgets.push(format!("{label} = {value}"));
        false
    }

    fn label(&mut self, text: &str) {
        self.widgets.push(text.to_string());
    }
}
