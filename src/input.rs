use std::collections::HashSet;
use std::hash::Hash;

use glam::Vec2;
use winit::event::{ElementState, MouseButton, MouseScrollDelta, WindowEvent};
use winit::keyboard::{KeyCode, PhysicalKey};

/// Held / pressed-this-frame / released-this-frame sets for one kind of
/// button.
#[derive(Clone, Debug)]
struct Buttons<T> {
    down: HashSet<T>,
    pressed: HashSet<T>,
    released: HashSet<T>,
}

impl<T> Default for Buttons<T> {
    fn default() -> Self {
        Self {
            down: HashSet::new(),
            pressed: HashSet::new(),
            released: HashSet::new(),
        }
    }
}

impl<T: Copy + Eq + Hash> Buttons<T> {
    fn press(&mut self, button: T) {
        if self.down.insert(button) {
            self.pressed.insert(button);
        }
    }

    fn release(&mut self, button: T) {
        if self.down.remove(&button) {
            self.released.insert(button);
        }
    }

    fn clear_edges(&mut self) {
        self.pressed.clear();
        self.released.clear();
    }
}

/// Keyboard and mouse state for one frame.
///
/// Feed window events through [`handle_event`](Self::handle_event) and call
/// [`end_frame`](Self::end_frame) after the frame has consumed the edges.
#[derive(Clone, Debug, Default)]
pub struct Input {
    keys: Buttons<KeyCode>,
    mouse: Buttons<MouseButton>,
    cursor: Option<Vec2>,
    mouse_delta: Vec2,
    scroll_delta: Vec2,
}

impl Input {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clears per-frame edges and deltas.
    pub fn end_frame(&mut self) {
        self.keys.clear_edges();
        self.mouse.clear_edges();
        self.mouse_delta = Vec2::ZERO;
        self.scroll_delta = Vec2::ZERO;
    }

    pub fn handle_event(&mut self, event: &WindowEvent) {
        match event {
            WindowEvent::KeyboardInput { event, .. } => {
                if let PhysicalKey::Code(key) = event.physical_key {
                    match event.state {
                        ElementState::Pressed => self.press_key(key),
                        ElementState::Released => self.release_key(key),
                    }
                }
            }
            WindowEvent::MouseInput { state, button, .. } => match state {
                ElementState::Pressed => self.press_button(*button),
                ElementState::Released => self.release_button(*button),
            },
            WindowEvent::CursorMoved { position, .. } => {
                self.move_cursor(Vec2::new(position.x as f32, position.y as f32));
            }
            WindowEvent::CursorLeft { .. } => self.cursor = None,
            WindowEvent::MouseWheel { delta, .. } => {
                let lines = match delta {
                    MouseScrollDelta::LineDelta(x, y) => Vec2::new(*x, *y),
                    MouseScrollDelta::PixelDelta(pos) => {
                        Vec2::new(pos.x as f32, pos.y as f32) / 120.0
                    }
                };
                self.scroll(lines);
            }
            WindowEvent::Focused(false) => {
                // Keys released while unfocused never arrive.
                for key in std::mem::take(&mut self.keys.down) {
                    self.keys.released.insert(key);
                }
                for button in std::mem::take(&mut self.mouse.down) {
                    self.mouse.released.insert(button);
                }
            }
            _ => {}
        }
    }

    pub fn press_key(&mut self, key: KeyCode) {
        self.keys.press(key);
    }

    pub fn release_key(&mut self, key: KeyCode) {
        self.keys.release(key);
    }

    pub fn press_button(&mut self, button: MouseButton) {
        self.mouse.press(button);
    }

    pub fn release_button(&mut self, button: MouseButton) {
        self.mouse.release(button);
    }

    /// The first position after the cursor enters produces no delta.
    pub fn move_cursor(&mut self, position: Vec2) {
        if let Some(previous) = self.cursor {
            self.mouse_delta += position - previous;
        }
        self.cursor = Some(position);
    }

    pub fn scroll(&mut self, lines: Vec2) {
        self.scroll_delta += lines;
    }

    pub fn key_down(&self, key: KeyCode) -> bool {
        self.keys.down.contains(&key)
    }

    pub fn key_pressed(&self, key: KeyCode) -> bool {
        self.keys.pressed.contains(&key)
    }

    pub fn key_released(&self, key: KeyCode) -> bool {
        self.keys.released.contains(&key)
    }

    pub fn mouse_down(&self, button: MouseButton) -> bool {
        self.mouse.down.contains(&button)
    }

    pub fn mouse_pressed(&self, button: MouseButton) -> bool {
        self.mouse.pressed.contains(&button)
    }

    pub fn cursor(&self) -> Option<Vec2> {
        self.cursor
    }

    /// Cursor movement since the last frame, in pixels.
    pub fn mouse_delta(&self) -> Vec2 {
        self.mouse_delta
    }

    /// Wheel movement since the last frame, in lines.
    pub fn scroll_delta(&self) -> Vec2 {
        self.scroll_delta
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn press_edges_last_one_frame() {
        let mut input = Input::new();
        input.press_key(KeyCode::KeyE);
        input.press_key(KeyCode::KeyE);
        assert!(input.key_pressed(KeyCode::KeyE));
        input.end_frame();
        assert!(!input.key_pressed(KeyCode::KeyE));
        assert!(input.key_down(KeyCode::KeyE));
        input.release_key(KeyCode::KeyE);
        assert!(input.key_released(KeyCode::KeyE));
        assert!(!input.key_down(KeyCode::KeyE));
    }

    #[test]
    fn first_cursor_position_has_no_delta() {
        let mut input = Input::new();
        input.move_cursor(Vec2::new(100.0, 100.0));
        assert_eq!(input.mouse_delta(), Vec2::ZERO);
        input.move_cursor(Vec2::new(110.0, 95.0));
        assert_eq!(input.mouse_delta(), Vec2::new(10.0, -5.0));
        input.end_frame();
        assert_eq!(input.mouse_delta(), Vec2::ZERO);
    }
}
