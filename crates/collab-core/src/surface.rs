//! Editor and notification capability traits.
//!
//! The host editor supplies/accepts plain text through `TextSurface`;
//! user-visible notices go through `Notifier`. The engine never formats
//! internal error detail (paths, tokens, stack traces) into a notice.

use async_trait::async_trait;
use std::sync::Mutex;

/// Supplies and accepts the plain-text content of the currently open file.
#[async_trait]
pub trait TextSurface: Send + Sync {
    /// Current editor content for the path, or None if not open.
    async fn get_text(&self, path: &str) -> Option<String>;

    /// Replace the editor content for the path.
    async fn set_text(&self, path: &str, content: &str);
}

/// Delivers human-readable notices to the user.
pub trait Notifier: Send + Sync {
    fn notify(&self, message: &str);
}

// Allows sharing a surface/notifier between components
#[async_trait]
impl<T: TextSurface + ?Sized> TextSurface for std::sync::Arc<T> {
    async fn get_text(&self, path: &str) -> Option<String> {
        (**self).get_text(path).await
    }

    async fn set_text(&self, path: &str, content: &str) {
        (**self).set_text(path, content).await
    }
}

impl<T: Notifier + ?Sized> Notifier for std::sync::Arc<T> {
    fn notify(&self, message: &str) {
        (**self).notify(message)
    }
}

/// Test surface holding one buffer per path.
#[derive(Default)]
pub struct BufferSurface {
    buffers: Mutex<std::collections::HashMap<String, String>>,
}

impl BufferSurface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&self, path: &str, content: &str) {
        self.buffers
            .lock()
            .unwrap()
            .insert(path.to_string(), content.to_string());
    }
}

#[async_trait]
impl TextSurface for BufferSurface {
    async fn get_text(&self, path: &str) -> Option<String> {
        self.buffers.lock().unwrap().get(path).cloned()
    }

    async fn set_text(&self, path: &str, content: &str) {
        self.buffers
            .lock()
            .unwrap()
            .insert(path.to_string(), content.to_string());
    }
}

/// Test notifier that records every notice.
#[derive(Default)]
pub struct RecordingNotifier {
    messages: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, message: &str) {
        self.messages.lock().unwrap().push(message.to_string());
    }
}

/// Notifier that drops every notice (for headless use).
pub struct SilentNotifier;

impl Notifier for SilentNotifier {
    fn notify(&self, _message: &str) {}
}
