//! Shared application state for hub methods.
//!
//! [`AppState`] is a type-keyed map handed to every hub call. Insert shared
//! services once when building the handler and pull them out in methods with
//! the [`State`](crate::extractor::State) extractor. Nothing is looked up
//! implicitly: whatever a method needs is either an argument or in here.
//!
//! ```ignore
//! use hubforge::prelude::*;
//! use std::sync::Arc;
//!
//! struct ChatHistory { /* ... */ }
//!
//! let state = AppState::new();
//! state.insert(Arc::new(ChatHistory { /* ... */ }));
//!
//! async fn history(State(history): State<ChatHistory>) -> Result<Vec<String>> {
//!     // ...
//! #   Ok(vec![])
//! }
//! ```

use dashmap::DashMap;
use std::any::{Any, TypeId};
use std::sync::Arc;

/// Type-keyed, thread-safe store of shared values.
///
/// Clones share the same underlying map.
#[derive(Clone)]
pub struct AppState {
    data: Arc<DashMap<TypeId, Arc<dyn Any + Send + Sync>>>,
}

impl AppState {
    /// Creates an empty state.
    pub fn new() -> Self {
        Self {
            data: Arc::new(DashMap::new()),
        }
    }

    /// Stores `value`, replacing any previous value of the same type.
    pub fn insert<T: Send + Sync + 'static>(&self, value: Arc<T>) {
        self.data.insert(TypeId::of::<T>(), value);
    }

    /// Retrieves the value of type `T`.
    pub fn get<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.data
            .get(&TypeId::of::<T>())
            .and_then(|arc| arc.value().clone().downcast::<T>().ok())
    }

    /// Returns `true` if a value of type `T` is stored.
    pub fn contains<T: Send + Sync + 'static>(&self) -> bool {
        self.data.contains_key(&TypeId::of::<T>())
    }

    /// Number of stored values.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState").field("len", &self.len()).finish()
    }
}
