use std::collections::HashMap;

use tokio::sync::Mutex;

/// Per-button state: the parsed settings plus the last fetch result.
///
/// `loaded` distinguishes "no fetch has completed yet" from a genuine zero
/// count; readers must not treat the default result as empty-inbox.
#[derive(Debug, Clone)]
pub struct ButtonState<S, R> {
    pub settings: S,
    pub result: R,
    pub loaded: bool,
}

/// The map from button context id to [`ButtonState`].
///
/// This is the only shared mutable resource in the engine. Every access by
/// the dispatcher and the polling loop goes through the one lock; the
/// polling loop iterates over a key snapshot and never holds the lock
/// across a fetch.
#[derive(Debug)]
pub struct ButtonRegistry<S, R> {
    buttons: Mutex<HashMap<String, ButtonState<S, R>>>,
}

impl<S, R> Default for ButtonRegistry<S, R> {
    fn default() -> Self {
        Self {
            buttons: Mutex::new(HashMap::new()),
        }
    }
}

impl<S, R> ButtonRegistry<S, R>
where
    S: Clone,
    R: Clone + Default,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a button with freshly parsed settings and a not-yet-loaded
    /// result. Re-appearing under a known context replaces the old entry.
    pub async fn insert(&self, context: &str, settings: S) {
        let mut buttons = self.buttons.lock().await;
        buttons.insert(
            context.to_string(),
            ButtonState {
                settings,
                result: R::default(),
                loaded: false,
            },
        );
    }

    /// Replace a button's settings, keeping its cached result. Unknown
    /// contexts are registered instead (the host can deliver settings for a
    /// button we have not seen appear).
    pub async fn update_settings(&self, context: &str, settings: S) {
        let mut buttons = self.buttons.lock().await;
        match buttons.get_mut(context) {
            Some(state) => state.settings = settings,
            None => {
                buttons.insert(
                    context.to_string(),
                    ButtonState {
                        settings,
                        result: R::default(),
                        loaded: false,
                    },
                );
            }
        }
    }

    /// Store a completed fetch: the (possibly mutated) settings and the
    /// result. A no-op when the button disappeared mid-fetch.
    pub async fn store_result(&self, context: &str, settings: S, result: R) {
        let mut buttons = self.buttons.lock().await;
        if let Some(state) = buttons.get_mut(context) {
            state.settings = settings;
            state.result = result;
            state.loaded = true;
        }
    }

    /// Snapshot of one button's settings.
    pub async fn settings(&self, context: &str) -> Option<S> {
        let buttons = self.buttons.lock().await;
        buttons.get(context).map(|state| state.settings.clone())
    }

    /// The last stored result and whether any fetch has completed.
    pub async fn cached_result(&self, context: &str) -> Option<(R, bool)> {
        let buttons = self.buttons.lock().await;
        buttons
            .get(context)
            .map(|state| (state.result.clone(), state.loaded))
    }

    /// Drop a button. Returns true when the registry is empty afterwards,
    /// which is the signal to retire the polling loop.
    pub async fn remove(&self, context: &str) -> bool {
        let mut buttons = self.buttons.lock().await;
        buttons.remove(context);
        buttons.is_empty()
    }

    /// Snapshot of all tracked contexts, for one polling tick.
    pub async fn contexts(&self) -> Vec<String> {
        let buttons = self.buttons.lock().await;
        buttons.keys().cloned().collect()
    }

    pub async fn is_empty(&self) -> bool {
        self.buttons.lock().await.is_empty()
    }

    pub async fn len(&self) -> usize {
        self.buttons.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_insert_starts_unloaded() {
        let registry: ButtonRegistry<String, u64> = ButtonRegistry::new();
        registry.insert("B1", "settings".to_string()).await;

        let (result, loaded) = registry.cached_result("B1").await.unwrap();
        assert_eq!(result, 0);
        assert!(!loaded, "a default result must read as not-yet-loaded");
    }

    #[tokio::test]
    async fn test_store_result_marks_loaded_and_persists_settings() {
        let registry: ButtonRegistry<String, u64> = ButtonRegistry::new();
        registry.insert("B1", "old".to_string()).await;
        registry.store_result("B1", "mutated".to_string(), 7).await;

        assert_eq!(registry.settings("B1").await.unwrap(), "mutated");
        assert_eq!(registry.cached_result("B1").await.unwrap(), (7, true));
    }

    #[tokio::test]
    async fn test_store_result_for_vanished_button_is_a_noop() {
        let registry: ButtonRegistry<String, u64> = ButtonRegistry::new();
        registry.store_result("gone", "s".to_string(), 3).await;
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_update_settings_touches_only_the_target() {
        let registry: ButtonRegistry<String, u64> = ButtonRegistry::new();
        registry.insert("B1", "one".to_string()).await;
        registry.insert("B2", "two".to_string()).await;
        registry.store_result("B2", "two".to_string(), 9).await;

        registry.update_settings("B1", "changed".to_string()).await;

        assert_eq!(registry.settings("B1").await.unwrap(), "changed");
        assert_eq!(registry.settings("B2").await.unwrap(), "two");
        assert_eq!(registry.cached_result("B2").await.unwrap(), (9, true));
    }

    #[tokio::test]
    async fn test_remove_reports_emptiness() {
        let registry: ButtonRegistry<String, u64> = ButtonRegistry::new();
        registry.insert("B1", "one".to_string()).await;
        registry.insert("B2", "two".to_string()).await;

        assert!(!registry.remove("B1").await);
        assert!(registry.remove("B2").await);
        assert!(registry.remove("never-there").await);
    }
}
