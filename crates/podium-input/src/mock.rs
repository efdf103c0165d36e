//! Mock executor for testing.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use podium_types::{Action, PointerPosition};

use crate::error::ActionError;
use crate::keys::{key_for, HostKey};
use crate::ActionExecutor;

/// Shared state for observing what `MockExecutor` did.
#[derive(Debug, Default)]
struct MockExecutorState {
    actions: Vec<Action>,
    keys: Vec<HostKey>,
    pointer: Option<PointerPosition>,
    pointer_updates: usize,
    fail_actions: bool,
    fail_pointer: bool,
    pointer_delay: Option<Duration>,
    shutdown: bool,
}

/// Mock action executor.
pub struct MockExecutor {
    state: Arc<Mutex<MockExecutorState>>,
}

impl Default for MockExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl MockExecutor {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockExecutorState::default())),
        }
    }

    /// Get a clonable handle for observing the executor from tests.
    pub fn handle(&self) -> MockExecutorHandle {
        MockExecutorHandle {
            state: Arc::clone(&self.state),
        }
    }
}

/// Clonable observer handle for `MockExecutor`.
#[derive(Clone)]
pub struct MockExecutorHandle {
    state: Arc<Mutex<MockExecutorState>>,
}

impl MockExecutorHandle {
    /// Actions performed, in order.
    pub fn actions(&self) -> Vec<Action> {
        self.state.lock().unwrap().actions.clone()
    }

    /// Keys pressed, in order.
    pub fn keys(&self) -> Vec<HostKey> {
        self.state.lock().unwrap().keys.clone()
    }

    /// Last pointer position applied.
    pub fn pointer(&self) -> Option<PointerPosition> {
        self.state.lock().unwrap().pointer
    }

    /// How many pointer updates reached the executor.
    pub fn pointer_updates(&self) -> usize {
        self.state.lock().unwrap().pointer_updates
    }

    /// Make `execute` fail until reset.
    pub fn fail_actions(&self, fail: bool) {
        self.state.lock().unwrap().fail_actions = fail;
    }

    /// Make `move_pointer` fail until reset.
    pub fn fail_pointer(&self, fail: bool) {
        self.state.lock().unwrap().fail_pointer = fail;
    }

    /// Make every pointer update take this long.
    pub fn slow_pointer(&self, delay: Duration) {
        self.state.lock().unwrap().pointer_delay = Some(delay);
    }

    pub fn is_shutdown(&self) -> bool {
        self.state.lock().unwrap().shutdown
    }
}

#[async_trait]
impl ActionExecutor for MockExecutor {
    async fn execute(&mut self, action: Action) -> Result<(), ActionError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_actions {
            return Err(ActionError::Execute {
                action,
                reason: "mock failure".to_string(),
            });
        }
        state.actions.push(action);
        state.keys.push(key_for(action));
        Ok(())
    }

    async fn move_pointer(&mut self, position: PointerPosition) -> Result<(), ActionError> {
        let delay = self.state.lock().unwrap().pointer_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let mut state = self.state.lock().unwrap();
        if state.fail_pointer {
            return Err(ActionError::Pointer("mock failure".to_string()));
        }
        state.pointer = Some(position);
        state.pointer_updates += 1;
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<(), ActionError> {
        self.state.lock().unwrap().shutdown = true;
        Ok(())
    }
}
