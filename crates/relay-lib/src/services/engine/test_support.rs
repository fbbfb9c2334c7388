// Shared fixtures for engine tests

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use super::driver::{EngineDriver, EngineObserver};
use super::error::EngineError;
use crate::config::EngineConfig;
use crate::models::engine::EngineCompletion;
use crate::session_store::MemorySessionStore;

/// Driver running `script` through `/bin/sh -c`
pub fn sh_driver(script: &str) -> EngineDriver {
    sh_driver_with(script, |_| {})
}

pub fn sh_driver_with(script: &str, tweak: impl FnOnce(&mut EngineConfig)) -> EngineDriver {
    let mut config = EngineConfig {
        binary: "/bin/sh".to_string(),
        args: vec!["-c".to_string(), script.to_string()],
        ..Default::default()
    };
    tweak(&mut config);
    EngineDriver::with_binary(config, "/bin/sh", Arc::new(MemorySessionStore::new()))
}

#[derive(Default)]
pub struct RecordingObserver {
    deltas: Mutex<Vec<String>>,
    completions: Mutex<Vec<EngineCompletion>>,
    errors: Mutex<Vec<EngineError>>,
    cancelled: AtomicUsize,
}

impl RecordingObserver {
    pub fn deltas(&self) -> Vec<String> {
        self.deltas.lock().unwrap().clone()
    }

    pub fn completions(&self) -> Vec<EngineCompletion> {
        self.completions.lock().unwrap().clone()
    }

    pub fn errors(&self) -> Vec<EngineError> {
        self.errors.lock().unwrap().clone()
    }

    pub fn cancelled_count(&self) -> usize {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn terminal_count(&self) -> usize {
        self.completions().len() + self.errors().len() + self.cancelled_count()
    }

    pub fn single_completion(&self) -> EngineCompletion {
        assert_eq!(self.terminal_count(), 1, "expected exactly one terminal callback");
        let completions = self.completions();
        assert_eq!(completions.len(), 1, "errors: {:?}", self.errors());
        completions[0].clone()
    }

    pub fn single_error(&self) -> EngineError {
        assert_eq!(self.terminal_count(), 1, "expected exactly one terminal callback");
        let errors = self.errors();
        assert_eq!(errors.len(), 1, "completions: {:?}", self.completions());
        errors[0].clone()
    }
}

impl EngineObserver for RecordingObserver {
    fn on_delta(&self, accumulated: &str) {
        self.deltas.lock().unwrap().push(accumulated.to_string());
    }

    fn on_complete(&self, completion: EngineCompletion) {
        self.completions.lock().unwrap().push(completion);
    }

    fn on_error(&self, error: EngineError) {
        self.errors.lock().unwrap().push(error);
    }

    fn on_cancelled(&self) {
        self.cancelled.fetch_add(1, Ordering::SeqCst);
    }
}
