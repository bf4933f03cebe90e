//! Scripted backend for tests: records every call and fails on demand.

use std::cell::{Cell, RefCell};

use super::{BackendError, InvokeRequest, ModelBackend, Role};

/// What the backend saw on one call.
#[derive(Debug, Clone)]
pub(crate) struct RecordedCall {
    pub system_instruction: Option<String>,
    pub texts: Vec<(Role, String)>,
    pub images: Vec<String>,
}

pub(crate) struct ScriptedBackend {
    id: String,
    replies: Vec<String>,
    fail_on: Option<usize>,
    exhaust_on: Option<usize>,
    fail_init: bool,
    pub calls: RefCell<Vec<RecordedCall>>,
    pub initialized: Cell<bool>,
    pub released: Cell<bool>,
}

impl ScriptedBackend {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            replies: Vec::new(),
            fail_on: None,
            exhaust_on: None,
            fail_init: false,
            calls: RefCell::new(Vec::new()),
            initialized: Cell::new(false),
            released: Cell::new(false),
        }
    }

    /// Replies returned in call order; calls past the end get `answer <n>`.
    pub fn with_replies(mut self, replies: &[&str]) -> Self {
        self.replies = replies.iter().map(|s| (*s).to_string()).collect();
        self
    }

    /// Fail the `n`-th call (1-based, counted over the backend's lifetime).
    pub fn failing_on(mut self, n: usize) -> Self {
        self.fail_on = Some(n);
        self
    }

    /// Report resource exhaustion on the `n`-th call.
    pub fn exhausted_on(mut self, n: usize) -> Self {
        self.exhaust_on = Some(n);
        self
    }

    pub fn failing_init(mut self) -> Self {
        self.fail_init = true;
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.borrow().len()
    }

    pub fn call(&self, idx: usize) -> RecordedCall {
        self.calls.borrow()[idx].clone()
    }
}

impl ModelBackend for ScriptedBackend {
    fn id(&self) -> &str {
        &self.id
    }

    fn initialize(&mut self) -> Result<(), BackendError> {
        if self.fail_init {
            return Err(BackendError::Unavailable {
                backend: self.id.clone(),
                message: "not enough GPU memory".to_string(),
            });
        }
        self.initialized.set(true);
        Ok(())
    }

    fn invoke(&self, request: &InvokeRequest<'_>) -> Result<String, BackendError> {
        let call = RecordedCall {
            system_instruction: request.system_instruction.map(str::to_string),
            texts: request
                .content
                .iter()
                .filter_map(|part| part.text().map(|t| (part.role, t.to_string())))
                .collect(),
            images: request.images().map(|img| img.name.clone()).collect(),
        };
        let n = {
            let mut calls = self.calls.borrow_mut();
            calls.push(call);
            calls.len()
        };

        if self.fail_on == Some(n) {
            return Err(BackendError::Status {
                backend: self.id.clone(),
                status: 503,
                body: "service unavailable".to_string(),
            });
        }
        if self.exhaust_on == Some(n) {
            return Err(BackendError::ResourceExhausted {
                backend: self.id.clone(),
                message: "CUDA out of memory".to_string(),
            });
        }

        Ok(self
            .replies
            .get(n - 1)
            .cloned()
            .unwrap_or_else(|| format!("answer {n}")))
    }

    fn release(&mut self) {
        self.released.set(true);
    }
}
