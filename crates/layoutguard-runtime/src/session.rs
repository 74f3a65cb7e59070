//! One task-editing session: render, paint in the sandbox, keep the painted
//! context and the shared output store in step.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use serde::Deserialize;
use serde_json::{json, Value};

use layoutguard_core::error::{LayoutError, Result};
use layoutguard_core::protocol::sync::FieldUpdate;

use crate::collab::{OutputStore, Origin, Subscription, UpdateObserver};
use crate::sandbox::manager::ErrorCallback;
use crate::sandbox::{HostWindow, IsolatedFrame, SandboxCallbacks, SandboxManager};
use crate::template::TemplateEnvironment;

/// Task payload minus `output`, which always comes from the store.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TaskContext {
    pub input: Value,
    pub context: Value,
    pub config: Value,
    pub user: Value,
}

impl TaskContext {
    /// `{input, output, context, config, user}` with `output` supplied.
    pub fn with_output(&self, output: Value) -> Value {
        json!({
            "input": self.input,
            "output": output,
            "context": self.context,
            "config": self.config,
            "user": self.user,
        })
    }
}

pub struct LayoutSession {
    env: Arc<TemplateEnvironment>,
    template: String,
    task: TaskContext,
    store: OutputStore,
    manager: Arc<SandboxManager>,
    errored: Arc<AtomicBool>,
    store_sub: Subscription,
    unmounted: AtomicBool,
}

impl LayoutSession {
    /// Render `template` and mount it. Compile and budget failures are
    /// returned; guest-side failures only mark the session errored.
    pub fn mount(
        env: Arc<TemplateEnvironment>,
        template: impl Into<String>,
        task: TaskContext,
        store: OutputStore,
        host: Arc<HostWindow>,
        frame: Arc<dyn IsolatedFrame>,
        on_error: Option<ErrorCallback>,
    ) -> Result<Self> {
        let template = template.into();
        let (html, context) = render_pass(&env, &template, &task, &store)?;

        let errored = Arc::new(AtomicBool::new(false));
        let callbacks = SandboxCallbacks {
            on_rendered: None,
            on_output_change: Some(output_sink(&env, &store)),
            on_error: Some(error_sink(Arc::clone(&errored), on_error)),
        };

        let manager = Arc::new(SandboxManager::mount(host, frame, callbacks)?);
        manager.render(html, context)?;

        let store_sub = store.observe_all(context_forwarder(&env, Arc::downgrade(&manager)));

        Ok(Self {
            env,
            template,
            task,
            store,
            manager,
            errored,
            store_sub,
            unmounted: AtomicBool::new(false),
        })
    }

    /// Render again from the current store state; clears the errored flag.
    pub fn rerender(&self) -> Result<()> {
        if self.unmounted.load(Ordering::Acquire) {
            return Err(LayoutError::Transport("session unmounted".into()));
        }
        let (html, context) = render_pass(&self.env, &self.template, &self.task, &self.store)?;
        self.manager.render(html, context)?;
        self.errored.store(false, Ordering::Release);
        Ok(())
    }

    pub fn is_errored(&self) -> bool {
        self.errored.load(Ordering::Acquire)
    }

    pub fn manager(&self) -> &SandboxManager {
        &self.manager
    }

    pub fn store(&self) -> &OutputStore {
        &self.store
    }

    /// Stop observing the store and destroy the transport, synchronously.
    pub fn unmount(&self) {
        if self.unmounted.swap(true, Ordering::AcqRel) {
            return;
        }
        self.store_sub.unsubscribe();
        self.manager.destroy();
        tracing::debug!(template = %self.template, "layout unmounted");
    }
}

impl Drop for LayoutSession {
    fn drop(&mut self) {
        self.unmount();
    }
}

fn render_pass(
    env: &TemplateEnvironment,
    template: &str,
    task: &TaskContext,
    store: &OutputStore,
) -> Result<(String, Value)> {
    let data = task.with_output(store.snapshot_object());
    let html = env.render(template, &data)?;
    Ok((html, env.policy().create_secure_context(&data)))
}

// OUTPUT_CHANGE -> store, for writable fields only.
fn output_sink(
    env: &TemplateEnvironment,
    store: &OutputStore,
) -> Arc<dyn Fn(&str, &Value) + Send + Sync> {
    let policy = Arc::clone(env.policy());
    let store = store.clone();
    Arc::new(move |field: &str, value: &Value| {
        if !policy.validate_expression(&format!("output.{field}")) {
            return;
        }
        if let Err(e) = store.set(field, value.clone()) {
            tracing::warn!(field = %field, error = %e, "output change not stored");
        }
    })
}

fn error_sink(errored: Arc<AtomicBool>, user: Option<ErrorCallback>) -> ErrorCallback {
    Arc::new(move |err: &LayoutError| {
        errored.store(true, Ordering::Release);
        if let Some(cb) = &user {
            cb(err);
        }
    })
}

// Store change -> UPDATE_CONTEXT at `output.<field>`.
fn context_forwarder(env: &TemplateEnvironment, manager: Weak<SandboxManager>) -> UpdateObserver {
    let policy = Arc::clone(env.policy());
    Arc::new(move |u: &FieldUpdate, _origin: Origin| {
        let path = format!("output.{}", u.field);
        if !policy.validate_expression(&path) {
            return;
        }
        let Some(manager) = manager.upgrade() else {
            return;
        };
        if let Err(e) = manager.update_context(path, u.value.clone()) {
            tracing::debug!(error = %e, field = %u.field, "context update not delivered");
        }
    })
}
