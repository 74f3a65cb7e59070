use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use minijinja::{AutoEscape, Environment, Error, ErrorKind, UndefinedBehavior, Value};
use serde_json::Value as JsonValue;

use layoutguard_core::error::{LayoutError, Result};

use crate::components::placeholder::{disallowed_block, live_placeholder, unknown_block};
use crate::components::ComponentRegistry;
use crate::policy::SecurityPolicy;

use super::directive::{Preprocessor, COMPONENT_FN, ITER_FN};
use super::guard::IterationBudget;

/// Named template sources (`name -> source`), injected by the caller.
pub type TemplateSources = HashMap<String, String>;

/// Policy-enforcing template environment for one render session.
///
/// Compiler settings: HTML autoescape for every template, strict undefined,
/// `trim_blocks` + `lstrip_blocks`.
pub struct TemplateEnvironment {
    env: Environment<'static>,
    policy: Arc<SecurityPolicy>,
    registry: Option<Arc<ComponentRegistry>>,
    budget: IterationBudget,
    // One render at a time: the budget is per call.
    render_lock: Mutex<()>,
}

impl TemplateEnvironment {
    /// Compile every source eagerly; syntax errors surface here.
    pub fn new(
        policy: Arc<SecurityPolicy>,
        registry: Option<Arc<ComponentRegistry>>,
        sources: TemplateSources,
    ) -> Result<Self> {
        let budget = IterationBudget::new(policy.max_iterations());

        let mut env = Environment::new();
        env.set_auto_escape_callback(|_| AutoEscape::Html);
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        env.set_trim_blocks(true);
        env.set_lstrip_blocks(true);

        let tick_budget = budget.clone();
        env.add_function(ITER_FN, move || -> std::result::Result<Value, Error> {
            tick_budget.tick()?;
            Ok(Value::from(()))
        });
        let gate_policy = Arc::clone(&policy);
        let gate_registry = registry.clone();
        env.add_function(
            COMPONENT_FN,
            move |name: String, props: Value| -> std::result::Result<Value, Error> {
                render_placeholder(&gate_policy, gate_registry.as_deref(), &name, &props)
            },
        );

        let pre = Preprocessor::new(&policy, registry.as_deref());
        for (name, src) in sources {
            let processed = pre.run(&src)?;
            env.add_template_owned(name, processed)
                .map_err(|e| map_error(e, false))?;
        }

        Ok(Self {
            env,
            policy,
            registry,
            budget,
            render_lock: Mutex::new(()),
        })
    }

    pub fn policy(&self) -> &Arc<SecurityPolicy> {
        &self.policy
    }

    /// Render a named template from the source map.
    pub fn render(&self, name: &str, data: &JsonValue) -> Result<String> {
        let _guard = self
            .render_lock
            .lock()
            .map_err(|_| LayoutError::Internal("render lock poisoned".into()))?;
        self.budget.reset();

        let ctx = self.policy.create_secure_context(data);
        let tmpl = self
            .env
            .get_template(name)
            .map_err(|e| map_error(e, false))?;
        let out = tmpl
            .render(&ctx)
            .map_err(|e| map_error(e, self.budget.is_tripped()));

        tracing::debug!(template = %name, iterations = self.budget.count(), ok = out.is_ok(), "render");
        out
    }

    /// Compile and render ad-hoc source with the same rules.
    pub fn render_string(&self, source: &str, data: &JsonValue) -> Result<String> {
        let processed = Preprocessor::new(&self.policy, self.registry.as_deref()).run(source)?;

        let _guard = self
            .render_lock
            .lock()
            .map_err(|_| LayoutError::Internal("render lock poisoned".into()))?;
        self.budget.reset();

        let ctx = self.policy.create_secure_context(data);
        self.env
            .render_str(&processed, &ctx)
            .map_err(|e| map_error(e, self.budget.is_tripped()))
    }

    /// Loop bodies executed by the last render call.
    pub fn last_iteration_count(&self) -> usize {
        self.budget.count()
    }
}

// Same gate as the preprocessor: no live placeholder for a rejected name.
fn render_placeholder(
    policy: &SecurityPolicy,
    registry: Option<&ComponentRegistry>,
    name: &str,
    props: &Value,
) -> std::result::Result<Value, Error> {
    if !policy.validate_component(name) {
        return Ok(Value::from_safe_string(disallowed_block(name)));
    }
    if registry.is_some_and(|r| !r.contains(name)) {
        return Ok(Value::from_safe_string(unknown_block(name)));
    }

    let props = serde_json::to_value(props).map_err(|e| {
        Error::new(ErrorKind::InvalidOperation, format!("component props not serializable: {e}"))
    })?;
    let html = live_placeholder(name, &props)
        .map_err(|e| Error::new(ErrorKind::InvalidOperation, e.to_string()))?;
    Ok(Value::from_safe_string(html))
}

fn map_error(err: Error, budget_tripped: bool) -> LayoutError {
    if budget_tripped {
        return LayoutError::ResourceExceeded(err.to_string());
    }
    match err.kind() {
        ErrorKind::SyntaxError => LayoutError::Syntax {
            message: err.detail().unwrap_or("invalid template").to_string(),
            line: err.line(),
        },
        ErrorKind::TemplateNotFound => LayoutError::TemplateNotFound(
            err.name()
                .map(str::to_string)
                .or_else(|| err.detail().map(str::to_string))
                .unwrap_or_else(|| err.to_string()),
        ),
        _ => LayoutError::Render(err.to_string()),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::config::SecurityConfig;

    #[test]
    fn placeholder_function_rechecks_the_allowlist() {
        let policy = SecurityPolicy::new(&SecurityConfig::default().with_allowed_components(["A"])).unwrap();
        let props = Value::from_serialize(serde_json::json!({"v": 1}));

        let ok = render_placeholder(&policy, None, "A", &props).unwrap();
        assert_eq!(ok.to_string(), r#"<div data-component="A" data-props='{"v":1}'></div>"#);

        let denied = render_placeholder(&policy, None, "Evil", &props).unwrap();
        assert!(denied.to_string().contains(r#"data-layout-error="disallowed-component""#));

        let registry = ComponentRegistry::new();
        let unknown = render_placeholder(&policy, Some(&registry), "A", &props).unwrap();
        assert!(unknown.to_string().contains(r#"data-layout-error="unknown-component""#));
    }
}
