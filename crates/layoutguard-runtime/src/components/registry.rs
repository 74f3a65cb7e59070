use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::OnceCell;

use layoutguard_core::error::{LayoutError, Result};

/// A render-time component implementation.
pub trait Component: Send + Sync {
    fn name(&self) -> &str;

    /// Produce live markup for one placeholder.
    fn hydrate(&self, props: &Value) -> Result<String>;
}

/// Deferred implementation source (code-split bundle, plugin, ...).
#[async_trait]
pub trait ComponentLoader: Send + Sync {
    async fn load(&self) -> Result<Arc<dyn Component>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentCategory {
    Annotation,
    Input,
    Display,
    Layout,
    Custom,
}

/// Minimal interface schema: props a placeholder must carry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PropSchema {
    pub required: Vec<String>,
}

impl PropSchema {
    pub fn required<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            required: names.into_iter().map(Into::into).collect(),
        }
    }

    /// First required prop absent from `props`.
    pub fn missing<'a>(&'a self, props: &Value) -> Option<&'a str> {
        self.required
            .iter()
            .find(|p| props.get(p.as_str()).is_none())
            .map(String::as_str)
    }
}

/// Lazily loaded implementation. Loads at most once, shared by all clones.
#[derive(Clone)]
pub struct LazyComponent {
    loader: Arc<dyn ComponentLoader>,
    cell: Arc<OnceCell<Arc<dyn Component>>>,
}

impl LazyComponent {
    pub fn new(loader: Arc<dyn ComponentLoader>) -> Self {
        Self {
            loader,
            cell: Arc::new(OnceCell::new()),
        }
    }
}

/// Implementation handle returned by the resolver.
///
/// A deferred handle is still a successful resolution; readiness is a
/// property of the handle, not a separate resolution outcome.
#[derive(Clone)]
pub enum ComponentHandle {
    Ready(Arc<dyn Component>),
    Deferred(LazyComponent),
}

impl ComponentHandle {
    /// Implementation if it is available without waiting.
    pub fn get(&self) -> Option<Arc<dyn Component>> {
        match self {
            ComponentHandle::Ready(c) => Some(Arc::clone(c)),
            ComponentHandle::Deferred(lazy) => lazy.cell.get().cloned(),
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.get().is_some()
    }

    pub async fn load(&self) -> Result<Arc<dyn Component>> {
        match self {
            ComponentHandle::Ready(c) => Ok(Arc::clone(c)),
            ComponentHandle::Deferred(lazy) => {
                let loader = Arc::clone(&lazy.loader);
                let c = lazy
                    .cell
                    .get_or_try_init(|| async move { loader.load().await })
                    .await?;
                Ok(Arc::clone(c))
            }
        }
    }
}

#[derive(Clone)]
pub struct RegisteredComponent {
    pub name: String,
    pub category: ComponentCategory,
    pub schema: Option<PropSchema>,
    handle: ComponentHandle,
}

impl RegisteredComponent {
    pub fn handle(&self) -> ComponentHandle {
        self.handle.clone()
    }
}

/// Component registry. Build one per application session (or per test) and
/// pass it where needed; there is no process-wide default.
#[derive(Default)]
pub struct ComponentRegistry {
    components: DashMap<String, RegisteredComponent>,
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self {
            components: DashMap::new(),
        }
    }

    pub fn register(
        &self,
        category: ComponentCategory,
        component: Arc<dyn Component>,
        schema: Option<PropSchema>,
    ) -> Result<()> {
        let name = component.name().to_string();
        self.insert(RegisteredComponent {
            name,
            category,
            schema,
            handle: ComponentHandle::Ready(component),
        })
    }

    pub fn register_lazy(
        &self,
        name: impl Into<String>,
        category: ComponentCategory,
        loader: Arc<dyn ComponentLoader>,
        schema: Option<PropSchema>,
    ) -> Result<()> {
        self.insert(RegisteredComponent {
            name: name.into(),
            category,
            schema,
            handle: ComponentHandle::Deferred(LazyComponent::new(loader)),
        })
    }

    fn insert(&self, entry: RegisteredComponent) -> Result<()> {
        if entry.name.trim().is_empty() {
            return Err(LayoutError::BadRequest("component name must not be blank".into()));
        }
        if self.components.contains_key(&entry.name) {
            tracing::debug!(component = %entry.name, "component re-registered; replacing");
        }
        self.components.insert(entry.name.clone(), entry);
        Ok(())
    }

    pub fn unregister(&self, name: &str) -> bool {
        self.components.remove(name).is_some()
    }

    pub fn get(&self, name: &str) -> Option<RegisteredComponent> {
        self.components.get(name).map(|e| e.value().clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.components.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.components.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }
}
