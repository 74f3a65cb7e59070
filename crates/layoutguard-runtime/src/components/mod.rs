//! Component registry, render-time resolver and placeholder markup.

pub mod placeholder;
pub mod registry;
pub mod resolver;

pub use registry::{
    Component, ComponentCategory, ComponentHandle, ComponentLoader, ComponentRegistry,
    LazyComponent, PropSchema, RegisteredComponent,
};
pub use resolver::{ComponentCallback, ComponentResolver, Resolution};
