//! Template environment: compiles layouts, applies the security policy to
//! every render and meters loop execution.

mod directive;
pub mod environment;
pub mod guard;
mod scan;

pub use environment::{TemplateEnvironment, TemplateSources};
pub use guard::IterationBudget;
