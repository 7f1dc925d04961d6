mod bindings;
mod engine;
mod load_context;
mod registry;

pub use engine::create_engine;
pub use load_context::{GuestState, LoadError, LoadedModule, ModuleLoadContext};
pub use registry::{HandlerRegistry, LIFECYCLE_TYPE};
