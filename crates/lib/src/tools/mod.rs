//! Tool layer: execution strategies, handler resolution, the live registry and dispatch.

pub mod dispatcher;
pub mod meta;
pub mod native;
pub mod registry;
pub mod resolver;
pub mod strategy;

pub use dispatcher::{DispatchError, Dispatcher, ToolCallResult, WORK_DIR_ARG};
pub use native::{FnHandler, NativeModules};
pub use registry::{RegistryEntry, RegistryError, ToolInfo, ToolOrigin, ToolRegistry};
pub use resolver::{HandlerResolver, ResolveError, ResolvedTool};
pub use strategy::{HandlerError, HandlerStrategy, StrategyTable, ToolHandler};
