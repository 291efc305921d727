pub mod completion;
pub mod config;
pub mod dispatcher;
pub mod engine;
pub mod inputs;
pub mod job;
pub mod models;
pub mod pipeline;
pub mod producer;
pub mod queue;
pub mod reference;
pub mod report;
pub mod submit;
pub mod validate;
mod worker;

pub use completion::*;
pub use config::*;
pub use dispatcher::*;
pub use engine::*;
pub use inputs::*;
pub use job::*;
pub use models::*;
pub use pipeline::*;
pub use producer::*;
pub use queue::*;
pub use reference::*;
pub use report::*;
pub use submit::*;
pub use validate::*;
