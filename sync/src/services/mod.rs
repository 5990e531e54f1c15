pub mod batcher;
pub mod dispatcher;
pub mod engine;
pub mod transforms;

pub use batcher::IndexWorker;
pub use dispatcher::Dispatcher;
pub use engine::SyncEngine;
pub use transforms::TransformChain;
