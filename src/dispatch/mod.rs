//! Function dispatch over HTTP

pub mod function_dispatcher;

pub use function_dispatcher::{decode_reply, DispatchError, FunctionDispatcher};

use crate::protocol::{Task, TaskResult};
use async_trait::async_trait;

/// Invokes the function a task is addressed to
///
/// The queue worker depends on this trait rather than on the HTTP
/// dispatcher so that function endpoints can be mocked.
#[async_trait]
pub trait FunctionInvoker: Send + Sync {
    async fn invoke(&self, task: &Task) -> Result<TaskResult, DispatchError>;
}

#[async_trait]
impl FunctionInvoker for FunctionDispatcher {
    async fn invoke(&self, task: &Task) -> Result<TaskResult, DispatchError> {
        self.dispatch(task).await
    }
}
