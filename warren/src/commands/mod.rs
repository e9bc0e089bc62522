pub mod base;
pub mod client;
pub mod server;

/// A thin abstraction implemented by CLI command structs to execute work.
///
/// Implementors perform whatever IO/networking the command represents
/// inside `handle`. The method takes ownership of `self` so implementors
/// can move owned fields (configuration, sockets, clients) without extra
/// cloning. Handlers that need async work create their own tokio runtime.
pub trait CommandHandler {
    /// Execute the command, consuming the implementor.
    fn handle(self) -> crate::error::Result<()>;
}
