pub mod dispatcher;
pub mod event;
pub mod response;
pub mod sweeper;


pub use dispatcher::Dispatcher;
pub use event::{DirectRequest, Trigger};
pub use response::{DispatchResponse, ReassemblyResponse, SweepReport};
