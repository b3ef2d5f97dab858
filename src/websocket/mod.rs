mod dispatcher;
mod handler;
mod message;

pub use dispatcher::Dispatcher;
pub use handler::ws_handler;
pub use message::*;
