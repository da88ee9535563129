mod protocol;
mod server;

pub use protocol::{ProtocolError, Request, parse_request};
pub use server::run_dict_server;
