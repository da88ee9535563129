mod dict_handler;
mod error;
mod router;
mod server;
mod session_handler;
mod state;
mod status_handler;
mod traffic_handler;

pub use router::build_router;
pub use server::run_http_server;
pub use state::AppState;
