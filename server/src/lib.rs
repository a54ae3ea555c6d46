pub mod logging;
pub mod server_state;
pub mod ws_endpoint;
