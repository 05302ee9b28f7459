pub mod handler;

pub use handler::{relay_handler, MethodPolicy, RelayState};
