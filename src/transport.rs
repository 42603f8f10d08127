//! Network boundary plumbing: the pre-flight proxy gate, the shared
//! hot-swappable HTTP client, and its options.

pub mod gate;
pub mod handle;
pub mod options;

pub use gate::{await_ready, GateError};
pub use handle::TransportHandle;
pub use options::TransportOptions;
