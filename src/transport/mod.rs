//! HTTP transport to remote automation agents
//!
//! [`DriverSession`] wraps a reqwest client with URL resolution, retry with
//! backoff and session reset, logical error envelope detection, and an
//! in-memory audit log of every exchange.

pub mod envelope;
pub mod session;
pub mod url;

pub use session::{
    DriverRequest, DriverSession, RawResponse, RequestOptions, ScreenResult, SessionReset,
};
pub use url::resolve_url;
