//! anchor-client: concurrent HTTP fan-out to edge agents.
//!
//! One logical command addressed to N agents becomes N independent HTTP
//! requests dispatched in parallel. Results come back as N [`Reply`]s
//! aligned with the input URLs, whatever order the requests complete in.
//!
//! # Architecture
//!
//! ```text
//! Transport (trait)
//!   ├── HttpPool           hyper client, one task per URL, semaphore-bounded
//!   │   └── per-request timeout; failure/timeout/panic → Reply::failed()
//!   └── ScriptedTransport  canned replies + call recording for tests
//! ```
//!
//! There is no retry and no circuit breaking: a failed slot is reported as
//! code [`TRANSPORT_ERROR`] with an empty body and the batch carries on.

pub mod pool;
pub mod scripted;
pub mod transport;

pub use pool::{HttpPool, PoolConfig};
pub use scripted::{RecordedCall, ScriptedTransport};
pub use transport::{QueryParams, Reply, TRANSPORT_ERROR, Transport, with_query};

pub use http::Method;
