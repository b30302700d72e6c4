//! arena-session — per-session state and the operations that mutate it.
//!
//! # Architecture
//!
//! ```text
//! SessionManager
//!   ├── init()          render + submit 4 resources, register session
//!   ├── eat()           bump counter, delete a Running pod every N eats
//!   ├── load()          raise / set target rate, ensure emitter
//!   ├── kill()          delete resources, purge registry, stop emitter
//!   └── chaos_random()  delete a random pod in the chaos namespace
//!
//! SessionRegistry   Arc<RwLock<HashMap<SessionId, SessionEntry>>>
//!   └── SessionEntry
//!         └── EmitterHandle ── LoadEmitter task (GET http://<domain>/snake/<id>)
//! ```
//!
//! The registry is the only owner of session state. Everything else sees
//! `SessionView` copies.

pub mod emitter;
pub mod error;
pub mod lifecycle;
pub mod registry;

pub use emitter::{LoadEmitter, RequestFn, RequestFuture, http_get};
pub use error::{SessionError, SessionResult};
pub use lifecycle::{EatOutcome, LoadOutcome, SessionManager};
pub use registry::{EmitterHandle, RateChange, SessionRegistry, SessionView};
