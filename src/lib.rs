//! ### `streambus`: message distribution over Redis Streams
//!
//! A retrying, backpressure-aware distribution engine: it continuously pulls
//! ordered messages from keyed, offset-addressed streams and delivers them to
//! registered subscribers.
//!
//! + One bounded buffer and worker pool per subscription, with per-message
//!   retry under the failure handler's direction
//! + Backpressure by refusal: a full buffer stops the read cursor instead of
//!   dropping or blocking, so nothing is skipped and nothing is re-delivered
//!   after acceptance
//! + Cooperative pause and cancel; cancellation is observed at every safe
//!   point rather than enforced by interruption
//! + Three pull strategies behind one interface: sequential blocking reads,
//!   a pipelined round trip across streams, and a merged multi-key read that
//!   turns N fetches into one
//!
//! The wire protocol stays behind the [`SourceClient`] trait; the bundled
//! [`RedisSource`] implements it with `XREAD`/`XREADGROUP`, pipelined
//! flushes, `XADD` and `XACK` on top of [`redis`](https://docs.rs/redis).
//!
//! A minimal round trip:
//!
//! ```ignore
//! let source = Arc::new(RedisSource::connect(url, Default::default()).await?);
//! let container = StreamContainer::new(source, ContainerOptions::default());
//! let flow = container
//!     .subscribe(StreamOffset::latest(key), ReadOptions::default())
//!     .await?;
//! let handle = flow.subscribe(Arc::new(MySubscriber), 4)?;
//! // ... later
//! handle.dispose();
//! container.close().await;
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(missing_debug_implementations)]

/// The default Redis port number
pub const REDIS_PORT: u16 = 6379;

/// The default timeout, if needed but unspecified
pub const DEFAULT_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(60);

mod connection;
mod container;
mod error;
mod flow;
mod message;
mod options;
mod publisher;
mod sink;
mod source;
mod task;

pub use connection::*;
pub use container::*;
pub use error::*;
pub use flow::*;
pub use message::*;
pub use options::*;
pub use publisher::*;
pub use source::*;
