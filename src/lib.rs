//! A process-management data store, along with the client/server protocol that fills it.
//!
//! Processes of a parallel job (a "namespace") publish key/value data about themselves and
//! read back what their peers published. This crate provides the pieces for that:
//!
//! - the [`gds`] module, a per-process data store that answers scoped queries. A query names
//! a process (a concrete rank, every rank via `WILDCARD`, or "don't care" via `UNDEF`), an
//! optional key, and qualifiers that steer it towards session, node or application data
//! - a [`PmixClient`] that fetches the job-level data of its namespace at init, `put`s and
//! `commit`s its own data, and runs `fence`s, a collective synchronization that optionally
//! carries the committed data of every participant back into the local store
//! - a [`PmixServer`] that registers namespaces, keeps the committed data and releases every
//! participant of a fence once the last one has arrived
//!
//! ## Protocol
//! Requests and replies travel as [`Frame`]s, JSON documents written back to back on a TCP
//! stream. A frame's tag pairs a reply with its request; its payload is a [`Buffer`] of packed
//! fields, starting with a [`Cmd`] for requests and with an integer status for replies. The
//! status is `0` on success, otherwise [`PmixError::status`] of the failure.
//!
//! ## Client / Server executables
//! `pmix-server` runs a server for one or more namespaces, `pmix-client` runs one process of
//! a job: put, commit, fence and read back a peer's data.
//!
//! [`Frame`]: ./command/struct.Frame.html
//! [`Buffer`]: ./codec/struct.Buffer.html
//! [`Cmd`]: ./command/enum.Cmd.html

pub use client::{Completion, OpCallback, PmixClient};
pub use config::{ClientConfig, PoolKind, ServerConfig};
pub use error::{PmixError, Result};
pub use gds::{Gds, HashGds};
pub use server::{PmixServer, ServerState};
pub use thread_pool::{NaiveThreadPool, RayonThreadPool, SharedQueueThreadPool, ThreadPool};
pub use types::{Proc, ProcContext, Rank, Scope, Version};
pub use value::{Info, Kval, Value};

pub mod client;
pub mod codec;
pub mod command;
pub mod config;
pub mod error;
pub mod gds;
pub mod keys;
pub mod server;
pub mod thread_pool;
pub mod transport;
pub mod types;
pub mod value;
