//! Communication and Lookup Adapter for distributed objects.
//!
//! The adapter exposes a tree of remotely shared distributed objects to the
//! host application and keeps their state synchronized with a peer simulation
//! over a messaging middleware. Each object is a named bundle of members
//! (data, events, fields and methods) that are either *consumed* (mirroring
//! the peer) or *provided* (mirrored by the peer).
//!
//! Typical use:
//!
//! 1. Create a [`service::ClaService`] (or install the process-wide one via
//!    [`global::init`]).
//! 2. Build the object tree while disconnected: [`service::ClaService::get_do`],
//!    then request members by path on each [`object::DistributedObject`].
//! 3. [`service::ClaService::connect`] binds every member to its middleware
//!    endpoint; from then on consumed values update as the peer publishes,
//!    provided values transmit when written, and method calls flow through
//!    [`call::ConsumerCallContext`]s.
//!
//! The middleware itself stays behind the [`transport`] contracts;
//! [`transport::local`] provides an in-process implementation.

pub mod call;
pub mod error;
pub mod global;
pub mod member;
pub mod object;
pub mod path;
pub mod prelude;
pub mod serialize;
pub mod service;
pub mod thread_context;
pub mod transport;
pub mod value;
pub mod worker;

mod registry;

pub use error::{AdapterError, Result};
