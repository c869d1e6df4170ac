//! HTTP surface of the sync protocol.
//!
//! One endpoint family: `POST /sync/push`, `GET /sync/pull`,
//! `POST /sync/reset`, plus a liveness probe. Requests authenticate with a
//! bearer token; the `storeId` of every request must be a UUID v4 equal to
//! the authenticated actor's identifier before the engine is touched.

pub mod app;
pub mod context;
pub mod middleware;
