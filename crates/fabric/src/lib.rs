//! `fabric` — the request-plane core of a polyglot service framework.
//!
//! Six cooperating components, dependency order leaves-first (spec §2):
//! `errors` (C6) underlies `registry` (C3), which `resilience` (C5) and
//! `pool` (C4) build on; `router` (C2) composes `registry` with a
//! load-balancing policy; `adapter` (C1) sits at the edge. `client` wires
//! router → pool → resilience into the outbound call path.

pub mod adapter;
pub mod client;
pub mod config;
pub mod errors;
pub mod pool;
pub mod registry;
pub mod resilience;
pub mod router;
pub mod telemetry;
pub mod types;
