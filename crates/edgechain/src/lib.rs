//! # edgechain
//!
//! Executes deployment call chains.
//!
//! A deployment is an ordered list of instructions, each naming the next
//! "thing" to call (an OpenAPI-style service description) or nothing at all.
//! Each step takes the result of the Wasm function that just ran, parses it
//! according to its declared media type, and either forwards it to the next
//! thing over HTTP or wraps it as the final response.
//!
//! ```text
//!  wasm result ──parse──▶ Payload ──next target?──▶ POST to peer ──▶ reply
//!                                      │                              │
//!                                      ▼                              ▼
//!                               {"result": ...} ◀──────────── reply media type
//! ```
//!
//! The outbound leg goes through the [`ChainClient`] trait; [`HttpClient`] is
//! the reqwest implementation.

pub mod client;
pub mod deployment;
pub mod description;
pub mod error;
pub mod media;
pub mod parse;
pub mod payload;

pub use client::ChainClient;
pub use client::HttpClient;
pub use client::Reply;
pub use client::RequestBody;
pub use deployment::ChainResponse;
pub use deployment::Deployment;
pub use deployment::Instruction;
pub use deployment::Step;
pub use description::ServiceDescription;
pub use error::Error;
pub use error::Result;
pub use media::MediaType;
pub use payload::Payload;
