//! Remote Fund Data Platform client.

pub mod breaker;
pub mod client;
pub mod request;
pub mod retry;
pub mod transport;

pub use breaker::CircuitBreaker;
pub use client::{
    BatchResponse, ClientSettings, FetchError, RemoteClient, Secret, TransientCause,
};
pub use request::{plan_batches, ClientIdentity, Environment, FetchRequest, MODE_SHARECLASS};
pub use retry::RetryPolicy;
pub use transport::{
    FormPost, HttpTransport, RawResponse, Transport, TransportError, TransportSettings,
};
