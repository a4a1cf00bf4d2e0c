//! Network layer: TLS termination for the HTTPS listener.

pub mod tls;
