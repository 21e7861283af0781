//! HTTP middleware
//!
//! - request id generation and propagation, sensitive header masking
//! - bearer JWT authentication for `/api` routes (`jwt` feature)

pub mod request_tracking;

#[cfg(feature = "jwt")]
pub mod jwt;

pub use request_tracking::{
    request_id_layer, request_id_propagation_layer, sensitive_headers_layer,
};

#[cfg(feature = "jwt")]
pub use jwt::{Claims, JwtAuth};
