//! Outbound OCPI client and its transports

mod http;
mod loopback;
mod ocpi_client;
mod transport;

pub use http::ReqwestTransport;
pub use loopback::LoopbackNetwork;
pub use ocpi_client::{CORRELATION_ID_HEADER, CallAuth, OcpiClient, REQUEST_ID_HEADER, RequestIds};
pub use transport::{HttpTransport, InboundResponse, OutboundRequest, TransportError};
