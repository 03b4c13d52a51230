pub mod block;
pub mod gate;
pub mod proxy;

pub use block::{BlockDetector, BlockReason, BlockVerdict};
pub use gate::{
    FetchGate, FetchOutcome, FetchRequest, FetchSettings, OutboundRequest, Page, RawResponse,
    ReqwestTransport, Transport,
};
pub use proxy::{ProxyEndpoint, ProxyHealthTracker};
