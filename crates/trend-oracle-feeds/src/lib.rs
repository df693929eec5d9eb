//! HTTP implementations of the oracle's collaborator traits.
//!
//! - [`trends`]: scraped trend pages and the fallback [`SourceChain`]
//! - [`images`]: image search for artifact assets
//! - [`portal`]: deploy and settle services
//! - [`rpc`]: wallet balance lookups

pub mod error;
pub mod images;
pub mod portal;
pub mod rpc;
pub mod trends;

pub use error::FeedError;
pub use images::HttpAssetFetcher;
pub use portal::{HttpDeploymentSink, HttpSettlementSink, PLACEHOLDER_PNG};
pub use rpc::RpcBalanceQuery;
pub use trends::{RegexTrendSource, SourceChain};
