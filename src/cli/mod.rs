mod clean;
mod scan;
mod search;
pub mod server;

use std::sync::Arc;

pub use clean::*;
pub use scan::*;
pub use search::*;
pub use server::*;

use crate::config::{EmbedderOptions, Opts};
use crate::embedding::{Embedder, HttpEmbedder};

pub trait SubCommandExtend {
    fn run(&self, opts: &Opts) -> impl std::future::Future<Output = anyhow::Result<()>> + Send;
}

fn http_embedder(opts: &EmbedderOptions) -> anyhow::Result<Arc<dyn Embedder>> {
    Ok(Arc::new(HttpEmbedder::new(opts)?))
}
