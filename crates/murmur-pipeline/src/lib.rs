//! Queue draining and keyword routing between indexes.

pub mod error;
pub mod preprocess;
pub mod router;

pub use error::PipelineError;
pub use preprocess::{drain, DrainReport};
pub use router::{route, RouteReport};
