mod router;
mod tree;

pub use router::{Router, METHODS};
pub use tree::Tree;
