//! Search over the index: a constraint tree, an expression language that
//! compiles to it, and the describe expansion.

pub mod constraint;
pub mod describe;
pub mod error;
pub mod expr;
pub mod handler;

pub use constraint::{
    Constraint, FileConstraint, FloatConstraint, IntConstraint, LogicalConstraint,
    PermanodeConstraint, SearchQuery, StringConstraint,
};
pub use describe::{DescribeResponse, DescribedBlob, THUMB_VERSION};
pub use error::{SearchError, SearchResult};
pub use expr::parse_expression;
pub use handler::SearchHandler;
