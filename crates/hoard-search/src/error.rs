use thiserror::Error;

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("bad search expression: {0}")]
    BadExpression(String),

    #[error("bad query: {0}")]
    BadQuery(String),

    #[error(transparent)]
    Index(#[from] hoard_index::IndexError),

    #[error(transparent)]
    Type(#[from] hoard_types::TypeError),
}

pub type SearchResult<T> = Result<T, SearchError>;
