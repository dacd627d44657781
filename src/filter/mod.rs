pub mod types;
pub mod filter;
pub mod filter_where;
pub mod filter_order;
pub mod eval;
pub mod query_string;
pub mod pagination;
pub mod error;

pub use types::*;
pub use filter::Filter;
pub use error::FilterError;
pub use pagination::{PageLink, PageRequest, Pagination, MAX_OFFSET};
pub use query_string::{parse_query_string, translate, QueryParams};
