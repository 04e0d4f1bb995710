//! # HogQL
//!
//! Builds HogQL (PostHog's ClickHouse-flavoured SQL) statements from
//! structured input.
//!
//! Every user-supplied string reaches the rendered query only through
//! [`escape_string_literal`], and every field name only through
//! [`escape_identifier`]. Nothing else in this crate interpolates caller data.
//!
//! ```
//! use hogql::{QueryFilter, Select, Direction};
//!
//! let filter = QueryFilter::new()
//!     .where_equals("event", "x' OR '1'='1")
//!     .where_equals("distinct_id", "user_1");
//!
//! assert_eq!(
//!     filter.build(),
//!     "WHERE event = 'x'' OR ''1''=''1' AND distinct_id = 'user_1'"
//! );
//!
//! let sql = Select::from("events")
//!     .columns(["event", "count()"])
//!     .filter(filter)
//!     .order_by("timestamp", Direction::Desc)
//!     .limit(10)
//!     .build();
//! assert!(sql.starts_with("SELECT event, count() FROM events WHERE"));
//! ```

mod error;
mod escape;
mod filter;
mod select;

pub use error::{HogQLError, HogQLResult};
pub use escape::{escape_identifier, escape_like_pattern, escape_string_literal, quote_string_literal};
pub use filter::{Condition, FilterValue, Operator, QueryFilter};
pub use select::{Direction, Select};
