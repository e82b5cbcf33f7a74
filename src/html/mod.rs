pub mod audit;
pub mod entities;
pub mod links;
pub mod sanitize;
pub mod token;

pub use audit::active_content;
pub use links::{classify_href, LinkSafety};
pub use sanitize::{sanitize, sanitize_to_string};
