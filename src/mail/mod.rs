//! Raw message decoding.

pub mod normalize;

pub use normalize::{header_value, normalize, strip_html};
