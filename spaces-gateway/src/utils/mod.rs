// Upload helpers: archive extraction and content types

pub mod archive;
pub mod content_type;
