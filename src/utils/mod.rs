pub mod html;
pub mod logging;

pub use html::{clean_html_text, escape_html};
pub use logging::truncate_text;
