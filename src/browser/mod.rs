pub mod connection;
pub mod launcher;

pub use connection::{connect_to_browser_and_page, BrowserConnection};
pub use launcher::{find_available_port, ChromeProcess};
