pub mod canvas_client;
pub mod telegram_client;

pub use canvas_client::{CanvasClient, CanvasConnector};
pub use telegram_client::TelegramClient;
