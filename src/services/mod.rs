pub mod notification;
pub mod platform;
pub mod store;

pub use notification::{quick_actions, ActionEvent, GradingNotice, Notifier, QuickAction};
pub use platform::{
    AssignmentSummary, CourseSummary, PlatformClient, PlatformConnector, RawSubmission,
};
pub use store::{SqliteStore, Store};
