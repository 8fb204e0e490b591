pub mod assignment;
pub mod loaders;
pub mod platform;
pub mod status;
pub mod submission;

pub use assignment::{format_rubric, initial_watermark, Assignment, RubricGrade};
pub use loaders::{load_seed, Seed};
pub use platform::{Platform, PlatformKind, User};
pub use status::Status;
pub use submission::{NaturalKey, NewSubmission, Submission};
