pub mod grading_prompt;
pub mod lifecycle;

pub use grading_prompt::{
    compose_prompt, is_declared_token, parse_grading_response, rubric_listing, ParsedGrade,
};
pub use lifecycle::{transition, Event};
