mod feedback;
mod link;

pub use feedback::{Feedback, FeedbackRequest};
pub use link::{ClickMetadata, CreateLinkRequest, Facet, Link};
