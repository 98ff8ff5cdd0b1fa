pub mod document;
pub mod normalize;
pub mod result;

pub use document::{ConversationDocument, ConversationMessage, MessageAttributes};
pub use normalize::NormalizedResult;
pub use result::AnalyticsResult;
