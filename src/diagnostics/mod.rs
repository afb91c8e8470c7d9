pub mod classifier;
pub mod suggest;

pub use classifier::{classify, classify_message, ClassifiedError, ErrorKind};
pub use suggest::{suggest, SuggestionContext};
