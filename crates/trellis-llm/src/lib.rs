pub mod boundary;
pub mod meter;
pub mod mock;
pub mod overflow;
pub mod shrink;
pub mod tokenizer;

pub use boundary::ModelBoundary;
pub use meter::{MemoryMeter, NoopMeter, UsageTotals};
pub use mock::{MockClient, MockReply};
pub use overflow::parse_overflow;
pub use shrink::{shrink_messages, shrink_messages_by};
pub use tokenizer::Tokenizer;
