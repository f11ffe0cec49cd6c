pub mod event_reducer;
pub mod sse_decoder;
pub mod title;

pub use event_reducer::{Effect, Reduction, TurnOutcome, finalize_interrupted, finalize_stopped, reduce};
pub use sse_decoder::{SseDecoder, parse_event};
pub use title::provisional_title;
