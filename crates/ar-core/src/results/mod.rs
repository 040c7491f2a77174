//! Results stream ingestion: outer structure, record decoding and dispatch.

pub mod decode;
pub mod dispatcher;
pub mod reader;

pub use decode::decode_record;
pub use dispatcher::{DispatchStats, ResultDispatcher};
pub use reader::ResultsReader;
