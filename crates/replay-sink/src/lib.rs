//! Output sink contract and adapters: a debugging line writer and a
//! parameterised HTTP query sink (synchronous or worker-pooled).

pub mod contract;
pub mod error;
pub mod http_query;
pub mod line_writer;

pub use contract::{HashParamNamer, NameParamNamer, OutputSink, ParamNamer};
pub use error::SinkError;
pub use http_query::{HttpQuerySink, WorkerPoolHttpQuerySink};
pub use line_writer::LineWriterSink;
