//! Job handling: request parsing, the processing pipeline and responses

mod processor;
mod request;
mod response;

pub use processor::{JobStage, Processor};
pub use request::{JobRequest, DEFAULT_FILENAME, NO_AUDIO_DATA};
pub use response::{FailureResponse, JobResponse, SuccessResponse};
