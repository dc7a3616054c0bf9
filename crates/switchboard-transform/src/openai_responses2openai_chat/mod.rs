//! OpenAI Responses client against an OpenAI-chat upstream.

mod request;
mod response;
mod stream;

pub use request::convert_request;
pub use response::convert_response;
pub use stream::ChatToResponsesStream;
