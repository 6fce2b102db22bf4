pub mod codec;
pub mod envelope;
pub mod error_code;

pub use codec::LineJsonCodec;
pub use envelope::{CoreRequest, CoreResponse, ResponseError, SessionOrigin, SessionProfile};
pub use error_code::ErrorCode;
