pub mod endpoint;
pub mod error;
pub mod header;
pub mod requests;
pub mod responses;


pub use endpoint::Endpoint;
pub use error::{MinirpcError, Result};
pub use header::{encode_frame, Header, HEADER_SIZE, MAGIC};
pub use requests::{MethodName, MsgId, MsgIdGenerator, Params, Request, ServiceName};
pub use responses::{codes, Response, RpcResult};
