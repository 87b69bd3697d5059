// Public modules
pub mod base_info;
pub mod dynamic_param;
pub mod message;
pub mod message_kind;
pub mod message_payload;
pub mod result_payload;
pub mod sender;

// Re-exports
pub use base_info::{BaseInfo, BuiltinParam, TableField};
pub use dynamic_param::DynamicParam;
pub use message::Message;
pub use message_kind::MessageKind;
pub use message_payload::MessagePayload;
pub use result_payload::{ResultPayload, ResultStatus};
pub use sender::Sender;
